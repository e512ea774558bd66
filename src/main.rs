// Demo: analyses one or two audio files, then plays them through the engine
// with a slow crossfade from deck A to deck B.

use std::sync::Arc;
use std::time::Duration;

use deckmix::{
    DeckId, EngineConfig, FileSource, TrackLoadRequest, TrackSource, UnavailableStretchLoader, init_logging,
    spawn_engine,
};

const CROSSFADE_STEPS: u32 = 40;
const CROSSFADE_STEP_MS: u64 = 250;

fn main() {
    init_logging();

    let paths: Vec<String> = std::env::args().skip(1).take(2).collect();
    if paths.is_empty() {
        eprintln!("usage: deckmix <track-a> [track-b]");
        std::process::exit(2);
    }

    let rt = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("Failed to build Tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(paths)) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(paths: Vec<String>) -> Result<(), deckmix::PlaybackError> {
    let (engine, thread) = spawn_engine(EngineConfig::default(), Arc::new(UnavailableStretchLoader))?;

    for (deck, path) in DeckId::ALL.into_iter().zip(paths.iter()) {
        let source: Arc<dyn TrackSource> = Arc::new(FileSource::new(path));
        engine
            .load_track(deck, TrackLoadRequest::new(path.as_str(), source.clone()))
            .await?;
        let series = engine.waveforms().preload(path.as_str().into(), source).await;
        log::info!("Deck {}: '{}' has {} waveform points", deck, path, series.len());
    }

    engine.set_crossfader(-1.0).await?;
    for deck in DeckId::ALL.into_iter().take(paths.len()) {
        let mut attempts = 0;
        while !engine.snapshot().deck(deck).status.accepts_controls() || engine.play(deck).await.is_err() {
            attempts += 1;
            if attempts > 100 {
                log::warn!("Deck {} never became ready", deck);
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    if paths.len() > 1 {
        for step in 0..=CROSSFADE_STEPS {
            let position = -1.0 + 2.0 * step as f32 / CROSSFADE_STEPS as f32;
            let (a, b) = engine.set_crossfader(position).await?;
            log::info!("Crossfader {:+.2}: A {:.2} B {:.2}", position, a, b);
            tokio::time::sleep(Duration::from_millis(CROSSFADE_STEP_MS)).await;
        }
    } else {
        tokio::time::sleep(Duration::from_millis(CROSSFADE_STEP_MS * CROSSFADE_STEPS as u64)).await;
    }

    log::info!("Final state: {:?}", engine.snapshot());
    log::info!("Waveform cache: {:?}", engine.waveforms().stats());
    engine.shutdown().await?;
    if thread.join().is_err() {
        log::error!("Engine thread panicked");
    }
    Ok(())
}
