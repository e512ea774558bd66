use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deckmix::{
    DeckId, DeckState, DeckStatus, EngineConfig, GraphError, MemorySource, MixerController, PlaybackError,
    StretchError, StretchModuleLoader, TimeStretchModule, TimeStretchProcessor, TrackLoadRequest, TrackSource,
    UnavailableStretchLoader, WaveformCache, spawn_engine,
};

const RATE: u32 = 8000;

// --- Fixtures ---

fn wav_source(name: &str, seconds: f32, sample_rate: u32) -> Arc<dyn TrackSource> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let frames = (seconds * sample_rate as f32) as usize;
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let s = 0.4 * (2.0 * std::f32::consts::PI * 110.0 * t).sin();
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    Arc::new(MemorySource::new(name, cursor.into_inner()).with_extension("wav"))
}

fn config() -> EngineConfig {
    EngineConfig {
        output_sample_rate: RATE,
        open_output_device: false,
        ..EngineConfig::default()
    }
}

struct NullStretch;

impl TimeStretchProcessor for NullStretch {
    fn set_tempo(&mut self, _tempo: f64) {}
    fn process(&mut self, _block: &mut [f32]) {}
    fn reset(&mut self) {}
}

struct NullModule;

impl TimeStretchModule for NullModule {
    fn name(&self) -> &str {
        "null"
    }

    fn create_processor(&self, _sample_rate: u32) -> Result<Box<dyn TimeStretchProcessor>, StretchError> {
        Ok(Box::new(NullStretch))
    }
}

#[derive(Default)]
struct SlowCountingLoader {
    loads: AtomicUsize,
    delay: Mutex<Duration>,
}

impl StretchModuleLoader for SlowCountingLoader {
    fn load(&self) -> Result<Arc<dyn TimeStretchModule>, StretchError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        std::thread::sleep(delay);
        Ok(Arc::new(NullModule))
    }
}

async fn wait_for(mixer: &MixerController, deck: DeckId, status: DeckStatus) {
    for _ in 0..500 {
        mixer.pump_events();
        if mixer.state().deck(deck).status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("deck {} never reached {:?}", deck, status);
}

async fn two_decks(loader: Arc<dyn StretchModuleLoader>) -> MixerController {
    let mixer = MixerController::new(config(), loader).unwrap();
    mixer
        .load_track(DeckId::A, TrackLoadRequest::new("a", wav_source("a", 2.0, RATE)))
        .unwrap();
    mixer
        .load_track(DeckId::B, TrackLoadRequest::new("b", wav_source("b", 2.0, RATE)))
        .unwrap();
    wait_for(&mixer, DeckId::A, DeckStatus::Ready).await;
    wait_for(&mixer, DeckId::B, DeckStatus::Ready).await;
    mixer
}

// --- Crossfader ---

#[tokio::test]
async fn unloading_one_deck_leaves_the_other_gain_alone() {
    let mixer = two_decks(Arc::new(UnavailableStretchLoader)).await;
    assert_eq!(mixer.set_crossfader(0.5), (0.25, 0.75));

    assert!(mixer.unload_deck(DeckId::B));
    assert_eq!(mixer.gains(), (0.25, 0.75));
    assert_eq!(mixer.state().mixer().crossfader_position, 0.5);

    mixer.play(DeckId::A).unwrap();
    let out = mixer.mix_bus().render_offline(4000);
    // First block ramps from the build-time gain.
    let peak = out.iter().skip(1024).fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak > 0.05 && peak <= 0.4 * 0.25 + 0.02, "peak {}", peak);
}

#[tokio::test]
async fn crossfader_endpoints_silence_the_far_deck() {
    let mixer = two_decks(Arc::new(UnavailableStretchLoader)).await;
    mixer.set_crossfader(1.0);
    mixer.play(DeckId::A).unwrap();
    let out = mixer.mix_bus().render_offline(2048);
    assert!(out.iter().skip(1024).all(|s| s.abs() < 1e-6));
}

// --- Unload ---

#[tokio::test]
async fn unload_twice_matches_unload_once() {
    let mixer = two_decks(Arc::new(UnavailableStretchLoader)).await;
    mixer.play(DeckId::A).unwrap();

    assert!(mixer.unload_deck(DeckId::A));
    let once = mixer.state().deck(DeckId::A);
    assert!(!mixer.unload_deck(DeckId::A));
    let twice = mixer.state().deck(DeckId::A);

    assert_eq!(once, twice);
    assert_eq!(twice, DeckState::default());
    assert!(mixer.chain(DeckId::A).is_none());
    assert_eq!(mixer.state().deck(DeckId::B).status, DeckStatus::Ready);
}

#[tokio::test]
async fn unload_during_stretch_attach_discards_the_attach() {
    let loader = Arc::new(SlowCountingLoader::default());
    *loader.delay.lock().unwrap() = Duration::from_millis(150);
    let mixer = two_decks(loader.clone()).await;

    let (attached, unloaded) = tokio::join!(mixer.attach_time_stretch(DeckId::A), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        mixer.unload_deck(DeckId::A)
    });

    assert!(unloaded);
    assert!(matches!(
        attached,
        Err(PlaybackError::Graph(GraphError::Superseded { deck: DeckId::A }))
    ));
    assert!(mixer.chain(DeckId::A).is_none());
    assert_eq!(mixer.state().deck(DeckId::A).status, DeckStatus::Empty);
}

// --- Tempo ---

#[tokio::test]
async fn tempo_regimes_report_position_advance_rate() {
    let native = two_decks(Arc::new(UnavailableStretchLoader)).await;
    native.attach_time_stretch(DeckId::A).await.unwrap();
    assert_eq!(native.set_tempo(DeckId::A, 1.3).unwrap().position_advance_rate, 1.3);

    let stretched = two_decks(Arc::new(SlowCountingLoader::default())).await;
    stretched.attach_time_stretch(DeckId::A).await.unwrap();
    let applied = stretched.set_tempo(DeckId::A, 1.3).unwrap();
    assert_eq!(applied.tempo_ratio, 1.3);
    assert_eq!(applied.position_advance_rate, 1.0);
    assert!(stretched.state().deck(DeckId::A).stretch_active);

    // Native rate moves the read head faster; stretch leaves it at 1x.
    native.play(DeckId::A).unwrap();
    stretched.play(DeckId::A).unwrap();
    native.mix_bus().render_offline(RATE as usize / 2);
    stretched.mix_bus().render_offline(RATE as usize / 2);
    assert!((native.position_seconds(DeckId::A) - 0.65).abs() < 1e-3);
    assert!((stretched.position_seconds(DeckId::A) - 0.5).abs() < 1e-3);
}

#[tokio::test]
async fn stretch_module_loads_once_per_context() {
    let loader = Arc::new(SlowCountingLoader::default());
    let first = two_decks(loader.clone()).await;
    let (a, b) = tokio::join!(
        first.attach_time_stretch(DeckId::A),
        first.attach_time_stretch(DeckId::B)
    );
    assert!(a.unwrap().stretch_active && b.unwrap().stretch_active);
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

    let second = two_decks(loader.clone()).await;
    second.attach_time_stretch(DeckId::A).await.unwrap();
    assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    assert_ne!(first.context(), second.context());
}

// --- Waveforms ---

#[tokio::test]
async fn concurrent_preloads_share_one_analysis() {
    let cache = WaveformCache::new(20);
    let source = wav_source("long", 180.0, 44100);
    let (a, b) = tokio::join!(
        cache.preload("long".into(), source.clone()),
        cache.preload("long".into(), source.clone())
    );
    assert_eq!(a.len(), 18000);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(cache.stats().analyses, 1);
    assert!(Arc::ptr_eq(&a, &cache.get(&"long".into()).unwrap()));
}

#[tokio::test]
async fn same_track_on_both_decks_is_analysed_once() {
    let mixer = MixerController::new(config(), Arc::new(UnavailableStretchLoader)).unwrap();
    let source = wav_source("shared", 1.5, RATE);
    mixer
        .load_track(DeckId::A, TrackLoadRequest::new("shared", source.clone()))
        .unwrap();
    mixer
        .load_track(DeckId::B, TrackLoadRequest::new("shared", source.clone()))
        .unwrap();

    let series = mixer.waveforms().preload("shared".into(), source).await;
    assert_eq!(series.len(), 150);
    assert_eq!(mixer.waveforms().stats().analyses, 1);

    // Unloading one deck must not cancel the other's waveform.
    mixer.unload_deck(DeckId::A);
    assert!(mixer.waveforms().get(&"shared".into()).is_some());
}

// --- Engine Thread ---

#[test]
fn engine_thread_reports_progress_through_state() {
    let (engine, thread) = spawn_engine(config(), Arc::new(UnavailableStretchLoader)).unwrap();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();

    rt.block_on(async {
        engine
            .load_track(DeckId::A, TrackLoadRequest::new("a", wav_source("a", 3.0, RATE)))
            .await
            .unwrap();
        for _ in 0..500 {
            if engine.snapshot().deck(DeckId::A).status == DeckStatus::Ready {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(engine.snapshot().deck(DeckId::A).duration_seconds, 3.0);
        assert_eq!(engine.set_crossfader(-1.0).await.unwrap(), (1.0, 0.0));

        engine.play(DeckId::A).await.unwrap();
        engine.mix_bus().render_offline(RATE as usize);
        let mut position = 0.0;
        for _ in 0..200 {
            position = engine.snapshot().deck(DeckId::A).position_seconds;
            if position > 0.9 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!((position - 1.0).abs() < 1e-6, "position {}", position);
        assert!(engine.snapshot().deck(DeckId::A).is_playing);

        engine.shutdown().await.unwrap();
    });
    thread.join().unwrap();
}
