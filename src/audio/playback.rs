use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::audio::cache::WaveformCache;
use crate::audio::config::{ENGINE_COMMAND_CHAN_SIZE, EngineConfig};
use crate::audio::devices;
use crate::audio::errors::PlaybackError;
use crate::audio::graph::{MixBus, StretchModuleLoader};

pub mod commands;
pub mod events;
mod mixer;
pub mod state;
pub mod sync;

use commands::{EngineCommand, EngineHandle};
pub use mixer::MixerController;
use state::StateStore;

/// What the engine thread hands back once it is running.
struct EngineParts {
    state: Arc<StateStore>,
    waveforms: Arc<WaveformCache>,
    mix_bus: MixBus,
}

// --- Engine Thread ---

/// Starts the engine on a dedicated thread and waits until it is ready to
/// take commands. The returned join handle finishes after
/// [`EngineHandle::shutdown`] or once every handle is dropped.
pub fn spawn_engine(
    config: EngineConfig,
    loader: Arc<dyn StretchModuleLoader>,
) -> Result<(EngineHandle, JoinHandle<()>), PlaybackError> {
    config.validate()?;
    let (command_tx, command_rx) = mpsc::channel(ENGINE_COMMAND_CHAN_SIZE);
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();

    let thread = std::thread::Builder::new()
        .name("deckmix-engine".to_string())
        .spawn(move || run_engine_thread(config, loader, command_rx, ready_tx))
        .map_err(PlaybackError::ThreadSpawnError)?;

    match ready_rx.recv() {
        Ok(Ok(parts)) => Ok((
            EngineHandle::new(command_tx, parts.state, parts.waveforms, parts.mix_bus),
            thread,
        )),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => {
            let _ = thread.join();
            Err(PlaybackError::ThreadSpawnError(std::io::Error::other(
                "engine thread exited during startup",
            )))
        }
    }
}

fn run_engine_thread(
    config: EngineConfig,
    loader: Arc<dyn StretchModuleLoader>,
    mut receiver: mpsc::Receiver<EngineCommand>,
    ready: std::sync::mpsc::Sender<Result<EngineParts, PlaybackError>>,
) {
    log::info!("Engine Thread: Starting...");

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("Engine Thread: Failed to build Tokio runtime: {}", e);
            let _ = ready.send(Err(PlaybackError::RuntimeBuildError(e)));
            return;
        }
    };

    let controller = match MixerController::with_runtime(config.clone(), loader, rt.handle().clone()) {
        Ok(controller) => Arc::new(controller),
        Err(e) => {
            log::error!("Engine Thread: Failed to build mixer: {}", e);
            let _ = ready.send(Err(e));
            return;
        }
    };

    // cpal streams are not Send; this one lives and dies on this thread.
    let _stream = if config.open_output_device {
        match devices::open_output_stream(controller.mix_bus()) {
            Ok(stream) => Some(stream),
            Err(e) => {
                log::warn!("Engine Thread: No audio output, continuing without a device: {}", e);
                None
            }
        }
    } else {
        None
    };

    let parts = EngineParts {
        state: controller.state().clone(),
        waveforms: controller.waveforms().clone(),
        mix_bus: controller.mix_bus(),
    };
    if ready.send(Ok(parts)).is_err() {
        log::error!("Engine Thread: Spawner went away before startup finished");
        return;
    }

    rt.block_on(async move {
        log::info!("Engine Thread: Entering main loop.");
        let mut should_shutdown = false;
        let mut tick_interval = tokio::time::interval(Duration::from_millis(config.tick_interval_ms));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !should_shutdown {
            tokio::select! {
                maybe_command = receiver.recv() => {
                    match maybe_command {
                        Some(command) => {
                            log::debug!("Engine Thread Received: {:?}", command);
                            should_shutdown = handle_command(&controller, command);
                        }
                        None => {
                            log::info!("Engine Thread: Command channel closed. Exiting loop.");
                            controller.shutdown();
                            should_shutdown = true;
                        }
                    }
                }
                _ = tick_interval.tick(), if !should_shutdown => {
                    controller.tick();
                }
            }
        }
        log::info!("Engine Thread: Loop finished.");
    });
    log::info!("Engine Thread: Stopped.");
}

/// Runs one command against the controller. Returns true on shutdown.
fn handle_command(controller: &Arc<MixerController>, command: EngineCommand) -> bool {
    match command {
        EngineCommand::LoadTrack { deck, request, reply } => {
            let _ = reply.send(controller.load_track(deck, request));
        }
        EngineCommand::UnloadDeck { deck, reply } => {
            let _ = reply.send(controller.unload_deck(deck));
        }
        EngineCommand::Play { deck, reply } => {
            let _ = reply.send(controller.play(deck));
        }
        EngineCommand::Pause { deck, reply } => {
            let _ = reply.send(controller.pause(deck));
        }
        EngineCommand::Seek {
            deck,
            position_seconds,
            reply,
        } => {
            let _ = reply.send(controller.seek(deck, position_seconds));
        }
        EngineCommand::SetTempo { deck, ratio, reply } => {
            let _ = reply.send(controller.set_tempo(deck, ratio));
        }
        EngineCommand::AttachTimeStretch { deck, reply } => {
            // The module load may take a while; keep serving commands meanwhile.
            let controller = controller.clone();
            tokio::spawn(async move {
                let _ = reply.send(controller.attach_time_stretch(deck).await);
            });
        }
        EngineCommand::ToggleTone { deck, reply } => {
            let _ = reply.send(controller.toggle_tone(deck));
        }
        EngineCommand::SetCrossfader { position, reply } => {
            let _ = reply.send(controller.set_crossfader(position));
        }
        EngineCommand::SetMasterDeck(master) => controller.set_master_deck(master),
        EngineCommand::SetSyncEnabled(enabled) => controller.set_sync_enabled(enabled),
        EngineCommand::SetQuantizeEnabled(enabled) => controller.set_quantize_enabled(enabled),
        EngineCommand::SetActiveDeck(deck) => controller.set_active_deck(deck),
        EngineCommand::ApplyBeatOffset {
            correction_seconds,
            reply,
        } => {
            let _ = reply.send(controller.apply_beat_offset(correction_seconds));
        }
        EngineCommand::NearestMasterBeat(reply) => {
            let _ = reply.send(controller.nearest_master_beat());
        }
        EngineCommand::Shutdown(shutdown_complete_tx) => {
            log::info!("Engine Thread: Shutdown received. Unloading decks.");
            controller.shutdown();
            if shutdown_complete_tx.send(()).is_err() {
                log::error!("Engine Thread: Failed to send shutdown completion signal.");
            }
            return true;
        }
    }
    false
}
