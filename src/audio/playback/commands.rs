use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::state::{EngineState, StateStore};
use crate::audio::cache::WaveformCache;
use crate::audio::errors::PlaybackError;
use crate::audio::graph::{GraphHandle, MixBus, TempoApplied};
use crate::audio::types::{DeckId, TrackLoadRequest};

type Reply<T> = oneshot::Sender<T>;

// --- Engine Thread Commands ---
#[derive(Debug)]
pub enum EngineCommand {
    LoadTrack {
        deck: DeckId,
        request: TrackLoadRequest,
        reply: Reply<Result<GraphHandle, PlaybackError>>,
    },
    UnloadDeck {
        deck: DeckId,
        reply: Reply<bool>,
    },
    Play {
        deck: DeckId,
        reply: Reply<Result<(), PlaybackError>>,
    },
    Pause {
        deck: DeckId,
        reply: Reply<Result<(), PlaybackError>>,
    },
    Seek {
        deck: DeckId,
        position_seconds: f64,
        reply: Reply<Result<f64, PlaybackError>>,
    },
    SetTempo {
        deck: DeckId,
        ratio: f64,
        reply: Reply<Result<TempoApplied, PlaybackError>>,
    },
    AttachTimeStretch {
        deck: DeckId,
        reply: Reply<Result<TempoApplied, PlaybackError>>,
    },
    ToggleTone {
        deck: DeckId,
        reply: Reply<Result<bool, PlaybackError>>,
    },
    SetCrossfader {
        position: f32,
        reply: Reply<(f32, f32)>,
    },
    SetMasterDeck(Option<DeckId>),
    SetSyncEnabled(bool),
    SetQuantizeEnabled(bool),
    SetActiveDeck(DeckId),
    ApplyBeatOffset {
        correction_seconds: f64,
        reply: Reply<Result<f64, PlaybackError>>,
    },
    NearestMasterBeat(Reply<Option<f64>>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable front end to a running engine thread.
///
/// Every call is a message to the engine; none of them touch the audio
/// callback directly. State reads go straight to the shared [`StateStore`].
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<EngineCommand>,
    state: Arc<StateStore>,
    waveforms: Arc<WaveformCache>,
    mix_bus: MixBus,
}

impl EngineHandle {
    pub(crate) fn new(
        sender: mpsc::Sender<EngineCommand>,
        state: Arc<StateStore>,
        waveforms: Arc<WaveformCache>,
        mix_bus: MixBus,
    ) -> Self {
        EngineHandle {
            sender,
            state,
            waveforms,
            mix_bus,
        }
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn snapshot(&self) -> EngineState {
        self.state.snapshot()
    }

    pub fn waveforms(&self) -> &Arc<WaveformCache> {
        &self.waveforms
    }

    /// Render-side view, for driving output without a device.
    pub fn mix_bus(&self) -> &MixBus {
        &self.mix_bus
    }

    async fn send(&self, command: EngineCommand) -> Result<(), PlaybackError> {
        self.sender
            .send(command)
            .await
            .map_err(|e| PlaybackError::CommandSendError(e.to_string()))
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> EngineCommand) -> Result<T, PlaybackError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(command(reply_tx)).await?;
        reply_rx.await.map_err(|_| PlaybackError::ReplyDropped)
    }

    pub async fn load_track(&self, deck: DeckId, request: TrackLoadRequest) -> Result<GraphHandle, PlaybackError> {
        self.request(|reply| EngineCommand::LoadTrack { deck, request, reply })
            .await?
    }

    pub async fn unload_deck(&self, deck: DeckId) -> Result<bool, PlaybackError> {
        self.request(|reply| EngineCommand::UnloadDeck { deck, reply }).await
    }

    pub async fn play(&self, deck: DeckId) -> Result<(), PlaybackError> {
        self.request(|reply| EngineCommand::Play { deck, reply }).await?
    }

    pub async fn pause(&self, deck: DeckId) -> Result<(), PlaybackError> {
        self.request(|reply| EngineCommand::Pause { deck, reply }).await?
    }

    pub async fn seek(&self, deck: DeckId, position_seconds: f64) -> Result<f64, PlaybackError> {
        self.request(|reply| EngineCommand::Seek {
            deck,
            position_seconds,
            reply,
        })
        .await?
    }

    pub async fn set_tempo(&self, deck: DeckId, ratio: f64) -> Result<TempoApplied, PlaybackError> {
        self.request(|reply| EngineCommand::SetTempo { deck, ratio, reply })
            .await?
    }

    pub async fn attach_time_stretch(&self, deck: DeckId) -> Result<TempoApplied, PlaybackError> {
        self.request(|reply| EngineCommand::AttachTimeStretch { deck, reply })
            .await?
    }

    pub async fn toggle_tone(&self, deck: DeckId) -> Result<bool, PlaybackError> {
        self.request(|reply| EngineCommand::ToggleTone { deck, reply }).await?
    }

    pub async fn set_crossfader(&self, position: f32) -> Result<(f32, f32), PlaybackError> {
        self.request(|reply| EngineCommand::SetCrossfader { position, reply })
            .await
    }

    pub async fn set_master_deck(&self, master: Option<DeckId>) -> Result<(), PlaybackError> {
        self.send(EngineCommand::SetMasterDeck(master)).await
    }

    pub async fn set_sync_enabled(&self, enabled: bool) -> Result<(), PlaybackError> {
        self.send(EngineCommand::SetSyncEnabled(enabled)).await
    }

    pub async fn set_quantize_enabled(&self, enabled: bool) -> Result<(), PlaybackError> {
        self.send(EngineCommand::SetQuantizeEnabled(enabled)).await
    }

    pub async fn set_active_deck(&self, deck: DeckId) -> Result<(), PlaybackError> {
        self.send(EngineCommand::SetActiveDeck(deck)).await
    }

    pub async fn apply_beat_offset(&self, correction_seconds: f64) -> Result<f64, PlaybackError> {
        self.request(|reply| EngineCommand::ApplyBeatOffset {
            correction_seconds,
            reply,
        })
        .await?
    }

    pub async fn nearest_master_beat(&self) -> Result<Option<f64>, PlaybackError> {
        self.request(EngineCommand::NearestMasterBeat).await
    }

    /// Unloads both decks and stops the engine loop. Resolves once the
    /// engine has acknowledged.
    pub async fn shutdown(&self) -> Result<(), PlaybackError> {
        self.request(EngineCommand::Shutdown).await
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("closed", &self.sender.is_closed())
            .field("mix_bus", &self.mix_bus)
            .finish()
    }
}
