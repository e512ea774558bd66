//! Two-deck mixing engine: per-deck processing graphs summed onto one
//! output bus, a crossfader with tempo sync, and a cached waveform
//! analyzer for track overviews.

pub mod audio;

pub use audio::analysis::WaveformAnalyzer;
pub use audio::cache::{CacheStats, WaveformCache};
pub use audio::config::EngineConfig;
pub use audio::errors::{AudioDecodingError, ConfigError, GraphError, PlaybackError, StretchError};
pub use audio::graph::{
    DeckAudioGraph, GraphHandle, MixBus, StretchModuleLoader, TempoApplied, TimeStretchModule,
    TimeStretchProcessor, UnavailableStretchLoader,
};
pub use audio::playback::commands::EngineHandle;
pub use audio::playback::state::{EngineState, StateStore};
pub use audio::playback::{MixerController, spawn_engine};
pub use audio::source::{FileSource, MemorySource, TrackSource};
pub use audio::types::{
    DeckId, DeckState, DeckStatus, MixerState, TrackId, TrackLoadRequest, WaveformSample,
    WaveformSeries,
};

/// Installs `env_logger` with an `info` default (`RUST_LOG` overrides).
/// Later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
