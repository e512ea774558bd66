use symphonia::core::errors::Error as SymphoniaError;
use thiserror::Error;

use crate::audio::types::{DeckId, DeckStatus};

#[derive(Error, Debug)]
pub enum AudioDecodingError {
    #[error("Failed to open track source '{source_name}': {source}")]
    SourceOpenError {
        source_name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Track source '{source_name}' is too small to be audio ({len} bytes)")]
    SourceTooSmall { source_name: String, len: u64 },
    #[error("Symphonia probe/format error for '{source_name}': {source}")]
    FormatError {
        source_name: String,
        #[source]
        source: SymphoniaError,
    },
    #[error("No suitable audio track in '{source_name}'")]
    NoSuitableTrack { source_name: String },
    #[error("Sample rate missing in '{source_name}'")]
    MissingSampleRate { source_name: String },
    #[error("Channel info missing in '{source_name}'")]
    MissingChannelInfo { source_name: String },
    #[error("Failed to create decoder for '{source_name}': {source}")]
    DecoderCreationError {
        source_name: String,
        #[source]
        source: SymphoniaError,
    },
    #[error("Symphonia fatal decode error in '{source_name}': {source}")]
    FatalDecodeError {
        source_name: String,
        #[source]
        source: SymphoniaError,
    },
    #[error("Symphonia I/O error reading packet for '{source_name}': {source}")]
    PacketReadIoError {
        source_name: String,
        #[source]
        source: SymphoniaError,
    },
    #[error("No samples decoded from '{source_name}'")]
    NoSamplesDecoded { source_name: String },
    #[error("Resampling {from} Hz -> {to} Hz failed: {reason}")]
    ResampleError { from: u32, to: u32, reason: String },
    #[error("Decoding task for '{source_name}' did not complete: {reason}")]
    DecodeTaskFailed { source_name: String, reason: String },
}

/// Capability errors for the optional time-stretch module.
///
/// Cloned into every waiter of a per-context module load, so it carries
/// messages rather than source errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StretchError {
    #[error("Time-stretch is not supported in this environment: {0}")]
    Unsupported(String),
    #[error("Time-stretch module failed to load: {0}")]
    LoadFailed(String),
    #[error("Time-stretch processor could not be created: {0}")]
    ProcessorCreation(String),
}

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Deck '{deck}' cannot accept this operation while {status:?}")]
    DeckUnavailable { deck: DeckId, status: DeckStatus },
    #[error("Deck '{deck}' was unloaded or reloaded while the operation was in flight")]
    Superseded { deck: DeckId },
    #[error("Invalid tempo ratio {ratio} for deck '{deck}'")]
    InvalidTempo { deck: DeckId, ratio: f64 },
    #[error("Wiring error on deck '{deck}': {reason}")]
    Wiring { deck: DeckId, reason: String },
    #[error("Failed to calculate {filter_type} coefficients")]
    CoefficientCalculationError { filter_type: String },
    #[error(transparent)]
    StretchUnavailable(#[from] StretchError),
}

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Failed to initialize audio output stream: {0}")]
    OutputStreamInitError(String),
    #[error("No default audio output device available")]
    NoDefaultOutputDevice,
    #[error("Audio output uses unsupported sample format {0}")]
    UnsupportedSampleFormat(String),
    #[error("Failed to build or start audio output stream: {0}")]
    OutputStreamError(String),
    #[error("Audio command send error: {0}")]
    CommandSendError(String),
    #[error("Engine reply channel closed before a response arrived")]
    ReplyDropped,
    #[error("Failed to spawn engine thread: {0}")]
    ThreadSpawnError(#[source] std::io::Error),
    #[error("Failed to build engine runtime: {0}")]
    RuntimeBuildError(#[source] std::io::Error),
    #[error("No tokio runtime available to drive the mixer: {0}")]
    RuntimeUnavailable(String),
    #[error("Deck '{deck}' has no tempo metadata (bpm) for sync")]
    MissingTempo { deck: DeckId },
    #[error("Sync is not active: enable sync and choose a master deck first")]
    SyncInactive,
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse engine config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid engine config: {0}")]
    Invalid(String),
}
