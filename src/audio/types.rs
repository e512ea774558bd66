use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::audio::source::TrackSource;

// --- Deck Identity ---

/// One of the two logical decks.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeckId {
    A,
    B,
}

impl DeckId {
    pub const ALL: [DeckId; 2] = [DeckId::A, DeckId::B];

    pub fn index(self) -> usize {
        match self {
            DeckId::A => 0,
            DeckId::B => 1,
        }
    }

    pub fn other(self) -> DeckId {
        match self {
            DeckId::A => DeckId::B,
            DeckId::B => DeckId::A,
        }
    }
}

impl fmt::Display for DeckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeckId::A => f.write_str("A"),
            DeckId::B => f.write_str("B"),
        }
    }
}

/// Opaque track identifier supplied by the track-resolution layer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TrackId(pub String);

impl From<&str> for TrackId {
    fn from(value: &str) -> Self {
        TrackId(value.to_string())
    }
}

impl From<String> for TrackId {
    fn from(value: String) -> Self {
        TrackId(value)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Waveform Summary ---

/// One 1/100 s slice of a track's loudness profile. All fields are in [0, 1].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct WaveformSample {
    pub low: f32,
    pub mid: f32,
    pub high: f32,
    pub total: f32,
}

/// Ordered, immutable waveform summary for a whole track.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WaveformSeries {
    samples: Vec<WaveformSample>,
}

impl WaveformSeries {
    pub fn new(samples: Vec<WaveformSample>) -> Self {
        WaveformSeries { samples }
    }

    /// "No visualization available".
    pub fn empty() -> Self {
        WaveformSeries::default()
    }

    pub fn samples(&self) -> &[WaveformSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// --- Deck State ---

/// Per-deck lifecycle. `Error` is reachable from Loading, Ready and Playing;
/// `Empty` from anywhere via unload.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum DeckStatus {
    #[default]
    Empty,
    Loading,
    Ready,
    Playing,
    Paused,
    Ended,
    Error,
}

impl DeckStatus {
    /// States from which tempo, tone and transport operations mean something.
    pub fn accepts_controls(self) -> bool {
        !matches!(self, DeckStatus::Empty | DeckStatus::Error)
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeckState {
    pub loaded_track: Option<TrackId>,
    pub status: DeckStatus,
    pub is_playing: bool,
    pub is_loading: bool,
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub tempo_ratio: f64,
    pub position_advance_rate: f64,
    pub tone_boost: bool,
    pub beat_offset_correction: f64,
    pub stretch_active: bool,
    pub error: Option<String>,
}

impl Default for DeckState {
    fn default() -> Self {
        DeckState {
            loaded_track: None,
            status: DeckStatus::Empty,
            is_playing: false,
            is_loading: false,
            position_seconds: 0.0,
            duration_seconds: 0.0,
            tempo_ratio: 1.0,
            position_advance_rate: 1.0,
            tone_boost: true,
            beat_offset_correction: 0.0,
            stretch_active: false,
            error: None,
        }
    }
}

// --- Mixer State ---

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MixerState {
    pub crossfader_position: f32,
    pub master_deck: Option<DeckId>,
    pub sync_enabled: bool,
    pub quantize_enabled: bool,
    pub active_deck: DeckId,
}

impl Default for MixerState {
    fn default() -> Self {
        MixerState {
            crossfader_position: 0.0,
            master_deck: None,
            sync_enabled: false,
            quantize_enabled: false,
            active_deck: DeckId::A,
        }
    }
}

// --- Load Requests ---

/// Everything the engine needs to put a track on a deck. Tempo metadata is
/// supplied by the caller; the engine never detects it.
#[derive(Clone, Debug)]
pub struct TrackLoadRequest {
    pub track_id: TrackId,
    pub source: Arc<dyn TrackSource>,
    pub bpm: Option<f64>,
    pub first_beat_seconds: Option<f64>,
}

impl TrackLoadRequest {
    pub fn new(track_id: impl Into<TrackId>, source: Arc<dyn TrackSource>) -> Self {
        TrackLoadRequest {
            track_id: track_id.into(),
            source,
            bpm: None,
            first_beat_seconds: None,
        }
    }

    pub fn with_tempo(mut self, bpm: f64, first_beat_seconds: f64) -> Self {
        self.bpm = Some(bpm);
        self.first_beat_seconds = Some(first_beat_seconds);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deck_ids_index_and_swap() {
        assert_eq!(DeckId::A.index(), 0);
        assert_eq!(DeckId::B.index(), 1);
        assert_eq!(DeckId::A.other(), DeckId::B);
        assert_eq!(DeckId::B.other(), DeckId::A);
    }

    #[test]
    fn deck_state_serializes_camel_case() {
        let json = serde_json::to_value(DeckState::default()).unwrap();
        assert_eq!(json["positionAdvanceRate"], 1.0);
        assert_eq!(json["toneBoost"], true);
        assert_eq!(json["status"], "empty");
    }
}
