use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::audio::types::{DeckId, DeckState, DeckStatus, TrackId};

// --- Event Payloads ---

/// A lifecycle notification from the graph layer, stamped with the deck
/// generation that produced it.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeckEvent {
    pub deck: DeckId,
    pub generation: u64,
    pub kind: DeckEventKind,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeckEventKind {
    #[serde(rename_all = "camelCase")]
    LoadStarted { track_id: TrackId },
    #[serde(rename_all = "camelCase")]
    DurationKnown { duration_seconds: f64 },
    Ready,
    Playing,
    Paused,
    Ended,
    #[serde(rename_all = "camelCase")]
    TimeAdvanced { position_seconds: f64 },
    Error { message: String },
    Unloaded,
}

pub(crate) type DeckEventSender = UnboundedSender<DeckEvent>;

// --- Event Emitter Helpers ---

pub(crate) fn send_deck_event(events: &DeckEventSender, deck: DeckId, generation: u64, kind: DeckEventKind) {
    log::trace!("Deck Events: {} gen {} {:?}", deck, generation, kind);
    if let Err(e) = events.send(DeckEvent {
        deck,
        generation,
        kind,
    }) {
        log::warn!("Deck Events: Receiver gone, dropped {:?} for deck {}", e.0.kind, deck);
    }
}

// --- Reducer ---

/// Folds one event into the observable state of its deck.
pub(crate) fn apply_event(state: &mut DeckState, kind: &DeckEventKind) {
    match kind {
        DeckEventKind::LoadStarted { track_id } => {
            let tone_boost = state.tone_boost;
            let stretch_active = state.stretch_active;
            *state = DeckState {
                loaded_track: Some(track_id.clone()),
                status: DeckStatus::Loading,
                is_loading: true,
                tone_boost,
                stretch_active,
                ..DeckState::default()
            };
        }
        DeckEventKind::DurationKnown { duration_seconds } => {
            state.duration_seconds = *duration_seconds;
        }
        DeckEventKind::Ready => {
            state.status = DeckStatus::Ready;
            state.is_loading = false;
            state.error = None;
        }
        DeckEventKind::Playing => {
            state.status = DeckStatus::Playing;
            state.is_playing = true;
        }
        DeckEventKind::Paused => {
            state.status = DeckStatus::Paused;
            state.is_playing = false;
        }
        DeckEventKind::Ended => {
            state.status = DeckStatus::Ended;
            state.is_playing = false;
            state.position_seconds = 0.0;
        }
        DeckEventKind::TimeAdvanced { position_seconds } => {
            state.position_seconds = *position_seconds;
        }
        DeckEventKind::Error { message } => {
            state.status = DeckStatus::Error;
            state.is_loading = false;
            state.is_playing = false;
            state.error = Some(message.clone());
        }
        DeckEventKind::Unloaded => {
            *state = DeckState::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded() -> DeckState {
        let mut state = DeckState::default();
        apply_event(
            &mut state,
            &DeckEventKind::LoadStarted {
                track_id: TrackId::from("t1"),
            },
        );
        apply_event(&mut state, &DeckEventKind::DurationKnown { duration_seconds: 180.0 });
        apply_event(&mut state, &DeckEventKind::Ready);
        state
    }

    #[test]
    fn load_sequence_reaches_ready() {
        let state = loaded();
        assert_eq!(state.status, DeckStatus::Ready);
        assert!(!state.is_loading);
        assert_eq!(state.duration_seconds, 180.0);
        assert_eq!(state.loaded_track, Some(TrackId::from("t1")));
    }

    #[test]
    fn ended_stops_and_rewinds() {
        let mut state = loaded();
        apply_event(&mut state, &DeckEventKind::Playing);
        apply_event(&mut state, &DeckEventKind::TimeAdvanced { position_seconds: 42.0 });
        apply_event(&mut state, &DeckEventKind::Ended);
        assert_eq!(state.status, DeckStatus::Ended);
        assert!(!state.is_playing);
        assert_eq!(state.position_seconds, 0.0);
    }

    #[test]
    fn error_clears_loading_and_playing() {
        let mut state = DeckState::default();
        apply_event(
            &mut state,
            &DeckEventKind::LoadStarted {
                track_id: TrackId::from("bad"),
            },
        );
        state.is_playing = true;
        apply_event(
            &mut state,
            &DeckEventKind::Error {
                message: "decode failed".into(),
            },
        );
        assert_eq!(state.status, DeckStatus::Error);
        assert!(!state.is_loading && !state.is_playing);
        assert_eq!(state.error.as_deref(), Some("decode failed"));
    }

    #[test]
    fn new_load_keeps_tone_setting() {
        let mut state = loaded();
        state.tone_boost = false;
        state.tempo_ratio = 1.2;
        apply_event(
            &mut state,
            &DeckEventKind::LoadStarted {
                track_id: TrackId::from("t2"),
            },
        );
        assert!(!state.tone_boost);
        assert_eq!(state.tempo_ratio, 1.0);
        assert_eq!(state.status, DeckStatus::Loading);
    }

    #[test]
    fn event_serializes_tagged() {
        let event = DeckEvent {
            deck: DeckId::B,
            generation: 3,
            kind: DeckEventKind::TimeAdvanced { position_seconds: 1.5 },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["deck"], "B");
        assert_eq!(json["kind"]["type"], "timeAdvanced");
        assert_eq!(json["kind"]["positionSeconds"], 1.5);
    }
}
