use serde::Serialize;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::events::{DeckEvent, apply_event};
use crate::audio::types::{DeckId, DeckState, MixerState};

/// Point-in-time copy of everything an observer may read.
#[derive(Serialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    pub decks: [DeckState; 2],
    pub mixer: MixerState,
}

impl EngineState {
    pub fn deck(&self, deck: DeckId) -> &DeckState {
        &self.decks[deck.index()]
    }
}

#[derive(Default)]
struct StoreInner {
    state: EngineState,
    generations: [u64; 2],
}

/// Observable deck and mixer state. Readers get copies; only the engine
/// writes, through event application or the mixer's own updates.
#[derive(Default)]
pub struct StateStore {
    inner: RwLock<StoreInner>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> EngineState {
        self.read().state.clone()
    }

    pub fn deck(&self, deck: DeckId) -> DeckState {
        self.read().state.decks[deck.index()].clone()
    }

    pub fn mixer(&self) -> MixerState {
        self.read().state.mixer.clone()
    }

    /// Applies `event` unless an event from a newer generation of the same
    /// deck has already been seen. Returns whether it was applied.
    pub(crate) fn apply(&self, event: &DeckEvent) -> bool {
        let mut inner = self.write();
        let idx = event.deck.index();
        if event.generation < inner.generations[idx] {
            log::debug!(
                "State Store: Ignoring stale {:?} for deck {} (generation {} < {})",
                event.kind,
                event.deck,
                event.generation,
                inner.generations[idx]
            );
            return false;
        }
        inner.generations[idx] = event.generation;
        apply_event(&mut inner.state.decks[idx], &event.kind);
        true
    }

    pub(crate) fn update_deck<T>(&self, deck: DeckId, f: impl FnOnce(&mut DeckState) -> T) -> T {
        f(&mut self.write().state.decks[deck.index()])
    }

    pub(crate) fn read_mixer<T>(&self, f: impl FnOnce(&MixerState) -> T) -> T {
        f(&self.read().state.mixer)
    }

    pub(crate) fn update_mixer<T>(&self, f: impl FnOnce(&mut MixerState) -> T) -> T {
        f(&mut self.write().state.mixer)
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").field("state", &self.read().state).finish()
    }
}
