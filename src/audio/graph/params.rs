use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::audio::effects::linear_crossfade_gains;
use crate::audio::types::DeckId;

// --- Atomic Float ---

#[derive(Debug)]
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub(crate) fn new(value: f64) -> Self {
        AtomicF64(AtomicU64::new(value.to_bits()))
    }

    #[inline]
    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed)
    }
}

// --- Crossfade Gains ---

/// Both deck gains packed into one word, so a reader always sees a pair
/// written by the same crossfader update.
#[derive(Debug)]
pub(crate) struct CrossfadeGains(AtomicU64);

impl CrossfadeGains {
    pub(crate) fn new(position: f32) -> Self {
        let (a, b) = linear_crossfade_gains(position);
        CrossfadeGains(AtomicU64::new(Self::pack(a, b)))
    }

    fn pack(a: f32, b: f32) -> u64 {
        ((a.to_bits() as u64) << 32) | b.to_bits() as u64
    }

    pub(crate) fn store(&self, a: f32, b: f32) {
        self.0.store(Self::pack(a, b), Ordering::Release);
    }

    pub(crate) fn load(&self) -> (f32, f32) {
        let packed = self.0.load(Ordering::Acquire);
        (
            f32::from_bits((packed >> 32) as u32),
            f32::from_bits(packed as u32),
        )
    }
}

/// Gains sampled once per render pass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RenderContext {
    pub(crate) gains: (f32, f32),
}

impl RenderContext {
    pub(crate) fn gain_for(&self, deck: DeckId) -> f32 {
        match deck {
            DeckId::A => self.gains.0,
            DeckId::B => self.gains.1,
        }
    }
}

// --- Per-Deck Parameters ---

/// Control-plane writes, render-side reads. Nothing here is locked.
#[derive(Debug)]
pub(crate) struct DeckParams {
    /// Playhead in bus-rate frames.
    pub(crate) read_head: AtomicF64,
    pub(crate) playing: AtomicBool,
    /// Source advance per output frame. 1.0 whenever a stretch stage is wired.
    pub(crate) playback_rate: AtomicF64,
    pub(crate) stretch_tempo: AtomicF64,
    pub(crate) tempo_ratio: AtomicF64,
    pub(crate) tone_boost: AtomicBool,
    /// Generation whose track ran out, or 0. Set by the render side,
    /// taken by the control tick.
    ended: AtomicU64,
}

impl Default for DeckParams {
    fn default() -> Self {
        DeckParams {
            read_head: AtomicF64::new(0.0),
            playing: AtomicBool::new(false),
            playback_rate: AtomicF64::new(1.0),
            stretch_tempo: AtomicF64::new(1.0),
            tempo_ratio: AtomicF64::new(1.0),
            tone_boost: AtomicBool::new(true),
            ended: AtomicU64::new(0),
        }
    }
}

impl DeckParams {
    pub(crate) fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub(crate) fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    pub(crate) fn tone_boost(&self) -> bool {
        self.tone_boost.load(Ordering::Relaxed)
    }

    /// Flips the tone flag and returns the new value.
    pub(crate) fn toggle_tone(&self) -> bool {
        !self.tone_boost.fetch_xor(true, Ordering::AcqRel)
    }

    /// Routes `ratio` to the stretch stage or to the native rate.
    pub(crate) fn apply_tempo(&self, ratio: f64, stretched: bool) {
        self.tempo_ratio.store(ratio);
        if stretched {
            self.stretch_tempo.store(ratio);
            self.playback_rate.store(1.0);
        } else {
            self.playback_rate.store(ratio);
            self.stretch_tempo.store(1.0);
        }
    }

    pub(crate) fn mark_ended(&self, generation: u64) {
        self.ended.store(generation, Ordering::Release);
    }

    /// Generation of an end-of-track not yet reported, if any.
    pub(crate) fn take_ended(&self) -> Option<u64> {
        match self.ended.swap(0, Ordering::AcqRel) {
            0 => None,
            generation => Some(generation),
        }
    }

    pub(crate) fn reset_transport(&self) {
        self.set_playing(false);
        self.read_head.store(0.0);
    }

    pub(crate) fn reset(&self) {
        self.reset_transport();
        self.apply_tempo(1.0, false);
        self.tone_boost.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gains_round_trip_as_a_pair() {
        let gains = CrossfadeGains::new(0.0);
        assert_eq!(gains.load(), (0.5, 0.5));
        gains.store(0.25, 0.75);
        assert_eq!(gains.load(), (0.25, 0.75));
    }

    #[test]
    fn tempo_routing_depends_on_regime() {
        let params = DeckParams::default();
        params.apply_tempo(1.25, false);
        assert_eq!(params.playback_rate.load(), 1.25);
        assert_eq!(params.stretch_tempo.load(), 1.0);
        params.apply_tempo(0.8, true);
        assert_eq!(params.playback_rate.load(), 1.0);
        assert_eq!(params.stretch_tempo.load(), 0.8);
        assert_eq!(params.tempo_ratio.load(), 0.8);
    }

    #[test]
    fn end_of_track_is_taken_once() {
        let params = DeckParams::default();
        assert_eq!(params.take_ended(), None);
        params.mark_ended(4);
        assert_eq!(params.take_ended(), Some(4));
        assert_eq!(params.take_ended(), None);
    }

    #[test]
    fn toggle_tone_returns_new_state() {
        let params = DeckParams::default();
        assert!(!params.toggle_tone());
        assert!(params.toggle_tone());
    }
}
