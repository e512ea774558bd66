use biquad::{Biquad as _, DirectForm1};
use std::sync::Arc;

use super::params::{DeckParams, RenderContext};
use super::stretch::TimeStretchProcessor;
use crate::audio::effects::{calculate_tone_shelf, tone_gain_db};
use crate::audio::errors::GraphError;
use crate::audio::types::DeckId;

/// A processing node with one mono input and one mono output.
pub(crate) trait Stage: Send {
    /// Transforms `block` in place. The source stage overwrites it.
    fn process(&mut self, block: &mut [f32], ctx: &RenderContext);

    /// Clears internal history (filter memory, stretch buffers).
    fn reset(&mut self) {}
}

// --- Source ---

/// Reads the decoded track. Swapping tracks hands the old buffer back to
/// the caller so it is never freed inside the audio callback.
pub(crate) struct SourceStage {
    generation: u64,
    samples: Option<Arc<Vec<f32>>>,
    params: Arc<DeckParams>,
}

impl SourceStage {
    pub(crate) fn new(generation: u64, params: Arc<DeckParams>) -> Self {
        SourceStage {
            generation,
            samples: None,
            params,
        }
    }

    pub(crate) fn install(&mut self, samples: Arc<Vec<f32>>) -> Option<Arc<Vec<f32>>> {
        self.samples.replace(samples)
    }

    pub(crate) fn release(&mut self) -> Option<Arc<Vec<f32>>> {
        self.samples.take()
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    pub(crate) fn len(&self) -> usize {
        self.samples.as_ref().map_or(0, |s| s.len())
    }
}

impl Stage for SourceStage {
    fn process(&mut self, block: &mut [f32], _ctx: &RenderContext) {
        let Some(samples) = self.samples.as_deref().filter(|s| !s.is_empty()) else {
            block.fill(0.0);
            return;
        };
        if !self.params.is_playing() {
            block.fill(0.0);
            return;
        }

        let samples = samples.as_slice();
        let len = samples.len() as f64;
        let rate = self.params.playback_rate.load();
        let mut head = self.params.read_head.load();
        let mut ended = false;

        for out in block.iter_mut() {
            if ended || head >= len {
                ended = true;
                *out = 0.0;
                continue;
            }
            let idx = head as usize;
            let frac = (head - idx as f64) as f32;
            let s0 = samples[idx];
            let s1 = samples.get(idx + 1).copied().unwrap_or(0.0);
            *out = s0 + (s1 - s0) * frac;
            head += rate;
        }

        if ended {
            self.params.reset_transport();
            self.params.mark_ended(self.generation);
        } else {
            self.params.read_head.store(head);
        }
    }
}

// --- Tone (low shelf) ---

pub(crate) struct ToneStage {
    deck: DeckId,
    filter: DirectForm1<f32>,
    sample_rate: f32,
    cut_db: f32,
    params: Arc<DeckParams>,
    applied_boost: bool,
}

impl ToneStage {
    pub(crate) fn new(
        deck: DeckId,
        sample_rate: f32,
        cut_db: f32,
        params: Arc<DeckParams>,
    ) -> Result<Self, GraphError> {
        let boost = params.tone_boost();
        let coeffs = calculate_tone_shelf(sample_rate, tone_gain_db(boost, cut_db))?;
        Ok(ToneStage {
            deck,
            filter: DirectForm1::<f32>::new(coeffs),
            sample_rate,
            cut_db,
            params,
            applied_boost: boost,
        })
    }
}

impl Stage for ToneStage {
    fn process(&mut self, block: &mut [f32], _ctx: &RenderContext) {
        let boost = self.params.tone_boost();
        if boost != self.applied_boost {
            match calculate_tone_shelf(self.sample_rate, tone_gain_db(boost, self.cut_db)) {
                Ok(coeffs) => self.filter.update_coefficients(coeffs),
                Err(e) => log::error!("Deck Graph: Deck {}: tone update failed: {}", self.deck, e),
            }
            self.applied_boost = boost;
        }
        for sample in block.iter_mut() {
            *sample = self.filter.run(*sample);
        }
    }

    fn reset(&mut self) {
        self.filter.reset_state();
    }
}

// --- Time Stretch ---

pub(crate) struct StretchStage {
    processor: Box<dyn TimeStretchProcessor>,
    params: Arc<DeckParams>,
    applied_tempo: f64,
}

impl StretchStage {
    pub(crate) fn new(mut processor: Box<dyn TimeStretchProcessor>, params: Arc<DeckParams>) -> Self {
        let tempo = params.stretch_tempo.load();
        processor.set_tempo(tempo);
        StretchStage {
            processor,
            params,
            applied_tempo: tempo,
        }
    }
}

impl Stage for StretchStage {
    fn process(&mut self, block: &mut [f32], _ctx: &RenderContext) {
        let tempo = self.params.stretch_tempo.load();
        if tempo != self.applied_tempo {
            self.processor.set_tempo(tempo);
            self.applied_tempo = tempo;
        }
        self.processor.process(block);
    }

    fn reset(&mut self) {
        self.processor.reset();
    }
}

// --- Gain ---

pub(crate) struct GainStage {
    deck: DeckId,
    current: f32,
}

impl GainStage {
    pub(crate) fn new(deck: DeckId, initial: f32) -> Self {
        GainStage { deck, current: initial }
    }
}

impl Stage for GainStage {
    /// Ramps linearly from the previous block's gain to the new target.
    fn process(&mut self, block: &mut [f32], ctx: &RenderContext) {
        let target = ctx.gain_for(self.deck);
        if block.is_empty() {
            return;
        }
        let step = (target - self.current) / block.len() as f32;
        for (i, sample) in block.iter_mut().enumerate() {
            *sample *= self.current + step * (i + 1) as f32;
        }
        self.current = target;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(a: f32, b: f32) -> RenderContext {
        RenderContext { gains: (a, b) }
    }

    #[test]
    fn source_interpolates_and_advances_by_rate() {
        let params = Arc::new(DeckParams::default());
        let mut source = SourceStage::new(1, params.clone());
        assert!(source.install(Arc::new(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])).is_none());
        params.set_playing(true);
        params.playback_rate.store(0.5);

        let mut block = [0.0f32; 4];
        source.process(&mut block, &ctx(1.0, 1.0));
        assert_eq!(block, [0.0, 0.5, 1.0, 1.5]);
        assert_eq!(params.read_head.load(), 2.0);
    }

    #[test]
    fn source_end_stops_rewinds_and_flags() {
        let params = Arc::new(DeckParams::default());
        let mut source = SourceStage::new(7, params.clone());
        source.install(Arc::new(vec![0.5; 3]));
        params.set_playing(true);

        let mut block = [1.0f32; 5];
        source.process(&mut block, &ctx(1.0, 1.0));
        assert_eq!(block, [0.5, 0.5, 0.5, 0.0, 0.0]);
        assert!(!params.is_playing());
        assert_eq!(params.read_head.load(), 0.0);
        assert_eq!(params.take_ended(), Some(7));
    }

    #[test]
    fn swapping_tracks_returns_the_old_buffer() {
        let params = Arc::new(DeckParams::default());
        let mut source = SourceStage::new(1, params);
        let first = Arc::new(vec![0.1f32; 4]);
        source.install(first.clone());
        let returned = source.install(Arc::new(vec![0.2f32; 8])).unwrap();
        assert!(Arc::ptr_eq(&first, &returned));
        assert_eq!(source.len(), 8);
        assert_eq!(source.release().map(|s| s.len()), Some(8));
        assert_eq!(source.len(), 0);
    }

    #[test]
    fn paused_source_is_silent() {
        let params = Arc::new(DeckParams::default());
        let mut source = SourceStage::new(1, params.clone());
        source.install(Arc::new(vec![1.0; 16]));
        let mut block = [9.0f32; 4];
        source.process(&mut block, &ctx(1.0, 1.0));
        assert_eq!(block, [0.0; 4]);
    }

    #[test]
    fn gain_ramps_to_deck_target() {
        let mut gain = GainStage::new(DeckId::B, 0.0);
        let mut block = [1.0f32; 4];
        gain.process(&mut block, &ctx(0.25, 1.0));
        assert_eq!(block, [0.25, 0.5, 0.75, 1.0]);
        let mut block = [1.0f32; 2];
        gain.process(&mut block, &ctx(0.25, 1.0));
        assert_eq!(block, [1.0, 1.0]);
    }

    #[test]
    fn tone_stage_picks_up_toggle() {
        let params = Arc::new(DeckParams::default());
        let mut tone = ToneStage::new(DeckId::A, 44100.0, -40.0, params.clone()).unwrap();
        let dc = |tone: &mut ToneStage| {
            let mut block = vec![1.0f32; 8192];
            tone.process(&mut block, &ctx(1.0, 1.0));
            block[8191]
        };
        assert!((dc(&mut tone) - 1.0).abs() < 1e-3);
        params.toggle_tone();
        tone.reset();
        assert!(dc(&mut tone) < 0.05);
    }
}
