use std::sync::Arc;

use super::params::{DeckParams, RenderContext};
use super::stage::{GainStage, SourceStage, Stage, StretchStage, ToneStage};
use super::wiring::{StageKind, Wiring, WiringError};
use crate::audio::errors::GraphError;
use crate::audio::types::DeckId;

// --- Topology ---

fn wiring_error(deck: DeckId) -> impl Fn(WiringError) -> GraphError {
    move |e| GraphError::Wiring {
        deck,
        reason: e.to_string(),
    }
}

/// `source -> tone -> gain -> bus`
pub(crate) fn base_wiring(deck: DeckId) -> Result<Wiring, GraphError> {
    let mut wiring = Wiring::default();
    for (from, to) in [
        (StageKind::Source, StageKind::Tone),
        (StageKind::Tone, StageKind::Gain),
        (StageKind::Gain, StageKind::Bus),
    ] {
        wiring.connect(from, to).map_err(wiring_error(deck))?;
    }
    Ok(wiring)
}

/// Splices the stretch stage between tone and gain. On error the wiring is
/// unchanged.
pub(crate) fn splice_stretch(deck: DeckId, wiring: &mut Wiring) -> Result<(), GraphError> {
    wiring
        .insert_between(StageKind::Tone, StageKind::Stretch, StageKind::Gain)
        .map_err(wiring_error(deck))
}

/// Stage order for rendering, or nothing when the chain is cut before the bus.
pub(crate) fn render_order(wiring: &Wiring) -> Vec<StageKind> {
    if wiring.reaches_bus() {
        wiring.chain()
    } else {
        Vec::new()
    }
}

// --- Render Graph ---

/// The stages of one deck as the render side runs them. Topology is decided
/// on the control side and arrives here as a finished render order.
pub(crate) struct DeckGraph {
    deck: DeckId,
    source: SourceStage,
    tone: ToneStage,
    stretch: Option<StretchStage>,
    gain: GainStage,
    render_order: Vec<StageKind>,
}

impl DeckGraph {
    pub(crate) fn build(
        deck: DeckId,
        generation: u64,
        sample_rate: u32,
        tone_cut_db: f32,
        params: Arc<DeckParams>,
        initial_gain: f32,
        render_order: Vec<StageKind>,
    ) -> Result<Self, GraphError> {
        Ok(DeckGraph {
            deck,
            source: SourceStage::new(generation, params.clone()),
            tone: ToneStage::new(deck, sample_rate as f32, tone_cut_db, params)?,
            stretch: None,
            gain: GainStage::new(deck, initial_gain),
            render_order,
        })
    }

    /// Prepares the graph for a new track. Returns the previous track's audio.
    pub(crate) fn renew(&mut self, generation: u64) -> Option<Arc<Vec<f32>>> {
        self.source.set_generation(generation);
        self.tone.reset();
        if let Some(stretch) = self.stretch.as_mut() {
            stretch.reset();
        }
        self.source.release()
    }

    pub(crate) fn install_samples(&mut self, samples: Arc<Vec<f32>>) -> Option<Arc<Vec<f32>>> {
        self.source.install(samples)
    }

    #[cfg(test)]
    pub(crate) fn source_frames(&self) -> usize {
        self.source.len()
    }

    #[cfg(test)]
    pub(crate) fn has_stretch(&self) -> bool {
        self.stretch.is_some()
    }

    /// Adds the stretch stage with the order the control side computed for it.
    pub(crate) fn attach_stretch(&mut self, stage: StretchStage, render_order: Vec<StageKind>) -> Option<StretchStage> {
        self.render_order = render_order;
        self.stretch.replace(stage)
    }

    fn stage_mut(&mut self, kind: StageKind) -> Option<&mut dyn Stage> {
        match kind {
            StageKind::Source => Some(&mut self.source),
            StageKind::Tone => Some(&mut self.tone),
            StageKind::Stretch => self.stretch.as_mut().map(|s| s as &mut dyn Stage),
            StageKind::Gain => Some(&mut self.gain),
            StageKind::Bus => None,
        }
    }

    /// Runs the chain into `block`. A graph with no route to the bus
    /// renders silence.
    pub(crate) fn render(&mut self, block: &mut [f32], ctx: &RenderContext) {
        if self.render_order.is_empty() {
            block.fill(0.0);
            return;
        }
        for i in 0..self.render_order.len() {
            let kind = self.render_order[i];
            if let Some(stage) = self.stage_mut(kind) {
                stage.process(block, ctx);
            }
        }
    }

    /// Stops rendering. The stages stay allocated until the graph is dropped
    /// on the control side.
    pub(crate) fn teardown(&mut self) {
        if !self.render_order.is_empty() {
            self.render_order.clear();
            log::trace!("Deck Graph: Deck {} disconnected", self.deck);
        }
    }

    #[cfg(test)]
    pub(crate) fn is_torn_down(&self) -> bool {
        self.render_order.is_empty()
    }
}
