use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use super::deck::DeckGraph;
use super::params::{CrossfadeGains, RenderContext};
use super::stage::StretchStage;
use super::wiring::StageKind;
use crate::audio::config::RENDER_BLOCK_FRAMES;

// --- Control -> Render Handoff ---

/// A change to a deck graph, made on the control side and applied by the
/// render side at the start of its next pass.
pub(crate) enum GraphEdit {
    /// Replaces the deck's graph.
    Install(Box<DeckGraph>),
    Renew { generation: u64 },
    Samples(Arc<Vec<f32>>),
    AttachStretch {
        stage: StretchStage,
        render_order: Vec<StageKind>,
    },
    Remove,
}

/// Whatever the render side took out of a graph. Dropped on the control side.
#[allow(dead_code)]
pub(crate) enum Retired {
    Graph(Box<DeckGraph>),
    Samples(Arc<Vec<f32>>),
    Stretch(StretchStage),
}

/// Upper bound on retirements from one batch of edits.
const RETIRED_CAPACITY: usize = 4;

struct Inbox {
    edits: Vec<GraphEdit>,
    retired: Vec<Retired>,
}

impl Default for Inbox {
    fn default() -> Self {
        Inbox {
            edits: Vec::with_capacity(RETIRED_CAPACITY),
            retired: Vec::with_capacity(RETIRED_CAPACITY),
        }
    }
}

/// One deck's graph as shared between control and render.
///
/// The render side owns `graph` and only ever `try_lock`s it. The control
/// side never touches `graph`; it posts edits to the inbox, whose lock is
/// held by either side only long enough to move a few values.
#[derive(Default)]
pub(crate) struct DeckCell {
    inbox: Mutex<Inbox>,
    graph: Mutex<Option<Box<DeckGraph>>>,
}

impl DeckCell {
    fn lock_inbox(&self) -> MutexGuard<'_, Inbox> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `edit`. Installing or removing a graph supersedes everything
    /// queued before it; a renew supersedes earlier renews and tracks.
    pub(crate) fn post(&self, edit: GraphEdit) {
        let (superseded, retired) = {
            let mut inbox = self.lock_inbox();
            let superseded: Vec<GraphEdit> = match &edit {
                GraphEdit::Install(_) | GraphEdit::Remove => inbox.edits.drain(..).collect(),
                GraphEdit::Renew { .. } => {
                    let (dropped, kept): (Vec<_>, Vec<_>) = inbox
                        .edits
                        .drain(..)
                        .partition(|e| matches!(e, GraphEdit::Renew { .. } | GraphEdit::Samples(_)));
                    inbox.edits.extend(kept);
                    dropped
                }
                GraphEdit::Samples(_) | GraphEdit::AttachStretch { .. } => Vec::new(),
            };
            inbox.edits.push(edit);
            let retired: Vec<Retired> = inbox.retired.drain(..).collect();
            (superseded, retired)
        };
        drop(superseded);
        drop(retired);
    }

    /// Drops whatever the render side has handed back.
    pub(crate) fn collect_retired(&self) -> usize {
        let retired: Vec<Retired> = self.lock_inbox().retired.drain(..).collect();
        retired.len()
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.lock_inbox().edits.len()
    }

    /// Holds the render side's lock, as a render pass in progress would.
    #[cfg(test)]
    pub(crate) fn hold_render(&self) -> MutexGuard<'_, Option<Box<DeckGraph>>> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Render side: applies queued edits, then renders into `block`. Returns
    /// false when the graph is busy with another renderer or absent.
    fn render(&self, block: &mut [f32], ctx: &RenderContext) -> bool {
        let mut graph = match self.graph.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        match self.inbox.try_lock() {
            Ok(mut inbox) => apply_edits(&mut inbox, &mut graph),
            Err(TryLockError::Poisoned(poisoned)) => apply_edits(&mut poisoned.into_inner(), &mut graph),
            Err(TryLockError::WouldBlock) => {
                log::trace!("Mix Bus: Edits in flight, applying next pass");
            }
        }
        match graph.as_mut() {
            Some(graph) => {
                graph.render(block, ctx);
                true
            }
            None => false,
        }
    }
}

fn apply_edits(inbox: &mut Inbox, graph: &mut Option<Box<DeckGraph>>) {
    let Inbox { edits, retired } = inbox;
    for edit in edits.drain(..) {
        match edit {
            GraphEdit::Install(new_graph) => {
                if let Some(old) = graph.replace(new_graph) {
                    retired.push(Retired::Graph(old));
                }
            }
            GraphEdit::Remove => {
                if let Some(mut old) = graph.take() {
                    old.teardown();
                    retired.push(Retired::Graph(old));
                }
            }
            GraphEdit::Renew { generation } => {
                if let Some(old) = graph.as_mut().and_then(|g| g.renew(generation)) {
                    retired.push(Retired::Samples(old));
                }
            }
            GraphEdit::Samples(samples) => match graph.as_mut() {
                Some(g) => {
                    if let Some(old) = g.install_samples(samples) {
                        retired.push(Retired::Samples(old));
                    }
                }
                None => retired.push(Retired::Samples(samples)),
            },
            GraphEdit::AttachStretch { stage, render_order } => match graph.as_mut() {
                Some(g) => {
                    if let Some(old) = g.attach_stretch(stage, render_order) {
                        retired.push(Retired::Stretch(old));
                    }
                }
                None => retired.push(Retired::Stretch(stage)),
            },
        }
    }
}

// --- Mix Bus ---

/// Per-callback working buffers, allocated once by the output stream.
#[derive(Debug)]
pub struct RenderScratch {
    mix: Vec<f32>,
    deck: Vec<f32>,
}

impl RenderScratch {
    pub fn new() -> Self {
        RenderScratch {
            mix: Vec::with_capacity(RENDER_BLOCK_FRAMES),
            deck: Vec::with_capacity(RENDER_BLOCK_FRAMES),
        }
    }
}

impl Default for RenderScratch {
    fn default() -> Self {
        Self::new()
    }
}

/// Render-side view of both decks. Cheap to clone into an audio callback.
#[derive(Clone)]
pub struct MixBus {
    decks: [Arc<DeckCell>; 2],
    gains: Arc<CrossfadeGains>,
    sample_rate: u32,
}

impl MixBus {
    pub(crate) fn new(decks: [Arc<DeckCell>; 2], gains: Arc<CrossfadeGains>, sample_rate: u32) -> Self {
        MixBus {
            decks,
            gains,
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Fills an interleaved output buffer. The mono mix is copied to every
    /// channel. A deck that another renderer holds is skipped for this
    /// callback instead of waiting.
    pub fn render(&self, output: &mut [f32], channels: usize, scratch: &mut RenderScratch) {
        let channels = channels.max(1);
        output.fill(0.0);
        let ctx = RenderContext {
            gains: self.gains.load(),
        };

        for out_block in output.chunks_mut(RENDER_BLOCK_FRAMES * channels) {
            let frames = out_block.len() / channels;
            self.render_block(frames, &ctx, scratch);
            for (frame, value) in out_block.chunks_exact_mut(channels).zip(scratch.mix.iter()) {
                frame.fill(*value);
            }
        }
    }

    fn render_block(&self, frames: usize, ctx: &RenderContext, scratch: &mut RenderScratch) {
        scratch.mix.clear();
        scratch.mix.resize(frames, 0.0);
        scratch.deck.clear();
        scratch.deck.resize(frames, 0.0);

        for cell in &self.decks {
            if cell.render(&mut scratch.deck, ctx) {
                for (mixed, sample) in scratch.mix.iter_mut().zip(scratch.deck.iter()) {
                    *mixed += *sample;
                }
            }
        }
    }

    /// Renders `frames` mono frames outside any device callback.
    pub fn render_offline(&self, frames: usize) -> Vec<f32> {
        let mut output = vec![0.0f32; frames];
        let mut scratch = RenderScratch::new();
        self.render(&mut output, 1, &mut scratch);
        output
    }
}

impl std::fmt::Debug for MixBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixBus")
            .field("sample_rate", &self.sample_rate)
            .field("gains", &self.gains.load())
            .finish()
    }
}
