use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::audio::config::EngineConfig;
use crate::audio::decoding::decode_for_playback;
use crate::audio::effects::linear_crossfade_gains;
use crate::audio::errors::{AudioDecodingError, GraphError};
use crate::audio::playback::events::{DeckEventKind, DeckEventSender, send_deck_event};
use crate::audio::source::TrackSource;
use crate::audio::types::{DeckId, DeckStatus, TrackId};

mod bus;
mod deck;
mod params;
mod stage;
pub mod stretch;
pub mod wiring;

use bus::{DeckCell, GraphEdit};
use deck::DeckGraph;
use params::{CrossfadeGains, DeckParams};
use stage::StretchStage;
use wiring::Wiring;

pub use bus::{MixBus, RenderScratch};
pub use stretch::{
    AudioContextId, StretchModuleLoader, TimeStretchModule, TimeStretchProcessor,
    UnavailableStretchLoader,
};
pub use wiring::StageKind;

// --- Deck Slots ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum SlotPhase {
    Empty = 0,
    Loading = 1,
    Ready = 2,
    Failed = 3,
}

impl SlotPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SlotPhase::Loading,
            2 => SlotPhase::Ready,
            3 => SlotPhase::Failed,
            _ => SlotPhase::Empty,
        }
    }
}

/// Control-side state of one deck. The render side never locks it.
#[derive(Default)]
struct SlotControl {
    /// Topology of the deck's graph; `None` while the deck has no graph.
    wiring: Option<Wiring>,
}

/// Everything the graph layer keeps for one deck. The render side sees the
/// graph through `cell` and the parameters as atomics. Control calls that
/// must change several of those together hold `control`.
struct DeckSlot {
    deck: DeckId,
    cell: Arc<DeckCell>,
    control: Mutex<SlotControl>,
    params: Arc<DeckParams>,
    /// Bumped by every load and unload. In-flight work compares against it.
    generation: AtomicU64,
    phase: AtomicU8,
    stretch_active: AtomicBool,
    frames: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DeckSlot {
    fn new(deck: DeckId) -> Self {
        DeckSlot {
            deck,
            cell: Arc::new(DeckCell::default()),
            control: Mutex::new(SlotControl::default()),
            params: Arc::new(DeckParams::default()),
            generation: AtomicU64::new(0),
            phase: AtomicU8::new(SlotPhase::Empty as u8),
            stretch_active: AtomicBool::new(false),
            frames: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn lock_control(&self) -> MutexGuard<'_, SlotControl> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn phase(&self) -> SlotPhase {
        SlotPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: SlotPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn is_stretched(&self) -> bool {
        self.stretch_active.load(Ordering::Acquire)
    }

    fn status(&self) -> DeckStatus {
        match self.phase() {
            SlotPhase::Empty => DeckStatus::Empty,
            SlotPhase::Loading => DeckStatus::Loading,
            SlotPhase::Failed => DeckStatus::Error,
            SlotPhase::Ready if self.params.is_playing() => DeckStatus::Playing,
            SlotPhase::Ready => DeckStatus::Ready,
        }
    }

    fn abort_tasks(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    fn track_task(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    fn tempo_applied(&self) -> TempoApplied {
        let ratio = self.params.tempo_ratio.load();
        let stretched = self.is_stretched();
        TempoApplied {
            tempo_ratio: ratio,
            position_advance_rate: if stretched { 1.0 } else { ratio },
            stretch_active: stretched,
        }
    }
}

// --- Public Types ---

/// Returned by [`DeckAudioGraph::load_deck`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphHandle {
    pub deck: DeckId,
    pub generation: u64,
    /// True when the deck already had a graph and it was reused.
    pub reused: bool,
}

/// Tempo regime in effect after a tempo or stretch change.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TempoApplied {
    pub tempo_ratio: f64,
    pub position_advance_rate: f64,
    pub stretch_active: bool,
}

// --- Deck Audio Graph ---

/// Owns the per-deck processing graphs of one audio context.
///
/// Control calls mutate atomics or queue graph edits for the next render
/// pass; they never wait on the render side. Lifecycle changes are reported as
/// [`DeckEvent`](crate::audio::playback::events::DeckEvent)s on the event
/// channel, stamped with the deck's generation.
pub struct DeckAudioGraph {
    context: AudioContextId,
    sample_rate: u32,
    tone_cut_db: f32,
    slots: [Arc<DeckSlot>; 2],
    gains: Arc<CrossfadeGains>,
    loader: Arc<dyn StretchModuleLoader>,
    events: DeckEventSender,
    runtime: Handle,
}

impl DeckAudioGraph {
    pub fn new(
        config: &EngineConfig,
        loader: Arc<dyn StretchModuleLoader>,
        events: DeckEventSender,
        runtime: Handle,
    ) -> Self {
        let context = AudioContextId::next();
        log::info!(
            "Deck Graph: Created {} at {} Hz",
            context,
            config.output_sample_rate
        );
        DeckAudioGraph {
            context,
            sample_rate: config.output_sample_rate,
            tone_cut_db: config.tone_cut_db,
            slots: [Arc::new(DeckSlot::new(DeckId::A)), Arc::new(DeckSlot::new(DeckId::B))],
            gains: Arc::new(CrossfadeGains::new(0.0)),
            loader,
            events,
            runtime,
        }
    }

    fn slot(&self, deck: DeckId) -> &Arc<DeckSlot> {
        &self.slots[deck.index()]
    }

    fn require_controls(&self, slot: &DeckSlot) -> Result<(), GraphError> {
        let status = slot.status();
        if status.accepts_controls() {
            Ok(())
        } else {
            Err(GraphError::DeckUnavailable {
                deck: slot.deck,
                status,
            })
        }
    }

    fn require_ready(&self, slot: &DeckSlot) -> Result<(), GraphError> {
        if slot.phase() == SlotPhase::Ready {
            Ok(())
        } else {
            Err(GraphError::DeckUnavailable {
                deck: slot.deck,
                status: slot.status(),
            })
        }
    }

    pub fn context(&self) -> AudioContextId {
        self.context
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn mix_bus(&self) -> MixBus {
        MixBus::new(
            [self.slots[0].cell.clone(), self.slots[1].cell.clone()],
            self.gains.clone(),
            self.sample_rate,
        )
    }

    // --- Load / Unload ---

    /// Puts a track on `deck`. Reuses the deck's graph when one exists,
    /// otherwise builds `source -> tone -> gain -> bus`. Decoding runs in
    /// the background and reports `DurationKnown` and `Ready`, or `Error`.
    pub fn load_deck(
        &self,
        deck: DeckId,
        track_id: &TrackId,
        source: Arc<dyn TrackSource>,
    ) -> Result<GraphHandle, GraphError> {
        let slot = self.slot(deck);
        slot.abort_tasks();

        let (generation, reused) = {
            let mut control = slot.lock_control();
            let generation = slot.bump_generation();
            slot.params.reset_transport();
            slot.params.take_ended();
            slot.params.apply_tempo(1.0, slot.is_stretched());
            slot.frames.store(0, Ordering::Release);

            let reused = if control.wiring.is_some() {
                slot.cell.post(GraphEdit::Renew { generation });
                true
            } else {
                let wiring = deck::base_wiring(deck)?;
                let (gain_a, gain_b) = self.gains.load();
                let initial_gain = if deck == DeckId::A { gain_a } else { gain_b };
                let graph = DeckGraph::build(
                    deck,
                    generation,
                    self.sample_rate,
                    self.tone_cut_db,
                    slot.params.clone(),
                    initial_gain,
                    deck::render_order(&wiring),
                )?;
                slot.cell.post(GraphEdit::Install(Box::new(graph)));
                control.wiring = Some(wiring);
                false
            };
            slot.set_phase(SlotPhase::Loading);
            send_deck_event(
                &self.events,
                deck,
                generation,
                DeckEventKind::LoadStarted {
                    track_id: track_id.clone(),
                },
            );
            (generation, reused)
        };

        log::info!(
            "Deck Graph: Loading '{}' on deck {} (generation {}, graph {})",
            track_id,
            deck,
            generation,
            if reused { "reused" } else { "built" }
        );

        let task_slot = slot.clone();
        let events = self.events.clone();
        let sample_rate = self.sample_rate;
        let task = self.runtime.spawn(async move {
            let source_name = source.describe();
            let decoded = tokio::task::spawn_blocking(move || decode_for_playback(source.as_ref(), sample_rate))
                .await
                .unwrap_or_else(|join_error| {
                    Err(AudioDecodingError::DecodeTaskFailed {
                        source_name,
                        reason: join_error.to_string(),
                    })
                });
            complete_load(&task_slot, generation, decoded, sample_rate, &events);
        });
        slot.track_task(task);

        Ok(GraphHandle {
            deck,
            generation,
            reused,
        })
    }

    /// Stops `deck`, drops its audio and tears its graph down. Cancels any
    /// in-flight load or stretch attach for the deck. Safe to repeat.
    /// Crossfader gains are left alone.
    pub fn unload_deck(&self, deck: DeckId) -> bool {
        let slot = self.slot(deck);
        slot.abort_tasks();

        let mut control = slot.lock_control();
        let generation = slot.bump_generation();
        let was_loaded = control.wiring.is_some() || slot.phase() != SlotPhase::Empty;

        slot.params.reset();
        slot.params.take_ended();
        slot.frames.store(0, Ordering::Release);
        slot.stretch_active.store(false, Ordering::Release);
        slot.set_phase(SlotPhase::Empty);
        if let Some(mut wiring) = control.wiring.take() {
            wiring.disconnect_all();
            slot.cell.post(GraphEdit::Remove);
        }
        drop(control);

        if was_loaded {
            log::info!("Deck Graph: Unloaded deck {}", deck);
            send_deck_event(&self.events, deck, generation, DeckEventKind::Unloaded);
        } else {
            log::debug!("Deck Graph: Deck {} already empty", deck);
        }
        was_loaded
    }

    /// Unloads both decks and forgets this context's stretch module.
    pub fn shutdown(&self) {
        for deck in DeckId::ALL {
            self.unload_deck(deck);
        }
        stretch::release_context(self.context);
    }

    // --- Time Stretch ---

    /// Splices a time-stretch stage between tone and gain.
    ///
    /// The module is loaded once per audio context. If it is unavailable the
    /// graph is left untouched and the error is returned; tempo keeps using
    /// the native rate. Calling this on a deck that already stretches is a
    /// no-op. If the deck is unloaded or reloaded while the module loads,
    /// the result is discarded with [`GraphError::Superseded`].
    pub async fn attach_time_stretch(&self, deck: DeckId) -> Result<TempoApplied, GraphError> {
        let slot = self.slot(deck).clone();
        self.require_controls(&slot)?;
        let generation = slot.generation();
        if slot.is_stretched() {
            return Ok(self.tempo(deck));
        }

        let module = stretch::module_for_context(self.context, &self.loader).await?;
        let processor = module.create_processor(self.sample_rate)?;

        let applied = {
            let mut control = slot.lock_control();
            if slot.generation() != generation {
                log::debug!("Deck Graph: Stretch attach on deck {} superseded", deck);
                return Err(GraphError::Superseded { deck });
            }
            let Some(wiring) = control.wiring.as_mut() else {
                return Err(GraphError::Superseded { deck });
            };
            if slot.is_stretched() {
                return Ok(slot.tempo_applied());
            }

            deck::splice_stretch(deck, wiring)?;
            let ratio = slot.params.tempo_ratio.load();
            slot.params.apply_tempo(ratio, true);
            slot.stretch_active.store(true, Ordering::Release);
            slot.cell.post(GraphEdit::AttachStretch {
                stage: StretchStage::new(processor, slot.params.clone()),
                render_order: deck::render_order(wiring),
            });
            slot.tempo_applied()
        };

        log::info!(
            "Deck Graph: Time stretch '{}' attached to deck {}",
            module.name(),
            deck
        );
        Ok(applied)
    }

    // --- Parameters ---

    /// With a stretch stage the stage gets `ratio` and the source stays at
    /// native rate; otherwise the source rate becomes `ratio`.
    pub fn set_tempo(&self, deck: DeckId, ratio: f64) -> Result<TempoApplied, GraphError> {
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(GraphError::InvalidTempo { deck, ratio });
        }
        let slot = self.slot(deck);
        let _control = slot.lock_control();
        self.require_controls(slot)?;
        slot.params.apply_tempo(ratio, slot.is_stretched());
        log::debug!("Deck Graph: Deck {} tempo {:.4}", deck, ratio);
        Ok(slot.tempo_applied())
    }

    pub fn tempo(&self, deck: DeckId) -> TempoApplied {
        let slot = self.slot(deck);
        let _control = slot.lock_control();
        slot.tempo_applied()
    }

    /// Flips the low-shelf between flat and cut. Returns the new boost flag.
    pub fn toggle_tone(&self, deck: DeckId) -> Result<bool, GraphError> {
        let slot = self.slot(deck);
        self.require_controls(slot)?;
        let boost = slot.params.toggle_tone();
        log::debug!("Deck Graph: Deck {} tone boost {}", deck, boost);
        Ok(boost)
    }

    pub fn tone_boost(&self, deck: DeckId) -> bool {
        self.slot(deck).params.tone_boost()
    }

    /// Applies the linear crossfade law to both decks in one store.
    pub fn set_crossfader_gains(&self, position: f32) -> (f32, f32) {
        let (a, b) = linear_crossfade_gains(position);
        self.gains.store(a, b);
        log::trace!("Deck Graph: Crossfade gains A {:.3} B {:.3}", a, b);
        (a, b)
    }

    pub fn gains(&self) -> (f32, f32) {
        self.gains.load()
    }

    // --- Transport ---

    pub fn play(&self, deck: DeckId) -> Result<(), GraphError> {
        let slot = self.slot(deck);
        self.require_ready(slot)?;
        self.report_end(slot);
        if !slot.params.is_playing() {
            slot.params.set_playing(true);
            send_deck_event(&self.events, deck, slot.generation(), DeckEventKind::Playing);
        }
        Ok(())
    }

    pub fn pause(&self, deck: DeckId) -> Result<(), GraphError> {
        let slot = self.slot(deck);
        self.require_ready(slot)?;
        if slot.params.is_playing() {
            slot.params.set_playing(false);
            send_deck_event(&self.events, deck, slot.generation(), DeckEventKind::Paused);
        }
        Ok(())
    }

    /// Moves the playhead, clamped to the track. Returns the new position.
    pub fn seek(&self, deck: DeckId, position_seconds: f64) -> Result<f64, GraphError> {
        let slot = self.slot(deck);
        self.require_ready(slot)?;
        let duration = self.duration_seconds(deck);
        let target = if position_seconds.is_finite() {
            position_seconds.clamp(0.0, duration)
        } else {
            0.0
        };
        slot.params.read_head.store(target * self.sample_rate as f64);
        send_deck_event(
            &self.events,
            deck,
            slot.generation(),
            DeckEventKind::TimeAdvanced {
                position_seconds: target,
            },
        );
        Ok(target)
    }

    pub fn shift_position(&self, deck: DeckId, delta_seconds: f64) -> Result<f64, GraphError> {
        let current = self.position_seconds(deck);
        self.seek(deck, current + delta_seconds)
    }

    pub fn position_seconds(&self, deck: DeckId) -> f64 {
        self.slot(deck).params.read_head.load() / self.sample_rate as f64
    }

    pub fn duration_seconds(&self, deck: DeckId) -> f64 {
        self.slot(deck).frames.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    pub fn is_playing(&self, deck: DeckId) -> bool {
        self.slot(deck).params.is_playing()
    }

    pub fn status(&self, deck: DeckId) -> DeckStatus {
        self.slot(deck).status()
    }

    pub fn generation(&self, deck: DeckId) -> u64 {
        self.slot(deck).generation()
    }

    /// Current wiring of `deck`, or `None` when it has no graph.
    pub fn chain(&self, deck: DeckId) -> Option<Vec<StageKind>> {
        self.slot(deck)
            .lock_control()
            .wiring
            .as_ref()
            .filter(|wiring| !wiring.is_empty())
            .map(Wiring::chain)
    }

    /// Sends `Ended` if the render side ran out of track since the last
    /// report. Returns whether it did.
    pub fn report_ended(&self, deck: DeckId) -> bool {
        self.report_end(self.slot(deck))
    }

    fn report_end(&self, slot: &DeckSlot) -> bool {
        match slot.params.take_ended() {
            Some(generation) => {
                log::debug!("Deck Graph: Deck {} reached end of track", slot.deck);
                send_deck_event(&self.events, slot.deck, generation, DeckEventKind::Ended);
                true
            }
            None => false,
        }
    }

    /// Reports finished tracks, emits `TimeAdvanced` for every playing deck
    /// and drops whatever the render side has released.
    pub fn publish_positions(&self) {
        for slot in &self.slots {
            slot.cell.collect_retired();
            self.report_end(slot);
            if slot.phase() == SlotPhase::Ready && slot.params.is_playing() {
                send_deck_event(
                    &self.events,
                    slot.deck,
                    slot.generation(),
                    DeckEventKind::TimeAdvanced {
                        position_seconds: self.position_seconds(slot.deck),
                    },
                );
            }
        }
    }
}

impl Drop for DeckAudioGraph {
    fn drop(&mut self) {
        for slot in &self.slots {
            slot.abort_tasks();
        }
        stretch::release_context(self.context);
    }
}

fn complete_load(
    slot: &DeckSlot,
    generation: u64,
    decoded: Result<Vec<f32>, AudioDecodingError>,
    sample_rate: u32,
    events: &DeckEventSender,
) {
    let control = slot.lock_control();
    if slot.generation() != generation {
        log::debug!(
            "Deck Graph: Discarding stale load for deck {} (generation {})",
            slot.deck,
            generation
        );
        return;
    }
    if control.wiring.is_none() {
        return;
    }

    match decoded {
        Ok(samples) => {
            let frames = samples.len();
            slot.cell.post(GraphEdit::Samples(Arc::new(samples)));
            slot.frames.store(frames as u64, Ordering::Release);
            slot.set_phase(SlotPhase::Ready);
            let duration = frames as f64 / sample_rate as f64;
            log::info!(
                "Deck Graph: Deck {} ready ({:.2}s, {} frames)",
                slot.deck,
                duration,
                frames
            );
            send_deck_event(
                events,
                slot.deck,
                generation,
                DeckEventKind::DurationKnown {
                    duration_seconds: duration,
                },
            );
            send_deck_event(events, slot.deck, generation, DeckEventKind::Ready);
        }
        Err(e) => {
            slot.params.reset_transport();
            slot.set_phase(SlotPhase::Failed);
            log::error!("Deck Graph: Deck {} failed to load: {}", slot.deck, e);
            send_deck_event(
                events,
                slot.deck,
                generation,
                DeckEventKind::Error {
                    message: e.to_string(),
                },
            );
        }
    }
}
