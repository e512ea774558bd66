use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use super::events::{DeckEvent, DeckEventKind};
use super::state::StateStore;
use super::sync;
use crate::audio::cache::WaveformCache;
use crate::audio::config::EngineConfig;
use crate::audio::errors::{GraphError, PlaybackError};
use crate::audio::graph::{AudioContextId, DeckAudioGraph, GraphHandle, MixBus, StretchModuleLoader, TempoApplied};
use crate::audio::source::TrackSource;
use crate::audio::types::{DeckId, DeckStatus, TrackId, TrackLoadRequest};

/// Caller-supplied facts about what is on a deck.
#[derive(Debug, Clone)]
struct DeckMeta {
    track_id: Option<TrackId>,
    bpm: Option<f64>,
    first_beat_seconds: f64,
    /// Last tempo set by hand. Restored when the deck stops following.
    manual_tempo: f64,
}

impl Default for DeckMeta {
    fn default() -> Self {
        DeckMeta {
            track_id: None,
            bpm: None,
            first_beat_seconds: 0.0,
            manual_tempo: 1.0,
        }
    }
}

/// Control surface over both decks: loading, transport, crossfader, tempo
/// sync and quantization. Owns the deck graphs, the waveform cache and the
/// observable state, and is the only writer of that state.
pub struct MixerController {
    config: EngineConfig,
    graph: DeckAudioGraph,
    state: Arc<StateStore>,
    waveforms: Arc<WaveformCache>,
    events: Mutex<UnboundedReceiver<DeckEvent>>,
    decks: Mutex<[DeckMeta; 2]>,
    runtime: Handle,
}

impl MixerController {
    /// Builds a controller on the current tokio runtime.
    pub fn new(config: EngineConfig, loader: Arc<dyn StretchModuleLoader>) -> Result<Self, PlaybackError> {
        let runtime = Handle::try_current().map_err(|e| PlaybackError::RuntimeUnavailable(e.to_string()))?;
        Self::with_runtime(config, loader, runtime)
    }

    pub fn with_runtime(
        config: EngineConfig,
        loader: Arc<dyn StretchModuleLoader>,
        runtime: Handle,
    ) -> Result<Self, PlaybackError> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let graph = DeckAudioGraph::new(&config, loader, events_tx, runtime.clone());
        let waveforms = Arc::new(WaveformCache::new(config.waveform_cache_capacity));
        log::info!(
            "Mixer: Ready ({} Hz bus, waveform cache of {})",
            config.output_sample_rate,
            config.waveform_cache_capacity
        );
        Ok(MixerController {
            config,
            graph,
            state: Arc::new(StateStore::new()),
            waveforms,
            events: Mutex::new(events_rx),
            decks: Mutex::new([DeckMeta::default(), DeckMeta::default()]),
            runtime,
        })
    }

    fn lock_meta(&self) -> MutexGuard<'_, [DeckMeta; 2]> {
        self.decks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Accessors ---

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn waveforms(&self) -> &Arc<WaveformCache> {
        &self.waveforms
    }

    pub fn mix_bus(&self) -> MixBus {
        self.graph.mix_bus()
    }

    pub fn context(&self) -> AudioContextId {
        self.graph.context()
    }

    pub fn gains(&self) -> (f32, f32) {
        self.graph.gains()
    }

    pub fn tempo(&self, deck: DeckId) -> TempoApplied {
        self.graph.tempo(deck)
    }

    pub fn position_seconds(&self, deck: DeckId) -> f64 {
        self.graph.position_seconds(deck)
    }

    pub fn chain(&self, deck: DeckId) -> Option<Vec<crate::audio::graph::StageKind>> {
        self.graph.chain(deck)
    }

    /// The deck currently driven by sync, if any.
    pub fn follower(&self) -> Option<DeckId> {
        let mixer = self.state.mixer();
        if mixer.sync_enabled {
            mixer.master_deck.map(DeckId::other)
        } else {
            None
        }
    }

    // --- Events ---

    /// Moves every pending graph event into the state store.
    pub fn pump_events(&self) -> usize {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let mut applied = 0;
        while let Ok(event) = events.try_recv() {
            if let DeckEventKind::Error { message } = &event.kind {
                log::warn!("Mixer: Deck {} entered error state: {}", event.deck, message);
            }
            if self.state.apply(&event) {
                applied += 1;
            }
        }
        applied
    }

    /// Publishes positions for playing decks and folds in pending events.
    pub fn tick(&self) -> usize {
        self.graph.publish_positions();
        self.pump_events()
    }

    fn record_tempo(&self, deck: DeckId, applied: TempoApplied) {
        self.state.update_deck(deck, |d| {
            d.tempo_ratio = applied.tempo_ratio;
            d.position_advance_rate = applied.position_advance_rate;
            d.stretch_active = applied.stretch_active;
        });
    }

    // --- Load / Unload ---

    pub fn load_track(&self, deck: DeckId, request: TrackLoadRequest) -> Result<GraphHandle, PlaybackError> {
        let TrackLoadRequest {
            track_id,
            source,
            bpm,
            first_beat_seconds,
        } = request;

        let handle = self.graph.load_deck(deck, &track_id, source.clone())?;
        let replaced = {
            let mut metas = self.lock_meta();
            let previous = std::mem::replace(
                &mut metas[deck.index()],
                DeckMeta {
                    track_id: Some(track_id.clone()),
                    bpm: bpm.filter(|b| b.is_finite() && *b > 0.0),
                    first_beat_seconds: first_beat_seconds.unwrap_or(0.0),
                    manual_tempo: 1.0,
                },
            );
            let other = metas[deck.other().index()].track_id.clone();
            previous
                .track_id
                .filter(|prev| *prev != track_id && other.as_ref() != Some(prev))
        };
        if let Some(previous) = replaced {
            self.waveforms.cancel(&previous);
        }

        self.pump_events();
        self.record_tempo(deck, self.graph.tempo(deck));
        self.spawn_preload(track_id, source);
        self.resync();
        Ok(handle)
    }

    fn spawn_preload(&self, track_id: TrackId, source: Arc<dyn TrackSource>) {
        let cache = self.waveforms.clone();
        self.runtime.spawn(async move {
            let series = cache.preload(track_id.clone(), source).await;
            log::debug!(
                "Mixer: Waveform for '{}' available ({} points)",
                track_id,
                series.len()
            );
        });
    }

    /// Clears `deck`. Gains are not recomputed; the other deck keeps its
    /// last crossfader gain until the crossfader moves again.
    pub fn unload_deck(&self, deck: DeckId) -> bool {
        let stale = {
            let mut metas = self.lock_meta();
            let previous = std::mem::take(&mut metas[deck.index()]);
            let other = metas[deck.other().index()].track_id.clone();
            previous.track_id.filter(|prev| other.as_ref() != Some(prev))
        };
        if let Some(track_id) = stale {
            self.waveforms.cancel(&track_id);
        }
        let was_loaded = self.graph.unload_deck(deck);
        self.pump_events();
        was_loaded
    }

    // --- Transport ---

    /// Starts `deck`. From `Ended` it restarts at the top. With quantize on
    /// and a playing master, the deck is first moved onto the master's beat
    /// phase.
    pub fn play(&self, deck: DeckId) -> Result<(), PlaybackError> {
        self.graph.report_ended(deck);
        self.pump_events();
        if self.state.deck(deck).status == DeckStatus::Ended {
            self.graph.seek(deck, 0.0)?;
        }
        if let Some(position) = self.quantized_start(deck) {
            log::debug!("Mixer: Deck {} quantized to {:.3}s", deck, position);
        }
        self.graph.play(deck)?;
        self.pump_events();
        Ok(())
    }

    pub fn pause(&self, deck: DeckId) -> Result<(), PlaybackError> {
        self.graph.pause(deck)?;
        self.pump_events();
        Ok(())
    }

    pub fn seek(&self, deck: DeckId, position_seconds: f64) -> Result<f64, PlaybackError> {
        let position = self.graph.seek(deck, position_seconds)?;
        self.pump_events();
        Ok(position)
    }

    fn quantized_start(&self, deck: DeckId) -> Option<f64> {
        let mixer = self.state.mixer();
        if !mixer.quantize_enabled {
            return None;
        }
        let master = mixer.master_deck.filter(|m| *m != deck)?;
        if !self.graph.is_playing(master) {
            return None;
        }
        let (master_meta, deck_meta) = {
            let metas = self.lock_meta();
            (metas[master.index()].clone(), metas[deck.index()].clone())
        };
        let master_phase = sync::beat_phase(
            self.graph.position_seconds(master),
            master_meta.bpm?,
            master_meta.first_beat_seconds,
        )?;
        let target = sync::aligned_follower_position(
            self.graph.position_seconds(deck),
            deck_meta.bpm?,
            deck_meta.first_beat_seconds,
            master_phase,
        )?;
        match self.graph.seek(deck, target) {
            Ok(position) => Some(position),
            Err(e) => {
                log::warn!("Mixer: Quantized start skipped for deck {}: {}", deck, e);
                None
            }
        }
    }

    /// Nearest beat boundary of the master deck at its current position.
    pub fn nearest_master_beat(&self) -> Option<f64> {
        let master = self.state.mixer().master_deck?;
        let meta = self.lock_meta()[master.index()].clone();
        sync::nearest_beat_boundary(
            self.graph.position_seconds(master),
            meta.bpm?,
            meta.first_beat_seconds,
        )
    }

    // --- Deck Parameters ---

    /// Sets a manual tempo. On the sync follower the value is remembered
    /// for when sync ends, and the sync-driven tempo stays in effect.
    pub fn set_tempo(&self, deck: DeckId, ratio: f64) -> Result<TempoApplied, PlaybackError> {
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(GraphError::InvalidTempo { deck, ratio }.into());
        }
        let ratio = self.config.clamp_tempo(ratio);

        if self.follower() == Some(deck) {
            let status = self.graph.status(deck);
            if !status.accepts_controls() {
                return Err(GraphError::DeckUnavailable { deck, status }.into());
            }
            self.lock_meta()[deck.index()].manual_tempo = ratio;
            log::debug!("Mixer: Deck {} follows sync; manual tempo {:.4} held", deck, ratio);
            return Ok(self.graph.tempo(deck));
        }

        let applied = self.graph.set_tempo(deck, ratio)?;
        self.lock_meta()[deck.index()].manual_tempo = ratio;
        self.record_tempo(deck, applied);
        self.resync();
        Ok(applied)
    }

    /// Tries to give `deck` pitch-preserving tempo. When the environment has
    /// no stretch module the deck keeps native-rate tempo and this still
    /// succeeds.
    pub async fn attach_time_stretch(&self, deck: DeckId) -> Result<TempoApplied, PlaybackError> {
        let applied = match self.graph.attach_time_stretch(deck).await {
            Ok(applied) => applied,
            Err(GraphError::StretchUnavailable(e)) => {
                log::info!("Mixer: Deck {} keeps native-rate tempo: {}", deck, e);
                self.graph.tempo(deck)
            }
            Err(e) => return Err(e.into()),
        };
        self.record_tempo(deck, applied);
        Ok(applied)
    }

    pub fn toggle_tone(&self, deck: DeckId) -> Result<bool, PlaybackError> {
        let boost = self.graph.toggle_tone(deck)?;
        self.state.update_deck(deck, |d| d.tone_boost = boost);
        Ok(boost)
    }

    // --- Mixer Settings ---

    /// Stores the crossfader and applies both deck gains together. Gains
    /// change inside the mixer-state write, so no snapshot pairs new gains
    /// with an old position.
    pub fn set_crossfader(&self, position: f32) -> (f32, f32) {
        let position = if position.is_finite() {
            position.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        self.state.update_mixer(|m| {
            m.crossfader_position = position;
            self.graph.set_crossfader_gains(position)
        })
    }

    /// Crossfader position and the gains in effect, read as one pair.
    pub fn crossfader(&self) -> (f32, (f32, f32)) {
        self.state.read_mixer(|m| (m.crossfader_position, self.graph.gains()))
    }

    pub fn set_master_deck(&self, master: Option<DeckId>) {
        let previous_follower = self.follower();
        self.state.update_mixer(|m| m.master_deck = master);
        log::info!("Mixer: Master deck {:?}", master);
        if let Some(previous) = previous_follower {
            if self.follower() != Some(previous) {
                self.release_follower(previous);
            }
        }
        self.resync();
    }

    pub fn set_sync_enabled(&self, enabled: bool) {
        let previous_follower = self.follower();
        self.state.update_mixer(|m| m.sync_enabled = enabled);
        log::info!("Mixer: Sync {}", if enabled { "enabled" } else { "disabled" });
        if enabled {
            self.resync();
        } else if let Some(previous) = previous_follower {
            self.release_follower(previous);
        }
    }

    pub fn set_quantize_enabled(&self, enabled: bool) {
        self.state.update_mixer(|m| m.quantize_enabled = enabled);
    }

    pub fn set_active_deck(&self, deck: DeckId) {
        self.state.update_mixer(|m| m.active_deck = deck);
    }

    /// Applies an externally estimated beat-phase correction to the sync
    /// follower by shifting its position. Returns the follower's new
    /// position.
    pub fn apply_beat_offset(&self, correction_seconds: f64) -> Result<f64, PlaybackError> {
        let follower = self.follower().ok_or(PlaybackError::SyncInactive)?;
        let correction = if correction_seconds.is_finite() {
            correction_seconds
        } else {
            0.0
        };
        let previous = self.state.deck(follower).beat_offset_correction;
        let position = self.graph.shift_position(follower, correction - previous)?;
        self.state
            .update_deck(follower, |d| d.beat_offset_correction = correction);
        self.pump_events();
        Ok(position)
    }

    // --- Sync ---

    fn resync(&self) {
        let Some(follower) = self.follower() else {
            return;
        };
        if let Err(e) = self.drive_follower(follower.other(), follower) {
            log::warn!("Mixer: Sync not applied to deck {}: {}", follower, e);
        }
    }

    fn drive_follower(&self, master: DeckId, follower: DeckId) -> Result<(), PlaybackError> {
        if !self.graph.status(master).accepts_controls() || !self.graph.status(follower).accepts_controls() {
            return Ok(());
        }
        let (master_bpm, follower_bpm) = {
            let metas = self.lock_meta();
            (metas[master.index()].bpm, metas[follower.index()].bpm)
        };
        let master_bpm = master_bpm.ok_or(PlaybackError::MissingTempo { deck: master })?;
        let follower_bpm = follower_bpm.ok_or(PlaybackError::MissingTempo { deck: follower })?;
        let master_ratio = self.graph.tempo(master).tempo_ratio;
        let ratio = sync::follower_tempo_ratio(master_bpm, master_ratio, follower_bpm)
            .ok_or(PlaybackError::MissingTempo { deck: follower })?;
        let applied = self.graph.set_tempo(follower, self.config.clamp_tempo(ratio))?;
        self.record_tempo(follower, applied);
        log::debug!(
            "Mixer: Deck {} follows deck {} at {:.4}",
            follower,
            master,
            applied.tempo_ratio
        );
        Ok(())
    }

    fn release_follower(&self, deck: DeckId) {
        self.state.update_deck(deck, |d| d.beat_offset_correction = 0.0);
        if !self.graph.status(deck).accepts_controls() {
            return;
        }
        let manual = self.lock_meta()[deck.index()].manual_tempo;
        match self.graph.set_tempo(deck, manual) {
            Ok(applied) => self.record_tempo(deck, applied),
            Err(e) => log::warn!("Mixer: Could not restore tempo on deck {}: {}", deck, e),
        }
    }

    // --- Shutdown ---

    pub fn shutdown(&self) {
        log::info!("Mixer: Shutting down");
        self.graph.shutdown();
        self.pump_events();
    }
}

impl std::fmt::Debug for MixerController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixerController")
            .field("context", &self.graph.context())
            .field("state", &self.state)
            .field("waveforms", &self.waveforms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoding::test_support::{sine, wav_bytes};
    use crate::audio::graph::UnavailableStretchLoader;
    use crate::audio::graph::stretch::test_support::CountingLoader;
    use crate::audio::source::MemorySource;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const RATE: u32 = 8000;

    fn config() -> EngineConfig {
        EngineConfig {
            output_sample_rate: RATE,
            open_output_device: false,
            ..EngineConfig::default()
        }
    }

    fn track(name: &str, seconds: f32) -> Arc<dyn TrackSource> {
        let bytes = wav_bytes(&sine(220.0, RATE, seconds, 0.5), RATE);
        Arc::new(MemorySource::new(name, bytes).with_extension("wav"))
    }

    fn mixer(loader: Arc<dyn StretchModuleLoader>) -> MixerController {
        MixerController::new(config(), loader).unwrap()
    }

    async fn wait_for(mixer: &MixerController, deck: DeckId, status: DeckStatus) {
        for _ in 0..500 {
            mixer.pump_events();
            if mixer.state().deck(deck).status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("deck {} never reached {:?}", deck, status);
    }

    async fn loaded(loader: Arc<dyn StretchModuleLoader>, bpm_a: f64, bpm_b: f64) -> MixerController {
        let mixer = mixer(loader);
        mixer
            .load_track(DeckId::A, TrackLoadRequest::new("a", track("a", 4.0)).with_tempo(bpm_a, 0.0))
            .unwrap();
        mixer
            .load_track(DeckId::B, TrackLoadRequest::new("b", track("b", 4.0)).with_tempo(bpm_b, 0.0))
            .unwrap();
        wait_for(&mixer, DeckId::A, DeckStatus::Ready).await;
        wait_for(&mixer, DeckId::B, DeckStatus::Ready).await;
        mixer
    }

    #[tokio::test]
    async fn native_tempo_moves_position_advance_rate() {
        let mixer = loaded(Arc::new(UnavailableStretchLoader), 120.0, 120.0).await;
        let applied = mixer.attach_time_stretch(DeckId::A).await.unwrap();
        assert!(!applied.stretch_active);

        let applied = mixer.set_tempo(DeckId::A, 1.25).unwrap();
        assert_eq!(applied.position_advance_rate, 1.25);
        let deck = mixer.state().deck(DeckId::A);
        assert_eq!(deck.tempo_ratio, 1.25);
        assert_eq!(deck.position_advance_rate, 1.25);
        assert!(!deck.stretch_active);
    }

    #[tokio::test]
    async fn stretched_tempo_keeps_native_advance() {
        let counting = Arc::new(CountingLoader::default());
        let mixer = loaded(counting.clone(), 120.0, 120.0).await;

        let applied = mixer.attach_time_stretch(DeckId::A).await.unwrap();
        assert!(applied.stretch_active);
        mixer.attach_time_stretch(DeckId::A).await.unwrap();
        mixer.attach_time_stretch(DeckId::B).await.unwrap();
        assert_eq!(counting.loads.load(Ordering::SeqCst), 1);

        let applied = mixer.set_tempo(DeckId::A, 0.8).unwrap();
        assert_eq!(applied.tempo_ratio, 0.8);
        assert_eq!(applied.position_advance_rate, 1.0);
        mixer.mix_bus().render_offline(64);
        assert_eq!(*counting.tempo.lock().unwrap(), 0.8);
        assert_eq!(
            mixer.chain(DeckId::A).unwrap(),
            vec![
                crate::audio::graph::StageKind::Source,
                crate::audio::graph::StageKind::Tone,
                crate::audio::graph::StageKind::Stretch,
                crate::audio::graph::StageKind::Gain,
                crate::audio::graph::StageKind::Bus,
            ]
        );
    }

    #[tokio::test]
    async fn sync_drives_follower_and_restores_manual_tempo() {
        let mixer = loaded(Arc::new(UnavailableStretchLoader), 128.0, 120.0).await;
        mixer.set_tempo(DeckId::B, 0.9).unwrap();
        mixer.set_master_deck(Some(DeckId::A));
        mixer.set_sync_enabled(true);
        assert_eq!(mixer.follower(), Some(DeckId::B));

        let expected = 128.0 / 120.0;
        assert!((mixer.tempo(DeckId::B).tempo_ratio - expected).abs() < 1e-9);

        mixer.set_tempo(DeckId::A, 1.1).unwrap();
        assert!((mixer.tempo(DeckId::B).tempo_ratio - expected * 1.1).abs() < 1e-9);

        mixer.set_tempo(DeckId::B, 1.05).unwrap();
        assert!((mixer.tempo(DeckId::B).tempo_ratio - expected * 1.1).abs() < 1e-9);

        mixer.set_sync_enabled(false);
        assert_eq!(mixer.tempo(DeckId::B).tempo_ratio, 1.05);
        assert_eq!(mixer.state().deck(DeckId::B).tempo_ratio, 1.05);
    }

    #[tokio::test]
    async fn sync_without_bpm_leaves_follower_alone() {
        let mixer = mixer(Arc::new(UnavailableStretchLoader));
        mixer
            .load_track(DeckId::A, TrackLoadRequest::new("a", track("a", 2.0)).with_tempo(128.0, 0.0))
            .unwrap();
        mixer
            .load_track(DeckId::B, TrackLoadRequest::new("b", track("b", 2.0)))
            .unwrap();
        wait_for(&mixer, DeckId::B, DeckStatus::Ready).await;
        mixer.set_master_deck(Some(DeckId::A));
        mixer.set_sync_enabled(true);
        assert_eq!(mixer.tempo(DeckId::B).tempo_ratio, 1.0);
    }

    #[tokio::test]
    async fn quantized_play_matches_master_phase() {
        let mixer = loaded(Arc::new(UnavailableStretchLoader), 120.0, 120.0).await;
        mixer.set_master_deck(Some(DeckId::A));
        mixer.set_quantize_enabled(true);

        mixer.seek(DeckId::A, 1.2).unwrap();
        mixer.play(DeckId::A).unwrap();
        mixer.seek(DeckId::B, 2.1).unwrap();
        mixer.play(DeckId::B).unwrap();

        assert!((mixer.position_seconds(DeckId::B) - 2.2).abs() < 1e-6);
        assert!((mixer.nearest_master_beat().unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(mixer.state().deck(DeckId::B).status, DeckStatus::Playing);
    }

    #[tokio::test]
    async fn beat_offset_shifts_follower_by_the_change() {
        let mixer = loaded(Arc::new(UnavailableStretchLoader), 120.0, 120.0).await;
        assert!(matches!(mixer.apply_beat_offset(0.1), Err(PlaybackError::SyncInactive)));

        mixer.set_master_deck(Some(DeckId::A));
        mixer.set_sync_enabled(true);
        mixer.seek(DeckId::B, 1.0).unwrap();
        let pos = mixer.apply_beat_offset(0.1).unwrap();
        assert!((pos - 1.1).abs() < 1e-9);
        let pos = mixer.apply_beat_offset(0.05).unwrap();
        assert!((pos - 1.05).abs() < 1e-9);
        assert_eq!(mixer.state().deck(DeckId::B).beat_offset_correction, 0.05);
    }

    #[tokio::test]
    async fn failed_load_only_affects_its_deck() {
        let mixer = loaded(Arc::new(UnavailableStretchLoader), 120.0, 120.0).await;
        mixer.play(DeckId::A).unwrap();

        let junk: Arc<dyn TrackSource> = Arc::new(MemorySource::new("junk", vec![0u8; 16]));
        mixer.load_track(DeckId::B, TrackLoadRequest::new("junk", junk)).unwrap();
        wait_for(&mixer, DeckId::B, DeckStatus::Error).await;

        let b = mixer.state().deck(DeckId::B);
        assert!(!b.is_loading && !b.is_playing);
        assert!(b.error.is_some());
        assert!(matches!(
            mixer.set_tempo(DeckId::B, 1.1),
            Err(PlaybackError::Graph(GraphError::DeckUnavailable { .. }))
        ));
        assert_eq!(mixer.state().deck(DeckId::A).status, DeckStatus::Playing);
    }

    async fn play_out(mixer: &MixerController, deck: DeckId) {
        mixer
            .load_track(deck, TrackLoadRequest::new("short", track("short", 0.25)))
            .unwrap();
        wait_for(mixer, deck, DeckStatus::Ready).await;
        mixer.play(deck).unwrap();
        mixer.mix_bus().render_offline(RATE as usize / 2);
    }

    #[tokio::test]
    async fn ended_deck_restarts_from_the_top() {
        let mixer = mixer(Arc::new(UnavailableStretchLoader));
        play_out(&mixer, DeckId::A).await;
        mixer.tick();

        let deck = mixer.state().deck(DeckId::A);
        assert_eq!(deck.status, DeckStatus::Ended);
        assert!(!deck.is_playing);
        assert_eq!(deck.position_seconds, 0.0);
        assert_eq!(mixer.position_seconds(DeckId::A), 0.0);

        mixer.play(DeckId::A).unwrap();
        let deck = mixer.state().deck(DeckId::A);
        assert_eq!(deck.status, DeckStatus::Playing);
        assert!(deck.is_playing);
        assert_eq!(deck.position_seconds, 0.0);

        mixer.mix_bus().render_offline(RATE as usize / 10);
        assert!((mixer.position_seconds(DeckId::A) - 0.1).abs() < 1e-9);
        mixer.tick();
        assert_eq!(mixer.state().deck(DeckId::A).status, DeckStatus::Playing);
    }

    #[tokio::test]
    async fn end_not_yet_ticked_is_reported_before_replay() {
        let mixer = mixer(Arc::new(UnavailableStretchLoader));
        play_out(&mixer, DeckId::B).await;

        mixer.play(DeckId::B).unwrap();
        mixer.tick();
        let deck = mixer.state().deck(DeckId::B);
        assert_eq!(deck.status, DeckStatus::Playing);
        assert!(deck.is_playing);
        assert_eq!(deck.position_seconds, 0.0);
    }

    #[tokio::test]
    async fn crossfader_position_and_gains_move_together() {
        let mixer = Arc::new(mixer(Arc::new(UnavailableStretchLoader)));
        let writer = {
            let mixer = mixer.clone();
            std::thread::spawn(move || {
                for i in 0..2000 {
                    mixer.set_crossfader(if i % 2 == 0 { -1.0 } else { 0.5 });
                }
            })
        };
        while !writer.is_finished() {
            let (position, gains) = mixer.crossfader();
            assert_eq!(gains, crate::audio::effects::linear_crossfade_gains(position));
        }
        writer.join().unwrap();
        assert_eq!(mixer.crossfader(), (0.5, (0.25, 0.75)));
    }

    #[tokio::test]
    async fn tone_toggle_is_reflected_in_state() {
        let mixer = loaded(Arc::new(UnavailableStretchLoader), 120.0, 120.0).await;
        assert!(!mixer.toggle_tone(DeckId::A).unwrap());
        assert!(!mixer.state().deck(DeckId::A).tone_boost);
        assert!(mixer.toggle_tone(DeckId::A).unwrap());
        assert!(mixer.toggle_tone(DeckId::A).is_ok());
    }

    #[tokio::test]
    async fn controls_on_empty_deck_are_rejected() {
        let mixer = mixer(Arc::new(UnavailableStretchLoader));
        assert!(mixer.toggle_tone(DeckId::A).is_err());
        assert!(mixer.play(DeckId::B).is_err());
        assert!(mixer.set_tempo(DeckId::A, f64::NAN).is_err());
        assert!(!mixer.unload_deck(DeckId::A));
    }

    #[test]
    fn construction_needs_a_runtime() {
        let result = MixerController::new(config(), Arc::new(UnavailableStretchLoader));
        assert!(matches!(result, Err(PlaybackError::RuntimeUnavailable(_))));
    }
}
