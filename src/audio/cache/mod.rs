use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;

use crate::audio::analysis::WaveformAnalyzer;
use crate::audio::source::TrackSource;
use crate::audio::types::{TrackId, WaveformSeries};

mod store;
use store::FifoStore;

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Preloads that joined an analysis already in flight.
    pub coalesced: u64,
    pub analyses: u64,
    pub evictions: u64,
}

type AnalysisSlot = Arc<OnceCell<Arc<WaveformSeries>>>;

struct InFlight {
    ticket: u64,
    slot: AnalysisSlot,
}

struct CacheInner {
    store: FifoStore<TrackId, Arc<WaveformSeries>>,
    in_flight: HashMap<TrackId, InFlight>,
    next_ticket: u64,
    stats: CacheStats,
}

/// Bounded track id -> waveform store in front of [`WaveformAnalyzer`].
///
/// Concurrent preloads of one key share a single analysis. Each in-flight
/// analysis holds a ticket; [`cancel`](Self::cancel) and [`put`](Self::put)
/// revoke it so a late result never lands in the store.
pub struct WaveformCache {
    inner: Mutex<CacheInner>,
    analyzer: WaveformAnalyzer,
}

impl WaveformCache {
    pub fn new(capacity: usize) -> Self {
        Self::with_analyzer(capacity, WaveformAnalyzer::default())
    }

    pub fn with_analyzer(capacity: usize, analyzer: WaveformAnalyzer) -> Self {
        WaveformCache {
            inner: Mutex::new(CacheInner {
                store: FifoStore::new(capacity),
                in_flight: HashMap::new(),
                next_ticket: 0,
                stats: CacheStats::default(),
            }),
            analyzer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, track_id: &TrackId) -> Option<Arc<WaveformSeries>> {
        let mut inner = self.lock();
        let found = inner.store.get(track_id).cloned();
        if found.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        found
    }

    pub fn put(&self, track_id: TrackId, series: WaveformSeries) {
        let mut inner = self.lock();
        inner.in_flight.remove(&track_id);
        Self::store_locked(&mut inner, track_id, Arc::new(series));
    }

    fn store_locked(inner: &mut CacheInner, track_id: TrackId, series: Arc<WaveformSeries>) {
        if let Some(evicted) = inner.store.insert(track_id, series) {
            inner.stats.evictions += 1;
            log::debug!("Waveform Cache: Evicted '{}'", evicted);
        }
    }

    /// Returns the cached series for `track_id`, or decodes and analyzes
    /// `source` once no matter how many callers ask at the same time.
    ///
    /// An empty series (decode failure) is handed to every waiter but is
    /// not stored.
    pub async fn preload(&self, track_id: TrackId, source: Arc<dyn TrackSource>) -> Arc<WaveformSeries> {
        let (slot, ticket) = {
            let mut inner = self.lock();
            if let Some(hit) = inner.store.get(&track_id).cloned() {
                inner.stats.hits += 1;
                log::trace!("Waveform Cache: Hit for '{}'", track_id);
                return hit;
            }
            if let Some(pending) = inner.in_flight.get(&track_id) {
                let joined = (pending.slot.clone(), pending.ticket);
                inner.stats.coalesced += 1;
                log::debug!("Waveform Cache: Joining in-flight analysis for '{}'", track_id);
                joined
            } else {
                inner.stats.misses += 1;
                inner.next_ticket += 1;
                let ticket = inner.next_ticket;
                let slot: AnalysisSlot = Arc::new(OnceCell::new());
                inner.in_flight.insert(
                    track_id.clone(),
                    InFlight {
                        ticket,
                        slot: slot.clone(),
                    },
                );
                (slot, ticket)
            }
        };

        let series = slot
            .get_or_init(|| async {
                self.lock().stats.analyses += 1;
                log::info!("Waveform Cache: Analyzing '{}' ({})", track_id, source.describe());
                Arc::new(self.analyzer.analyze_track_source(source.clone()).await)
            })
            .await
            .clone();

        let mut inner = self.lock();
        let still_current = inner
            .in_flight
            .get(&track_id)
            .is_some_and(|pending| pending.ticket == ticket);
        if still_current {
            inner.in_flight.remove(&track_id);
            if series.is_empty() {
                log::warn!("Waveform Cache: No waveform for '{}'; not caching", track_id);
            } else {
                Self::store_locked(&mut inner, track_id, series.clone());
            }
        }
        series
    }

    /// Revokes any in-flight analysis of `track_id`. Waiters still receive
    /// the result; the store does not.
    pub fn cancel(&self, track_id: &TrackId) {
        if self.lock().in_flight.remove(track_id).is_some() {
            log::debug!("Waveform Cache: Cancelled in-flight analysis for '{}'", track_id);
        }
    }

    pub fn is_in_flight(&self, track_id: &TrackId) -> bool {
        self.lock().in_flight.contains_key(track_id)
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    pub fn len(&self) -> usize {
        self.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().store.capacity()
    }
}

impl std::fmt::Debug for WaveformCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("WaveformCache")
            .field("len", &inner.store.len())
            .field("capacity", &inner.store.capacity())
            .field("in_flight", &inner.in_flight.len())
            .field("stats", &inner.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoding::test_support::{sine, wav_bytes};
    use crate::audio::source::MemorySource;
    use crate::audio::types::WaveformSample;
    use std::io;
    use std::sync::Condvar;
    use symphonia::core::io::MediaSource;

    fn series(marker: f32) -> WaveformSeries {
        WaveformSeries::new(vec![WaveformSample {
            low: marker,
            mid: marker,
            high: marker,
            total: marker,
        }])
    }

    fn wav_source(name: &str) -> Arc<dyn TrackSource> {
        Arc::new(MemorySource::new(name, wav_bytes(&sine(440.0, 8000, 0.5, 0.5), 8000)).with_extension("wav"))
    }

    /// Blocks `open()` until the test releases it.
    #[derive(Debug)]
    struct GatedSource {
        inner: MemorySource,
        gate: Arc<(Mutex<bool>, Condvar)>,
    }

    impl TrackSource for GatedSource {
        fn describe(&self) -> String {
            self.inner.describe()
        }

        fn open(&self) -> io::Result<Box<dyn MediaSource>> {
            let (lock, cvar) = &*self.gate;
            let mut open = lock.lock().unwrap();
            while !*open {
                open = cvar.wait(open).unwrap();
            }
            self.inner.open()
        }

        fn extension_hint(&self) -> Option<String> {
            self.inner.extension_hint()
        }
    }

    #[test]
    fn inserting_past_capacity_evicts_only_the_oldest() {
        let cache = WaveformCache::new(3);
        for (i, id) in ["t1", "t2", "t3", "t4"].iter().enumerate() {
            cache.put(TrackId::from(*id), series(i as f32 / 10.0));
        }
        assert!(cache.get(&"t1".into()).is_none());
        for id in ["t2", "t3", "t4"] {
            assert!(cache.get(&id.into()).is_some(), "{} missing", id);
        }
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn reading_does_not_refresh_eviction_order() {
        let cache = WaveformCache::new(2);
        cache.put("a".into(), series(0.1));
        cache.put("b".into(), series(0.2));
        assert!(cache.get(&"a".into()).is_some());
        cache.put("c".into(), series(0.3));
        assert!(cache.get(&"a".into()).is_none());
        assert!(cache.get(&"b".into()).is_some());
    }

    #[tokio::test]
    async fn concurrent_preloads_share_one_analysis() {
        let cache = WaveformCache::new(4);
        let source = wav_source("shared");
        let (first, second) = tokio::join!(
            cache.preload("track".into(), source.clone()),
            cache.preload("track".into(), source.clone()),
        );
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 50);
        let stats = cache.stats();
        assert_eq!(stats.analyses, 1);
        assert_eq!(stats.coalesced, 1);

        let cached = cache.get(&"track".into()).unwrap();
        assert!(Arc::ptr_eq(&cached, &first));

        let again = cache.preload("track".into(), source).await;
        assert!(Arc::ptr_eq(&again, &first));
        assert_eq!(cache.stats().analyses, 1);
    }

    #[tokio::test]
    async fn cancelled_preload_is_not_stored() {
        let cache = WaveformCache::new(4);
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let source: Arc<dyn TrackSource> = Arc::new(GatedSource {
            inner: MemorySource::new("slow", wav_bytes(&sine(440.0, 8000, 0.5, 0.5), 8000))
                .with_extension("wav"),
            gate: gate.clone(),
        });

        let (series, ()) = tokio::join!(cache.preload("slow".into(), source), async {
            assert!(cache.is_in_flight(&"slow".into()));
            cache.cancel(&"slow".into());
            let (lock, cvar) = &*gate;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        });

        assert_eq!(series.len(), 50);
        assert!(cache.get(&"slow".into()).is_none());
        assert!(!cache.is_in_flight(&"slow".into()));
    }

    #[tokio::test]
    async fn failed_analysis_is_returned_but_not_cached() {
        let cache = WaveformCache::new(4);
        let bad: Arc<dyn TrackSource> = Arc::new(MemorySource::new("bad", vec![3u8; 2048]));
        let result = cache.preload("bad".into(), bad).await;
        assert!(result.is_empty());
        assert!(cache.is_empty());
        assert!(!cache.is_in_flight(&"bad".into()));
    }
}
