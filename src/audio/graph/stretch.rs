use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;

use crate::audio::errors::StretchError;

// --- Module Seam ---

/// One running instance of a time-stretcher, owned by a deck's stretch stage.
pub trait TimeStretchProcessor: Send {
    /// `tempo` > 1.0 is faster. Pitch is preserved.
    fn set_tempo(&mut self, tempo: f64);
    /// Processes one mono block in place.
    fn process(&mut self, block: &mut [f32]);
    fn reset(&mut self);
}

/// A loaded time-stretch implementation. Loaded at most once per audio
/// context and shared by every deck in it.
pub trait TimeStretchModule: Send + Sync {
    fn name(&self) -> &str;
    fn create_processor(&self, sample_rate: u32) -> Result<Box<dyn TimeStretchProcessor>, StretchError>;
}

/// Environment hook that provides the stretch module, if there is one.
/// `load` may block; it runs on the blocking pool.
pub trait StretchModuleLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn TimeStretchModule>, StretchError>;
}

/// Loader for builds without a time-stretcher. Every deck falls back to
/// native-rate tempo.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStretchLoader;

impl StretchModuleLoader for UnavailableStretchLoader {
    fn load(&self) -> Result<Arc<dyn TimeStretchModule>, StretchError> {
        Err(StretchError::Unsupported(
            "no time-stretch module is available in this build".to_string(),
        ))
    }
}

// --- Per-Context Registry ---

/// Identity of one audio context (one output bus and its two decks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioContextId(u64);

impl AudioContextId {
    pub fn next() -> Self {
        static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);
        AudioContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for AudioContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

type ModuleLoad = Result<Arc<dyn TimeStretchModule>, StretchError>;
type ModuleCell = Arc<OnceCell<ModuleLoad>>;

lazy_static! {
    static ref STRETCH_MODULES: Mutex<HashMap<AudioContextId, ModuleCell>> =
        Mutex::new(HashMap::new());
}

fn context_cell(context: AudioContextId) -> ModuleCell {
    STRETCH_MODULES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(context)
        .or_insert_with(|| Arc::new(OnceCell::new()))
        .clone()
}

/// Resolves the stretch module for `context`, loading it on first use.
/// The outcome, success or failure, is cached for the context's lifetime,
/// so the loader runs and a failure is logged at most once per context.
pub(crate) async fn module_for_context(
    context: AudioContextId,
    loader: &Arc<dyn StretchModuleLoader>,
) -> ModuleLoad {
    let cell = context_cell(context);
    cell.get_or_init(|| async {
        let loader = loader.clone();
        let loaded = tokio::task::spawn_blocking(move || loader.load())
            .await
            .unwrap_or_else(|join_error| Err(StretchError::LoadFailed(join_error.to_string())));
        match &loaded {
            Ok(module) => log::info!(
                "Time Stretch: Loaded module '{}' for {}",
                module.name(),
                context
            ),
            Err(e) => log::warn!(
                "Time Stretch: {} for {}. Tempo changes will shift pitch.",
                e,
                context
            ),
        }
        loaded
    })
    .await
    .clone()
}

/// Forgets the module registered for `context`. Safe to call repeatedly.
pub(crate) fn release_context(context: AudioContextId) {
    if STRETCH_MODULES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&context)
        .is_some()
    {
        log::debug!("Time Stretch: Released {}", context);
    }
}

#[cfg(test)]
pub(crate) fn is_context_registered(context: AudioContextId) -> bool {
    STRETCH_MODULES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .contains_key(&context)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Passes audio through untouched and records the last tempo.
    pub(crate) struct PassthroughProcessor {
        pub(crate) tempo: Arc<Mutex<f64>>,
    }

    impl TimeStretchProcessor for PassthroughProcessor {
        fn set_tempo(&mut self, tempo: f64) {
            *self.tempo.lock().unwrap() = tempo;
        }

        fn process(&mut self, _block: &mut [f32]) {}

        fn reset(&mut self) {}
    }

    pub(crate) struct PassthroughModule {
        pub(crate) tempo: Arc<Mutex<f64>>,
    }

    impl TimeStretchModule for PassthroughModule {
        fn name(&self) -> &str {
            "passthrough"
        }

        fn create_processor(&self, _sample_rate: u32) -> Result<Box<dyn TimeStretchProcessor>, StretchError> {
            Ok(Box::new(PassthroughProcessor {
                tempo: self.tempo.clone(),
            }))
        }
    }

    #[derive(Default)]
    pub(crate) struct CountingLoader {
        pub(crate) loads: AtomicUsize,
        pub(crate) tempo: Arc<Mutex<f64>>,
    }

    impl StretchModuleLoader for CountingLoader {
        fn load(&self) -> Result<Arc<dyn TimeStretchModule>, StretchError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(PassthroughModule {
                tempo: self.tempo.clone(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::CountingLoader;
    use super::*;

    #[tokio::test]
    async fn module_loads_once_per_context() {
        let counting = Arc::new(CountingLoader::default());
        let loader: Arc<dyn StretchModuleLoader> = counting.clone();
        let ctx = AudioContextId::next();

        let (first, second) = tokio::join!(
            module_for_context(ctx, &loader),
            module_for_context(ctx, &loader)
        );
        assert!(first.is_ok() && second.is_ok());
        assert!(module_for_context(ctx, &loader).await.is_ok());
        assert_eq!(counting.loads.load(Ordering::SeqCst), 1);

        let other = AudioContextId::next();
        assert!(module_for_context(other, &loader).await.is_ok());
        assert_eq!(counting.loads.load(Ordering::SeqCst), 2);

        release_context(ctx);
        release_context(other);
    }

    #[tokio::test]
    async fn failure_is_cached_for_the_context() {
        let loader: Arc<dyn StretchModuleLoader> = Arc::new(UnavailableStretchLoader);
        let ctx = AudioContextId::next();
        let err = module_for_context(ctx, &loader).await.err();
        assert!(matches!(err, Some(StretchError::Unsupported(_))));
        assert!(is_context_registered(ctx));
        release_context(ctx);
        release_context(ctx);
        assert!(!is_context_registered(ctx));
    }
}
