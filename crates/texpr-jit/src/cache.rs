//! Engine cache keyed by target descriptor.
//!
//! [`JitCache`] memoizes [`CompilationEngine`]s so every request for the
//! same target shares one engine and its compiled modules. Entries live as
//! long as the cache; the process-wide cache behind [`get_instance`] lives
//! for the process.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use fxhash::FxHashMap;
use parking_lot::Mutex;

use crate::backend;
use crate::config::JitConfig;
use crate::engine::CompilationEngine;
use crate::error::Result;
use crate::metrics::CacheSnapshot;
use crate::target::TargetDescriptor;

/// Identity of a cached engine: the three descriptor fields.
///
/// An absent field and an empty field are different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    triple: Option<String>,
    cpu: Option<String>,
    features: Option<String>,
}

impl CacheKey {
    /// Key for `descriptor`.
    #[must_use]
    pub fn new(descriptor: &TargetDescriptor) -> Self {
        Self {
            triple: descriptor.triple().map(str::to_string),
            cpu: descriptor.cpu().map(str::to_string),
            features: descriptor.features().map(str::to_string),
        }
    }
}

impl fmt::Display for CacheKey {
    /// `triple="x86_64-unknown-linux-gnu";cpu=<none>;features=""`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_field(f, "triple", self.triple.as_deref())?;
        f.write_str(";")?;
        write_field(f, "cpu", self.cpu.as_deref())?;
        f.write_str(";")?;
        write_field(f, "features", self.features.as_deref())
    }
}

fn write_field(f: &mut fmt::Formatter<'_>, label: &str, value: Option<&str>) -> fmt::Result {
    match value {
        Some(v) => write!(f, "{label}={v:?}"),
        None => write!(f, "{label}=<none>"),
    }
}

/// Single-flight cache of compilation engines.
pub struct JitCache {
    config: JitConfig,
    engines: Mutex<FxHashMap<CacheKey, Arc<CompilationEngine>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
}

impl JitCache {
    /// Creates an empty cache whose engines use `config`.
    #[must_use]
    pub fn new(config: JitConfig) -> Self {
        Self {
            config,
            engines: Mutex::new(FxHashMap::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Returns the engine for `descriptor`, constructing it on first request.
    ///
    /// Construction happens under the cache lock, so concurrent first
    /// requests for one key build exactly one engine. Failed constructions
    /// are not cached; a later request retries.
    ///
    /// # Errors
    ///
    /// Returns the engine construction error
    /// ([`JitError::Configuration`](crate::JitError::Configuration) or
    /// [`JitError::Link`](crate::JitError::Link)).
    pub fn get_instance(&self, descriptor: &TargetDescriptor) -> Result<Arc<CompilationEngine>> {
        backend::initialize_targets();

        let key = CacheKey::new(descriptor);
        let mut engines = self.engines.lock();
        if let Some(engine) = engines.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(engine));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        match CompilationEngine::new(descriptor, self.config.clone()) {
            Ok(engine) => {
                let engine = Arc::new(engine);
                tracing::debug!(key = %key, entries = engines.len() + 1, "Cached compilation engine");
                engines.insert(key, Arc::clone(&engine));
                Ok(engine)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, error = %e, "Engine construction failed");
                Err(e)
            }
        }
    }

    /// Returns the number of cached engines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.engines.lock().len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if an engine for `descriptor` is cached.
    #[must_use]
    pub fn contains(&self, descriptor: &TargetDescriptor) -> bool {
        self.engines.lock().contains_key(&CacheKey::new(descriptor))
    }

    /// Configuration used for new engines.
    #[must_use]
    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Point-in-time view of the cache.
    #[must_use]
    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for JitCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JitCache")
            .field("entries", &self.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

static GLOBAL_CACHE: LazyLock<JitCache> = LazyLock::new(|| JitCache::new(JitConfig::from_env()));

/// The process-wide cache, configured from the environment on first use.
#[must_use]
pub fn global_cache() -> &'static JitCache {
    &GLOBAL_CACHE
}

/// Returns the process-wide engine for `descriptor`.
///
/// # Errors
///
/// See [`JitCache::get_instance`].
pub fn get_instance(descriptor: &TargetDescriptor) -> Result<Arc<CompilationEngine>> {
    global_cache().get_instance(descriptor)
}
