//! Counters kept by compilation engines and the engine cache.
//!
//! Each [`CompilationEngine`](crate::CompilationEngine) counts the modules it
//! linked, the modules it rejected, the time spent in `add_module` and the
//! symbol lookups it served. A [`JitCache`](crate::cache::JitCache) counts
//! hits, misses and failed constructions; [`CacheSnapshot`] reports them.
//! Counters are updated with `Relaxed` atomics and read back as snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-engine counters.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Modules added successfully.
    modules_added: AtomicU64,
    /// Modules rejected with a compilation error.
    compile_failures: AtomicU64,
    /// Total time spent in `add_module` (nanoseconds).
    compile_time_total_ns: AtomicU64,
    /// `find_symbol` calls.
    lookups: AtomicU64,
    /// `find_symbol` calls that found nothing.
    lookup_misses: AtomicU64,
}

impl EngineMetrics {
    /// Creates a metrics instance with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a module added in `compile_time_ns`.
    pub fn record_module(&self, compile_time_ns: u64) {
        self.modules_added.fetch_add(1, Ordering::Relaxed);
        self.compile_time_total_ns
            .fetch_add(compile_time_ns, Ordering::Relaxed);
    }

    /// Records a module that failed to compile.
    pub fn record_failure(&self, compile_time_ns: u64) {
        self.compile_failures.fetch_add(1, Ordering::Relaxed);
        self.compile_time_total_ns
            .fetch_add(compile_time_ns, Ordering::Relaxed);
    }

    /// Records a symbol lookup.
    pub fn record_lookup(&self, found: bool) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if !found {
            self.lookup_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Takes a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            modules_added: self.modules_added.load(Ordering::Relaxed),
            compile_failures: self.compile_failures.load(Ordering::Relaxed),
            compile_time_total_ns: self.compile_time_total_ns.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            lookup_misses: self.lookup_misses.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineSnapshot {
    /// Modules added successfully.
    pub modules_added: u64,
    /// Modules rejected with a compilation error.
    pub compile_failures: u64,
    /// Total time spent in `add_module` (nanoseconds).
    pub compile_time_total_ns: u64,
    /// Symbol lookups.
    pub lookups: u64,
    /// Symbol lookups that failed.
    pub lookup_misses: u64,
}

impl EngineSnapshot {
    /// Mean `add_module` time in nanoseconds, or 0 if nothing was added.
    #[must_use]
    pub fn mean_compile_time_ns(&self) -> u64 {
        let total = self.modules_added + self.compile_failures;
        if total == 0 {
            return 0;
        }
        self.compile_time_total_ns / total
    }
}

/// Point-in-time snapshot of the engine cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheSnapshot {
    /// Number of cached engines.
    pub entries: usize,
    /// Requests served from the cache.
    pub hits: u64,
    /// Requests that constructed an engine.
    pub misses: u64,
    /// Constructions that failed and were not cached.
    pub failures: u64,
}

impl CacheSnapshot {
    /// Share of `get_instance` calls served from the cache, or `None` before
    /// the first call.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> Option<f64> {
        let requests = self.hits.checked_add(self.misses).filter(|&n| n > 0)?;
        Some(self.hits as f64 / requests as f64)
    }
}
