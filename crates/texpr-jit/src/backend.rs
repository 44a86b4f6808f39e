//! Process-wide code-generation backend registration.
//!
//! Every target resolution requires the backend registry to be initialized
//! first. [`initialize_targets`] performs the registration exactly once per
//! process; the [`JitCache`](crate::cache::JitCache) calls it before the first
//! engine construction. Callers constructing engines directly must call it
//! themselves.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Once, OnceLock};

use cranelift_codegen::isa::{self, LookupError};
use target_lexicon::{Architecture, Triple};

use crate::error::{JitError, Result};

/// Backend families Cranelift can be built with.
const KNOWN_FAMILIES: &[&str] = &["x86_64", "aarch64", "s390x", "riscv64"];

static INIT: Once = Once::new();
static INIT_RUNS: AtomicUsize = AtomicUsize::new(0);
static REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();

/// The set of backend families available to this process.
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    families: Vec<&'static str>,
}

impl BackendRegistry {
    /// Probes the code generator for every known family.
    fn detect() -> Self {
        let families = KNOWN_FAMILIES
            .iter()
            .copied()
            .filter(|name| !matches!(isa::lookup_by_name(name), Err(LookupError::SupportDisabled)))
            .collect();
        Self { families }
    }

    /// Returns the registered family names.
    #[must_use]
    pub fn families(&self) -> &[&'static str] {
        &self.families
    }

    /// Returns `true` if the family for `triple` has a registered backend.
    #[must_use]
    pub fn supports(&self, triple: &Triple) -> bool {
        family_of(triple).is_some_and(|family| self.families.contains(&family))
    }
}

/// Registers all available target backends. Runs at most once per process;
/// later calls return immediately.
pub fn initialize_targets() {
    INIT.call_once(|| {
        INIT_RUNS.fetch_add(1, Ordering::Relaxed);
        let registry = BackendRegistry::detect();
        tracing::info!(families = ?registry.families(), "Registered code-generation backends");
        // `call_once` guarantees this is the only writer.
        let _ = REGISTRY.set(registry);
    });
}

/// Returns `true` once [`initialize_targets`] has completed.
#[must_use]
pub fn targets_initialized() -> bool {
    INIT.is_completed()
}

/// Number of times the registration body has executed (0 or 1).
#[must_use]
pub fn initialization_runs() -> usize {
    INIT_RUNS.load(Ordering::Relaxed)
}

/// Returns the backend registry.
///
/// # Errors
///
/// Returns [`JitError::Configuration`] if [`initialize_targets`] has not run.
pub fn registry() -> Result<&'static BackendRegistry> {
    REGISTRY.get().ok_or_else(|| {
        JitError::Configuration(
            "target backends are not registered; call initialize_targets() first".into(),
        )
    })
}

/// Looks up the ISA builder for `triple` in the registered backends.
pub(crate) fn isa_builder_for(triple: &Triple) -> Result<isa::Builder> {
    let registry = registry()?;
    if !registry.supports(triple) {
        return Err(JitError::Configuration(format!(
            "no registered backend for architecture `{}` (triple `{triple}`)",
            triple.architecture
        )));
    }
    isa::lookup(triple.clone()).map_err(|e| {
        JitError::Configuration(format!("cannot create target for `{triple}`: {e}"))
    })
}

fn family_of(triple: &Triple) -> Option<&'static str> {
    match triple.architecture {
        Architecture::X86_64 => Some("x86_64"),
        Architecture::Aarch64(_) => Some("aarch64"),
        Architecture::S390x => Some("s390x"),
        Architecture::Riscv64(_) => Some("riscv64"),
        _ => None,
    }
}
