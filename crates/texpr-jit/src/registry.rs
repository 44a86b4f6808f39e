//! Process-wide registry of externally provided native functions.
//!
//! Any component may call [`register_external_function`] to make a C-ABI
//! routine callable from generated code without touching the engine. Each
//! engine snapshots the registry when it is constructed: registrations made
//! afterwards are visible only to engines constructed later.

use std::sync::LazyLock;

use fxhash::FxHashMap;
use parking_lot::RwLock;

use crate::error::{JitError, Result};
use crate::symbols::SymbolAddress;

/// Append-only name → function pointer table, iterated in first-registration
/// order. Re-registering a name replaces its address in place.
///
/// Reads and writes are guarded by a `RwLock`; registration may happen from
/// any thread.
#[derive(Debug, Default)]
pub struct ExternalFunctionRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    order: Vec<String>,
    functions: FxHashMap<String, SymbolAddress>,
}

impl ExternalFunctionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `address` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`JitError::Link`] for an empty name, a name containing NUL,
    /// or a null address.
    pub fn register(&self, name: &str, address: SymbolAddress) -> Result<()> {
        if name.is_empty() || name.contains('\0') {
            return Err(JitError::Link(format!("invalid external function name {name:?}")));
        }
        if address.is_null() {
            return Err(JitError::Link(format!("external function `{name}` has a null address")));
        }

        let mut inner = self.inner.write();
        if inner.functions.insert(name.to_string(), address).is_none() {
            inner.order.push(name.to_string());
        } else {
            tracing::debug!(name, "Replaced external function registration");
        }
        Ok(())
    }

    /// Returns the address registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<SymbolAddress> {
        self.inner.read().functions.get(name).copied()
    }

    /// Returns `true` if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().functions.contains_key(name)
    }

    /// Returns the number of registered functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the current registrations, in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, SymbolAddress)> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .map(|name| (name.clone(), inner.functions[name]))
            .collect()
    }
}

static EXTERNAL_FUNCTIONS: LazyLock<ExternalFunctionRegistry> =
    LazyLock::new(ExternalFunctionRegistry::new);

/// Returns the process-wide registry.
#[must_use]
pub fn external_function_registry() -> &'static ExternalFunctionRegistry {
    &EXTERNAL_FUNCTIONS
}

/// Registers a native function in the process-wide registry.
///
/// # Errors
///
/// See [`ExternalFunctionRegistry::register`].
pub fn register_external_function(name: &str, function: *const u8) -> Result<()> {
    external_function_registry().register(name, SymbolAddress::from_ptr(function))
}
