//! Symbol spaces and the symbol registrar.
//!
//! Every engine owns a [`SymbolSpace`]: the absolute symbols generated code
//! can call without defining them. [`register_symbols`] fills it from three
//! sources, in order:
//!
//! 1. the process-wide [intrinsic table](crate::intrinsics::intrinsic_symbols),
//! 2. a snapshot of the [external function registry](crate::registry),
//! 3. the parallel-dispatch entry point.
//!
//! Everything else the process exports is reachable through
//! [`ProcessSymbols`], which the engine consults after the symbol space.

use std::fmt;

use fxhash::{FxHashMap, FxHashSet};

use crate::config::DuplicateSymbolPolicy;
use crate::error::{JitError, Result};
use crate::intrinsics::{dispatch_parallel_address, intrinsic_symbols, DISPATCH_PARALLEL};

/// A machine-word symbol address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolAddress(usize);

impl SymbolAddress {
    /// Wraps a raw address.
    #[must_use]
    pub const fn new(address: usize) -> Self {
        Self(address)
    }

    /// Wraps a pointer.
    #[must_use]
    pub fn from_ptr(ptr: *const u8) -> Self {
        Self(ptr as usize)
    }

    /// Returns the address as an integer.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the address as a pointer.
    #[must_use]
    pub fn as_ptr(self) -> *const u8 {
        self.0 as *const u8
    }

    /// Returns `true` for the zero address.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for SymbolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Where a registrar-defined symbol came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolSource {
    /// The intrinsic table.
    Intrinsic,
    /// The external function registry.
    External,
    /// The parallel-dispatch entry point.
    Dispatch,
}

/// An absolute symbol definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    /// Mangled symbol name.
    pub name: String,
    /// Bound address.
    pub address: SymbolAddress,
    /// Origin of the definition.
    pub source: SymbolSource,
}

/// Mangled name → absolute symbol table of one engine.
#[derive(Debug, Default, Clone)]
pub struct SymbolSpace {
    entries: FxHashMap<String, SymbolEntry>,
}

impl SymbolSpace {
    /// Creates an empty symbol space.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines an absolute symbol.
    ///
    /// Returns the definition it replaced, if any.
    ///
    /// # Errors
    ///
    /// Returns [`JitError::Link`] for an empty name, a name containing NUL, a
    /// null address, or a redefinition under [`DuplicateSymbolPolicy::Reject`].
    pub fn define(
        &mut self,
        entry: SymbolEntry,
        policy: DuplicateSymbolPolicy,
    ) -> Result<Option<SymbolEntry>> {
        if entry.name.is_empty() || entry.name.contains('\0') {
            return Err(JitError::Link(format!("invalid symbol name {:?}", entry.name)));
        }
        if entry.address.is_null() {
            return Err(JitError::Link(format!(
                "symbol `{}` is bound to a null address",
                entry.name
            )));
        }

        if let Some(existing) = self.entries.get(&entry.name) {
            if policy == DuplicateSymbolPolicy::Reject {
                return Err(JitError::Link(format!(
                    "duplicate definition of `{}` ({:?} at {:?}, then {:?} at {:?})",
                    entry.name, existing.source, existing.address, entry.source, entry.address
                )));
            }
            tracing::warn!(
                symbol = %entry.name,
                previous = ?existing.source,
                replacement = ?entry.source,
                "Symbol redefined, last definition wins"
            );
        }
        Ok(self.entries.insert(entry.name.clone(), entry))
    }

    /// Looks up a mangled name.
    #[must_use]
    pub fn lookup(&self, mangled: &str) -> Option<&SymbolEntry> {
        self.entries.get(mangled)
    }

    /// Returns the number of defined symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all definitions in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &SymbolEntry> {
        self.entries.values()
    }
}

/// Populates `space` with the intrinsics, the given external functions (in
/// order) and the dispatch entry point.
///
/// Returns the set of mangled names the registrar defined, used to answer
/// `has_symbol` queries.
///
/// # Errors
///
/// Returns [`JitError::Link`] if any definition is rejected by
/// [`SymbolSpace::define`].
pub fn register_symbols(
    space: &mut SymbolSpace,
    mangle: impl Fn(&str) -> String,
    externals: &[(String, SymbolAddress)],
    policy: DuplicateSymbolPolicy,
) -> Result<FxHashSet<String>> {
    let mut known = FxHashSet::default();
    let mut define = |name: &str, address: SymbolAddress, source: SymbolSource| -> Result<()> {
        let mangled = mangle(name);
        space.define(
            SymbolEntry {
                name: mangled.clone(),
                address,
                source,
            },
            policy,
        )?;
        known.insert(mangled);
        Ok(())
    };

    for intrinsic in intrinsic_symbols() {
        define(intrinsic.name, intrinsic.address, SymbolSource::Intrinsic)?;
    }
    for (name, address) in externals {
        define(name, *address, SymbolSource::External)?;
    }
    define(
        DISPATCH_PARALLEL,
        SymbolAddress::new(dispatch_parallel_address()),
        SymbolSource::Dispatch,
    )?;

    tracing::trace!(
        intrinsics = intrinsic_symbols().len(),
        externals = externals.len(),
        defined = space.len(),
        "Registered engine symbols"
    );
    Ok(known)
}

/// Lookup of symbols exported by the running process image.
pub struct ProcessSymbols {
    #[cfg(unix)]
    image: libloading::os::unix::Library,
    #[cfg(windows)]
    image: Option<libloading::os::windows::Library>,
}

impl ProcessSymbols {
    /// Opens the running process image.
    #[must_use]
    pub fn open() -> Self {
        #[cfg(unix)]
        {
            Self {
                image: libloading::os::unix::Library::this(),
            }
        }
        #[cfg(windows)]
        {
            Self {
                image: libloading::os::windows::Library::this().ok(),
            }
        }
        #[cfg(not(any(unix, windows)))]
        {
            Self {}
        }
    }

    /// Resolves a logical symbol name exported by the process.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<SymbolAddress> {
        if name.is_empty() || name.contains('\0') {
            return None;
        }
        #[cfg(unix)]
        {
            // SAFETY: the symbol is only read as an address, never called here.
            let symbol = unsafe { self.image.get::<*const u8>(name.as_bytes()) }.ok()?;
            Some(SymbolAddress::from_ptr(*symbol)).filter(|addr| !addr.is_null())
        }
        #[cfg(windows)]
        {
            let image = self.image.as_ref()?;
            // SAFETY: the symbol is only read as an address, never called here.
            let symbol = unsafe { image.get::<*const u8>(name.as_bytes()) }.ok()?;
            Some(SymbolAddress::from_ptr(*symbol)).filter(|addr| !addr.is_null())
        }
        #[cfg(not(any(unix, windows)))]
        {
            None
        }
    }
}

impl fmt::Debug for ProcessSymbols {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSymbols").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn callback() -> i32 {
        7
    }

    fn callback_address() -> SymbolAddress {
        SymbolAddress::from_ptr(callback as *const u8)
    }

    fn identity(name: &str) -> String {
        name.to_string()
    }

    #[test]
    fn registrar_defines_all_groups() {
        let mut space = SymbolSpace::new();
        let externals = vec![("my_callback".to_string(), callback_address())];
        let known = register_symbols(
            &mut space,
            identity,
            &externals,
            DuplicateSymbolPolicy::LastWins,
        )
        .unwrap();

        for intrinsic in intrinsic_symbols() {
            assert!(known.contains(intrinsic.name));
            assert_eq!(space.lookup(intrinsic.name).unwrap().source, SymbolSource::Intrinsic);
        }
        assert_eq!(space.lookup("my_callback").unwrap().address, callback_address());
        assert_eq!(space.lookup(DISPATCH_PARALLEL).unwrap().source, SymbolSource::Dispatch);
        assert_eq!(known.len(), intrinsic_symbols().len() + 2);
    }

    #[test]
    fn registrar_records_mangled_names() {
        let mut space = SymbolSpace::new();
        let known = register_symbols(
            &mut space,
            |name| format!("_{name}"),
            &[],
            DuplicateSymbolPolicy::LastWins,
        )
        .unwrap();
        assert!(known.contains("_sinf"));
        assert!(!known.contains("sinf"));
        assert!(space.lookup("_DispatchParallel").is_some());
    }

    #[test]
    fn collision_last_wins() {
        let mut space = SymbolSpace::new();
        let externals = vec![("sinf".to_string(), callback_address())];
        register_symbols(&mut space, identity, &externals, DuplicateSymbolPolicy::LastWins).unwrap();
        let entry = space.lookup("sinf").unwrap();
        assert_eq!(entry.source, SymbolSource::External);
        assert_eq!(entry.address, callback_address());
    }

    #[test]
    fn collision_rejected() {
        let mut space = SymbolSpace::new();
        let externals = vec![("cosf".to_string(), callback_address())];
        let err = register_symbols(&mut space, identity, &externals, DuplicateSymbolPolicy::Reject)
            .unwrap_err();
        assert!(matches!(err, JitError::Link(_)));
        assert!(err.to_string().contains("cosf"));
    }

    #[test]
    fn invalid_definitions_rejected() {
        let mut space = SymbolSpace::new();
        let null = SymbolEntry {
            name: "null_sym".into(),
            address: SymbolAddress::new(0),
            source: SymbolSource::External,
        };
        assert!(matches!(
            space.define(null, DuplicateSymbolPolicy::LastWins),
            Err(JitError::Link(_))
        ));
        let unnamed = SymbolEntry {
            name: String::new(),
            address: callback_address(),
            source: SymbolSource::External,
        };
        assert!(space.define(unnamed, DuplicateSymbolPolicy::LastWins).is_err());
        assert!(space.is_empty());
    }

    #[test]
    fn define_returns_replaced_entry() {
        let mut space = SymbolSpace::new();
        let entry = SymbolEntry {
            name: "f".into(),
            address: callback_address(),
            source: SymbolSource::External,
        };
        assert!(space.define(entry.clone(), DuplicateSymbolPolicy::LastWins).unwrap().is_none());
        let replaced = space.define(entry.clone(), DuplicateSymbolPolicy::LastWins).unwrap();
        assert_eq!(replaced, Some(entry));
        assert_eq!(space.len(), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn process_symbols_resolve_libc() {
        let process = ProcessSymbols::open();
        assert!(process.lookup("malloc").is_some());
        assert!(process.lookup("texpr_jit_no_such_symbol_anywhere").is_none());
        assert!(process.lookup("").is_none());
    }

    #[test]
    fn address_debug_is_hex() {
        assert_eq!(format!("{:?}", SymbolAddress::new(255)), "0xff");
    }
}
