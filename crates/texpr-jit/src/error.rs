//! Error types for the JIT engine.
//!
//! [`JitError`] is returned by engine construction, module addition and
//! symbol resolution. [`ModuleError`] is returned while a front-end is still
//! assembling an [`IrModule`](crate::module::IrModule).

use crate::error_codes;

/// Errors surfaced by the JIT engine and its cache.
///
/// None of these are retried internally; each is returned to the immediate
/// caller of the failing operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JitError {
    /// Invalid or unsupported triple/cpu/feature combination, or target
    /// backends that were never registered.
    #[error("[{code}] invalid target configuration: {0}", code = error_codes::CONFIGURATION)]
    Configuration(String),

    /// Invalid or conflicting absolute symbol definition.
    #[error("[{code}] symbol link error: {0}", code = error_codes::LINK)]
    Link(String),

    /// A module failed to compile or link.
    #[error("[{code}] failed to compile module `{module}`: {diagnostic}", code = error_codes::COMPILATION)]
    Compilation {
        /// Name of the module being compiled.
        module: String,
        /// Diagnostic text from the code generator.
        diagnostic: String,
    },

    /// The symbol is not defined anywhere in the search order.
    #[error("[{code}] symbol not found: {0}", code = error_codes::SYMBOL_NOT_FOUND)]
    SymbolNotFound(String),
}

impl JitError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => error_codes::CONFIGURATION,
            Self::Link(_) => error_codes::LINK,
            Self::Compilation { .. } => error_codes::COMPILATION,
            Self::SymbolNotFound(_) => error_codes::SYMBOL_NOT_FOUND,
        }
    }

    pub(crate) fn compilation(module: &str, diagnostic: impl std::fmt::Display) -> Self {
        Self::Compilation {
            module: module.to_string(),
            diagnostic: diagnostic.to_string(),
        }
    }
}

/// Errors raised while building an [`IrModule`](crate::module::IrModule).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModuleError {
    /// The name was already declared with a different signature.
    #[error("[{code}] `{0}` redeclared with an incompatible signature", code = error_codes::INCOMPATIBLE_DECLARATION)]
    IncompatibleDeclaration(String),

    /// The declaration already has a body.
    #[error("[{code}] `{0}` is already defined", code = error_codes::DUPLICATE_DEFINITION)]
    DuplicateDefinition(String),

    /// Imported declarations are resolved by the engine and cannot have a body.
    #[error("[{code}] `{0}` is declared as an import and cannot be defined", code = error_codes::IMPORT_DEFINITION)]
    ImportDefinition(String),

    /// The declaration handle was not issued by this module.
    #[error("[{code}] unknown declaration #{0}", code = error_codes::UNKNOWN_DECLARATION)]
    UnknownDeclaration(u32),
}

/// Result alias used throughout the crate.
pub type Result<T, E = JitError> = std::result::Result<T, E>;
