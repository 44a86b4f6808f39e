//! Stable error codes for the JIT engine.
//!
//! Every [`JitError`](crate::JitError) carries a `TXJ-NNNN` code that is
//! present in its display text (grep-able in logs) and never reused.
//!
//! | Range | Category |
//! |-------|----------|
//! | `TXJ-00xx` | Engine construction, compilation, resolution |
//! | `TXJ-01xx` | IR module construction |

// ── Engine (TXJ-00xx) ──

/// Invalid or unsupported target triple, CPU or feature combination.
pub const CONFIGURATION: &str = "TXJ-0001";
/// Invalid or conflicting symbol definition while populating a symbol space.
pub const LINK: &str = "TXJ-0002";
/// A module failed to compile or link.
pub const COMPILATION: &str = "TXJ-0003";
/// A symbol is not defined anywhere in the search order.
pub const SYMBOL_NOT_FOUND: &str = "TXJ-0004";

// ── IR module (TXJ-01xx) ──

/// A function was declared twice with incompatible signatures.
pub const INCOMPATIBLE_DECLARATION: &str = "TXJ-0101";
/// A function body was supplied twice for the same declaration.
pub const DUPLICATE_DEFINITION: &str = "TXJ-0102";
/// An imported declaration cannot carry a body.
pub const IMPORT_DEFINITION: &str = "TXJ-0103";
/// A declaration handle does not belong to the module.
pub const UNKNOWN_DECLARATION: &str = "TXJ-0104";
