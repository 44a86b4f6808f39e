//! # texpr-jit
//!
//! Native JIT engine for tensor-expression kernels, built on Cranelift.
//!
//! Front-ends build an [`IrModule`], obtain a [`CompilationEngine`] for a
//! [`TargetDescriptor`] from the engine cache, add the module and resolve
//! kernel entry points to callable addresses:
//!
//! ```ignore
//! use texpr_jit::{get_instance, IrModule, TargetDescriptor};
//!
//! let engine = get_instance(&TargetDescriptor::host())?;
//! let name = engine.unique_function_name("add_kernel");
//! let mut module = IrModule::new(&name);
//! // ... declare and define `name` ...
//! engine.add_module(module)?;
//! let entry = engine.find_symbol(&name)?;
//! ```
//!
//! Generated code can call, without defining them:
//!
//! - the f32/f64 math [intrinsics](intrinsics),
//! - native callbacks registered through [`register_external_function`]
//!   before the engine was built,
//! - `DispatchParallel`,
//! - anything else the process exports.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Code-generation backend registration
pub mod backend;
/// Engine cache keyed by target descriptor
pub mod cache;
/// Engine configuration
pub mod config;
/// The compilation engine
pub mod engine;
/// Error types
pub mod error;
/// Stable error codes
pub mod error_codes;
/// Math intrinsics and the dispatch entry point
pub mod intrinsics;
/// Target data layout
pub mod layout;
mod link;
/// Engine and cache counters
pub mod metrics;
/// IR modules
pub mod module;
/// Unique function names
pub mod names;
/// External function registry
pub mod registry;
/// Symbol spaces and the registrar
pub mod symbols;
/// Target descriptor resolution
pub mod target;

pub use cache::{get_instance, global_cache, CacheKey, JitCache};
pub use config::{DuplicateSymbolPolicy, JitConfig, LinkMode};
pub use engine::CompilationEngine;
pub use error::{JitError, ModuleError, Result};
pub use layout::DataLayout;
pub use module::{Declaration, FuncDecl, IrModule};
pub use names::{unique_function_name, NameAllocator};
pub use registry::register_external_function;
pub use symbols::SymbolAddress;
pub use target::{FpOpFusion, TargetConfig, TargetDescriptor};

pub use cranelift_codegen;
pub use cranelift_frontend;
pub use cranelift_module::Linkage;
