//! The compilation engine.
//!
//! A [`CompilationEngine`] owns one resolved target, one linking pipeline and
//! one symbol space. Front-ends hand it [`IrModule`]s and resolve function
//! names back to addresses.
//!
//! Name resolution order for [`CompilationEngine::find_symbol`]:
//!
//! 1. exported functions of added modules,
//! 2. registrar symbols (intrinsics, external functions, `DispatchParallel`),
//!    looked up by mangled name,
//! 3. symbols exported by the running process.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use cranelift_codegen::ir::Signature;
use cranelift_codegen::isa::{OwnedTargetIsa, TargetIsa};
use fxhash::FxHashSet;
use parking_lot::Mutex;

use crate::config::{JitConfig, LinkMode};
use crate::error::{JitError, Result};
use crate::layout::DataLayout;
use crate::link::{link_layer, LinkLayer, SymbolResolver};
use crate::metrics::{EngineMetrics, EngineSnapshot};
use crate::module::IrModule;
use crate::names;
use crate::registry::external_function_registry;
use crate::symbols::{register_symbols, ProcessSymbols, SymbolAddress, SymbolSpace};
use crate::target::{FpOpFusion, TargetConfig, TargetDescriptor};

/// A JIT compiler bound to one target.
///
/// Engines are shared as `Arc<CompilationEngine>`. `add_module` and
/// `find_symbol` serialize on an internal lock; `has_symbol` and the target
/// queries do not lock.
pub struct CompilationEngine {
    descriptor: TargetDescriptor,
    target: TargetConfig,
    isa: OwnedTargetIsa,
    layout: DataLayout,
    config: JitConfig,
    resolver: Arc<SymbolResolver>,
    known_symbols: FxHashSet<String>,
    linker: Mutex<Box<dyn LinkLayer>>,
    metrics: EngineMetrics,
}

impl CompilationEngine {
    /// Builds an engine for `descriptor`.
    ///
    /// Target backends must have been registered with
    /// [`initialize_targets`](crate::backend::initialize_targets).
    ///
    /// # Errors
    ///
    /// - [`JitError::Configuration`] if the descriptor cannot be resolved to
    ///   a supported target.
    /// - [`JitError::Link`] if the registrar rejects a symbol definition.
    pub fn new(descriptor: &TargetDescriptor, config: JitConfig) -> Result<Self> {
        let target = descriptor.resolve()?;
        let isa = target.build_isa(config.verify)?;
        let layout = DataLayout::from_isa(&*isa);

        let externals = external_function_registry().snapshot();
        let mut space = SymbolSpace::new();
        let known_symbols = register_symbols(
            &mut space,
            |name| layout.mangle(name),
            &externals,
            config.duplicate_symbols,
        )?;

        let resolver = Arc::new(SymbolResolver::new(space, layout, ProcessSymbols::open()));
        let linker = link_layer(config.link_mode, Arc::clone(&isa), Arc::clone(&resolver));

        tracing::debug!(
            descriptor = %descriptor,
            triple = %isa.triple(),
            link_mode = ?config.link_mode,
            symbols = known_symbols.len(),
            "Constructed compilation engine"
        );

        Ok(Self {
            descriptor: descriptor.clone(),
            target,
            isa,
            layout,
            config,
            resolver,
            known_symbols,
            linker: Mutex::new(linker),
            metrics: EngineMetrics::new(),
        })
    }

    /// Builds a host engine with the default configuration.
    ///
    /// # Errors
    ///
    /// See [`CompilationEngine::new`].
    pub fn host() -> Result<Self> {
        Self::new(&TargetDescriptor::host(), JitConfig::default())
    }

    /// Adds a module. Ownership of its functions moves to the engine.
    ///
    /// Under [`LinkMode::Eager`] the module is executable when this returns;
    /// under [`LinkMode::Deferred`] it is linked by the next `find_symbol`.
    ///
    /// # Errors
    ///
    /// Returns [`JitError::Compilation`] with the code generator's diagnostic
    /// if the module fails to verify, compile or link, or imports a name that
    /// cannot be resolved.
    pub fn add_module(&self, module: IrModule) -> Result<()> {
        let name = module.name().to_string();
        let functions = module.len();
        let start = Instant::now();
        let result = self.linker.lock().add_module(module);
        let elapsed = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);

        match &result {
            Ok(()) => {
                self.metrics.record_module(elapsed);
                tracing::debug!(module = %name, functions, elapsed_ns = elapsed, "Added module");
            }
            Err(e) => {
                self.metrics.record_failure(elapsed);
                tracing::debug!(module = %name, error = %e, "Module rejected");
            }
        }
        result
    }

    /// Resolves a logical symbol name to its address.
    ///
    /// # Errors
    ///
    /// - [`JitError::SymbolNotFound`] if no source defines `name`.
    /// - [`JitError::Compilation`] if pending modules fail to link.
    pub fn find_symbol(&self, name: &str) -> Result<SymbolAddress> {
        let found = self.lookup(name);
        self.metrics.record_lookup(matches!(found, Ok(Some(_))));
        match found? {
            Some(address) => Ok(address),
            None => Err(JitError::SymbolNotFound(name.to_string())),
        }
    }

    fn lookup(&self, name: &str) -> Result<Option<SymbolAddress>> {
        if let Some(address) = self.linker.lock().lookup(name)? {
            tracing::trace!(symbol = name, address = ?address, source = "module", "Resolved symbol");
            return Ok(Some(address));
        }
        if let Some(address) = self.resolver.registered(name) {
            tracing::trace!(symbol = name, address = ?address, source = "registrar", "Resolved symbol");
            return Ok(Some(address));
        }
        let address = self.resolver.process(name);
        if address.is_some() {
            tracing::trace!(symbol = name, address = ?address, source = "process", "Resolved symbol");
        }
        Ok(address)
    }

    /// Returns `true` if `name` was defined by the symbol registrar.
    ///
    /// Only intrinsics, registered external functions and the dispatch
    /// entry count; functions of added modules and process symbols do not.
    #[must_use]
    pub fn has_symbol(&self, name: &str) -> bool {
        self.known_symbols.contains(&self.layout.mangle(name))
    }

    /// The target machine code is generated for.
    #[must_use]
    pub fn target_isa(&self) -> &dyn TargetIsa {
        &*self.isa
    }

    /// Shared handle to the target machine.
    #[must_use]
    pub fn owned_target_isa(&self) -> OwnedTargetIsa {
        Arc::clone(&self.isa)
    }

    /// Data layout of the target.
    #[must_use]
    pub fn data_layout(&self) -> &DataLayout {
        &self.layout
    }

    /// The resolved target configuration.
    #[must_use]
    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    /// The descriptor the engine was built from.
    #[must_use]
    pub fn descriptor(&self) -> &TargetDescriptor {
        &self.descriptor
    }

    /// The configuration the engine was built with.
    #[must_use]
    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Link strategy in use.
    #[must_use]
    pub fn link_mode(&self) -> LinkMode {
        self.linker.lock().mode()
    }

    /// Floating-point fusion policy front-ends should follow.
    #[must_use]
    pub fn fp_op_fusion(&self) -> FpOpFusion {
        self.target.fp_fusion
    }

    /// An empty signature with the target's default calling convention.
    #[must_use]
    pub fn make_signature(&self) -> Signature {
        Signature::new(self.layout.call_conv())
    }

    /// Allocates a process-wide unique function name derived from `name`.
    #[must_use]
    pub fn unique_function_name(&self, name: &str) -> String {
        names::unique_function_name(name)
    }

    /// Number of symbols the registrar defined.
    #[must_use]
    pub fn registered_symbol_count(&self) -> usize {
        self.resolver.space().len()
    }

    /// Snapshot of the engine's counters.
    #[must_use]
    pub fn metrics(&self) -> EngineSnapshot {
        self.metrics.snapshot()
    }
}

impl fmt::Debug for CompilationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilationEngine")
            .field("descriptor", &self.descriptor)
            .field("triple", &self.target.triple)
            .field("config", &self.config)
            .field("known_symbols", &self.known_symbols.len())
            .finish_non_exhaustive()
    }
}
