//! Link layers: turn [`IrModule`]s into executable code.
//!
//! Both strategies share one [`JITModule`] per engine and differ only in
//! when relocations are applied and memory is made executable:
//!
//! - [`EagerLinker`] finalizes every module as it is added.
//! - [`DeferredLinker`] compiles on add and finalizes all pending modules on
//!   the next lookup.
//!
//! Imports are resolved against earlier modules' exports, then the engine's
//! [`SymbolResolver`]. Every import is checked, and every body verified,
//! before anything is declared in the JIT module, so a rejected module leaves
//! no trace and can be resubmitted once fixed.
//!
//! A failure after definitions have started (code generation or final
//! linking) cannot be undone in the JIT module. The names it left behind are
//! reserved and reported as such on later adds.

use std::sync::Arc;

use cranelift_codegen::ir::UserExternalName;
use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::{verify_function, CodegenError, Context};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module, ModuleError as ClifModuleError};
use fxhash::{FxHashMap, FxHashSet};

use crate::config::LinkMode;
use crate::error::{JitError, Result};
use crate::layout::DataLayout;
use crate::module::{is_exported, IrModule, FUNCTION_NAMESPACE};
use crate::symbols::{ProcessSymbols, SymbolAddress, SymbolSpace};

/// Resolves names that are not defined by any added module.
#[derive(Debug)]
pub(crate) struct SymbolResolver {
    space: SymbolSpace,
    layout: DataLayout,
    process: ProcessSymbols,
}

impl SymbolResolver {
    pub(crate) fn new(space: SymbolSpace, layout: DataLayout, process: ProcessSymbols) -> Self {
        Self { space, layout, process }
    }

    /// Registrar symbols (by mangled name) first, then the process image.
    pub(crate) fn resolve(&self, name: &str) -> Option<SymbolAddress> {
        self.registered(name).or_else(|| self.process.lookup(name))
    }

    pub(crate) fn registered(&self, name: &str) -> Option<SymbolAddress> {
        self.space.lookup(&self.layout.mangle(name)).map(|entry| entry.address)
    }

    pub(crate) fn process(&self, name: &str) -> Option<SymbolAddress> {
        self.process.lookup(name)
    }

    pub(crate) fn space(&self) -> &SymbolSpace {
        &self.space
    }
}

/// A linking pipeline owned by one engine.
pub(crate) trait LinkLayer: Send {
    /// Compiles `module`; links it now or later depending on the strategy.
    fn add_module(&mut self, module: IrModule) -> Result<()>;

    /// Address of an exported function of an added module, linking pending
    /// modules first if needed.
    fn lookup(&mut self, name: &str) -> Result<Option<SymbolAddress>>;

    /// Strategy implemented by this layer.
    fn mode(&self) -> LinkMode;
}

/// Creates the link layer for `mode`.
pub(crate) fn link_layer(
    mode: LinkMode,
    isa: OwnedTargetIsa,
    resolver: Arc<SymbolResolver>,
) -> Box<dyn LinkLayer> {
    let core = LinkCore::new(isa, resolver);
    match mode {
        LinkMode::Eager => Box::new(EagerLinker { core }),
        LinkMode::Deferred => Box::new(DeferredLinker {
            core,
            pending: FxHashMap::default(),
            pending_modules: Vec::new(),
        }),
    }
}

/// Holder that lets the JIT module cross threads behind the engine mutex.
struct JitHolder(JITModule);

// SAFETY: the JIT module is only touched through `&mut self` on the link
// layer, which the engine keeps behind a mutex. The raw pointers it holds
// refer to memory it owns.
unsafe impl Send for JitHolder {}

struct LinkCore {
    jit: JitHolder,
    resolver: Arc<SymbolResolver>,
    exports: FxHashMap<String, FuncId>,
    /// Named definitions left in the JIT module by a failed add or link.
    stranded: FxHashSet<String>,
}

impl LinkCore {
    fn new(isa: OwnedTargetIsa, resolver: Arc<SymbolResolver>) -> Self {
        let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        let lookup = Arc::clone(&resolver);
        builder.symbol_lookup_fn(Box::new(move |name: &str| lookup.resolve(name).map(SymbolAddress::as_ptr)));
        Self {
            jit: JitHolder(JITModule::new(builder)),
            resolver,
            exports: FxHashMap::default(),
            stranded: FxHashSet::default(),
        }
    }

    /// Declares and defines every function of `module`. Returns the exported
    /// definitions, which are not yet finalized.
    fn compile(
        &mut self,
        module: IrModule,
        pending: &FxHashMap<String, FuncId>,
    ) -> Result<Vec<(String, FuncId)>> {
        let (module_name, parts) = module.into_parts();
        let verify = self.jit.0.isa().flags().enable_verifier();

        for (decl, body) in &parts {
            if decl.linkage == Linkage::Import {
                if !self.exports.contains_key(&decl.name)
                    && !pending.contains_key(&decl.name)
                    && self.resolver.resolve(&decl.name).is_none()
                {
                    return Err(JitError::compilation(
                        &module_name,
                        format!("unresolved import `{}`", decl.name),
                    ));
                }
                continue;
            }
            let Some(func) = body else {
                return Err(JitError::compilation(
                    &module_name,
                    format!("`{}` is declared but never defined", decl.name),
                ));
            };
            if decl.linkage != Linkage::Local && self.stranded.contains(&decl.name) {
                return Err(JitError::compilation(
                    &module_name,
                    format!("`{}` was left defined by an earlier failed add and cannot be redefined", decl.name),
                ));
            }
            if verify {
                verify_function(func, self.jit.0.isa()).map_err(|errors| {
                    JitError::compilation(&module_name, format!("verifier errors:\n{errors}"))
                })?;
            }
            if is_exported(decl.linkage)
                && (self.exports.contains_key(&decl.name) || pending.contains_key(&decl.name))
            {
                return Err(JitError::compilation(
                    &module_name,
                    format!("duplicate definition of `{}`", decl.name),
                ));
            }
        }

        let jit = &mut self.jit.0;
        let mut ids = Vec::with_capacity(parts.len());
        for (decl, _) in &parts {
            let id = if decl.linkage == Linkage::Local {
                jit.declare_anonymous_function(&decl.signature)
            } else {
                jit.declare_function(&decl.name, decl.linkage, &decl.signature)
            }
            .map_err(|e| JitError::compilation(&module_name, describe(&e)))?;
            ids.push(id);
        }

        let mut exported = Vec::new();
        let mut defined = Vec::new();
        let mut ctx = Context::new();
        for ((decl, body), &id) in parts.into_iter().zip(&ids) {
            let Some(mut func) = body else { continue };
            let outcome = rebind_call_targets(&mut func, &ids).and_then(|()| {
                ctx.clear();
                ctx.func = func;
                jit.define_function(id, &mut ctx).map_err(|e| describe(&e))
            });
            if let Err(diagnostic) = outcome {
                if !defined.is_empty() {
                    tracing::warn!(module = %module_name, functions = ?defined, "Failed add left functions defined");
                    self.stranded.extend(defined);
                }
                return Err(JitError::compilation(&module_name, diagnostic));
            }
            tracing::trace!(module = %module_name, function = %decl.name, "Defined function");

            if decl.linkage != Linkage::Local {
                defined.push(decl.name.clone());
            }
            if is_exported(decl.linkage) {
                exported.push((decl.name, id));
            }
        }
        Ok(exported)
    }

    /// Reserves names whose definitions were never linked.
    fn strand(&mut self, names: impl IntoIterator<Item = String>) {
        self.stranded.extend(names);
    }

    fn finalize(&mut self, modules: &str) -> Result<()> {
        self.jit
            .0
            .finalize_definitions()
            .map_err(|e| JitError::compilation(modules, describe(&e)))
    }

    fn address(&self, name: &str) -> Option<SymbolAddress> {
        self.exports
            .get(name)
            .map(|id| SymbolAddress::from_ptr(self.jit.0.get_finalized_function(*id)))
    }
}

/// Rewrites module-local call targets to the JIT module's function ids.
fn rebind_call_targets(func: &mut cranelift_codegen::ir::Function, ids: &[FuncId]) -> std::result::Result<(), String> {
    let names: Vec<_> = func
        .params
        .user_named_funcs()
        .iter()
        .map(|(name_ref, name)| (name_ref, name.clone()))
        .collect();
    for (name_ref, name) in names {
        let id = (name.namespace == FUNCTION_NAMESPACE)
            .then(|| ids.get(name.index as usize))
            .flatten()
            .ok_or_else(|| format!("call to unknown declaration #{}", name.index))?;
        func.params
            .reset_user_func_name(name_ref, UserExternalName::new(FUNCTION_NAMESPACE, id.as_u32()));
    }
    Ok(())
}

fn describe(err: &ClifModuleError) -> String {
    match err {
        ClifModuleError::Compilation(CodegenError::Verifier(errors)) => {
            format!("verifier errors:\n{errors}")
        }
        other => other.to_string(),
    }
}

/// Links at `add_module` time.
pub(crate) struct EagerLinker {
    core: LinkCore,
}

impl LinkLayer for EagerLinker {
    fn add_module(&mut self, module: IrModule) -> Result<()> {
        let name = module.name().to_string();
        let exported = self.core.compile(module, &FxHashMap::default())?;
        if let Err(e) = self.core.finalize(&name) {
            self.core.strand(exported.into_iter().map(|(name, _)| name));
            return Err(e);
        }
        self.core.exports.extend(exported);
        Ok(())
    }

    fn lookup(&mut self, name: &str) -> Result<Option<SymbolAddress>> {
        Ok(self.core.address(name))
    }

    fn mode(&self) -> LinkMode {
        LinkMode::Eager
    }
}

/// Links pending modules on the first lookup after they were added.
pub(crate) struct DeferredLinker {
    core: LinkCore,
    pending: FxHashMap<String, FuncId>,
    pending_modules: Vec<String>,
}

impl LinkLayer for DeferredLinker {
    fn add_module(&mut self, module: IrModule) -> Result<()> {
        let name = module.name().to_string();
        let exported = self.core.compile(module, &self.pending)?;
        self.pending.extend(exported);
        self.pending_modules.push(name);
        Ok(())
    }

    fn lookup(&mut self, name: &str) -> Result<Option<SymbolAddress>> {
        if !self.pending_modules.is_empty() {
            let modules = self.pending_modules.join(",");
            if let Err(e) = self.core.finalize(&modules) {
                self.abandon_pending();
                return Err(e);
            }
            tracing::debug!(modules = %modules, "Linked deferred modules");
            self.pending_modules.clear();
            self.core.exports.extend(self.pending.drain());
        }
        Ok(self.core.address(name))
    }

    fn mode(&self) -> LinkMode {
        LinkMode::Deferred
    }
}

impl DeferredLinker {
    /// Drops every pending module after a failed link so later lookups do
    /// not retry it.
    fn abandon_pending(&mut self) {
        tracing::warn!(modules = %self.pending_modules.join(","), "Discarding unlinked deferred modules");
        self.pending_modules.clear();
        self.core.strand(self.pending.drain().map(|(name, _)| name));
    }
}
