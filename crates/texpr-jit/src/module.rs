//! Self-contained IR modules handed to the engine.
//!
//! An [`IrModule`] collects function declarations and the Cranelift
//! [`Function`] bodies for the declarations it defines. Call sites inside a
//! body reference other declarations through
//! [`IrModule::declare_func_in_func`]; those references are rebound to the
//! engine's own function ids when the module is added.
//!
//! ```ignore
//! let mut module = IrModule::new("kernels");
//! let mut sig = engine.make_signature();
//! sig.returns.push(AbiParam::new(types::I64));
//! let foo = module.declare_function("foo", Linkage::Export, &sig)?;
//! let mut func = module.new_function(foo)?;
//! // ... build the body with cranelift_frontend::FunctionBuilder ...
//! module.define_function(foo, func)?;
//! engine.add_module(module)?;
//! ```

use cranelift_codegen::ir::{ExtFuncData, ExternalName, FuncRef, Function, Signature, UserExternalName, UserFuncName};
use cranelift_module::Linkage;
use fxhash::FxHashMap;

use crate::error::ModuleError;

/// External-name namespace used for module-local function references.
pub(crate) const FUNCTION_NAMESPACE: u32 = 0;

/// Handle to a declaration inside one [`IrModule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncDecl(u32);

impl FuncDecl {
    /// Position of the declaration in its module.
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// A named function declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    /// Logical symbol name.
    pub name: String,
    /// Visibility of the symbol.
    pub linkage: Linkage,
    /// Call signature.
    pub signature: Signature,
}

/// A compilation unit: declarations plus function bodies.
#[derive(Debug, Default)]
pub struct IrModule {
    name: String,
    declarations: Vec<Declaration>,
    bodies: Vec<Option<Function>>,
    by_name: FxHashMap<String, FuncDecl>,
}

impl IrModule {
    /// Creates an empty module.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Module name, used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declares a function, or returns the existing declaration of `name`.
    ///
    /// Redeclaring with the same signature merges the linkages: `Import`
    /// yields to anything else, and `Export` wins over `Preemptible` and
    /// `Hidden`.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::IncompatibleDeclaration`] if the signature
    /// differs from the earlier declaration, or the linkages cannot be merged.
    pub fn declare_function(
        &mut self,
        name: &str,
        linkage: Linkage,
        signature: &Signature,
    ) -> Result<FuncDecl, ModuleError> {
        if let Some(&decl) = self.by_name.get(name) {
            let existing = &mut self.declarations[decl.0 as usize];
            if existing.signature != *signature {
                return Err(ModuleError::IncompatibleDeclaration(name.to_string()));
            }
            existing.linkage = merge_linkage(existing.linkage, linkage)
                .ok_or_else(|| ModuleError::IncompatibleDeclaration(name.to_string()))?;
            return Ok(decl);
        }

        let decl = FuncDecl(
            u32::try_from(self.declarations.len())
                .map_err(|_| ModuleError::IncompatibleDeclaration(name.to_string()))?,
        );
        self.declarations.push(Declaration {
            name: name.to_string(),
            linkage,
            signature: signature.clone(),
        });
        self.bodies.push(None);
        self.by_name.insert(name.to_string(), decl);
        Ok(decl)
    }

    /// Returns an empty function with the declaration's name and signature,
    /// ready for a `FunctionBuilder`.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::UnknownDeclaration`] for a foreign handle.
    pub fn new_function(&self, decl: FuncDecl) -> Result<Function, ModuleError> {
        let declaration = self.declaration(decl)?;
        Ok(Function::with_name_signature(
            UserFuncName::user(FUNCTION_NAMESPACE, decl.0),
            declaration.signature.clone(),
        ))
    }

    /// Makes `decl` callable from `func` and returns the call-site reference.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::UnknownDeclaration`] for a foreign handle.
    pub fn declare_func_in_func(&self, decl: FuncDecl, func: &mut Function) -> Result<FuncRef, ModuleError> {
        let declaration = self.declaration(decl)?;
        let signature = func.import_signature(declaration.signature.clone());
        let name = func.declare_imported_user_function(UserExternalName::new(FUNCTION_NAMESPACE, decl.0));
        Ok(func.import_function(ExtFuncData {
            name: ExternalName::user(name),
            signature,
            // Absolute calls: code from different modules may be placed far apart.
            colocated: false,
        }))
    }

    /// Attaches the body of `decl`.
    ///
    /// # Errors
    ///
    /// - [`ModuleError::ImportDefinition`] if `decl` is an import.
    /// - [`ModuleError::DuplicateDefinition`] if `decl` already has a body.
    /// - [`ModuleError::IncompatibleDeclaration`] if the body's signature
    ///   differs from the declaration.
    /// - [`ModuleError::UnknownDeclaration`] for a foreign handle.
    pub fn define_function(&mut self, decl: FuncDecl, func: Function) -> Result<(), ModuleError> {
        let declaration = self.declaration(decl)?;
        if declaration.linkage == Linkage::Import {
            return Err(ModuleError::ImportDefinition(declaration.name.clone()));
        }
        if func.signature != declaration.signature {
            return Err(ModuleError::IncompatibleDeclaration(declaration.name.clone()));
        }
        if self.is_defined(decl) {
            return Err(ModuleError::DuplicateDefinition(declaration.name.clone()));
        }
        self.bodies[decl.0 as usize] = Some(func);
        Ok(())
    }

    /// Returns the declaration behind a handle.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::UnknownDeclaration`] for a foreign handle.
    pub fn declaration(&self, decl: FuncDecl) -> Result<&Declaration, ModuleError> {
        self.declarations
            .get(decl.0 as usize)
            .ok_or(ModuleError::UnknownDeclaration(decl.0))
    }

    /// Looks up a declaration by name.
    #[must_use]
    pub fn get_declaration(&self, name: &str) -> Option<FuncDecl> {
        self.by_name.get(name).copied()
    }

    /// All declarations, in declaration order.
    pub fn declarations(&self) -> impl Iterator<Item = (FuncDecl, &Declaration)> {
        self.declarations
            .iter()
            .zip(0u32..)
            .map(|(d, i)| (FuncDecl(i), d))
    }

    /// Returns `true` if `decl` has a body.
    #[must_use]
    pub fn is_defined(&self, decl: FuncDecl) -> bool {
        self.bodies.get(decl.0 as usize).is_some_and(Option::is_some)
    }

    /// Names of the symbols this module makes visible to lookups.
    pub fn exported_names(&self) -> impl Iterator<Item = &str> {
        self.declarations
            .iter()
            .filter(|d| is_exported(d.linkage))
            .map(|d| d.name.as_str())
    }

    /// Names this module expects the engine to resolve.
    pub fn imported_names(&self) -> impl Iterator<Item = &str> {
        self.declarations
            .iter()
            .filter(|d| d.linkage == Linkage::Import)
            .map(|d| d.name.as_str())
    }

    /// Number of declarations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    /// Returns `true` if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Splits the module into its name and `(declaration, body)` pairs.
    pub(crate) fn into_parts(self) -> (String, Vec<(Declaration, Option<Function>)>) {
        (self.name, self.declarations.into_iter().zip(self.bodies).collect())
    }
}

/// Linkages whose definitions are visible to symbol lookup.
pub(crate) fn is_exported(linkage: Linkage) -> bool {
    matches!(linkage, Linkage::Export | Linkage::Preemptible)
}

fn merge_linkage(a: Linkage, b: Linkage) -> Option<Linkage> {
    match (a, b) {
        (a, b) if a == b => Some(a),
        (Linkage::Import, other) | (other, Linkage::Import) => Some(other),
        (Linkage::Local, _) | (_, Linkage::Local) => None,
        (Linkage::Export, _) | (_, Linkage::Export) => Some(Linkage::Export),
        (Linkage::Preemptible, _) | (_, Linkage::Preemptible) => Some(Linkage::Preemptible),
        _ => None,
    }
}
