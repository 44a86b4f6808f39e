//! Integration tests: engine cache, symbol resolution and generated code
//! calling intrinsics, external callbacks and other modules.

use std::sync::Arc;

use texpr_jit::cranelift_codegen::ir::{types, AbiParam, InstBuilder, Signature};
use texpr_jit::cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use texpr_jit::intrinsics::{intrinsic_symbols, DISPATCH_PARALLEL};
use texpr_jit::target::HOST_CPU;
use texpr_jit::{
    backend, register_external_function, unique_function_name, CompilationEngine, IrModule, JitCache,
    JitConfig, JitError, Linkage, LinkMode, TargetDescriptor,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn host_engine(config: JitConfig) -> CompilationEngine {
    init_tracing();
    backend::initialize_targets();
    CompilationEngine::new(&TargetDescriptor::host(), config).unwrap()
}

/// `name() -> i64 { value }`
fn constant_module(engine: &CompilationEngine, name: &str, value: i64) -> IrModule {
    let mut sig = engine.make_signature();
    sig.returns.push(AbiParam::new(types::I64));

    let mut module = IrModule::new(format!("{name}_module"));
    let decl = module.declare_function(name, Linkage::Export, &sig).unwrap();
    let mut func = module.new_function(decl).unwrap();
    let mut ctx = FunctionBuilderContext::new();
    let mut builder = FunctionBuilder::new(&mut func, &mut ctx);
    let block = builder.create_block();
    builder.switch_to_block(block);
    builder.seal_block(block);
    let v = builder.ins().iconst(types::I64, value);
    builder.ins().return_(&[v]);
    builder.finalize();
    module.define_function(decl, func).unwrap();
    module
}

/// `name(x) -> callee(x) + addend`, with `callee` imported.
fn wrapper_module(
    engine: &CompilationEngine,
    name: &str,
    callee: &str,
    ty: texpr_jit::cranelift_codegen::ir::Type,
    addend: f64,
) -> IrModule {
    let mut sig: Signature = engine.make_signature();
    sig.params.push(AbiParam::new(ty));
    sig.returns.push(AbiParam::new(ty));

    let mut module = IrModule::new(format!("{name}_module"));
    let import = module.declare_function(callee, Linkage::Import, &sig).unwrap();
    let decl = module.declare_function(name, Linkage::Export, &sig).unwrap();
    let mut func = module.new_function(decl).unwrap();
    let callee_ref = module.declare_func_in_func(import, &mut func).unwrap();

    let mut ctx = FunctionBuilderContext::new();
    let mut builder = FunctionBuilder::new(&mut func, &mut ctx);
    let block = builder.create_block();
    builder.append_block_params_for_function_params(block);
    builder.switch_to_block(block);
    builder.seal_block(block);
    let x = builder.block_params(block)[0];
    let call = builder.ins().call(callee_ref, &[x]);
    let result = builder.inst_results(call)[0];
    let sum = if ty == types::F64 {
        let c = builder.ins().f64const(addend);
        builder.ins().fadd(result, c)
    } else {
        #[allow(clippy::cast_possible_truncation)]
        let c = builder.ins().iconst(ty, addend as i64);
        builder.ins().iadd(result, c)
    };
    builder.ins().return_(&[sum]);
    builder.finalize();
    module.define_function(decl, func).unwrap();
    module
}

// ── Instance cache ──────────────────────────────────────────────────

#[test]
fn cache_returns_same_instance_for_equal_descriptors() {
    init_tracing();
    let cache = JitCache::new(JitConfig::default());
    let a = cache.get_instance(&TargetDescriptor::host()).unwrap();
    let b = cache.get_instance(&TargetDescriptor::host()).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn cache_separates_descriptors_differing_in_one_field() {
    init_tracing();
    let cache = JitCache::new(JitConfig::default());
    let host = cache.get_instance(&TargetDescriptor::host()).unwrap();
    let explicit = cache
        .get_instance(&TargetDescriptor::host().with_triple(target_lexicon::Triple::host().to_string()))
        .unwrap();
    let no_features = cache
        .get_instance(&TargetDescriptor::host().with_features(""))
        .unwrap();
    let named_cpu = cache
        .get_instance(&TargetDescriptor::host().with_cpu(HOST_CPU))
        .unwrap();
    let engines = [&host, &explicit, &no_features, &named_cpu];
    for (i, a) in engines.iter().enumerate() {
        for b in &engines[i + 1..] {
            assert!(!Arc::ptr_eq(a, b));
        }
    }
    assert_eq!(cache.len(), 4);
}

#[test]
fn malformed_triple_is_not_cached() {
    init_tracing();
    let cache = JitCache::new(JitConfig::default());
    let bad = TargetDescriptor::host().with_triple("this is not a triple");
    assert!(matches!(
        cache.get_instance(&bad),
        Err(JitError::Configuration(_))
    ));
    assert!(cache.is_empty());
    assert!(cache.get_instance(&TargetDescriptor::host()).is_ok());
}

#[test]
fn cross_target_engine_resolves_without_host_defaults() {
    init_tracing();
    let cache = JitCache::new(JitConfig::default());
    let engine = cache
        .get_instance(&TargetDescriptor::host().with_triple("aarch64-unknown-linux-gnu"))
        .unwrap();
    assert!(!engine.target().host);
    assert_eq!(engine.data_layout().pointer_bytes(), 8);
    assert!(engine.has_symbol("sinf"));
}

// ── Unique names ────────────────────────────────────────────────────

#[test]
fn unique_names_get_increasing_suffixes() {
    let names: Vec<_> = (0..3).map(|_| unique_function_name("integration_k")).collect();
    assert_eq!(names, vec!["integration_k", "integration_k_1", "integration_k_2"]);
}

// ── Symbols ─────────────────────────────────────────────────────────

#[test]
fn fresh_engine_knows_every_intrinsic() {
    let engine = host_engine(JitConfig::default());
    for intrinsic in intrinsic_symbols() {
        assert!(engine.has_symbol(intrinsic.name), "missing {}", intrinsic.name);
    }
    assert!(engine.has_symbol(DISPATCH_PARALLEL));
    assert!(!engine.has_symbol("integration_never_registered"));
}

#[test]
fn exported_function_is_found_and_callable() {
    let engine = host_engine(JitConfig::default());
    engine.add_module(constant_module(&engine, "foo", 42)).unwrap();

    let address = engine.find_symbol("foo").unwrap();
    assert!(!address.is_null());
    let foo: extern "C" fn() -> i64 = unsafe { std::mem::transmute(address.as_ptr()) };
    assert_eq!(foo(), 42);

    assert_eq!(
        engine.find_symbol("doesNotExist").unwrap_err(),
        JitError::SymbolNotFound("doesNotExist".into())
    );
}

extern "C" fn bar_before(x: i64) -> i64 {
    x * 3
}

extern "C" fn bar_after(x: i64) -> i64 {
    x * 5
}

#[test]
fn external_function_registered_before_construction_is_visible() {
    register_external_function("integration_bar_before", bar_before as *const u8).unwrap();
    let engine = host_engine(JitConfig::default());

    assert!(engine.has_symbol("integration_bar_before"));
    let address = engine.find_symbol("integration_bar_before").unwrap();
    assert_eq!(address.as_ptr(), bar_before as *const u8);

    engine
        .add_module(wrapper_module(&engine, "triple_plus_one", "integration_bar_before", types::I64, 1.0))
        .unwrap();
    let f: extern "C" fn(i64) -> i64 =
        unsafe { std::mem::transmute(engine.find_symbol("triple_plus_one").unwrap().as_ptr()) };
    assert_eq!(f(4), 13);
}

#[test]
fn external_function_registered_after_construction_is_not_visible() {
    let engine = host_engine(JitConfig::default());
    register_external_function("integration_bar_after", bar_after as *const u8).unwrap();

    assert!(!engine.has_symbol("integration_bar_after"));
    assert!(matches!(
        engine.find_symbol("integration_bar_after"),
        Err(JitError::SymbolNotFound(_))
    ));

    let later = host_engine(JitConfig::default());
    assert!(later.has_symbol("integration_bar_after"));
}

#[test]
fn generated_code_calls_intrinsics() {
    let engine = host_engine(JitConfig::default());
    engine
        .add_module(wrapper_module(&engine, "sqrt_plus_half", "sqrt", types::F64, 0.5))
        .unwrap();
    let f: extern "C" fn(f64) -> f64 =
        unsafe { std::mem::transmute(engine.find_symbol("sqrt_plus_half").unwrap().as_ptr()) };
    assert!((f(16.0) - 4.5).abs() < 1e-12);
}

#[test]
fn modules_link_against_earlier_modules() {
    for mode in [LinkMode::Eager, LinkMode::Deferred] {
        let engine = host_engine(JitConfig::default().with_link_mode(mode));

        let mut sig = engine.make_signature();
        sig.params.push(AbiParam::new(types::I64));
        sig.returns.push(AbiParam::new(types::I64));
        let mut base = IrModule::new("base_module");
        let decl = base.declare_function("add_forty", Linkage::Export, &sig).unwrap();
        let mut func = base.new_function(decl).unwrap();
        let mut ctx = FunctionBuilderContext::new();
        let mut builder = FunctionBuilder::new(&mut func, &mut ctx);
        let block = builder.create_block();
        builder.append_block_params_for_function_params(block);
        builder.switch_to_block(block);
        builder.seal_block(block);
        let x = builder.block_params(block)[0];
        let y = builder.ins().iadd_imm(x, 40);
        builder.ins().return_(&[y]);
        builder.finalize();
        base.define_function(decl, func).unwrap();

        engine.add_module(base).unwrap();
        engine
            .add_module(wrapper_module(&engine, "add_forty_two", "add_forty", types::I64, 2.0))
            .unwrap();

        let f: extern "C" fn(i64) -> i64 =
            unsafe { std::mem::transmute(engine.find_symbol("add_forty_two").unwrap().as_ptr()) };
        assert_eq!(f(0), 42, "{mode:?}");
    }
}

#[test]
fn unresolved_import_is_a_compilation_error() {
    let engine = host_engine(JitConfig::default());
    let module = wrapper_module(&engine, "calls_nothing", "integration_no_such_callee", types::I64, 0.0);
    let err = engine.add_module(module).unwrap_err();
    assert_eq!(err.code(), "TXJ-0003");
    assert!(err.to_string().contains("integration_no_such_callee"));
    assert_eq!(engine.metrics().compile_failures, 1);
}

#[test]
fn verifier_rejects_malformed_function() {
    let engine = host_engine(JitConfig::default());
    let mut sig = engine.make_signature();
    sig.returns.push(AbiParam::new(types::I64));

    let mut module = IrModule::new("broken");
    let decl = module.declare_function("broken", Linkage::Export, &sig).unwrap();
    let mut func = module.new_function(decl).unwrap();
    {
        let mut ctx = FunctionBuilderContext::new();
        let mut builder = FunctionBuilder::new(&mut func, &mut ctx);
        let block = builder.create_block();
        builder.switch_to_block(block);
        builder.seal_block(block);
        // Returns an i32 from a function declared to return i64.
        let v = builder.ins().iconst(types::I32, 1);
        builder.ins().return_(&[v]);
        builder.finalize();
    }
    module.define_function(decl, func).unwrap();

    let err = engine.add_module(module).unwrap_err();
    assert!(matches!(err, JitError::Compilation { ref module, .. } if module == "broken"));
}

#[test]
fn corrected_module_is_accepted_after_rejection() {
    let engine = host_engine(JitConfig::default());
    let build = |well_typed: bool| {
        let mut sig = engine.make_signature();
        sig.returns.push(AbiParam::new(types::I64));
        let mut module = IrModule::new("retry_pair");
        for name in ["retry_a", "retry_b"] {
            let decl = module.declare_function(name, Linkage::Export, &sig).unwrap();
            let mut func = module.new_function(decl).unwrap();
            let mut ctx = FunctionBuilderContext::new();
            let mut builder = FunctionBuilder::new(&mut func, &mut ctx);
            let block = builder.create_block();
            builder.switch_to_block(block);
            builder.seal_block(block);
            let ty = if name == "retry_b" && !well_typed { types::I32 } else { types::I64 };
            let v = builder.ins().iconst(ty, 9);
            builder.ins().return_(&[v]);
            builder.finalize();
            module.define_function(decl, func).unwrap();
        }
        module
    };

    assert!(engine.add_module(build(false)).is_err());
    assert!(engine.find_symbol("retry_a").is_err());
    engine.add_module(build(true)).unwrap();
    let f: extern "C" fn() -> i64 =
        unsafe { std::mem::transmute(engine.find_symbol("retry_b").unwrap().as_ptr()) };
    assert_eq!(f(), 9);
}

#[test]
fn process_symbols_are_found() {
    let engine = host_engine(JitConfig::default());
    #[cfg(target_os = "linux")]
    assert!(engine.find_symbol("malloc").is_ok());
    assert!(!engine.has_symbol("malloc"));
}
