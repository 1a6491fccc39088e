//! Module-level behavior: deduplication, internalization with preserved
//! symbols, static initializer injection and fatal pipeline errors.

use irprep::ir::{
    BinOp, Constant, FunctionBuilder, GlobalVariable, Linkage, Operand, StaticInit, Type,
};
use irprep::passes::{CTORS_WRAPPER, deduplicate_functions};
use irprep::test_harness::*;
use irprep::{Error, Module, PipelineConfig, prepare};
use proptest::prelude::*;

fn run_main(module: &Module, x: u64) -> Outcome {
    Evaluator::new(module)
        .run("main", vec![Value::int(32, x)])
        .expect("evaluates")
}

#[test]
fn test_identical_functions_become_aliases() {
    let module = twin_module();
    let prepared = prepare(&PipelineConfig::default(), module.clone()).expect("pipeline");

    assert!(prepared.function("twin_a").is_some());
    assert!(prepared.function("twin_b").is_none());
    let alias = prepared.alias("twin_b").expect("twin_b kept as alias");
    assert_eq!(alias.target, "twin_a");

    let main = prepared.function("main").expect("main");
    assert!(main.instructions().all(|i| i.called_function() != Some("twin_b")));

    // main(5) = 2 * (5 * 3 + 1)
    assert_eq!(run_main(&prepared, 5).returned_u64(), Some(32));
    assert_eq!(run_main(&module, 5).returned_u64(), Some(32));
}

fn module_with_helpers() -> Module {
    let leaf = |name: &str, k: u64| {
        let mut b = FunctionBuilder::new(name, &[Type::I32], Type::I32);
        let x = b.param(0);
        let r = b.binary(BinOp::Add, x, Operand::int(32, k));
        b.ret(Some(r));
        b.finish()
    };
    let mut b = FunctionBuilder::new("main", &[Type::I32], Type::I32);
    let x = b.param(0);
    let h = b.call("helper", vec![x], Type::I32).expect("i32 call");
    let k = b.call("keep", vec![h], Type::I32).expect("i32 call");
    b.ret(Some(k));

    let mut module = Module::new("m");
    module.functions.push(b.finish());
    module.functions.push(leaf("helper", 1));
    module.functions.push(leaf("keep", 10));
    module.functions.push(leaf("dead", 100));
    module
}

#[test]
fn test_optimization_keeps_entry_and_preserved_symbols() {
    let config = PipelineConfig {
        optimize: true,
        preserved_functions: vec!["keep".into()],
        ..PipelineConfig::default()
    };
    let original = module_with_helpers();
    let prepared = prepare(&config, original.clone()).expect("pipeline");

    let main = prepared.function("main").expect("entry survives");
    assert_eq!(main.linkage, Linkage::External);
    let keep = prepared.function("keep").expect("preserved symbol survives");
    assert_eq!(keep.linkage, Linkage::External);
    assert!(prepared.function("helper").is_none(), "inlined helper is removed");
    assert!(prepared.function("dead").is_none());

    // Both calls were inlined: main computes (x + 1) + 10 itself.
    assert!(main.instructions().all(|i| i.called_function().is_none()));
    assert_eq!(run_main(&prepared, 4), run_main(&original, 4));
    assert_eq!(run_main(&prepared, 4).returned_u64(), Some(15));
}

#[test]
fn test_disabled_internalize_keeps_everything_external() {
    let config = PipelineConfig {
        optimize: true,
        disable_internalize: true,
        disable_inline: true,
        ..PipelineConfig::default()
    };
    let prepared = prepare(&config, module_with_helpers()).expect("pipeline");
    for name in ["main", "helper", "keep", "dead"] {
        let func = prepared.function(name).expect("external definitions stay");
        assert_eq!(func.linkage, Linkage::External, "{name}");
    }
}

fn module_with_constructor() -> Module {
    let mut init = FunctionBuilder::new("init", &[], Type::Void);
    init.store(Operand::int(32, 41), Operand::symbol("counter"));
    init.ret(None);

    let mut b = FunctionBuilder::new("main", &[Type::I32], Type::I32);
    let v = b.load(Type::I32, Operand::symbol("counter"));
    let r = b.binary(BinOp::Add, v, Operand::int(32, 1));
    b.ret(Some(r));

    let mut module = Module::new("m");
    module.globals.push(GlobalVariable {
        name: "counter".into(),
        linkage: Linkage::Internal,
        constant: false,
        init: vec![Constant::int(32, 0)],
    });
    module.functions.push(init.finish());
    module.functions.push(b.finish());
    module.ctors.push(StaticInit {
        priority: 0,
        function: "init".into(),
    });
    module
}

#[test]
fn test_constructors_run_before_entry_body() {
    let original = module_with_constructor();
    assert_eq!(run_main(&original, 0).returned_u64(), Some(1));

    let prepared = prepare(&PipelineConfig::default(), original).expect("pipeline");
    assert!(prepared.ctors.is_empty());
    let main = prepared.function("main").expect("main");
    assert_eq!(main.blocks[0].insts[0].called_function(), Some(CTORS_WRAPPER));
    assert_eq!(run_main(&prepared, 0).returned_u64(), Some(42));
}

#[test]
fn test_constructors_without_entry_point_fail() {
    let config = PipelineConfig {
        entry_point: "start".into(),
        ..PipelineConfig::default()
    };
    let err = prepare(&config, module_with_constructor()).unwrap_err();
    assert!(matches!(err, Error::MissingEntryPoint(name) if name == "start"));
}

#[test]
fn test_unknown_intrinsic_is_rejected() {
    let mut b = FunctionBuilder::new("main", &[], Type::Void);
    b.call("llvm.frobnicate", vec![], Type::Void);
    b.ret(None);
    let mut module = Module::new("m");
    module.functions.push(b.finish());

    let err = prepare(&PipelineConfig::default(), module).unwrap_err();
    assert!(matches!(err, Error::UnsupportedIntrinsic(_)));
    assert!(!err.is_invariant_violation());
}

#[test]
fn test_min_max_and_saturating_intrinsics_are_expanded() {
    let mut b = FunctionBuilder::new("main", &[Type::I32], Type::I32);
    let x = b.param(0);
    let at_least = b
        .call("llvm.umax.i32", vec![x.clone(), Operand::int(32, 10)], Type::I32)
        .expect("i32 call");
    let clamped = b
        .call("llvm.smin.i32", vec![at_least, Operand::int(32, 1000)], Type::I32)
        .expect("i32 call");
    let bumped = b
        .call("llvm.uadd.sat.i32", vec![x, Operand::int(32, 0xffff_fff0)], Type::I32)
        .expect("i32 call");
    let r = b.binary(BinOp::Xor, clamped, bumped);
    b.ret(Some(r));
    let mut module = Module::new("m");
    module.functions.push(b.finish());

    let prepared = prepare(&PipelineConfig::default(), module).expect("pipeline");
    assert_eq!(count_instructions(&prepared, |i| i.intrinsic_name().is_some()), 0);
    for x in [0u32, 9, 11, 999, 1001, 0x7fff_ffff, 0x8000_0000, u32::MAX] {
        let clamped = (x.max(10) as i32).min(1000) as u32;
        let expected = clamped ^ x.saturating_add(0xffff_fff0);
        assert_eq!(run_main(&prepared, u64::from(x)).returned_u64(), Some(u64::from(expected)));
    }
}

#[test]
fn test_inline_asm_barrier_is_raised() {
    let mut b = FunctionBuilder::new("main", &[Type::I32], Type::I32);
    let x = b.param(0);
    b.inline_asm("", "~{memory}");
    b.ret(Some(x));
    let mut module = Module::new("m");
    module.functions.push(b.finish());

    let prepared = prepare(&PipelineConfig::default(), module).expect("pipeline");
    assert_eq!(count_instructions(&prepared, |_| true), 0);
    assert_eq!(run_main(&prepared, 9).returned_u64(), Some(9));
}

#[derive(Debug, Clone)]
struct Step {
    op: BinOp,
    constant: u32,
}

fn step() -> impl Strategy<Value = Step> {
    let op = prop::sample::select(vec![
        BinOp::Add,
        BinOp::Sub,
        BinOp::Mul,
        BinOp::And,
        BinOp::Or,
        BinOp::Xor,
    ]);
    (op, any::<u32>()).prop_map(|(op, constant)| Step { op, constant })
}

fn straight_line(name: &str, steps: &[Step]) -> irprep::ir::Function {
    let mut b = FunctionBuilder::new(name, &[Type::I32], Type::I32);
    let mut acc = b.param(0);
    for s in steps {
        acc = b.binary(s.op, acc, Operand::int(32, u64::from(s.constant)));
    }
    b.ret(Some(acc));
    b.finish()
}

/// `main` calls two copies of one body and a third, independent body.
fn module_with_copies(shared: &[Step], other: &[Step]) -> Module {
    let mut b = FunctionBuilder::new("main", &[Type::I32], Type::I32);
    let x = b.param(0);
    let mut acc = x.clone();
    for name in ["copy_a", "copy_b", "other"] {
        let r = b.call(name, vec![x.clone()], Type::I32).expect("i32 call");
        acc = b.binary(BinOp::Xor, acc, r);
    }
    let scaled = b.binary(BinOp::Mul, acc, Operand::int(32, 31));
    b.ret(Some(scaled));

    let mut module = Module::new("m");
    module.functions.push(straight_line("copy_a", shared));
    module.functions.push(straight_line("copy_b", shared));
    module.functions.push(straight_line("other", other));
    module.functions.push(b.finish());
    module
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_deduplication_preserves_results(
        shared in prop::collection::vec(step(), 1..6),
        other in prop::collection::vec(step(), 1..6),
        inputs in prop::collection::vec(any::<u32>(), 1..8),
    ) {
        let original = module_with_copies(&shared, &other);
        let mut deduplicated = original.clone();
        prop_assert!(deduplicate_functions(&mut deduplicated, "main") >= 1);
        prop_assert!(deduplicated.function("copy_b").is_none());
        prop_assert!(deduplicated.alias("copy_b").is_some());

        for x in inputs {
            let x = u64::from(x);
            prop_assert_eq!(run_main(&deduplicated, x), run_main(&original, x));
        }
    }
}
