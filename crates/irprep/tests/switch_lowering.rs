//! Switch lowering through the whole pipeline.
//!
//! Every strategy must preserve which destination (and so which PHI value)
//! each input reaches. `simple` emits one `icmp eq` per case in case order,
//! `canonical` a range-checked binary search, `native` leaves the switch.

use irprep::ir::IntPredicate;
use irprep::test_harness::*;
use irprep::{Module, PipelineConfig, SwitchImpl, prepare};
use proptest::prelude::*;

fn config(switch_impl: SwitchImpl) -> PipelineConfig {
    PipelineConfig {
        switch_impl,
        ..PipelineConfig::default()
    }
}

fn run(module: &Module, x: u64) -> Option<u64> {
    Evaluator::new(module)
        .run("main", vec![Value::int(32, x)])
        .expect("evaluates")
        .returned_u64()
}

#[test]
fn test_simple_switch_becomes_equality_chain_in_case_order() {
    let module = switch_module(&[(7, 70), (3, 30), (5, 50)], 0);
    let prepared = prepare(&config(SwitchImpl::Simple), module).expect("pipeline");

    assert_eq!(count_switches(&prepared), 0);
    let main = prepared.function("main").expect("main");
    assert_eq!(icmp_constants(main, IntPredicate::Eq), vec![7, 3, 5]);

    for (x, expected) in [(7, 70), (3, 30), (5, 50), (4, 0), (0, 0)] {
        assert_eq!(run(&prepared, x), Some(expected), "main({x})");
    }
}

#[test]
fn test_canonical_switch_checks_ranges() {
    // 1..=4 share a destination and collapse into one range check.
    let cases = [(1, 10), (2, 10), (3, 10), (4, 10), (9, 90)];
    let prepared =
        prepare(&config(SwitchImpl::Canonical), switch_module(&cases, 5)).expect("pipeline");

    assert_eq!(count_switches(&prepared), 0);
    let main = prepared.function("main").expect("main");
    assert_eq!(icmp_constants(main, IntPredicate::Ule), vec![3]);
    assert_eq!(icmp_constants(main, IntPredicate::Eq), vec![9]);

    for x in 0..12 {
        let expected = match x {
            1..=4 => 10,
            9 => 90,
            _ => 5,
        };
        assert_eq!(run(&prepared, x), Some(expected), "main({x})");
    }
}

#[test]
fn test_native_switch_is_kept() {
    let module = switch_module(&[(1, 10), (2, 20)], 0);
    let prepared = prepare(&config(SwitchImpl::Native), module).expect("pipeline");
    assert_eq!(count_switches(&prepared), 1);
}

#[test]
fn test_switch_without_cases_falls_through() {
    let prepared =
        prepare(&config(SwitchImpl::Canonical), switch_module(&[], 3)).expect("pipeline");
    assert_eq!(count_switches(&prepared), 0);
    assert_eq!(run(&prepared, 12), Some(3));
}

fn cases() -> impl Strategy<Value = Vec<(u64, u64)>> {
    let key = prop_oneof![0u32..48, any::<u32>()];
    prop::collection::btree_map(key, 0u64..4, 0..16)
        .prop_map(|map| map.into_iter().map(|(k, v)| (u64::from(k), v)).collect::<Vec<_>>())
        .prop_shuffle()
}

fn strategy() -> impl Strategy<Value = SwitchImpl> {
    prop_oneof![Just(SwitchImpl::Simple), Just(SwitchImpl::Canonical)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn prop_lowering_preserves_destinations(
        cases in cases(),
        switch_impl in strategy(),
        extra in any::<u32>(),
    ) {
        let original = switch_module(&cases, 99);
        let prepared = prepare(&config(switch_impl), original.clone()).expect("pipeline");
        prop_assert_eq!(count_switches(&prepared), 0);

        let mut inputs: Vec<u64> = vec![0, u64::from(u32::MAX), u64::from(extra)];
        for (case, _) in &cases {
            inputs.extend([*case, case.wrapping_add(1) & 0xffff_ffff, case.wrapping_sub(1) & 0xffff_ffff]);
        }
        for x in inputs {
            prop_assert_eq!(run(&prepared, x), run(&original, x), "main({})", x);
        }
    }

    #[test]
    fn prop_simple_lowering_compares_in_case_order(cases in cases()) {
        let prepared =
            prepare(&config(SwitchImpl::Simple), switch_module(&cases, 99)).expect("pipeline");
        let main = prepared.function("main").expect("main");
        let expected: Vec<u64> = cases.iter().map(|(case, _)| *case).collect();
        prop_assert_eq!(icmp_constants(main, IntPredicate::Eq), expected);
    }
}
