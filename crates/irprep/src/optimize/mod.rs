// Optimization stage: preserved marking, the built-in optimizer at a fixed
// level, internalization, global dead-code elimination and stripping.

mod fold;
mod inline;

use std::collections::{HashSet, VecDeque};

use crate::config::{PipelineConfig, RUNTIME_HOOK_PREFIX};
use crate::ir::{Constant, InstKind, Linkage, Module, Operand};
use crate::passes::verify_module;

pub use fold::fold_function;
pub use inline::{INLINE_THRESHOLD, inline_small_functions, is_inlinable};

/// Fixed optimization level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    /// Folding, dead-code removal and CFG cleanup.
    O1,
    /// `O1` plus inlining.
    O2,
}

impl OptLevel {
    #[must_use]
    pub fn for_config(config: &PipelineConfig) -> Self {
        if config.disable_inline {
            OptLevel::O1
        } else {
            OptLevel::O2
        }
    }
}

/// Mark every defined function that directly calls a runtime hook as
/// preserved. Returns the number of newly marked functions.
pub fn mark_preserved(module: &mut Module) -> usize {
    let mut marked = 0;
    for func in module.definitions_mut().filter(|f| !f.preserved) {
        let calls_hook = func
            .instructions()
            .filter_map(|inst| inst.called_function())
            .any(|name| name.starts_with(RUNTIME_HOOK_PREFIX));
        if calls_hook {
            func.preserved = true;
            marked += 1;
        }
    }
    if marked > 0 {
        tracing::debug!("marked {marked} runtime-hook caller(s) as preserved");
    }
    marked
}

/// Run the built-in optimizer over every function that is not preserved.
/// Returns the number of edits.
pub fn optimize_module(module: &mut Module, level: OptLevel) -> usize {
    let mut edits = 0;
    if level == OptLevel::O2 {
        edits += inline_small_functions(module);
    }
    edits += module
        .definitions_mut()
        .filter(|f| !f.preserved)
        .map(fold_function)
        .sum::<usize>();
    tracing::debug!("{level:?}: {edits} edit(s)");
    edits
}

/// Give internal linkage to every defined symbol that is neither the entry
/// point nor listed as preserved. Returns the number of symbols changed.
pub fn internalize(module: &mut Module, config: &PipelineConfig) -> usize {
    let mut changed = 0;
    let mut hide = |name: &str, linkage: &mut Linkage| {
        if *linkage == Linkage::External && !config.is_preserved_symbol(name) {
            *linkage = Linkage::Internal;
            changed += 1;
        }
    };
    for func in module.definitions_mut() {
        hide(&func.name, &mut func.linkage);
    }
    for global in &mut module.globals {
        hide(&global.name, &mut global.linkage);
    }
    for alias in &mut module.aliases {
        hide(&alias.name, &mut alias.linkage);
    }
    if changed > 0 {
        tracing::debug!("internalized {changed} symbol(s)");
    }
    changed
}

fn constant_symbols<'a>(constant: &'a Constant, out: &mut Vec<&'a str>) {
    match constant {
        Constant::Symbol(name) => out.push(name),
        Constant::Vector(lanes) => {
            for lane in lanes {
                constant_symbols(lane, out);
            }
        }
        _ => {}
    }
}

/// Symbols named by the definition of `name`.
fn references<'a>(module: &'a Module, name: &str) -> Vec<&'a str> {
    let mut out = Vec::new();
    if let Some(func) = module.function(name) {
        for inst in func.instructions() {
            if let Some(callee) = inst.called_function() {
                out.push(callee);
            }
        }
        let operands = func
            .blocks
            .iter()
            .flat_map(|b| b.insts.iter().flat_map(|i| i.operands()).chain(b.term.operands()));
        for op in operands {
            if let Operand::Const(constant) = op {
                constant_symbols(constant, &mut out);
            }
        }
    }
    if let Some(global) = module.global(name) {
        for field in &global.init {
            constant_symbols(field, &mut out);
        }
    }
    if let Some(alias) = module.alias(name) {
        out.push(&alias.target);
    }
    out
}

/// Remove symbols not reachable from the roots: externally visible
/// definitions, preserved functions, ctor/dtor targets and the symbols the
/// configuration keeps. Unreferenced declarations go too. Returns the number
/// of removed symbols.
pub fn global_dce(module: &mut Module, config: &PipelineConfig) -> usize {
    let mut worklist: VecDeque<String> = VecDeque::new();
    for func in &module.functions {
        if (func.linkage == Linkage::External && !func.is_declaration())
            || func.preserved
            || config.is_preserved_symbol(&func.name)
        {
            worklist.push_back(func.name.clone());
        }
    }
    for global in &module.globals {
        if global.linkage == Linkage::External || config.is_preserved_symbol(&global.name) {
            worklist.push_back(global.name.clone());
        }
    }
    for alias in &module.aliases {
        if alias.linkage == Linkage::External || config.is_preserved_symbol(&alias.name) {
            worklist.push_back(alias.name.clone());
        }
    }
    for record in module.ctors.iter().chain(&module.dtors) {
        worklist.push_back(record.function.clone());
    }

    let mut live: HashSet<String> = HashSet::new();
    while let Some(name) = worklist.pop_front() {
        if !live.insert(name.clone()) {
            continue;
        }
        for reference in references(module, &name) {
            if !live.contains(reference) {
                worklist.push_back(reference.to_string());
            }
        }
    }

    let before = module.functions.len() + module.globals.len() + module.aliases.len();
    module.functions.retain(|f| live.contains(&f.name));
    module.globals.retain(|g| live.contains(&g.name));
    module.aliases.retain(|a| live.contains(&a.name));
    let removed = before - (module.functions.len() + module.globals.len() + module.aliases.len());
    if removed > 0 {
        tracing::debug!("global DCE removed {removed} symbol(s), {} live", live.len());
    }
    removed
}

/// Remove debug locations and debug intrinsic calls; with `names`, local
/// value names as well. Returns the number of items removed.
pub fn strip_debug_info(module: &mut Module, names: bool) -> usize {
    let mut removed = 0;
    for func in &mut module.functions {
        for block in &mut func.blocks {
            let before = block.insts.len();
            block
                .insts
                .retain(|inst| !inst.intrinsic_name().is_some_and(|n| n.starts_with("llvm.dbg.")));
            removed += before - block.insts.len();
            for inst in &mut block.insts {
                if inst.debug_loc.take().is_some() {
                    removed += 1;
                }
            }
        }
        if names {
            removed += func.value_names.len();
            func.value_names.clear();
        }
    }
    if removed > 0 {
        tracing::debug!("stripped {removed} debug item(s)");
    }
    removed
}

/// The optimization stage proper, run when `config.optimize` is set.
///
/// With `verify_each`, verifier findings on the result are logged as
/// warnings and counted, never returned as errors. Returns that count.
pub fn run_optimization_stage(config: &PipelineConfig, module: &mut Module) -> usize {
    let level = OptLevel::for_config(config);
    optimize_module(module, level);
    if !config.disable_internalize {
        internalize(module, config);
    }
    global_dce(module, config);
    if config.strip {
        strip_debug_info(module, true);
    } else if config.strip_debug {
        strip_debug_info(module, false);
    }
    global_dce(module, config);

    if !config.verify_each {
        return 0;
    }
    let diagnostics = verify_module(module);
    for diagnostic in &diagnostics {
        tracing::warn!("after optimization: {diagnostic}");
    }
    diagnostics.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        BinOp, DebugLoc, Function, FunctionBuilder, Operand, StaticInit, Terminator, Type,
    };

    fn leaf(name: &str) -> Function {
        let mut b = FunctionBuilder::new(name, &[], Type::Void);
        b.ret(None);
        b.finish()
    }

    fn calling(name: &str, callees: &[&str]) -> Function {
        let mut b = FunctionBuilder::new(name, &[], Type::Void);
        for callee in callees {
            b.call(callee, vec![], Type::Void);
        }
        b.ret(None);
        b.finish()
    }

    fn ill_typed_main() -> Module {
        let mut b = FunctionBuilder::new("main", &[Type::I32], Type::I32);
        let x = b.param(0);
        let y = b.binary(BinOp::Add, x, Operand::int(32, 1));
        b.ret(Some(y));
        let mut module = Module::new("m");
        module.functions.push(b.finish());
        // i32 function returning an i64.
        module.functions[0].blocks[0].term = Terminator::Ret(Some(Operand::int(64, 0)));
        module
    }

    #[test]
    fn verify_each_reports_without_failing() {
        let config = PipelineConfig {
            optimize: true,
            verify_each: true,
            ..PipelineConfig::default()
        };
        let mut module = ill_typed_main();
        let findings = run_optimization_stage(&config, &mut module);
        assert!(findings >= 1);
        assert!(module.function("main").is_some());

        let quiet = PipelineConfig {
            verify_each: false,
            ..config
        };
        let mut module = ill_typed_main();
        assert_eq!(run_optimization_stage(&quiet, &mut module), 0);
    }

    #[test]
    fn hook_callers_are_preserved() {
        let mut module = Module::new("m");
        module.functions.push(calling("f", &["__interp_report_div_zero"]));
        module.functions.push(calling("g", &["f"]));
        assert_eq!(mark_preserved(&mut module), 1);
        assert!(module.function("f").unwrap().preserved);
        assert!(!module.function("g").unwrap().preserved);
    }

    #[test]
    fn internalize_keeps_entry_and_preserved_names_external() {
        let mut module = Module::new("m");
        for name in ["main", "keep", "other"] {
            module.functions.push(leaf(name));
        }
        module.functions.push(Function::declaration("ext", &[], Type::Void));
        let config = PipelineConfig {
            preserved_functions: vec!["keep".into()],
            ..PipelineConfig::default()
        };
        assert_eq!(internalize(&mut module, &config), 1);
        assert_eq!(module.function("other").unwrap().linkage, Linkage::Internal);
        assert_eq!(module.function("keep").unwrap().linkage, Linkage::External);
        assert_eq!(module.function("ext").unwrap().linkage, Linkage::External);
    }

    #[test]
    fn dce_follows_calls_from_roots() {
        let mut module = Module::new("m");
        module.functions.push(calling("main", &["a"]));
        module.functions.push(calling("a", &["ext"]));
        module.functions.push(leaf("dead"));
        module.functions.push(leaf("init"));
        module.functions.push(Function::declaration("ext", &[], Type::Void));
        module.functions.push(Function::declaration("unused", &[], Type::Void));
        module.ctors.push(StaticInit { priority: 0, function: "init".into() });
        let config = PipelineConfig::default();
        internalize(&mut module, &config);

        assert_eq!(global_dce(&mut module, &config), 2);
        let names: Vec<_> = module.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["main", "a", "init", "ext"]);
    }

    #[test]
    fn strip_debug_keeps_names_unless_full_strip() {
        let mut b = FunctionBuilder::new("f", &[Type::I32], Type::I32);
        let x = b.param(0);
        b.call("llvm.dbg.value", vec![x.clone()], Type::Void);
        let r = b.binary(BinOp::Add, x.clone(), x);
        b.ret(Some(r));
        let mut func = b.finish();
        func.blocks[0].insts[1].debug_loc = Some(DebugLoc { line: 3, column: 7 });
        func.value_names.insert(func.params[0], "x".into());
        let mut module = Module::new("m");
        module.functions.push(func);

        let mut light = module.clone();
        assert_eq!(strip_debug_info(&mut light, false), 2);
        assert_eq!(light.functions[0].instruction_count(), 1);
        assert_eq!(light.functions[0].value_names.len(), 1);

        assert_eq!(strip_debug_info(&mut module, true), 3);
        assert!(module.functions[0].value_names.is_empty());
    }

    #[test]
    fn preserved_functions_are_not_optimized() {
        let mut b = FunctionBuilder::new("f", &[], Type::I32);
        let r = b.binary(BinOp::Add, Operand::int(32, 1), Operand::int(32, 2));
        b.ret(Some(r));
        let mut func = b.finish();
        func.preserved = true;
        let mut module = Module::new("m");
        module.functions.push(func);
        optimize_module(&mut module, OptLevel::O2);
        assert_eq!(module.functions[0].instruction_count(), 1);
    }
}
