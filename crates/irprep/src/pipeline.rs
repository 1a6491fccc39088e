// Pass orchestration. The order below is fixed: later passes rely on the
// invariants established by earlier ones.

use crate::config::PipelineConfig;
use crate::ir::Module;
use crate::optimize::{mark_preserved, run_optimization_stage};
use crate::passes::{
    check_module, deduplicate_functions, inject_static_initializers, insert_div_zero_guards,
    insert_overshift_guards, lower_atomics, lower_switches, normalize_intrinsics, normalize_phis,
    raise_inline_asm, scalarize, simplify_cfg,
};
use crate::Result;

/// Instrumentation and the fatal verification gate.
///
/// Raises inline asm, decomposes vectors, lowers atomics, inserts the enabled
/// guards, normalizes intrinsics, then verifies (unless `dont_verify`) and
/// audits operand types.
pub fn instrument_and_verify(config: &PipelineConfig, mut module: Module) -> Result<Module> {
    tracing::info!("instrumenting module '{}'", module.name);
    raise_inline_asm(&mut module);
    scalarize(&mut module);
    lower_atomics(&mut module);
    if config.check_div_zero {
        insert_div_zero_guards(&mut module);
    }
    if config.check_overshift {
        insert_overshift_guards(&mut module);
    }
    normalize_intrinsics(&mut module)?;
    check_module(config, &module)?;
    tracing::info!("module '{}' passed verification", module.name);
    Ok(module)
}

/// Optimization followed by the passes that restore the interpreter's
/// invariants and prepare the entry point.
pub fn optimize_and_prepare(config: &PipelineConfig, mut module: Module) -> Result<Module> {
    if !config.optimize_interpreter_calls {
        mark_preserved(&mut module);
    }
    if config.optimize {
        tracing::info!("optimizing module '{}'", module.name);
        run_optimization_stage(config, &mut module);
    }

    tracing::info!("preparing entry point '{}'", config.entry_point);
    inject_static_initializers(&mut module, &config.entry_point)?;
    simplify_cfg(&mut module);
    lower_switches(&mut module, config.switch_impl);
    // Optimization may have reintroduced intrinsics and vector code.
    normalize_intrinsics(&mut module)?;
    scalarize(&mut module);
    normalize_phis(&mut module);
    deduplicate_functions(&mut module, &config.entry_point);
    tracing::info!(
        "module '{}' prepared: {} function(s), {} alias(es)",
        module.name,
        module.functions.len(),
        module.aliases.len()
    );
    Ok(module)
}

/// The whole pipeline.
pub fn prepare(config: &PipelineConfig, module: Module) -> Result<Module> {
    let module = instrument_and_verify(config, module)?;
    optimize_and_prepare(config, module)
}
