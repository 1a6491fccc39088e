// Static constructor/destructor injection.
//
// The module's ctor/dtor records become explicit calls: one synthesized
// wrapper per list calls the functions in priority order, the entry function
// calls the constructor wrapper first and the destructor wrapper before each
// return.

use crate::ir::{
    BlockId, Callee, FunctionBuilder, InstKind, Instruction, Linkage, Module, StaticInit,
    Terminator, Type,
};
use crate::{Error, Result};

pub const CTORS_WRAPPER: &str = "__irprep_global_ctors";
pub const DTORS_WRAPPER: &str = "__irprep_global_dtors";

fn call_void(name: &str) -> Instruction {
    Instruction::new(
        None,
        Type::Void,
        InstKind::Call {
            callee: Callee::Direct(name.to_string()),
            args: Vec::new(),
        },
    )
}

/// `base`, or `base.N` for the first `N` not already naming a symbol.
fn unused_name(module: &Module, base: &str) -> String {
    let mut name = base.to_string();
    let mut n = 1;
    while module.has_symbol(&name) {
        name = format!("{base}.{n}");
        n += 1;
    }
    name
}

/// Internal `void()` function calling each record's function in order.
fn add_wrapper(module: &mut Module, base: &str, mut records: Vec<StaticInit>) -> String {
    records.sort_by_key(|record| record.priority);
    let name = unused_name(module, base);
    let mut b = FunctionBuilder::new(name.clone(), &[], Type::Void).linkage(Linkage::Internal);
    for record in &records {
        b.call(&record.function, Vec::new(), Type::Void);
    }
    b.ret(None);
    module.functions.push(b.finish());
    name
}

/// Replace the ctor/dtor lists with explicit calls from `entry_point`.
/// Returns the number of records turned into calls.
///
/// # Errors
/// `Error::MissingEntryPoint` when records exist but the entry function is
/// not defined.
pub fn inject_static_initializers(module: &mut Module, entry_point: &str) -> Result<usize> {
    if module.ctors.is_empty() && module.dtors.is_empty() {
        return Ok(0);
    }
    if module.function(entry_point).is_none_or(|f| f.is_declaration()) {
        return Err(Error::MissingEntryPoint(entry_point.to_string()));
    }
    let ctors = std::mem::take(&mut module.ctors);
    let dtors = std::mem::take(&mut module.dtors);
    let count = ctors.len() + dtors.len();

    let ctor_wrapper = (!ctors.is_empty()).then(|| add_wrapper(module, CTORS_WRAPPER, ctors));
    let dtor_wrapper = (!dtors.is_empty()).then(|| add_wrapper(module, DTORS_WRAPPER, dtors));

    let entry = module
        .function_mut(entry_point)
        .ok_or_else(|| Error::MissingEntryPoint(entry_point.to_string()))?;
    if let Some(wrapper) = &ctor_wrapper
        && let Some(block) = entry.blocks.first_mut()
    {
        let at = block.first_non_phi();
        block.insts.insert(at, call_void(wrapper));
    }
    if let Some(wrapper) = &dtor_wrapper {
        let returning: Vec<BlockId> = entry
            .blocks
            .iter()
            .filter(|b| matches!(b.term, Terminator::Ret(_)))
            .map(|b| b.id)
            .collect();
        for id in returning {
            if let Some(block) = entry.block_mut(id) {
                block.insts.push(call_void(wrapper));
            }
        }
    }
    tracing::debug!("injected {count} static constructor/destructor call(s)");
    Ok(count)
}
