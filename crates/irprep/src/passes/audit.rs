// Operand type audit: after vector decomposition only the two lane accessors
// may still touch vector values. Calls to ordinary functions pass vectors
// whole and are exempt; intrinsic calls are not.

use crate::ir::{Function, InstKind, Instruction, Module};
use crate::{Error, Result};

fn is_exempt(inst: &Instruction) -> bool {
    match inst.kind {
        InstKind::ExtractElement { .. } | InstKind::InsertElement { .. } => true,
        InstKind::Call { .. } => inst.intrinsic_name().is_none(),
        _ => false,
    }
}

fn has_vector_operand(func: &Function, inst: &Instruction) -> bool {
    inst.ty.is_vector()
        || inst
            .operands()
            .into_iter()
            .any(|op| func.operand_type(op).is_vector())
}

/// Confirm no instruction outside the accessors has a vector operand or result.
///
/// Must run after vector decomposition.
///
/// # Errors
/// `Error::OperandTypes` naming every offending instruction.
pub fn audit_operand_types(module: &Module) -> Result<()> {
    let mut offenders = Vec::new();
    for func in module.definitions() {
        for block in &func.blocks {
            for inst in &block.insts {
                if !is_exempt(inst) && has_vector_operand(func, inst) {
                    offenders.push(format!("@{} {}: `{inst}`", func.name, block.id));
                }
            }
        }
    }
    if offenders.is_empty() {
        Ok(())
    } else {
        Err(Error::OperandTypes(offenders.join("; ")))
    }
}
