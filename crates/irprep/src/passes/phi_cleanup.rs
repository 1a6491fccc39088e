// PHI normalization: no PHI may name its own result as an incoming value.
//
// Self entries from unreachable predecessors become `undef`. If every other
// entry carries the same value the PHI is replaced by that value. Otherwise
// each remaining self entry is fed by an identity copy placed at the end of
// its predecessor.

use crate::ir::{CastOp, Function, InstKind, Module, Operand};

/// Normalize self-referencing PHIs in every function. Returns the number of
/// PHIs rewritten.
pub fn normalize_phis(module: &mut Module) -> usize {
    let count: usize = module.definitions_mut().map(normalize_function).sum();
    if count > 0 {
        tracing::debug!("normalized {count} self-referencing PHI(s)");
    }
    count
}

fn normalize_function(func: &mut Function) -> usize {
    let reachable = func.reachable_blocks();
    let mut count = 0;
    for block_idx in 0..func.blocks.len() {
        let mut inst_idx = 0;
        while inst_idx < func.blocks[block_idx].insts.len() {
            let inst = &func.blocks[block_idx].insts[inst_idx];
            let (Some(result), InstKind::Phi { incoming }) = (inst.result, &inst.kind) else {
                inst_idx += 1;
                continue;
            };
            let own = Operand::Value(result);
            if !incoming.iter().any(|(value, _)| *value == own) {
                inst_idx += 1;
                continue;
            }
            count += 1;
            let ty = inst.ty.clone();
            let mut incoming = incoming.clone();

            for (value, pred) in &mut incoming {
                if *value == own && !reachable.contains(pred) {
                    *value = Operand::undef(ty.clone());
                }
            }

            if incoming.iter().any(|(value, _)| *value == own) {
                let mut others = incoming.iter().map(|(v, _)| v).filter(|v| **v != own);
                let single = match others.next() {
                    None => Some(Operand::undef(ty.clone())),
                    Some(first) => others.all(|v| v == first).then(|| first.clone()),
                };
                if let Some(value) = single {
                    func.blocks[block_idx].insts.remove(inst_idx);
                    func.replace_all_uses(result, &value);
                    continue;
                }
                for (value, pred) in &mut incoming {
                    if *value != own {
                        continue;
                    }
                    let (copy, copied) = func.make_inst(
                        ty.clone(),
                        InstKind::Cast {
                            op: CastOp::Bitcast,
                            value: own.clone(),
                        },
                    );
                    if let Some(pred_block) = func.block_mut(*pred) {
                        pred_block.insts.push(copy);
                    }
                    *value = copied;
                }
            }

            func.blocks[block_idx].insts[inst_idx].kind = InstKind::Phi { incoming };
            inst_idx += 1;
        }
    }
    count
}
