// Control-flow simplification, iterated to a fixpoint:
// - constant and degenerate branches become unconditional,
// - unreachable blocks are deleted,
// - a block is merged into its unique predecessor when that predecessor
//   branches to it unconditionally,
// - empty forwarding blocks are bypassed when their target has no PHIs.

use crate::ir::{BlockId, Function, InstKind, Module, Operand, Terminator};

/// Simplify the CFG of every defined function. Returns the number of edits.
pub fn simplify_cfg(module: &mut Module) -> usize {
    let count: usize = module.definitions_mut().map(simplify_function_cfg).sum();
    if count > 0 {
        tracing::debug!("simplified control flow ({count} edit(s))");
    }
    count
}

pub fn simplify_function_cfg(func: &mut Function) -> usize {
    let mut total = 0;
    loop {
        let round = fold_branches(func)
            + remove_unreachable_blocks(func)
            + merge_into_predecessors(func)
            + forward_empty_blocks(func);
        if round == 0 {
            return total;
        }
        total += round;
    }
}

/// Turn branches with a known outcome into `br`, dropping the PHI entries of
/// the abandoned successors.
fn fold_branches(func: &mut Function) -> usize {
    let mut edits = Vec::new();
    for (idx, block) in func.blocks.iter().enumerate() {
        let taken = match &block.term {
            Terminator::CondBr {
                then_dest,
                else_dest,
                ..
            } if then_dest == else_dest => Some(*then_dest),
            Terminator::CondBr {
                cond,
                then_dest,
                else_dest,
            } => match cond.as_int() {
                Some((1, 1)) => Some(*then_dest),
                Some((1, 0)) => Some(*else_dest),
                _ => None,
            },
            Terminator::Switch {
                value,
                default,
                cases,
            } => match value.as_int() {
                Some((_, v)) => Some(
                    cases
                        .iter()
                        .find(|(case, _)| *case == v)
                        .map_or(*default, |(_, dest)| *dest),
                ),
                None if cases.iter().all(|(_, dest)| dest == default) => Some(*default),
                None => None,
            },
            _ => None,
        };
        if let Some(taken) = taken {
            let dropped: Vec<BlockId> = block
                .term
                .unique_successors()
                .into_iter()
                .filter(|succ| *succ != taken)
                .collect();
            edits.push((idx, taken, dropped));
        }
    }
    let count = edits.len();
    for (idx, taken, dropped) in edits {
        let id = func.blocks[idx].id;
        func.blocks[idx].term = Terminator::Br(taken);
        for succ in dropped {
            func.remove_phi_pred(succ, id);
        }
    }
    count
}

/// Delete blocks not reachable from the entry. Values they defined are
/// replaced by `undef` wherever they were still named.
pub fn remove_unreachable_blocks(func: &mut Function) -> usize {
    let reachable = func.reachable_blocks();
    let dead: Vec<usize> = (0..func.blocks.len())
        .filter(|&i| !reachable.contains(&func.blocks[i].id))
        .collect();
    if dead.is_empty() {
        return 0;
    }
    let mut dead_values = Vec::new();
    for &idx in &dead {
        let block = &func.blocks[idx];
        let id = block.id;
        dead_values.extend(
            block
                .insts
                .iter()
                .filter_map(|inst| inst.result.map(|r| (r, inst.ty.clone()))),
        );
        for succ in block.term.unique_successors() {
            func.remove_phi_pred(succ, id);
        }
    }
    func.blocks.retain(|block| reachable.contains(&block.id));
    for (value, ty) in dead_values {
        func.replace_all_uses(value, &Operand::undef(ty));
    }
    dead.len()
}

/// Merge `B` into `P` when `P` ends in `br B` and is `B`'s only predecessor.
fn merge_into_predecessors(func: &mut Function) -> usize {
    let mut merged = 0;
    loop {
        let preds = func.predecessors();
        let candidate = func.blocks.iter().enumerate().skip(1).find_map(|(idx, block)| {
            match preds.get(&block.id).map(Vec::as_slice) {
                Some(&[pred]) if pred != block.id => {
                    let pred_block = func.block(pred)?;
                    (pred_block.term == Terminator::Br(block.id)).then_some((idx, pred))
                }
                _ => None,
            }
        });
        let Some((idx, pred)) = candidate else {
            return merged;
        };

        let block = func.blocks.remove(idx);
        let mut forwarded = Vec::new();
        let mut body = Vec::with_capacity(block.insts.len());
        for inst in block.insts {
            match (&inst.kind, inst.result) {
                (InstKind::Phi { incoming }, Some(result)) => {
                    let value = incoming
                        .first()
                        .map_or_else(|| Operand::undef(inst.ty.clone()), |(v, _)| v.clone());
                    forwarded.push((result, value));
                }
                (InstKind::Phi { .. }, None) => {}
                _ => body.push(inst),
            }
        }
        let succs = block.term.unique_successors();
        if let Some(target) = func.block_mut(pred) {
            target.insts.extend(body);
            target.term = block.term;
        }
        for succ in succs {
            func.replace_phi_pred(succ, block.id, &[pred]);
        }
        for (result, value) in forwarded {
            func.replace_all_uses(result, &value);
        }
        merged += 1;
    }
}

/// Redirect the predecessors of an empty `br T` block straight to `T`,
/// provided `T` has no PHIs to update.
fn forward_empty_blocks(func: &mut Function) -> usize {
    let mut forwarded = 0;
    for idx in 1..func.blocks.len() {
        let block = &func.blocks[idx];
        let Terminator::Br(target) = block.term else {
            continue;
        };
        if !block.insts.is_empty() || target == block.id {
            continue;
        }
        let target_has_phis = func
            .block(target)
            .is_none_or(|t| t.insts.first().is_some_and(|i| i.is_phi()));
        if target_has_phis {
            continue;
        }
        let id = block.id;
        let mut changed = false;
        for (other_idx, other) in func.blocks.iter_mut().enumerate() {
            if other_idx != idx && other.term.successors().contains(&id) {
                other.term.retarget(id, target);
                changed = true;
            }
        }
        if changed {
            forwarded += 1;
        }
    }
    forwarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, FunctionBuilder, IntPredicate, Type};

    #[test]
    fn constant_branch_folds_and_dead_arm_disappears() {
        let mut b = FunctionBuilder::new("f", &[Type::I32], Type::I32);
        let x = b.param(0);
        let yes = b.new_block();
        let no = b.new_block();
        let join = b.new_block();
        b.cond_br(Operand::int(1, 1), yes, no);
        b.switch_to(yes);
        let doubled = b.binary(BinOp::Add, x.clone(), x.clone());
        b.br(join);
        b.switch_to(no);
        b.br(join);
        b.switch_to(join);
        let r = b.phi(Type::I32, vec![(doubled, yes), (x, no)]);
        b.ret(Some(r));
        let mut func = b.finish();

        assert!(simplify_function_cfg(&mut func) > 0);
        // Everything collapses into the entry block.
        assert_eq!(func.blocks.len(), 1);
        assert!(matches!(
            func.blocks[0].insts[0].kind,
            InstKind::Binary { op: BinOp::Add, .. }
        ));
        let add = func.blocks[0].insts[0].result.unwrap();
        assert_eq!(func.blocks[0].term, Terminator::Ret(Some(Operand::Value(add))));
    }

    #[test]
    fn non_constant_diamond_is_kept() {
        let mut b = FunctionBuilder::new("f", &[Type::I32], Type::I32);
        let x = b.param(0);
        let yes = b.new_block();
        let no = b.new_block();
        let join = b.new_block();
        let c = b.icmp(IntPredicate::Eq, x.clone(), Operand::int(32, 0));
        b.cond_br(c, yes, no);
        b.switch_to(yes);
        b.br(join);
        b.switch_to(no);
        b.br(join);
        b.switch_to(join);
        let r = b.phi(
            Type::I32,
            vec![(Operand::int(32, 1), yes), (Operand::int(32, 2), no)],
        );
        b.ret(Some(r));
        let mut func = b.finish();

        assert_eq!(simplify_function_cfg(&mut func), 0);
        assert_eq!(func.blocks.len(), 4);
    }

    #[test]
    fn empty_block_is_bypassed() {
        let mut b = FunctionBuilder::new("f", &[Type::I1], Type::Void);
        let c = b.param(0);
        let hop = b.new_block();
        let exit = b.new_block();
        let other = b.new_block();
        b.cond_br(c, hop, other);
        b.switch_to(hop);
        b.br(exit);
        b.switch_to(other);
        b.call("g", vec![], Type::Void);
        b.br(exit);
        b.switch_to(exit);
        b.ret(None);
        let mut func = b.finish();

        simplify_function_cfg(&mut func);
        assert!(func.block(hop).is_none());
        assert_eq!(
            func.blocks[0].term.successors(),
            vec![exit, other]
        );
    }

    #[test]
    fn constant_switch_takes_matching_case() {
        let mut b = FunctionBuilder::new("f", &[], Type::I32);
        let one = b.new_block();
        let two = b.new_block();
        b.switch(Operand::int(8, 2), one, vec![(2, two)]);
        b.switch_to(one);
        b.ret(Some(Operand::int(32, 1)));
        b.switch_to(two);
        b.ret(Some(Operand::int(32, 2)));
        let mut func = b.finish();

        simplify_function_cfg(&mut func);
        assert_eq!(func.blocks.len(), 1);
        assert_eq!(func.blocks[0].term, Terminator::Ret(Some(Operand::int(32, 2))));
    }
}
