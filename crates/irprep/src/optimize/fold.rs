// Scalar cleanup run at every optimization level:
// constant folding, algebraic identities, trivial PHIs, dead instructions,
// and CFG simplification, repeated until nothing changes.

use std::collections::HashMap;

use crate::ir::{BinOp, BlockId, CastOp, Function, InstKind, Operand, Type, ValueId, eval};
use crate::passes::simplify_function_cfg;

/// Run the cleanup to a fixpoint on one function. Returns the number of
/// edits made.
pub fn fold_function(func: &mut Function) -> usize {
    let mut total = 0;
    loop {
        let round = fold_instructions(func) + eliminate_dead(func) + simplify_function_cfg(func);
        if round == 0 {
            return total;
        }
        total += round;
    }
}

/// Replace every instruction whose value is already known by that value.
fn fold_instructions(func: &mut Function) -> usize {
    let doms = func.dominators();
    let mut def_block = HashMap::new();
    for block in &func.blocks {
        for inst in &block.insts {
            if let Some(result) = inst.result {
                def_block.insert(result, block.id);
            }
        }
    }
    // A PHI may only collapse into a value available at the top of its block.
    let available_in = |value: &Operand, block: BlockId| match value.as_value() {
        None => true,
        Some(id) => def_block
            .get(&id)
            .is_none_or(|&def| def != block && doms.dominates(def, block)),
    };

    let mut folded = 0;
    for block_idx in 0..func.blocks.len() {
        let block_id = func.blocks[block_idx].id;
        let mut inst_idx = 0;
        while inst_idx < func.blocks[block_idx].insts.len() {
            let inst = &func.blocks[block_idx].insts[inst_idx];
            let known = match (&inst.kind, inst.result) {
                (InstKind::Phi { incoming }, Some(result)) => {
                    trivial_phi(incoming, result).filter(|v| available_in(v, block_id))
                }
                (kind, Some(_)) => simplify(kind, &inst.ty),
                (_, None) => None,
            };
            match (known, inst.result) {
                (Some(value), Some(result)) => {
                    func.blocks[block_idx].insts.remove(inst_idx);
                    func.replace_all_uses(result, &value);
                    folded += 1;
                }
                _ => inst_idx += 1,
            }
        }
    }
    folded
}

/// The single value a PHI carries, ignoring its own result.
fn trivial_phi(incoming: &[(Operand, BlockId)], result: ValueId) -> Option<Operand> {
    let own = Operand::Value(result);
    let mut values = incoming.iter().map(|(v, _)| v).filter(|v| **v != own);
    let first = values.next()?;
    values.all(|v| v == first).then(|| first.clone())
}

fn simplify(kind: &InstKind, ty: &Type) -> Option<Operand> {
    match kind {
        InstKind::Binary { op, lhs, rhs } => {
            let bits = ty.int_width().filter(|_| ty.is_int())?;
            if let (Some((_, a)), Some((_, b))) = (lhs.as_int(), rhs.as_int()) {
                return eval::binary(*op, bits, a, b).map(|v| Operand::int(bits, v));
            }
            identity(*op, bits, lhs, rhs)
        }
        InstKind::ICmp { pred, lhs, rhs } => {
            let ((bits, a), (_, b)) = (lhs.as_int()?, rhs.as_int()?);
            Some(Operand::int(1, u64::from(eval::icmp(*pred, bits, a, b))))
        }
        InstKind::Cast { op, value } if ty.is_int() => {
            let (from, v) = value.as_int()?;
            let to = ty.int_width()?;
            Some(Operand::int(to, eval::cast(*op, from, to, v)))
        }
        InstKind::Select {
            cond,
            then_value,
            else_value,
        } => match cond.as_int() {
            Some((1, 1)) => Some(then_value.clone()),
            Some((1, 0)) => Some(else_value.clone()),
            _ => (then_value == else_value).then(|| then_value.clone()),
        },
        _ => None,
    }
}

/// `x op c` (or `c op x`) identities on integers.
fn identity(op: BinOp, bits: u32, lhs: &Operand, rhs: &Operand) -> Option<Operand> {
    let all_ones = eval::cast(CastOp::SExt, 1, bits, 1);
    let zero = Operand::int(bits, 0);
    let rhs_const = rhs.as_int().map(|(_, v)| v);
    let lhs_const = lhs.as_int().map(|(_, v)| v);
    match (op, lhs_const, rhs_const) {
        (BinOp::Add | BinOp::Or | BinOp::Xor, Some(0), _) => Some(rhs.clone()),
        (
            BinOp::Add | BinOp::Sub | BinOp::Or | BinOp::Xor | BinOp::Shl | BinOp::LShr | BinOp::AShr,
            _,
            Some(0),
        ) => Some(lhs.clone()),
        (BinOp::Mul, Some(1), _) => Some(rhs.clone()),
        (BinOp::Mul | BinOp::UDiv | BinOp::SDiv, _, Some(1)) => Some(lhs.clone()),
        (BinOp::Mul | BinOp::And, Some(0), _) | (BinOp::Mul | BinOp::And, _, Some(0)) => {
            Some(zero)
        }
        (BinOp::And, Some(v), _) if v == all_ones => Some(rhs.clone()),
        (BinOp::And, _, Some(v)) if v == all_ones => Some(lhs.clone()),
        (BinOp::URem, _, Some(1)) => Some(zero),
        (BinOp::Sub | BinOp::Xor, _, _) if lhs == rhs && !lhs.is_undef() => Some(zero),
        (BinOp::And | BinOp::Or, _, _) if lhs == rhs && !lhs.is_undef() => Some(lhs.clone()),
        _ => None,
    }
}

/// Drop instructions whose results are unused and that have no side effects.
fn eliminate_dead(func: &mut Function) -> usize {
    let mut removed = 0;
    loop {
        let mut used = vec![false; func.value_types.len()];
        for block in &func.blocks {
            let ops = block
                .insts
                .iter()
                .flat_map(|inst| inst.operands())
                .chain(block.term.operands());
            for op in ops {
                if let Some(id) = op.as_value()
                    && let Some(flag) = used.get_mut(id.0 as usize)
                {
                    *flag = true;
                }
            }
        }
        let mut round = 0;
        for block in &mut func.blocks {
            let before = block.insts.len();
            block.insts.retain(|inst| {
                inst.has_side_effects()
                    || inst
                        .result
                        .is_none_or(|r| used.get(r.0 as usize).copied().unwrap_or(true))
            });
            round += before - block.insts.len();
        }
        if round == 0 {
            return removed;
        }
        removed += round;
    }
}
