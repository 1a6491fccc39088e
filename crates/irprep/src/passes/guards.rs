// Guard insertion: runtime checks in front of division and shift
// instructions whose operands can trigger undefined behavior.
//
// The protected block is split right before the instruction; the head ends
// in a conditional branch to a per-function abort block which calls the
// interpreter's report hook and never returns.

use crate::config::RUNTIME_HOOK_PREFIX;
use crate::ir::{
    BinOp, BlockId, Callee, Function, InstKind, Instruction, IntPredicate, Module, Operand,
    Terminator, Type,
};

/// Which undefined-behavior check a guard performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    DivZero,
    Overshift,
}

impl GuardKind {
    /// Runtime hook called on the failing path.
    #[must_use]
    pub fn report_hook(self) -> String {
        match self {
            GuardKind::DivZero => format!("{RUNTIME_HOOK_PREFIX}report_div_zero"),
            GuardKind::Overshift => format!("{RUNTIME_HOOK_PREFIX}report_overshift"),
        }
    }

    /// For an instruction this guard protects, the comparison that is true
    /// on the failing path. `None` when the instruction needs no guard.
    fn failure_check(self, func: &Function, inst: &Instruction) -> Option<InstKind> {
        let InstKind::Binary { op, rhs, .. } = &inst.kind else {
            return None;
        };
        let width = inst.ty.int_width().filter(|_| !inst.ty.is_vector())?;
        match self {
            GuardKind::DivZero if op.is_division() => {
                if matches!(rhs.as_int(), Some((_, value)) if value != 0) {
                    return None;
                }
                Some(InstKind::ICmp {
                    pred: IntPredicate::Eq,
                    lhs: rhs.clone(),
                    rhs: Operand::int(width, 0),
                })
            }
            GuardKind::Overshift if op.is_shift() => {
                if matches!(rhs.as_int(), Some((_, amount)) if amount < u64::from(width)) {
                    return None;
                }
                debug_assert_eq!(func.operand_type(rhs).int_width(), Some(width));
                Some(InstKind::ICmp {
                    pred: IntPredicate::Uge,
                    lhs: rhs.clone(),
                    rhs: Operand::int(width, u64::from(width)),
                })
            }
            _ => None,
        }
    }
}

/// Guard every division/remainder whose divisor is not a nonzero constant.
pub fn insert_div_zero_guards(module: &mut Module) -> usize {
    insert_guards(module, GuardKind::DivZero)
}

/// Guard every shift whose amount is not a constant below the bit width.
pub fn insert_overshift_guards(module: &mut Module) -> usize {
    insert_guards(module, GuardKind::Overshift)
}

fn insert_guards(module: &mut Module, kind: GuardKind) -> usize {
    let hook = kind.report_hook();
    let mut inserted = 0;
    for func in module.definitions_mut() {
        inserted += guard_function(func, kind, &hook);
    }
    if inserted > 0 {
        module.ensure_declared(&hook, &[], Type::Void);
        tracing::debug!("inserted {inserted} {kind:?} guard(s)");
    }
    inserted
}

fn guard_function(func: &mut Function, kind: GuardKind, hook: &str) -> usize {
    let mut abort_block: Option<BlockId> = None;
    let mut inserted = 0;
    let mut block_idx = 0;
    while block_idx < func.blocks.len() {
        let block = &func.blocks[block_idx];
        if Some(block.id) == abort_block {
            block_idx += 1;
            continue;
        }
        // A guarded instruction heads its own block after the split, so
        // scanning resumes after it.
        let start = usize::from(inserted > 0 && is_guarded_head(func, block_idx));
        let found = block.insts[start..].iter().enumerate().find_map(|(i, inst)| {
            kind.failure_check(func, inst).map(|check| (start + i, check))
        });
        let Some((inst_idx, check)) = found else {
            block_idx += 1;
            continue;
        };

        let abort = *abort_block.get_or_insert_with(|| add_abort_block(func, hook));
        let cont = func.split_block(block_idx, inst_idx);
        let (cmp, failed) = func.make_inst(Type::I1, check);
        let head = &mut func.blocks[block_idx];
        head.insts.push(cmp);
        head.term = Terminator::CondBr {
            cond: failed,
            then_dest: abort,
            else_dest: cont,
        };
        inserted += 1;
        block_idx += 1;
    }
    inserted
}

/// Whether the block at `block_idx` was produced by a guard split, i.e. its
/// only predecessor is the block laid out right before it, ending in a guard.
fn is_guarded_head(func: &Function, block_idx: usize) -> bool {
    let Some(prev) = block_idx.checked_sub(1).map(|i| &func.blocks[i]) else {
        return false;
    };
    let id = func.blocks[block_idx].id;
    matches!(
        &prev.term,
        Terminator::CondBr { else_dest, then_dest, .. }
            if *else_dest == id && is_abort_block(func, *then_dest)
    )
}

fn is_abort_block(func: &Function, id: BlockId) -> bool {
    func.block(id).is_some_and(|block| {
        block.term == Terminator::Unreachable
            && block.insts.len() == 1
            && block.insts[0]
                .called_function()
                .is_some_and(|name| name.starts_with(RUNTIME_HOOK_PREFIX))
    })
}

fn add_abort_block(func: &mut Function, hook: &str) -> BlockId {
    let id = func.add_block();
    let report = Instruction::new(
        None,
        Type::Void,
        InstKind::Call {
            callee: Callee::Direct(hook.to_string()),
            args: Vec::new(),
        },
    );
    if let Some(block) = func.block_mut(id) {
        block.insts.push(report);
        block.term = Terminator::Unreachable;
    }
    id
}

/// Whether `op` is one of the operations a guard kind protects.
#[must_use]
pub fn is_guarded_op(kind: GuardKind, op: BinOp) -> bool {
    match kind {
        GuardKind::DivZero => op.is_division(),
        GuardKind::Overshift => op.is_shift(),
    }
}
