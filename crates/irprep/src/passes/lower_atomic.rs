// Atomic lowering: the interpreter is single-threaded, so atomic memory
// operations become their plain load/op/store equivalents.

use crate::ir::{
    BinOp, Function, InstKind, Instruction, IntPredicate, Module, Operand, RmwOp, Type, ValueId,
};

/// Lower every atomic operation in the module. Returns the number of
/// instructions rewritten or removed.
pub fn lower_atomics(module: &mut Module) -> usize {
    let lowered: usize = module.definitions_mut().map(lower_function).sum();
    if lowered > 0 {
        tracing::debug!("lowered {lowered} atomic operation(s)");
    }
    lowered
}

fn lower_function(func: &mut Function) -> usize {
    let mut lowered = 0;
    for block_idx in 0..func.blocks.len() {
        let insts = std::mem::take(&mut func.blocks[block_idx].insts);
        let mut out = Vec::with_capacity(insts.len());
        for mut inst in insts {
            match inst.kind {
                InstKind::Fence => lowered += 1,
                InstKind::Load { ref mut atomic, .. } | InstKind::Store { ref mut atomic, .. }
                    if *atomic =>
                {
                    *atomic = false;
                    lowered += 1;
                    out.push(inst);
                }
                InstKind::AtomicRmw { op, ptr, value } => {
                    lower_rmw(func, &mut out, inst.result, &inst.ty, op, ptr, value);
                    lowered += 1;
                }
                InstKind::CmpXchg {
                    ptr,
                    expected,
                    replacement,
                } => {
                    // old = load ptr; store (old == expected ? replacement : old), ptr
                    let old = load_into(func, &mut out, inst.result, &inst.ty, &ptr);
                    let (eq, matched) = func.make_inst(
                        Type::I1,
                        InstKind::ICmp {
                            pred: IntPredicate::Eq,
                            lhs: old.clone(),
                            rhs: expected,
                        },
                    );
                    out.push(eq);
                    let (select, new_value) = func.make_inst(
                        inst.ty.clone(),
                        InstKind::Select {
                            cond: matched,
                            then_value: replacement,
                            else_value: old,
                        },
                    );
                    out.push(select);
                    out.push(plain_store(new_value, ptr));
                    lowered += 1;
                }
                _ => out.push(inst),
            }
        }
        func.blocks[block_idx].insts = out;
    }
    lowered
}

/// Load that takes over the original instruction's result id, so existing
/// users of the atomic see the previous memory value.
fn load_into(
    func: &mut Function,
    out: &mut Vec<Instruction>,
    result: Option<ValueId>,
    ty: &Type,
    ptr: &Operand,
) -> Operand {
    let kind = InstKind::Load {
        ptr: ptr.clone(),
        atomic: false,
    };
    match result {
        Some(id) => {
            out.push(Instruction::new(Some(id), ty.clone(), kind));
            Operand::Value(id)
        }
        None => {
            let (load, old) = func.make_inst(ty.clone(), kind);
            out.push(load);
            old
        }
    }
}

fn plain_store(value: Operand, ptr: Operand) -> Instruction {
    Instruction::new(
        None,
        Type::Void,
        InstKind::Store {
            value,
            ptr,
            atomic: false,
        },
    )
}

fn lower_rmw(
    func: &mut Function,
    out: &mut Vec<Instruction>,
    result: Option<ValueId>,
    ty: &Type,
    op: RmwOp,
    ptr: Operand,
    value: Operand,
) {
    let old = load_into(func, out, result, ty, &ptr);
    let binary = |func: &mut Function,
                  out: &mut Vec<Instruction>,
                  op: BinOp,
                  lhs: Operand,
                  rhs: Operand|
     -> Operand {
        let (inst, res) = func.make_inst(ty.clone(), InstKind::Binary { op, lhs, rhs });
        out.push(inst);
        res
    };
    let new_value = match op {
        RmwOp::Xchg => value,
        RmwOp::Add => binary(func, out, BinOp::Add, old, value),
        RmwOp::Sub => binary(func, out, BinOp::Sub, old, value),
        RmwOp::And => binary(func, out, BinOp::And, old, value),
        RmwOp::Or => binary(func, out, BinOp::Or, old, value),
        RmwOp::Xor => binary(func, out, BinOp::Xor, old, value),
        RmwOp::Nand => {
            let bits = ty.int_width().unwrap_or(64);
            let and = binary(func, out, BinOp::And, old, value);
            binary(func, out, BinOp::Xor, and, Operand::int(bits, u64::MAX))
        }
        RmwOp::Max | RmwOp::Min | RmwOp::UMax | RmwOp::UMin => {
            let pred = match op {
                RmwOp::Max => IntPredicate::Sgt,
                RmwOp::Min => IntPredicate::Slt,
                RmwOp::UMax => IntPredicate::Ugt,
                _ => IntPredicate::Ult,
            };
            let (cmp, keep_old) = func.make_inst(
                Type::I1,
                InstKind::ICmp {
                    pred,
                    lhs: old.clone(),
                    rhs: value.clone(),
                },
            );
            out.push(cmp);
            let (select, chosen) = func.make_inst(
                ty.clone(),
                InstKind::Select {
                    cond: keep_old,
                    then_value: old,
                    else_value: value,
                },
            );
            out.push(select);
            chosen
        }
    };
    out.push(plain_store(new_value, ptr));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FunctionBuilder;

    fn module_with(f: impl FnOnce(&mut FunctionBuilder)) -> Module {
        let mut b = FunctionBuilder::new("main", &[Type::Ptr, Type::I32], Type::I32);
        f(&mut b);
        let mut module = Module::new("m");
        module.functions.push(b.finish());
        module
    }

    #[test]
    fn rmw_add_becomes_load_add_store() {
        let mut module = module_with(|b| {
            let (p, v) = (b.param(0), b.param(1));
            let old = b.atomic_rmw(RmwOp::Add, p, v);
            b.ret(Some(old));
        });
        let result = module.functions[0].blocks[0].insts[0].result;
        assert_eq!(lower_atomics(&mut module), 1);

        let insts = &module.functions[0].blocks[0].insts;
        assert_eq!(insts.len(), 3);
        assert!(matches!(insts[0].kind, InstKind::Load { atomic: false, .. }));
        assert_eq!(insts[0].result, result);
        assert!(matches!(insts[1].kind, InstKind::Binary { op: BinOp::Add, .. }));
        assert!(matches!(insts[2].kind, InstKind::Store { atomic: false, .. }));
        assert!(module.functions[0].instructions().all(|i| !i.is_atomic()));
    }

    #[test]
    fn cmpxchg_and_fence_are_lowered() {
        let mut module = module_with(|b| {
            let (p, v) = (b.param(0), b.param(1));
            b.fence();
            let old = b.cmpxchg(p.clone(), Operand::int(32, 0), v);
            let loaded = b.atomic_load(Type::I32, p.clone());
            b.atomic_store(loaded, p);
            b.ret(Some(old));
        });
        assert_eq!(lower_atomics(&mut module), 4);
        let func = &module.functions[0];
        assert!(func.instructions().all(|i| !i.is_atomic()));
        assert!(
            func.instructions()
                .any(|i| matches!(i.kind, InstKind::Select { .. }))
        );
    }

    #[test]
    fn nand_uses_all_ones_mask() {
        let mut module = module_with(|b| {
            let (p, v) = (b.param(0), b.param(1));
            let old = b.atomic_rmw(RmwOp::Nand, p, v);
            b.ret(Some(old));
        });
        lower_atomics(&mut module);
        let insts = &module.functions[0].blocks[0].insts;
        assert!(matches!(
            &insts[2].kind,
            InstKind::Binary { op: BinOp::Xor, rhs, .. } if rhs.as_int() == Some((32, 0xffff_ffff))
        ));
    }
}
