// Inlining of small straight-line functions at their direct call sites.

use std::collections::HashMap;

use crate::ir::{Callee, Function, InstKind, Instruction, Module, Operand, Terminator, ValueId};

/// Callees with more instructions than this are never inlined.
pub const INLINE_THRESHOLD: usize = 24;

/// Whether `func` may be copied into its callers: a single returning block,
/// no stack allocation, no varargs handling, no call to itself, small enough.
#[must_use]
pub fn is_inlinable(func: &Function) -> bool {
    let [block] = func.blocks.as_slice() else {
        return false;
    };
    !func.preserved
        && matches!(block.term, Terminator::Ret(_))
        && block.insts.len() <= INLINE_THRESHOLD
        && block.insts.iter().all(|inst| {
            !matches!(inst.kind, InstKind::Alloca { .. } | InstKind::Phi { .. })
                && inst.called_function() != Some(func.name.as_str())
                && !inst.intrinsic_name().is_some_and(|n| n.starts_with("llvm.va_"))
        })
}

/// Inline every direct call to an inlinable function into the callers that
/// are not preserved. Callee bodies are taken as they were before this round.
/// Returns the number of inlined call sites.
pub fn inline_small_functions(module: &mut Module) -> usize {
    let callees: HashMap<String, Function> = module
        .definitions()
        .filter(|f| is_inlinable(f))
        .map(|f| (f.name.clone(), f.clone()))
        .collect();
    if callees.is_empty() {
        return 0;
    }
    let count: usize = module
        .definitions_mut()
        .filter(|f| !f.preserved)
        .map(|caller| inline_into(caller, &callees))
        .sum();
    if count > 0 {
        tracing::debug!("inlined {count} call site(s)");
    }
    count
}

fn inline_into(caller: &mut Function, callees: &HashMap<String, Function>) -> usize {
    let mut count = 0;
    for block_idx in 0..caller.blocks.len() {
        let mut inst_idx = 0;
        while inst_idx < caller.blocks[block_idx].insts.len() {
            let inst = &caller.blocks[block_idx].insts[inst_idx];
            let site = match &inst.kind {
                InstKind::Call {
                    callee: Callee::Direct(name),
                    args,
                } => callees
                    .get(name)
                    .filter(|callee| callee.params.len() == args.len())
                    .map(|callee| (callee, args.clone(), inst.result)),
                _ => None,
            };
            let Some((callee, args, result)) = site else {
                inst_idx += 1;
                continue;
            };
            let (body, returned) = instantiate(caller, callee, &args);
            let len = body.len();
            caller.blocks[block_idx]
                .insts
                .splice(inst_idx..=inst_idx, body);
            if let Some(result) = result {
                let value = returned.unwrap_or_else(|| Operand::undef(callee.ret.clone()));
                caller.replace_all_uses(result, &value);
            }
            inst_idx += len;
            count += 1;
        }
    }
    count
}

/// Copy the callee's instructions with parameters bound to `args` and fresh
/// caller value numbers for every result. Returns the copies and the
/// returned operand.
fn instantiate(
    caller: &mut Function,
    callee: &Function,
    args: &[Operand],
) -> (Vec<Instruction>, Option<Operand>) {
    let mut bound: HashMap<ValueId, Operand> =
        callee.params.iter().copied().zip(args.iter().cloned()).collect();
    let rebind = |op: &mut Operand, bound: &HashMap<ValueId, Operand>| {
        if let Some(value) = op.as_value().and_then(|id| bound.get(&id)) {
            *op = value.clone();
        }
    };
    let Some(block) = callee.blocks.first() else {
        return (Vec::new(), None);
    };
    let mut body = Vec::with_capacity(block.insts.len());
    for inst in &block.insts {
        let mut copy = inst.clone();
        for op in copy.operands_mut() {
            rebind(op, &bound);
        }
        if let Some(result) = inst.result {
            let fresh = caller.new_value(inst.ty.clone());
            copy.result = Some(fresh);
            bound.insert(result, Operand::Value(fresh));
        }
        body.push(copy);
    }
    let returned = match &block.term {
        Terminator::Ret(Some(value)) => {
            let mut value = value.clone();
            rebind(&mut value, &bound);
            Some(value)
        }
        _ => None,
    };
    (body, returned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, FunctionBuilder, Type};

    fn square() -> Function {
        let mut b = FunctionBuilder::new("square", &[Type::I32], Type::I32);
        let x = b.param(0);
        let r = b.binary(BinOp::Mul, x.clone(), x);
        b.ret(Some(r));
        b.finish()
    }

    fn caller() -> Function {
        let mut b = FunctionBuilder::new("main", &[Type::I32], Type::I32);
        let x = b.param(0);
        let s = b.call("square", vec![x], Type::I32).unwrap();
        let r = b.binary(BinOp::Add, s, Operand::int(32, 1));
        b.ret(Some(r));
        b.finish()
    }

    #[test]
    fn small_callee_is_copied_into_the_caller() {
        let mut module = Module::new("m");
        module.functions.push(square());
        module.functions.push(caller());
        assert_eq!(inline_small_functions(&mut module), 1);

        let main = module.function("main").unwrap();
        assert!(main.instructions().all(|i| i.called_function().is_none()));
        let InstKind::Binary { op, lhs, rhs } = &main.blocks[0].insts[0].kind else {
            panic!("expected the inlined multiply");
        };
        assert_eq!(*op, BinOp::Mul);
        assert_eq!(lhs, &Operand::Value(main.params[0]));
        assert_eq!(lhs, rhs);
        let product = main.blocks[0].insts[0].result.unwrap();
        let InstKind::Binary { lhs, .. } = &main.blocks[0].insts[1].kind else {
            panic!("expected the add");
        };
        assert_eq!(lhs, &Operand::Value(product));
    }

    #[test]
    fn preserved_and_recursive_functions_stay_calls() {
        let mut preserved = square();
        preserved.preserved = true;
        assert!(!is_inlinable(&preserved));

        let mut b = FunctionBuilder::new("loop", &[], Type::Void);
        b.call("loop", vec![], Type::Void);
        b.ret(None);
        assert!(!is_inlinable(&b.finish()));

        let mut b = FunctionBuilder::new("stack", &[], Type::Void);
        b.alloca(Type::I32);
        b.ret(None);
        assert!(!is_inlinable(&b.finish()));
    }
}
