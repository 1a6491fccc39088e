// Intrinsic normalization.
//
// Every `llvm.*` call is either kept (the interpreter implements it), deleted
// (no runtime effect), expanded into plain instructions, or rejected.

use crate::ir::{
    BinOp, BlockId, Callee, CastOp, Function, InstKind, Instruction, IntPredicate,
    Module, Operand, Terminator, Type, ValueId,
};
use crate::{Error, Result};

/// Intrinsic families the interpreter executes natively.
const KEPT: &[&str] = &[
    "va_start", "va_end", "va_copy", "fabs", "sqrt", "fma", "ctpop", "ctlz", "cttz", "bswap",
    "abs", "fshl", "fshr",
];

/// Kept families that apply lane by lane when overloaded on vectors.
const ELEMENTWISE: &[&str] = &[
    "fabs", "sqrt", "fma", "ctpop", "ctlz", "cttz", "bswap", "abs", "fshl", "fshr",
];

/// Intrinsic families with no runtime effect.
const INERT: &[&str] = &[
    "dbg",
    "lifetime",
    "invariant",
    "var.annotation",
    "assume",
    "sideeffect",
    "donothing",
    "prefetch",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Kept,
    Rewrite(Rewrite),
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rewrite {
    Delete,
    MemCpy,
    MemMove,
    MemSet,
    FMulAdd,
    Expect,
    ObjectSize,
    Trap,
    Reduce(BinOp),
    /// `icmp` on the predicate, then `select` the winning operand.
    MinMax(IntPredicate),
    Saturating { op: BinOp, signed: bool },
    IsConstant,
}

/// `llvm.<family>` or `llvm.<family>.<overload suffix>`.
fn in_family(base: &str, family: &str) -> bool {
    base.strip_prefix(family)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

fn classify(name: &str) -> Class {
    let Some(base) = name.strip_prefix("llvm.") else {
        return Class::Unknown;
    };
    if KEPT.iter().any(|f| in_family(base, f)) {
        return Class::Kept;
    }
    if INERT.iter().any(|f| in_family(base, f)) {
        return Class::Rewrite(Rewrite::Delete);
    }
    let families = [
        ("vector.reduce.add", Rewrite::Reduce(BinOp::Add)),
        ("vector.reduce.mul", Rewrite::Reduce(BinOp::Mul)),
        ("vector.reduce.and", Rewrite::Reduce(BinOp::And)),
        ("vector.reduce.or", Rewrite::Reduce(BinOp::Or)),
        ("vector.reduce.xor", Rewrite::Reduce(BinOp::Xor)),
        ("memcpy", Rewrite::MemCpy),
        ("memmove", Rewrite::MemMove),
        ("memset", Rewrite::MemSet),
        ("fmuladd", Rewrite::FMulAdd),
        ("expect", Rewrite::Expect),
        ("objectsize", Rewrite::ObjectSize),
        ("trap", Rewrite::Trap),
        ("umax", Rewrite::MinMax(IntPredicate::Ugt)),
        ("umin", Rewrite::MinMax(IntPredicate::Ult)),
        ("smax", Rewrite::MinMax(IntPredicate::Sgt)),
        ("smin", Rewrite::MinMax(IntPredicate::Slt)),
        ("uadd.sat", Rewrite::Saturating { op: BinOp::Add, signed: false }),
        ("usub.sat", Rewrite::Saturating { op: BinOp::Sub, signed: false }),
        ("sadd.sat", Rewrite::Saturating { op: BinOp::Add, signed: true }),
        ("ssub.sat", Rewrite::Saturating { op: BinOp::Sub, signed: true }),
        ("is.constant", Rewrite::IsConstant),
    ];
    families
        .iter()
        .find(|(f, _)| in_family(base, f))
        .map_or(Class::Unknown, |(_, rewrite)| Class::Rewrite(*rewrite))
}

/// Whether the interpreter accepts calls to `name` as-is.
#[must_use]
pub fn is_allowed_intrinsic(name: &str) -> bool {
    classify(name) == Class::Kept
}

/// Scalar overload of an element-wise intrinsic for lanes of type `elem`:
/// `llvm.ctpop.i32` for `llvm.ctpop.v4i32`, `llvm.fabs.f64` for
/// `llvm.fabs.v2f64`. `None` for every other callee.
pub(crate) fn scalar_overload(name: &str, elem: &Type) -> Option<String> {
    let base = name.strip_prefix("llvm.")?;
    let family = ELEMENTWISE.iter().find(|f| in_family(base, f))?;
    let suffix = match elem {
        Type::Int(bits) => format!("i{bits}"),
        Type::F32 => "f32".to_string(),
        Type::F64 => "f64".to_string(),
        _ => return None,
    };
    Some(format!("llvm.{family}.{suffix}"))
}

/// Rewrite every intrinsic call outside the allow-list.
///
/// # Errors
/// `Error::UnsupportedIntrinsic` for intrinsics the pipeline does not know.
pub fn normalize_intrinsics(module: &mut Module) -> Result<usize> {
    let mut count = 0;
    let mut calls_abort = false;
    for func in module.definitions_mut() {
        count += normalize_function(func, &mut calls_abort)?;
    }
    if calls_abort {
        module.ensure_declared("abort", &[], Type::Void);
    }
    if count > 0 {
        tracing::debug!("normalized {count} intrinsic call(s)");
    }
    Ok(count)
}

fn normalize_function(func: &mut Function, calls_abort: &mut bool) -> Result<usize> {
    let mut count = 0;
    let mut block_idx = 0;
    'blocks: while block_idx < func.blocks.len() {
        let mut inst_idx = 0;
        while inst_idx < func.blocks[block_idx].insts.len() {
            let inst = &func.blocks[block_idx].insts[inst_idx];
            let Some(name) = inst.intrinsic_name() else {
                inst_idx += 1;
                continue;
            };
            let rewrite = match classify(name) {
                Class::Kept => {
                    inst_idx += 1;
                    continue;
                }
                Class::Unknown => {
                    return Err(Error::UnsupportedIntrinsic(format!(
                        "{name} (in function '{}')",
                        func.name
                    )));
                }
                Class::Rewrite(rewrite) => rewrite,
            };
            let name = name.to_string();
            let inst = func.blocks[block_idx].insts.remove(inst_idx);
            let args = match &inst.kind {
                InstKind::Call { args, .. } => args.clone(),
                _ => Vec::new(),
            };
            count += 1;
            match rewrite {
                Rewrite::Delete => {
                    if let Some(result) = inst.result {
                        func.replace_all_uses(result, &Operand::undef(inst.ty.clone()));
                    }
                }
                Rewrite::Expect => {
                    let value = arg(&args, 0, &name)?;
                    if let Some(result) = inst.result {
                        func.replace_all_uses(result, &value);
                    }
                }
                Rewrite::ObjectSize => {
                    let min = args.get(1).and_then(Operand::as_int) == Some((1, 1));
                    if let (Some(result), Some(width)) = (inst.result, inst.ty.int_width()) {
                        let size = if min { 0 } else { u64::MAX };
                        func.replace_all_uses(result, &Operand::int(width, size));
                    }
                }
                Rewrite::IsConstant => {
                    // Nothing is known to be constant at this point.
                    if let Some(result) = inst.result {
                        func.replace_all_uses(result, &Operand::int(1, 0));
                    }
                }
                Rewrite::FMulAdd | Rewrite::MinMax(_) | Rewrite::Saturating { .. } => {
                    let seq = expand_arithmetic(func, &inst, rewrite, &args, &name)?;
                    inst_idx += insert_at(func, block_idx, inst_idx, seq, &inst);
                }
                Rewrite::Reduce(op) => {
                    let seq = expand_reduction(func, &inst, op, &arg(&args, 0, &name)?);
                    inst_idx += insert_at(func, block_idx, inst_idx, seq, &inst);
                }
                Rewrite::Trap => {
                    let mut abort = Instruction::new(
                        None,
                        Type::Void,
                        InstKind::Call {
                            callee: Callee::Direct("abort".to_string()),
                            args: Vec::new(),
                        },
                    );
                    abort.debug_loc = inst.debug_loc;
                    func.blocks[block_idx].insts.insert(inst_idx, abort);
                    func.split_block(block_idx, inst_idx + 1);
                    func.blocks[block_idx].term = Terminator::Unreachable;
                    *calls_abort = true;
                    block_idx += 1;
                    continue 'blocks;
                }
                Rewrite::MemCpy | Rewrite::MemMove | Rewrite::MemSet => {
                    let dst = arg(&args, 0, &name)?;
                    let src = arg(&args, 1, &name)?;
                    let len = arg(&args, 2, &name)?;
                    let op = if rewrite == Rewrite::MemSet {
                        ByteOp::Set { dst, value: src }
                    } else {
                        ByteOp::Copy { dst, src }
                    };
                    let overlapping = rewrite == Rewrite::MemMove;
                    expand_memory_loop(func, block_idx, inst_idx, &op, &len, overlapping);
                    block_idx += 1;
                    continue 'blocks;
                }
            }
        }
        block_idx += 1;
    }
    Ok(count)
}

/// Insert `seq` at `inst_idx`, tagged with the debug location of the
/// replaced call. Returns the number of inserted instructions.
fn insert_at(
    func: &mut Function,
    block_idx: usize,
    inst_idx: usize,
    mut seq: Vec<Instruction>,
    replaced: &Instruction,
) -> usize {
    for inst in &mut seq {
        inst.debug_loc = replaced.debug_loc;
    }
    let len = seq.len();
    let insts = &mut func.blocks[block_idx].insts;
    let tail = insts.split_off(inst_idx);
    insts.extend(seq);
    insts.extend(tail);
    len
}

fn arg(args: &[Operand], index: usize, name: &str) -> Result<Operand> {
    args.get(index)
        .cloned()
        .ok_or_else(|| Error::Unsupported(format!("{name}: missing argument {index}")))
}

fn push(func: &mut Function, out: &mut Vec<Instruction>, ty: Type, kind: InstKind) -> Operand {
    let (inst, result) = func.make_inst(ty, kind);
    out.push(inst);
    result
}

/// Scalar lane `lane` of `vector`; constants split without instructions.
fn lane_of(func: &mut Function, out: &mut Vec<Instruction>, vector: &Operand, lane: u32) -> Operand {
    if let Operand::Const(c) = vector
        && let Some(scalar) = c.lane(lane)
    {
        return Operand::Const(scalar);
    }
    let elem = func.operand_type(vector).element().clone();
    push(
        func,
        out,
        elem,
        InstKind::ExtractElement {
            vector: vector.clone(),
            index: Operand::int(32, u64::from(lane)),
        },
    )
}

/// Give the last instruction of `seq` the id `result` (the replaced call's
/// value), so its users need no rewriting.
fn adopt_result(seq: &mut [Instruction], result: Option<ValueId>) {
    if let (Some(last), Some(result)) = (seq.last_mut(), result) {
        last.result = Some(result);
    }
}

/// Expand `inst` one lane at a time. `scalar` emits the computation for one
/// set of scalar arguments of type `elem` and returns its value; vector
/// calls rebuild their result with an `insertelement` chain.
fn expand_lanewise(
    func: &mut Function,
    inst: &Instruction,
    args: &[Operand],
    mut scalar: impl FnMut(&mut Function, &mut Vec<Instruction>, &Type, &[Operand]) -> Operand,
) -> Vec<Instruction> {
    let elem = inst.ty.element().clone();
    let mut out = Vec::new();
    let Some(lanes) = inst.ty.lanes() else {
        let value = scalar(func, &mut out, &elem, args);
        let ends_in_value = value.as_value().is_some()
            && out.last().and_then(|last| last.result) == value.as_value();
        if ends_in_value {
            adopt_result(&mut out, inst.result);
        } else if let Some(result) = inst.result {
            func.replace_all_uses(result, &value);
        }
        return out;
    };
    let mut vector = Operand::undef(inst.ty.clone());
    for lane in 0..lanes {
        let mut lane_args = Vec::with_capacity(args.len());
        for a in args {
            lane_args.push(if func.operand_type(a).is_vector() {
                lane_of(func, &mut out, a, lane)
            } else {
                a.clone()
            });
        }
        let value = scalar(func, &mut out, &elem, &lane_args);
        vector = push(func, &mut out, inst.ty.clone(), InstKind::InsertElement {
            vector,
            value,
            index: Operand::int(32, u64::from(lane)),
        });
    }
    adopt_result(&mut out, inst.result);
    out
}

fn expand_arithmetic(
    func: &mut Function,
    inst: &Instruction,
    rewrite: Rewrite,
    args: &[Operand],
    name: &str,
) -> Result<Vec<Instruction>> {
    let arity = if rewrite == Rewrite::FMulAdd { 3 } else { 2 };
    arg(args, arity - 1, name)?;
    let args = &args[..arity];
    let seq = match rewrite {
        Rewrite::MinMax(pred) => expand_lanewise(func, inst, args, |func, out, ty, a| {
            let wins = push(func, out, Type::I1, InstKind::ICmp {
                pred,
                lhs: a[0].clone(),
                rhs: a[1].clone(),
            });
            push(func, out, ty.clone(), InstKind::Select {
                cond: wins,
                then_value: a[0].clone(),
                else_value: a[1].clone(),
            })
        }),
        Rewrite::Saturating { op, signed } => {
            expand_lanewise(func, inst, args, |func, out, ty, a| {
                saturating(func, out, ty, op, signed, &a[0], &a[1])
            })
        }
        _ => expand_lanewise(func, inst, args, |func, out, ty, a| {
            let product = push(func, out, ty.clone(), InstKind::Binary {
                op: BinOp::FMul,
                lhs: a[0].clone(),
                rhs: a[1].clone(),
            });
            push(func, out, ty.clone(), InstKind::Binary {
                op: BinOp::FAdd,
                lhs: product,
                rhs: a[2].clone(),
            })
        }),
    };
    Ok(seq)
}

/// `a op b` clamped to the range of `ty` instead of wrapping.
fn saturating(
    func: &mut Function,
    out: &mut Vec<Instruction>,
    ty: &Type,
    op: BinOp,
    signed: bool,
    a: &Operand,
    b: &Operand,
) -> Operand {
    let width = ty.int_width().unwrap_or(64);
    let binary = |func: &mut Function,
                  out: &mut Vec<Instruction>,
                  op: BinOp,
                  lhs: Operand,
                  rhs: Operand| {
        push(func, out, ty.clone(), InstKind::Binary { op, lhs, rhs })
    };
    let wrapped = binary(func, out, op, a.clone(), b.clone());

    if !signed {
        // Unsigned add overflows when the sum wraps below an operand; unsigned
        // sub when the subtrahend is larger.
        let (lhs, rhs, bound) = if op == BinOp::Add {
            (wrapped.clone(), a.clone(), u64::MAX)
        } else {
            (a.clone(), b.clone(), 0)
        };
        let overflow = push(func, out, Type::I1, InstKind::ICmp {
            pred: IntPredicate::Ult,
            lhs,
            rhs,
        });
        return push(func, out, ty.clone(), InstKind::Select {
            cond: overflow,
            then_value: Operand::int(width, bound),
            else_value: wrapped,
        });
    }

    // The sign bit of `overflow_bits` is set exactly when the result's sign
    // is wrong: (a ^ r) & (b ^ r) for add, (a ^ b) & (a ^ r) for sub.
    let (x, y) = if op == BinOp::Add {
        let x = binary(func, out, BinOp::Xor, a.clone(), wrapped.clone());
        let y = binary(func, out, BinOp::Xor, b.clone(), wrapped.clone());
        (x, y)
    } else {
        let x = binary(func, out, BinOp::Xor, a.clone(), b.clone());
        let y = binary(func, out, BinOp::Xor, a.clone(), wrapped.clone());
        (x, y)
    };
    let overflow_bits = binary(func, out, BinOp::And, x, y);
    let overflow = push(func, out, Type::I1, InstKind::ICmp {
        pred: IntPredicate::Slt,
        lhs: overflow_bits,
        rhs: Operand::int(width, 0),
    });
    let negative = push(func, out, Type::I1, InstKind::ICmp {
        pred: IntPredicate::Slt,
        lhs: a.clone(),
        rhs: Operand::int(width, 0),
    });
    let min = 1u64 << (width.clamp(1, 64) - 1);
    let bound = push(func, out, ty.clone(), InstKind::Select {
        cond: negative,
        then_value: Operand::int(width, min),
        else_value: Operand::int(width, min - 1),
    });
    push(func, out, ty.clone(), InstKind::Select {
        cond: overflow,
        then_value: bound,
        else_value: wrapped,
    })
}

fn expand_reduction(
    func: &mut Function,
    inst: &Instruction,
    op: BinOp,
    vector: &Operand,
) -> Vec<Instruction> {
    let lanes = func.operand_type(vector).lanes().unwrap_or(1);
    let mut out = Vec::new();
    let mut acc = lane_of(func, &mut out, vector, 0);
    for lane in 1..lanes {
        let next = lane_of(func, &mut out, vector, lane);
        acc = push(func, &mut out, inst.ty.clone(), InstKind::Binary {
            op,
            lhs: acc,
            rhs: next,
        });
    }
    let ends_in_acc = out
        .last()
        .and_then(|last| last.result)
        .is_some_and(|id| acc.as_value() == Some(id));
    if ends_in_acc {
        adopt_result(&mut out, inst.result);
    } else if let Some(result) = inst.result {
        func.replace_all_uses(result, &acc);
    }
    out
}

enum ByteOp {
    Copy { dst: Operand, src: Operand },
    Set { dst: Operand, value: Operand },
}

impl ByteOp {
    fn emit(&self, func: &mut Function, out: &mut Vec<Instruction>, index: &Operand) {
        match self {
            ByteOp::Copy { dst, src } => {
                let from = push(func, out, Type::Ptr, InstKind::PtrAdd {
                    base: src.clone(),
                    offset: index.clone(),
                });
                let byte = push(func, out, Type::I8, InstKind::Load {
                    ptr: from,
                    atomic: false,
                });
                let to = push(func, out, Type::Ptr, InstKind::PtrAdd {
                    base: dst.clone(),
                    offset: index.clone(),
                });
                push(func, out, Type::Void, InstKind::Store {
                    value: byte,
                    ptr: to,
                    atomic: false,
                });
            }
            ByteOp::Set { dst, value } => {
                let to = push(func, out, Type::Ptr, InstKind::PtrAdd {
                    base: dst.clone(),
                    offset: index.clone(),
                });
                push(func, out, Type::Void, InstKind::Store {
                    value: value.clone(),
                    ptr: to,
                    atomic: false,
                });
            }
        }
    }
}

/// Replace the memory intrinsic at `inst_idx` (already removed from the
/// block) with a byte loop. The block is split there; the instructions
/// after the call continue in the block right after it.
fn expand_memory_loop(
    func: &mut Function,
    block_idx: usize,
    inst_idx: usize,
    op: &ByteOp,
    len: &Operand,
    overlapping: bool,
) {
    let cont = func.split_block(block_idx, inst_idx);
    let head = func.blocks[block_idx].id;
    let forward = byte_loop(func, head, cont, op, len, false);
    if !overlapping {
        func.blocks[block_idx].term = Terminator::Br(forward);
        return;
    }
    let ByteOp::Copy { dst, src } = op else {
        func.blocks[block_idx].term = Terminator::Br(forward);
        return;
    };
    // memmove: copy forward when the destination lies below the source.
    let backward = byte_loop(func, head, cont, op, len, true);
    let mut out = Vec::new();
    let d = push(func, &mut out, Type::I64, InstKind::Cast {
        op: CastOp::PtrToInt,
        value: dst.clone(),
    });
    let s = push(func, &mut out, Type::I64, InstKind::Cast {
        op: CastOp::PtrToInt,
        value: src.clone(),
    });
    let below = push(func, &mut out, Type::I1, InstKind::ICmp {
        pred: IntPredicate::Ult,
        lhs: d,
        rhs: s,
    });
    let block = &mut func.blocks[block_idx];
    block.insts.extend(out);
    block.term = Terminator::CondBr {
        cond: below,
        then_dest: forward,
        else_dest: backward,
    };
}

/// Two-block counted loop entered from `pred`, leaving to `exit`. Returns the
/// loop header.
fn byte_loop(
    func: &mut Function,
    pred: BlockId,
    exit: BlockId,
    op: &ByteOp,
    len: &Operand,
    backward: bool,
) -> BlockId {
    let header = func.add_block();
    let body = func.add_block();
    let len_ty = func.operand_type(len);
    let width = len_ty.int_width().unwrap_or(64);
    let step_id = func.new_value(len_ty.clone());

    let start = if backward {
        len.clone()
    } else {
        Operand::int(width, 0)
    };
    let mut head_insts = Vec::new();
    let index = push(func, &mut head_insts, len_ty.clone(), InstKind::Phi {
        incoming: vec![(start, pred), (Operand::Value(step_id), body)],
    });
    let done = if backward {
        push(func, &mut head_insts, Type::I1, InstKind::ICmp {
            pred: IntPredicate::Eq,
            lhs: index.clone(),
            rhs: Operand::int(width, 0),
        })
    } else {
        push(func, &mut head_insts, Type::I1, InstKind::ICmp {
            pred: IntPredicate::Uge,
            lhs: index.clone(),
            rhs: len.clone(),
        })
    };

    let mut body_insts = Vec::new();
    let step = Instruction::new(Some(step_id), len_ty, InstKind::Binary {
        op: if backward { BinOp::Sub } else { BinOp::Add },
        lhs: index.clone(),
        rhs: Operand::int(width, 1),
    });
    if backward {
        body_insts.push(step);
        op.emit(func, &mut body_insts, &Operand::Value(step_id));
    } else {
        op.emit(func, &mut body_insts, &index);
        body_insts.push(step);
    }

    if let Some(block) = func.block_mut(header) {
        block.insts = head_insts;
        block.term = Terminator::CondBr {
            cond: done,
            then_dest: exit,
            else_dest: body,
        };
    }
    if let Some(block) = func.block_mut(body) {
        block.insts = body_insts;
        block.term = Terminator::Br(header);
    }
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FunctionBuilder;
    use crate::test_harness::{Evaluator, Value};

    fn single(func: Function) -> Module {
        let mut module = Module::new("m");
        module.functions.push(func);
        module
    }

    #[test]
    fn classification_follows_families() {
        assert!(is_allowed_intrinsic("llvm.ctpop.i32"));
        assert!(is_allowed_intrinsic("llvm.va_start"));
        assert!(!is_allowed_intrinsic("llvm.fmuladd.f64"));
        assert_eq!(classify("llvm.dbg.value"), Class::Rewrite(Rewrite::Delete));
        assert_eq!(
            classify("llvm.lifetime.start.p0"),
            Class::Rewrite(Rewrite::Delete)
        );
        assert_eq!(
            classify("llvm.memcpy.p0.p0.i64"),
            Class::Rewrite(Rewrite::MemCpy)
        );
        assert_eq!(
            classify("llvm.vector.reduce.add.v4i32"),
            Class::Rewrite(Rewrite::Reduce(BinOp::Add))
        );
        assert_eq!(classify("llvm.bogus.thing"), Class::Unknown);
        assert_eq!(classify("llvm.fmaximum.f32"), Class::Unknown);
        assert_eq!(
            classify("llvm.umax.i32"),
            Class::Rewrite(Rewrite::MinMax(IntPredicate::Ugt))
        );
        assert_eq!(
            classify("llvm.smin.v4i16"),
            Class::Rewrite(Rewrite::MinMax(IntPredicate::Slt))
        );
        assert_eq!(
            classify("llvm.uadd.sat.i32"),
            Class::Rewrite(Rewrite::Saturating { op: BinOp::Add, signed: false })
        );
        assert_eq!(
            classify("llvm.ssub.sat.i64"),
            Class::Rewrite(Rewrite::Saturating { op: BinOp::Sub, signed: true })
        );
        assert_eq!(
            classify("llvm.is.constant.i32"),
            Class::Rewrite(Rewrite::IsConstant)
        );
        assert_eq!(classify("llvm.vector.reduce.umax.v4i32"), Class::Unknown);
    }

    #[test]
    fn scalar_overloads_drop_the_vector_suffix() {
        assert_eq!(
            scalar_overload("llvm.ctpop.v4i32", &Type::I32).as_deref(),
            Some("llvm.ctpop.i32")
        );
        assert_eq!(
            scalar_overload("llvm.fabs.v2f64", &Type::F64).as_deref(),
            Some("llvm.fabs.f64")
        );
        assert_eq!(
            scalar_overload("llvm.fshl.v8i16", &Type::Int(16)).as_deref(),
            Some("llvm.fshl.i16")
        );
        assert_eq!(scalar_overload("llvm.va_start", &Type::Ptr), None);
        assert_eq!(scalar_overload("llvm.memcpy.p0.p0.i64", &Type::I8), None);
        assert_eq!(scalar_overload("llvm.fmaximum.v2f32", &Type::F32), None);
    }

    fn two_operand_call(name: &str, ty: &Type) -> Module {
        let mut b = FunctionBuilder::new("f", &[ty.clone(), ty.clone()], ty.clone());
        let args = vec![b.param(0), b.param(1)];
        let r = b.call(name, args, ty.clone()).unwrap();
        b.ret(Some(r));
        single(b.finish())
    }

    #[test]
    fn min_max_and_saturation_expand_to_selects() {
        let cases: [(&str, fn(u8, u8) -> u8); 8] = [
            ("llvm.umax.i8", |a, b| a.max(b)),
            ("llvm.umin.i8", |a, b| a.min(b)),
            ("llvm.smax.i8", |a, b| (a as i8).max(b as i8) as u8),
            ("llvm.smin.i8", |a, b| (a as i8).min(b as i8) as u8),
            ("llvm.uadd.sat.i8", u8::saturating_add),
            ("llvm.usub.sat.i8", u8::saturating_sub),
            ("llvm.sadd.sat.i8", |a, b| (a as i8).saturating_add(b as i8) as u8),
            ("llvm.ssub.sat.i8", |a, b| (a as i8).saturating_sub(b as i8) as u8),
        ];
        let samples = [0u8, 1, 2, 0x3f, 0x40, 0x7f, 0x80, 0x81, 0xc0, 0xfe, 0xff];
        for (name, expected) in cases {
            let mut module = two_operand_call(name, &Type::I8);
            assert_eq!(normalize_intrinsics(&mut module).unwrap(), 1, "{name}");
            let func = module.function("f").unwrap();
            assert!(func.instructions().all(|i| i.intrinsic_name().is_none()));
            assert!(matches!(
                func.blocks[0].insts.last().unwrap().kind,
                InstKind::Select { .. }
            ));

            for a in samples {
                for b in samples {
                    let got = Evaluator::new(&module)
                        .run("f", vec![Value::int(8, u64::from(a)), Value::int(8, u64::from(b))])
                        .unwrap()
                        .returned_u64();
                    assert_eq!(got, Some(u64::from(expected(a, b))), "{name}({a}, {b})");
                }
            }
        }
    }

    #[test]
    fn vector_min_expands_lane_by_lane() {
        let v4 = Type::vector(Type::I32, 4);
        let mut module = two_operand_call("llvm.umin.v4i32", &v4);
        normalize_intrinsics(&mut module).unwrap();

        let func = module.function("f").unwrap();
        let selects: Vec<&Instruction> = func
            .instructions()
            .filter(|i| matches!(i.kind, InstKind::Select { .. }))
            .collect();
        assert_eq!(selects.len(), 4);
        assert!(selects.iter().all(|i| i.ty == Type::I32));
        let last = func.blocks[0].insts.last().unwrap();
        assert!(matches!(last.kind, InstKind::InsertElement { .. }));
        assert_eq!(last.ty, v4);
    }

    #[test]
    fn is_constant_folds_to_false() {
        let mut b = FunctionBuilder::new("f", &[Type::I32], Type::I1);
        let x = b.param(0);
        let known = b.call("llvm.is.constant.i32", vec![x], Type::I1).unwrap();
        b.ret(Some(known));
        let mut module = single(b.finish());

        assert_eq!(normalize_intrinsics(&mut module).unwrap(), 1);
        let func = module.function("f").unwrap();
        assert_eq!(func.instruction_count(), 0);
        assert_eq!(func.blocks[0].term, Terminator::Ret(Some(Operand::int(1, 0))));
    }

    #[test]
    fn unknown_intrinsic_is_rejected() {
        let mut b = FunctionBuilder::new("f", &[], Type::Void);
        b.call("llvm.experimental.gc.statepoint", vec![], Type::Void);
        b.ret(None);
        let mut module = single(b.finish());
        let err = normalize_intrinsics(&mut module).unwrap_err();
        assert!(matches!(err, Error::UnsupportedIntrinsic(ref n) if n.contains("gc.statepoint")));
    }

    #[test]
    fn expect_and_debug_calls_disappear() {
        let mut b = FunctionBuilder::new("f", &[Type::I64], Type::I64);
        let x = b.param(0);
        b.call("llvm.dbg.value", vec![x.clone()], Type::Void);
        let e = b
            .call("llvm.expect.i64", vec![x.clone(), Operand::int(64, 1)], Type::I64)
            .unwrap();
        b.ret(Some(e));
        let mut module = single(b.finish());

        assert_eq!(normalize_intrinsics(&mut module).unwrap(), 2);
        let func = module.function("f").unwrap();
        assert_eq!(func.instruction_count(), 0);
        assert_eq!(func.blocks[0].term, Terminator::Ret(Some(x)));
    }

    #[test]
    fn objectsize_is_unknown() {
        let mut b = FunctionBuilder::new("f", &[Type::Ptr], Type::I64);
        let p = b.param(0);
        let max = b
            .call(
                "llvm.objectsize.i64.p0",
                vec![p.clone(), Operand::int(1, 0), Operand::int(1, 0), Operand::int(1, 0)],
                Type::I64,
            )
            .unwrap();
        let min = b
            .call(
                "llvm.objectsize.i64.p0",
                vec![p, Operand::int(1, 1), Operand::int(1, 0), Operand::int(1, 0)],
                Type::I64,
            )
            .unwrap();
        let sum = b.binary(BinOp::Add, max, min);
        b.ret(Some(sum));
        let mut module = single(b.finish());
        normalize_intrinsics(&mut module).unwrap();
        let func = module.function("f").unwrap();
        let InstKind::Binary { lhs, rhs, .. } = &func.blocks[0].insts[0].kind else {
            panic!("expected add");
        };
        assert_eq!(lhs.as_int(), Some((64, u64::MAX)));
        assert_eq!(rhs.as_int(), Some((64, 0)));
    }

    #[test]
    fn fmuladd_splits_into_mul_and_add() {
        let mut b = FunctionBuilder::new("f", &[Type::F64, Type::F64, Type::F64], Type::F64);
        let args = vec![b.param(0), b.param(1), b.param(2)];
        let r = b.call("llvm.fmuladd.f64", args, Type::F64).unwrap();
        b.ret(Some(r.clone()));
        let mut module = single(b.finish());
        normalize_intrinsics(&mut module).unwrap();

        let func = module.function("f").unwrap();
        let insts = &func.blocks[0].insts;
        assert_eq!(insts.len(), 2);
        assert!(matches!(insts[0].kind, InstKind::Binary { op: BinOp::FMul, .. }));
        assert!(matches!(insts[1].kind, InstKind::Binary { op: BinOp::FAdd, .. }));
        assert_eq!(insts[1].result, r.as_value());
    }

    #[test]
    fn vector_reduction_becomes_scalar_chain() {
        let v4 = Type::vector(Type::I32, 4);
        let mut b = FunctionBuilder::new("f", &[v4], Type::I32);
        let v = b.param(0);
        let r = b.call("llvm.vector.reduce.add.v4i32", vec![v], Type::I32).unwrap();
        b.ret(Some(r.clone()));
        let mut module = single(b.finish());
        normalize_intrinsics(&mut module).unwrap();

        let func = module.function("f").unwrap();
        let insts = &func.blocks[0].insts;
        let extracts = insts
            .iter()
            .filter(|i| matches!(i.kind, InstKind::ExtractElement { .. }))
            .count();
        let adds = insts
            .iter()
            .filter(|i| matches!(i.kind, InstKind::Binary { op: BinOp::Add, .. }))
            .count();
        assert_eq!((extracts, adds), (4, 3));
        assert_eq!(insts.last().unwrap().result, r.as_value());
    }

    #[test]
    fn memset_becomes_byte_loop() {
        let mut b = FunctionBuilder::new("f", &[Type::Ptr, Type::I64], Type::Void);
        let (p, n) = (b.param(0), b.param(1));
        b.call(
            "llvm.memset.p0.i64",
            vec![p, Operand::int(8, 0xAB), n, Operand::int(1, 0)],
            Type::Void,
        );
        b.ret(None);
        let mut module = single(b.finish());

        assert_eq!(normalize_intrinsics(&mut module).unwrap(), 1);
        let func = module.function("f").unwrap();
        // head, continuation, loop header, loop body
        assert_eq!(func.blocks.len(), 4);
        assert!(func.instructions().all(|i| i.intrinsic_name().is_none()));
        let stores = func
            .instructions()
            .filter(|i| matches!(i.kind, InstKind::Store { .. }))
            .count();
        assert_eq!(stores, 1);
        assert_eq!(func.blocks[1].term, Terminator::Ret(None));
    }

    #[test]
    fn memmove_chooses_direction_at_runtime() {
        let mut b = FunctionBuilder::new("f", &[Type::Ptr, Type::Ptr, Type::I32], Type::Void);
        let (d, s, n) = (b.param(0), b.param(1), b.param(2));
        b.call("llvm.memmove.p0.p0.i32", vec![d, s, n, Operand::int(1, 0)], Type::Void);
        b.ret(None);
        let mut module = single(b.finish());
        normalize_intrinsics(&mut module).unwrap();

        let func = module.function("f").unwrap();
        // head, continuation, two loops of two blocks each
        assert_eq!(func.blocks.len(), 6);
        assert!(matches!(
            func.blocks[0].term,
            Terminator::CondBr { .. }
        ));
        let loads = func
            .instructions()
            .filter(|i| matches!(i.kind, InstKind::Load { .. }))
            .count();
        assert_eq!(loads, 2);
    }

    #[test]
    fn trap_calls_abort_and_ends_the_block() {
        let mut b = FunctionBuilder::new("f", &[], Type::I32);
        b.call("llvm.trap", vec![], Type::Void);
        b.ret(Some(Operand::int(32, 0)));
        let mut module = single(b.finish());
        normalize_intrinsics(&mut module).unwrap();

        let func = module.function("f").unwrap();
        assert_eq!(func.blocks[0].insts[0].called_function(), Some("abort"));
        assert_eq!(func.blocks[0].term, Terminator::Unreachable);
        assert!(module.function("abort").is_some());
    }
}
