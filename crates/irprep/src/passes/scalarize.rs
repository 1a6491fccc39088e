// Vector decomposition: every vector operation other than the two lane
// accessors becomes one scalar operation per lane.
//
// Each decomposed result is rebuilt with an `insertelement` chain whose last
// link keeps the original value id, so users never need rewriting. The
// scalar lanes of decomposed values are remembered and reused by later users
// instead of extracting them again.

use std::collections::HashMap;

use super::intrinsics::scalar_overload;
use crate::ir::{
    BinOp, BlockId, Callee, CastOp, Function, InstKind, Instruction, Module, Operand, Type,
    ValueId,
};

/// Decompose vector instructions in every function. Idempotent.
///
/// Element-wise intrinsics (`llvm.ctpop.v4i32`, `llvm.fabs.v2f64`, ...) are
/// split into one call per lane of their scalar overload. Other calls are
/// left untouched: vector arguments and results cross the call boundary as
/// whole values. Returns the number of decomposed instructions.
pub fn scalarize(module: &mut Module) -> usize {
    let count: usize = module.definitions_mut().map(scalarize_function).sum();
    if count > 0 {
        tracing::debug!("decomposed {count} vector instruction(s)");
    }
    count
}

struct Scalarizer<'f> {
    func: &'f mut Function,
    /// Scalar lanes of values this pass has already decomposed.
    scattered: HashMap<ValueId, Vec<Operand>>,
}

fn scalarize_function(func: &mut Function) -> usize {
    let mut s = Scalarizer {
        func,
        scattered: HashMap::new(),
    };
    let mut count = 0;
    for block_idx in 0..s.func.blocks.len() {
        count += s.scalarize_block_body(block_idx);
    }
    count + s.scalarize_phis()
}

fn needs_decomposition(func: &Function, inst: &Instruction) -> bool {
    match inst.kind {
        InstKind::ExtractElement { .. }
        | InstKind::InsertElement { .. }
        | InstKind::Phi { .. }
        | InstKind::AtomicRmw { .. }
        | InstKind::CmpXchg { .. } => false,
        InstKind::Call { .. }
            if inst
                .intrinsic_name()
                .and_then(|name| scalar_overload(name, inst.ty.element()))
                .is_none() =>
        {
            false
        }
        _ => {
            inst.ty.is_vector()
                || inst
                    .operands()
                    .into_iter()
                    .any(|op| func.operand_type(op).is_vector())
        }
    }
}

/// Width in bits of a lane type, as seen by a `bitcast`.
fn bit_width(ty: &Type) -> Option<u32> {
    match ty {
        Type::Int(bits) => Some(*bits),
        Type::F32 => Some(32),
        Type::F64 | Type::Ptr => Some(64),
        _ => None,
    }
}

impl Scalarizer<'_> {
    /// Lane `lane` of a vector operand. Constants split for free; values are
    /// taken from `scattered` or extracted into `out`.
    fn lane(&mut self, out: &mut Vec<Instruction>, operand: &Operand, lane: u32) -> Operand {
        match operand {
            Operand::Const(constant) => match constant.lane(lane) {
                Some(scalar) => Operand::Const(scalar),
                None => {
                    let ty = constant.ty();
                    if ty.is_vector() {
                        Operand::undef(ty.element().clone())
                    } else {
                        operand.clone()
                    }
                }
            },
            Operand::Value(id) => {
                if let Some(scalar) = self
                    .scattered
                    .get(id)
                    .and_then(|lanes| lanes.get(lane as usize))
                {
                    return scalar.clone();
                }
                let (extract, scalar) = self.extract(operand.clone(), lane);
                out.push(extract);
                scalar
            }
        }
    }

    fn extract(&mut self, vector: Operand, lane: u32) -> (Instruction, Operand) {
        let elem = self.func.operand_type(&vector).element().clone();
        self.func.make_inst(
            elem,
            InstKind::ExtractElement {
                vector,
                index: Operand::int(32, u64::from(lane)),
            },
        )
    }

    /// Lane of an operand that may be a scalar shared by all lanes
    /// (the condition of a `select`).
    fn lane_or_scalar(&mut self, out: &mut Vec<Instruction>, operand: &Operand, lane: u32) -> Operand {
        if self.func.operand_type(operand).is_vector() {
            self.lane(out, operand, lane)
        } else {
            operand.clone()
        }
    }

    fn emit(&mut self, out: &mut Vec<Instruction>, ty: Type, kind: InstKind) -> Operand {
        let (inst, result) = self.func.make_inst(ty, kind);
        out.push(inst);
        result
    }

    /// Rebuild a vector value from its lanes; the final link defines `result`.
    fn rebuild(&mut self, out: &mut Vec<Instruction>, result: ValueId, ty: &Type, lanes: Vec<Operand>) {
        let mut acc = Operand::undef(ty.clone());
        let last = lanes.len().saturating_sub(1);
        for (i, lane) in lanes.iter().enumerate() {
            let kind = InstKind::InsertElement {
                vector: acc.clone(),
                value: lane.clone(),
                index: Operand::int(32, i as u64),
            };
            if i == last {
                out.push(Instruction::new(Some(result), ty.clone(), kind));
            } else {
                acc = self.emit(out, ty.clone(), kind);
            }
        }
        self.scattered.insert(result, lanes);
    }

    /// Give a scalar computed as `value` the id `result`: the instruction
    /// that just produced it is renamed, otherwise a same-type `bitcast`
    /// defines it.
    fn define_scalar(out: &mut Vec<Instruction>, result: ValueId, ty: &Type, value: Operand) {
        match out.last_mut() {
            Some(last) if last.result.is_some() && last.result == value.as_value() => {
                last.result = Some(result);
            }
            _ => out.push(Instruction::new(
                Some(result),
                ty.clone(),
                InstKind::Cast {
                    op: CastOp::Bitcast,
                    value,
                },
            )),
        }
    }

    fn scalarize_block_body(&mut self, block_idx: usize) -> usize {
        let insts = std::mem::take(&mut self.func.blocks[block_idx].insts);
        let mut out = Vec::with_capacity(insts.len());
        let mut count = 0;
        for inst in insts {
            if !needs_decomposition(self.func, &inst) {
                out.push(inst);
                continue;
            }
            match self.decompose(&mut out, &inst) {
                Some(mut lanes) => {
                    if let Some(result) = inst.result {
                        if inst.ty.is_vector() {
                            self.rebuild(&mut out, result, &inst.ty, lanes);
                        } else if let Some(value) = lanes.pop() {
                            Self::define_scalar(&mut out, result, &inst.ty, value);
                        }
                    }
                    count += 1;
                }
                None => out.push(inst),
            }
        }
        self.func.blocks[block_idx].insts = out;
        count
    }

    /// Emit the per-lane instructions for `inst`. Returns the result lanes
    /// (empty for stores, a single value for a scalar result), or `None`
    /// when the shape cannot be decomposed.
    #[allow(clippy::too_many_lines)]
    fn decompose(&mut self, out: &mut Vec<Instruction>, inst: &Instruction) -> Option<Vec<Operand>> {
        let operand_lanes = inst
            .operands()
            .into_iter()
            .find_map(|op| self.func.operand_type(op).lanes());
        let lanes = inst.ty.lanes().or(operand_lanes)?;
        let elem = inst.ty.element().clone();
        let mut result = Vec::with_capacity(lanes as usize);

        match &inst.kind {
            InstKind::Binary { op, lhs, rhs } => {
                for l in 0..lanes {
                    let a = self.lane(out, lhs, l);
                    let b = self.lane(out, rhs, l);
                    let kind = InstKind::Binary {
                        op: *op,
                        lhs: a,
                        rhs: b,
                    };
                    result.push(self.emit(out, elem.clone(), kind));
                }
            }
            InstKind::ICmp { pred, lhs, rhs } => {
                for l in 0..lanes {
                    let a = self.lane(out, lhs, l);
                    let b = self.lane(out, rhs, l);
                    let kind = InstKind::ICmp {
                        pred: *pred,
                        lhs: a,
                        rhs: b,
                    };
                    result.push(self.emit(out, Type::I1, kind));
                }
            }
            InstKind::Cast { op, value } => {
                let from = self.func.operand_type(value);
                if from.lanes() != inst.ty.lanes() {
                    if *op != CastOp::Bitcast {
                        return None;
                    }
                    return self.reshape_bits(out, value, &from, &inst.ty);
                }
                for l in 0..lanes {
                    let v = self.lane(out, value, l);
                    let kind = InstKind::Cast { op: *op, value: v };
                    result.push(self.emit(out, elem.clone(), kind));
                }
            }
            InstKind::Select {
                cond,
                then_value,
                else_value,
            } => {
                for l in 0..lanes {
                    let c = self.lane_or_scalar(out, cond, l);
                    let t = self.lane(out, then_value, l);
                    let e = self.lane(out, else_value, l);
                    let kind = InstKind::Select {
                        cond: c,
                        then_value: t,
                        else_value: e,
                    };
                    result.push(self.emit(out, elem.clone(), kind));
                }
            }
            InstKind::PtrAdd { base, offset } => {
                for l in 0..lanes {
                    let b = self.lane_or_scalar(out, base, l);
                    let o = self.lane_or_scalar(out, offset, l);
                    let kind = InstKind::PtrAdd { base: b, offset: o };
                    result.push(self.emit(out, Type::Ptr, kind));
                }
            }
            InstKind::Load { ptr, atomic } => {
                if !inst.ty.is_vector() || self.func.operand_type(ptr).is_vector() {
                    return None;
                }
                if inst.ty.is_packed_vector() {
                    let whole = Type::Int(bit_width(&elem)? * lanes);
                    let kind = InstKind::Load {
                        ptr: ptr.clone(),
                        atomic: *atomic,
                    };
                    let loaded = self.emit(out, whole.clone(), kind);
                    return self.reshape_bits(out, &loaded, &whole, &inst.ty);
                }
                let stride = elem.store_size();
                for l in 0..lanes {
                    let addr = self.lane_address(out, ptr, stride, l);
                    let kind = InstKind::Load {
                        ptr: addr,
                        atomic: *atomic,
                    };
                    result.push(self.emit(out, elem.clone(), kind));
                }
            }
            InstKind::Store { value, ptr, atomic } => {
                let value_ty = self.func.operand_type(value);
                if !value_ty.is_vector() || self.func.operand_type(ptr).is_vector() {
                    return None;
                }
                if value_ty.is_packed_vector() {
                    let whole = Type::Int(bit_width(value_ty.element())? * lanes);
                    let packed = self.reshape_bits(out, value, &value_ty, &whole)?.pop()?;
                    let kind = InstKind::Store {
                        value: packed,
                        ptr: ptr.clone(),
                        atomic: *atomic,
                    };
                    self.emit(out, Type::Void, kind);
                    return Some(result);
                }
                let stride = value_ty.element().store_size();
                for l in 0..lanes {
                    let v = self.lane(out, value, l);
                    let addr = self.lane_address(out, ptr, stride, l);
                    let kind = InstKind::Store {
                        value: v,
                        ptr: addr,
                        atomic: *atomic,
                    };
                    self.emit(out, Type::Void, kind);
                }
            }
            InstKind::ShuffleVector { lhs, rhs, mask } => {
                let lhs_lanes = self.func.operand_type(lhs).lanes().unwrap_or(0);
                let rhs_lanes = self.func.operand_type(rhs).lanes().unwrap_or(0);
                for lane in mask {
                    let scalar = match *lane {
                        Some(i) if i < lhs_lanes => self.lane(out, lhs, i),
                        Some(i) if i - lhs_lanes < rhs_lanes => {
                            self.lane(out, rhs, i - lhs_lanes)
                        }
                        // Out-of-range mask entries select nothing.
                        _ => Operand::undef(elem.clone()),
                    };
                    result.push(scalar);
                }
            }
            InstKind::Call { callee, args } => {
                let name = callee
                    .direct_name()
                    .and_then(|name| scalar_overload(name, &elem))?;
                for l in 0..lanes {
                    let mut lane_args = Vec::with_capacity(args.len());
                    for arg in args {
                        lane_args.push(self.lane_or_scalar(out, arg, l));
                    }
                    let kind = InstKind::Call {
                        callee: Callee::Direct(name.clone()),
                        args: lane_args,
                    };
                    result.push(self.emit(out, elem.clone(), kind));
                }
            }
            _ => return None,
        }
        Some(result)
    }

    fn lane_address(&mut self, out: &mut Vec<Instruction>, ptr: &Operand, stride: u64, lane: u32) -> Operand {
        if lane == 0 {
            return ptr.clone();
        }
        let kind = InstKind::PtrAdd {
            base: ptr.clone(),
            offset: Operand::int(64, stride * u64::from(lane)),
        };
        self.emit(out, Type::Ptr, kind)
    }

    /// Reinterpret the bits of `value` (of type `from`) as `to` when the two
    /// differ in lane count. Lane 0 holds the lowest bits. Each target lane
    /// is assembled from the source lanes overlapping it with
    /// `zext`/`trunc`, constant shifts and `or`. Returns the target lanes,
    /// or the single value for a scalar `to`.
    fn reshape_bits(
        &mut self,
        out: &mut Vec<Instruction>,
        value: &Operand,
        from: &Type,
        to: &Type,
    ) -> Option<Vec<Operand>> {
        let (src_elem, dst_elem) = (from.element().clone(), to.element().clone());
        let (src_width, dst_width) = (bit_width(&src_elem)?, bit_width(&dst_elem)?);
        let (src_lanes, dst_lanes) = (from.lanes().unwrap_or(1), to.lanes().unwrap_or(1));
        let (w, v) = (u64::from(src_width), u64::from(dst_width));
        if w * u64::from(src_lanes) != v * u64::from(dst_lanes) {
            return None;
        }

        let mut pieces = Vec::with_capacity(src_lanes as usize);
        for i in 0..src_lanes {
            let lane = if from.is_vector() {
                self.lane(out, value, i)
            } else {
                value.clone()
            };
            pieces.push(self.bits_of(out, lane, &src_elem));
        }

        let mut result = Vec::with_capacity(dst_lanes as usize);
        for j in 0..u64::from(dst_lanes) {
            let (lo, hi) = (j * v, (j + 1) * v);
            let mut acc: Option<Operand> = None;
            for (start, piece) in (0..).map(|i: u64| i * w).zip(&pieces) {
                if start + w <= lo || start >= hi {
                    continue;
                }
                let part = if start >= lo {
                    let widened = self.resize(out, piece.clone(), src_width, dst_width);
                    self.shift(out, BinOp::Shl, widened, dst_width, start - lo)
                } else {
                    let amount = lo - start;
                    let shifted = self.shift(out, BinOp::LShr, piece.clone(), src_width, amount);
                    self.resize(out, shifted, src_width, dst_width)
                };
                acc = Some(match acc {
                    None => part,
                    Some(prev) => {
                        let kind = InstKind::Binary {
                            op: BinOp::Or,
                            lhs: prev,
                            rhs: part,
                        };
                        self.emit(out, Type::Int(dst_width), kind)
                    }
                });
            }
            let bits = acc?;
            result.push(self.bits_as(out, bits, &dst_elem));
        }
        Some(result)
    }

    /// `value` of lane type `ty` as an integer of the same width.
    fn bits_of(&mut self, out: &mut Vec<Instruction>, value: Operand, ty: &Type) -> Operand {
        match ty {
            Type::F32 => self.emit(out, Type::I32, InstKind::Cast {
                op: CastOp::Bitcast,
                value,
            }),
            Type::F64 => self.emit(out, Type::I64, InstKind::Cast {
                op: CastOp::Bitcast,
                value,
            }),
            Type::Ptr => self.emit(out, Type::I64, InstKind::Cast {
                op: CastOp::PtrToInt,
                value,
            }),
            _ => value,
        }
    }

    fn bits_as(&mut self, out: &mut Vec<Instruction>, value: Operand, ty: &Type) -> Operand {
        let op = match ty {
            Type::F32 | Type::F64 => CastOp::Bitcast,
            Type::Ptr => CastOp::IntToPtr,
            _ => return value,
        };
        self.emit(out, ty.clone(), InstKind::Cast { op, value })
    }

    fn resize(
        &mut self,
        out: &mut Vec<Instruction>,
        value: Operand,
        from: u32,
        to: u32,
    ) -> Operand {
        let op = match from.cmp(&to) {
            std::cmp::Ordering::Equal => return value,
            std::cmp::Ordering::Less => CastOp::ZExt,
            std::cmp::Ordering::Greater => CastOp::Trunc,
        };
        self.emit(out, Type::Int(to), InstKind::Cast { op, value })
    }

    fn shift(
        &mut self,
        out: &mut Vec<Instruction>,
        op: BinOp,
        value: Operand,
        width: u32,
        amount: u64,
    ) -> Operand {
        if amount == 0 {
            return value;
        }
        let kind = InstKind::Binary {
            op,
            lhs: value,
            rhs: Operand::int(width, amount),
        };
        self.emit(out, Type::Int(width), kind)
    }

    /// Split vector PHIs into per-lane PHIs. Lanes of incoming values are
    /// extracted at the end of the corresponding predecessor.
    fn scalarize_phis(&mut self) -> usize {
        let mut count = 0;
        let mut pending: Vec<(BlockId, Instruction)> = Vec::new();

        for block_idx in 0..self.func.blocks.len() {
            let group_len = self.func.blocks[block_idx].first_non_phi();
            let has_vector_phi = self.func.blocks[block_idx].insts[..group_len]
                .iter()
                .any(|phi| phi.ty.is_vector());
            if !has_vector_phi {
                continue;
            }
            let rest = self.func.blocks[block_idx].insts.split_off(group_len);
            let group = std::mem::take(&mut self.func.blocks[block_idx].insts);

            let mut phis = Vec::with_capacity(group.len());
            let mut rebuilt = Vec::new();
            for phi in group {
                let (InstKind::Phi { incoming }, Some(result), Some(lanes)) =
                    (&phi.kind, phi.result, phi.ty.lanes())
                else {
                    phis.push(phi);
                    continue;
                };
                let elem = phi.ty.element().clone();
                let mut lane_values = Vec::with_capacity(lanes as usize);
                for l in 0..lanes {
                    let mut lane_incoming = Vec::with_capacity(incoming.len());
                    for (value, pred) in incoming {
                        let mut extracts = Vec::new();
                        let scalar = self.lane(&mut extracts, value, l);
                        pending.extend(extracts.into_iter().map(|e| (*pred, e)));
                        lane_incoming.push((scalar, *pred));
                    }
                    let (lane_phi, lane_value) = self.func.make_inst(
                        elem.clone(),
                        InstKind::Phi {
                            incoming: lane_incoming,
                        },
                    );
                    phis.push(lane_phi);
                    lane_values.push(lane_value);
                }
                self.rebuild(&mut rebuilt, result, &phi.ty, lane_values);
                count += 1;
            }

            let block = &mut self.func.blocks[block_idx];
            block.insts = phis;
            block.insts.extend(rebuilt);
            block.insts.extend(rest);
        }

        for (pred, extract) in pending {
            if let Some(block) = self.func.block_mut(pred) {
                block.insts.push(extract);
            }
        }
        count
    }
}
