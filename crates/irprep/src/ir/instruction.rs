use serde::{Deserialize, Serialize};

use super::types::{Type, truncate_to};

/// SSA value number, unique within a function. Indexes `Function::value_types`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueId(pub u32);

/// Stable basic block identifier, independent of layout position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u32);

/// Compile-time constant. Integers are stored masked to their width;
/// floats are stored as raw IEEE bits so constants stay `Eq + Hash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constant {
    Int { bits: u32, value: u64 },
    F32(u32),
    F64(u64),
    Null,
    Undef(Type),
    Vector(Vec<Constant>),
    /// Address of a function, global variable or alias.
    Symbol(String),
}

impl Constant {
    #[must_use]
    pub fn int(bits: u32, value: u64) -> Self {
        Constant::Int {
            bits,
            value: truncate_to(value, bits),
        }
    }

    #[must_use]
    pub fn ty(&self) -> Type {
        match self {
            Constant::Int { bits, .. } => Type::Int(*bits),
            Constant::F32(_) => Type::F32,
            Constant::F64(_) => Type::F64,
            Constant::Null | Constant::Symbol(_) => Type::Ptr,
            Constant::Undef(ty) => ty.clone(),
            Constant::Vector(lanes) => {
                let elem = lanes.first().map_or(Type::Void, Constant::ty);
                Type::vector(elem, lanes.len() as u32)
            }
        }
    }

    /// Lane `index` of a vector constant. `undef` splits into `undef` lanes.
    #[must_use]
    pub fn lane(&self, index: u32) -> Option<Constant> {
        match self {
            Constant::Vector(lanes) => lanes.get(index as usize).cloned(),
            Constant::Undef(ty) if ty.is_vector() => Some(Constant::Undef(ty.element().clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Value(ValueId),
    Const(Constant),
}

impl Operand {
    #[must_use]
    pub fn int(bits: u32, value: u64) -> Self {
        Operand::Const(Constant::int(bits, value))
    }

    #[must_use]
    pub fn undef(ty: Type) -> Self {
        Operand::Const(Constant::Undef(ty))
    }

    #[must_use]
    pub fn symbol(name: impl Into<String>) -> Self {
        Operand::Const(Constant::Symbol(name.into()))
    }

    #[must_use]
    pub fn as_value(&self) -> Option<ValueId> {
        match self {
            Operand::Value(id) => Some(*id),
            Operand::Const(_) => None,
        }
    }

    /// `(bits, value)` for integer constants.
    #[must_use]
    pub fn as_int(&self) -> Option<(u32, u64)> {
        match self {
            Operand::Const(Constant::Int { bits, value }) => Some((*bits, *value)),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_undef(&self) -> bool {
        matches!(self, Operand::Const(Constant::Undef(_)))
    }
}

impl From<ValueId> for Operand {
    fn from(id: ValueId) -> Self {
        Operand::Value(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    FAdd,
    FSub,
    FMul,
    FDiv,
}

impl BinOp {
    #[must_use]
    pub fn is_division(self) -> bool {
        matches!(self, BinOp::UDiv | BinOp::SDiv | BinOp::URem | BinOp::SRem)
    }

    #[must_use]
    pub fn is_shift(self) -> bool {
        matches!(self, BinOp::Shl | BinOp::LShr | BinOp::AShr)
    }

    #[must_use]
    pub fn is_float(self) -> bool {
        matches!(self, BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntPredicate {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    Bitcast,
    PtrToInt,
    IntToPtr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RmwOp {
    Xchg,
    Add,
    Sub,
    And,
    Nand,
    Or,
    Xor,
    Max,
    Min,
    UMax,
    UMin,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Callee {
    Direct(String),
    Indirect(Operand),
    InlineAsm { asm: String, constraints: String },
}

impl Callee {
    #[must_use]
    pub fn direct_name(&self) -> Option<&str> {
        match self {
            Callee::Direct(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DebugLoc {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstKind {
    Binary {
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
    },
    ICmp {
        pred: IntPredicate,
        lhs: Operand,
        rhs: Operand,
    },
    Cast {
        op: CastOp,
        value: Operand,
    },
    Select {
        cond: Operand,
        then_value: Operand,
        else_value: Operand,
    },
    Load {
        ptr: Operand,
        #[serde(default)]
        atomic: bool,
    },
    Store {
        value: Operand,
        ptr: Operand,
        #[serde(default)]
        atomic: bool,
    },
    Alloca {
        allocated: Type,
    },
    PtrAdd {
        base: Operand,
        offset: Operand,
    },
    Call {
        callee: Callee,
        args: Vec<Operand>,
    },
    Phi {
        incoming: Vec<(Operand, BlockId)>,
    },
    ExtractElement {
        vector: Operand,
        index: Operand,
    },
    InsertElement {
        vector: Operand,
        value: Operand,
        index: Operand,
    },
    ShuffleVector {
        lhs: Operand,
        rhs: Operand,
        /// `None` lanes are `undef`.
        mask: Vec<Option<u32>>,
    },
    AtomicRmw {
        op: RmwOp,
        ptr: Operand,
        value: Operand,
    },
    CmpXchg {
        ptr: Operand,
        expected: Operand,
        replacement: Operand,
    },
    Fence,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    pub result: Option<ValueId>,
    pub ty: Type,
    pub kind: InstKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_loc: Option<DebugLoc>,
}

impl Instruction {
    #[must_use]
    pub fn new(result: Option<ValueId>, ty: Type, kind: InstKind) -> Self {
        Self {
            result,
            ty,
            kind,
            debug_loc: None,
        }
    }

    #[must_use]
    pub fn is_phi(&self) -> bool {
        matches!(self.kind, InstKind::Phi { .. })
    }

    /// Name of the directly called function, if this is a direct call.
    #[must_use]
    pub fn called_function(&self) -> Option<&str> {
        match &self.kind {
            InstKind::Call { callee, .. } => callee.direct_name(),
            _ => None,
        }
    }

    /// Name of the called intrinsic (`llvm.*`), if any.
    #[must_use]
    pub fn intrinsic_name(&self) -> Option<&str> {
        self.called_function().filter(|name| name.starts_with("llvm."))
    }

    /// Whether removing this instruction (when its result is unused) could
    /// change observable behavior.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        match &self.kind {
            InstKind::Store { .. }
            | InstKind::Call { .. }
            | InstKind::AtomicRmw { .. }
            | InstKind::CmpXchg { .. }
            | InstKind::Fence => true,
            InstKind::Load { atomic, .. } => *atomic,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_atomic(&self) -> bool {
        match &self.kind {
            InstKind::AtomicRmw { .. } | InstKind::CmpXchg { .. } | InstKind::Fence => true,
            InstKind::Load { atomic, .. } | InstKind::Store { atomic, .. } => *atomic,
            _ => false,
        }
    }

    /// Operands in evaluation order. PHI operands are listed without blocks.
    #[must_use]
    pub fn operands(&self) -> Vec<&Operand> {
        match &self.kind {
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::ICmp { lhs, rhs, .. }
            | InstKind::ShuffleVector { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::Cast { value, .. } => vec![value],
            InstKind::Select {
                cond,
                then_value,
                else_value,
            } => vec![cond, then_value, else_value],
            InstKind::Load { ptr, .. } => vec![ptr],
            InstKind::Store { value, ptr, .. } => vec![value, ptr],
            InstKind::Alloca { .. } | InstKind::Fence => vec![],
            InstKind::PtrAdd { base, offset } => vec![base, offset],
            InstKind::Call { callee, args } => {
                let mut ops = Vec::with_capacity(args.len() + 1);
                if let Callee::Indirect(target) = callee {
                    ops.push(target);
                }
                ops.extend(args.iter());
                ops
            }
            InstKind::Phi { incoming } => incoming.iter().map(|(value, _)| value).collect(),
            InstKind::ExtractElement { vector, index } => vec![vector, index],
            InstKind::InsertElement {
                vector,
                value,
                index,
            } => vec![vector, value, index],
            InstKind::AtomicRmw { ptr, value, .. } => vec![ptr, value],
            InstKind::CmpXchg {
                ptr,
                expected,
                replacement,
            } => vec![ptr, expected, replacement],
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match &mut self.kind {
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::ICmp { lhs, rhs, .. }
            | InstKind::ShuffleVector { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::Cast { value, .. } => vec![value],
            InstKind::Select {
                cond,
                then_value,
                else_value,
            } => vec![cond, then_value, else_value],
            InstKind::Load { ptr, .. } => vec![ptr],
            InstKind::Store { value, ptr, .. } => vec![value, ptr],
            InstKind::Alloca { .. } | InstKind::Fence => vec![],
            InstKind::PtrAdd { base, offset } => vec![base, offset],
            InstKind::Call { callee, args } => {
                let mut ops = Vec::with_capacity(args.len() + 1);
                if let Callee::Indirect(target) = callee {
                    ops.push(target);
                }
                ops.extend(args.iter_mut());
                ops
            }
            InstKind::Phi { incoming } => incoming.iter_mut().map(|(value, _)| value).collect(),
            InstKind::ExtractElement { vector, index } => vec![vector, index],
            InstKind::InsertElement {
                vector,
                value,
                index,
            } => vec![vector, value, index],
            InstKind::AtomicRmw { ptr, value, .. } => vec![ptr, value],
            InstKind::CmpXchg {
                ptr,
                expected,
                replacement,
            } => vec![ptr, expected, replacement],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminator {
    Br(BlockId),
    CondBr {
        cond: Operand,
        then_dest: BlockId,
        else_dest: BlockId,
    },
    Switch {
        value: Operand,
        default: BlockId,
        /// Case values are stored masked to the width of `value`.
        cases: Vec<(u64, BlockId)>,
    },
    Ret(Option<Operand>),
    Unreachable,
}

impl Terminator {
    /// Successor edges in order, duplicates included.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Br(dest) => vec![*dest],
            Terminator::CondBr {
                then_dest,
                else_dest,
                ..
            } => vec![*then_dest, *else_dest],
            Terminator::Switch { default, cases, .. } => {
                let mut succs = Vec::with_capacity(cases.len() + 1);
                succs.push(*default);
                succs.extend(cases.iter().map(|(_, dest)| *dest));
                succs
            }
            Terminator::Ret(_) | Terminator::Unreachable => vec![],
        }
    }

    /// Successor blocks with duplicates removed, first occurrence order.
    #[must_use]
    pub fn unique_successors(&self) -> Vec<BlockId> {
        let mut seen = Vec::new();
        for succ in self.successors() {
            if !seen.contains(&succ) {
                seen.push(succ);
            }
        }
        seen
    }

    #[must_use]
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Terminator::CondBr { cond, .. } => vec![cond],
            Terminator::Switch { value, .. } => vec![value],
            Terminator::Ret(Some(value)) => vec![value],
            Terminator::Br(_) | Terminator::Ret(None) | Terminator::Unreachable => vec![],
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Terminator::CondBr { cond, .. } => vec![cond],
            Terminator::Switch { value, .. } => vec![value],
            Terminator::Ret(Some(value)) => vec![value],
            Terminator::Br(_) | Terminator::Ret(None) | Terminator::Unreachable => vec![],
        }
    }

    /// Redirect every edge to `from` so it targets `to`.
    pub fn retarget(&mut self, from: BlockId, to: BlockId) {
        self.map_successors(|dest| if dest == from { to } else { dest });
    }

    /// Replace every successor edge `d` with `f(d)`.
    pub fn map_successors(&mut self, mut f: impl FnMut(BlockId) -> BlockId) {
        match self {
            Terminator::Br(dest) => *dest = f(*dest),
            Terminator::CondBr {
                then_dest,
                else_dest,
                ..
            } => {
                *then_dest = f(*then_dest);
                *else_dest = f(*else_dest);
            }
            Terminator::Switch { default, cases, .. } => {
                *default = f(*default);
                for (_, dest) in cases {
                    *dest = f(*dest);
                }
            }
            Terminator::Ret(_) | Terminator::Unreachable => {}
        }
    }
}
