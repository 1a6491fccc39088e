use std::fmt;

use super::instruction::{
    BinOp, BlockId, Callee, CastOp, Constant, InstKind, Instruction, IntPredicate, Operand, RmwOp,
    Terminator, ValueId,
};
use super::module::{Function, Linkage, Module};
use super::types::Type;

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(bits) => write!(f, "i{bits}"),
            Type::F32 => write!(f, "float"),
            Type::F64 => write!(f, "double"),
            Type::Ptr => write!(f, "ptr"),
            Type::Vector { elem, lanes } => write!(f, "<{lanes} x {elem}>"),
        }
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int { value, .. } => write!(f, "{value}"),
            Constant::F32(bits) => write!(f, "{}", f32::from_bits(*bits)),
            Constant::F64(bits) => write!(f, "{}", f64::from_bits(*bits)),
            Constant::Null => write!(f, "null"),
            Constant::Undef(_) => write!(f, "undef"),
            Constant::Vector(lanes) => {
                write!(f, "<")?;
                for (i, lane) in lanes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {lane}", lane.ty())?;
                }
                write!(f, ">")
            }
            Constant::Symbol(name) => write!(f, "@{name}"),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Value(id) => write!(f, "{id}"),
            Operand::Const(c) => write!(f, "{c}"),
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::UDiv => "udiv",
            BinOp::SDiv => "sdiv",
            BinOp::URem => "urem",
            BinOp::SRem => "srem",
            BinOp::Shl => "shl",
            BinOp::LShr => "lshr",
            BinOp::AShr => "ashr",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::FAdd => "fadd",
            BinOp::FSub => "fsub",
            BinOp::FMul => "fmul",
            BinOp::FDiv => "fdiv",
        };
        f.write_str(name)
    }
}

impl fmt::Display for IntPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntPredicate::Eq => "eq",
            IntPredicate::Ne => "ne",
            IntPredicate::Ult => "ult",
            IntPredicate::Ule => "ule",
            IntPredicate::Ugt => "ugt",
            IntPredicate::Uge => "uge",
            IntPredicate::Slt => "slt",
            IntPredicate::Sle => "sle",
            IntPredicate::Sgt => "sgt",
            IntPredicate::Sge => "sge",
        };
        f.write_str(name)
    }
}

impl fmt::Display for CastOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CastOp::Trunc => "trunc",
            CastOp::ZExt => "zext",
            CastOp::SExt => "sext",
            CastOp::Bitcast => "bitcast",
            CastOp::PtrToInt => "ptrtoint",
            CastOp::IntToPtr => "inttoptr",
        };
        f.write_str(name)
    }
}

impl fmt::Display for RmwOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RmwOp::Xchg => "xchg",
            RmwOp::Add => "add",
            RmwOp::Sub => "sub",
            RmwOp::And => "and",
            RmwOp::Nand => "nand",
            RmwOp::Or => "or",
            RmwOp::Xor => "xor",
            RmwOp::Max => "max",
            RmwOp::Min => "min",
            RmwOp::UMax => "umax",
            RmwOp::UMin => "umin",
        };
        f.write_str(name)
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Operand]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(result) = self.result {
            write!(f, "{result} = ")?;
        }
        let ty = &self.ty;
        match &self.kind {
            InstKind::Binary { op, lhs, rhs } => write!(f, "{op} {ty} {lhs}, {rhs}")?,
            InstKind::ICmp { pred, lhs, rhs } => write!(f, "icmp {pred} {lhs}, {rhs}")?,
            InstKind::Cast { op, value } => write!(f, "{op} {value} to {ty}")?,
            InstKind::Select {
                cond,
                then_value,
                else_value,
            } => write!(f, "select {cond}, {ty} {then_value}, {else_value}")?,
            InstKind::Load { ptr, atomic } => {
                let atomic = if *atomic { "atomic " } else { "" };
                write!(f, "load {atomic}{ty}, ptr {ptr}")?;
            }
            InstKind::Store { value, ptr, atomic } => {
                let atomic = if *atomic { "atomic " } else { "" };
                write!(f, "store {atomic}{value}, ptr {ptr}")?;
            }
            InstKind::Alloca { allocated } => write!(f, "alloca {allocated}")?,
            InstKind::PtrAdd { base, offset } => write!(f, "ptradd {base}, {offset}")?,
            InstKind::Call { callee, args } => {
                match callee {
                    Callee::Direct(name) => write!(f, "call {ty} @{name}(")?,
                    Callee::Indirect(target) => write!(f, "call {ty} {target}(")?,
                    Callee::InlineAsm { asm, constraints } => {
                        write!(f, "call {ty} asm \"{asm}\", \"{constraints}\"(")?;
                    }
                }
                write_args(f, args)?;
                write!(f, ")")?;
            }
            InstKind::Phi { incoming } => {
                write!(f, "phi {ty} ")?;
                for (i, (value, block)) in incoming.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "[ {value}, {block} ]")?;
                }
            }
            InstKind::ExtractElement { vector, index } => {
                write!(f, "extractelement {vector}, {index}")?;
            }
            InstKind::InsertElement {
                vector,
                value,
                index,
            } => write!(f, "insertelement {ty} {vector}, {value}, {index}")?,
            InstKind::ShuffleVector { lhs, rhs, mask } => {
                write!(f, "shufflevector {lhs}, {rhs}, <")?;
                for (i, lane) in mask.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match lane {
                        Some(lane) => write!(f, "{lane}")?,
                        None => write!(f, "undef")?,
                    }
                }
                write!(f, ">")?;
            }
            InstKind::AtomicRmw { op, ptr, value } => {
                write!(f, "atomicrmw {op} ptr {ptr}, {ty} {value}")?;
            }
            InstKind::CmpXchg {
                ptr,
                expected,
                replacement,
            } => write!(f, "cmpxchg ptr {ptr}, {ty} {expected}, {replacement}")?,
            InstKind::Fence => write!(f, "fence")?,
        }
        if let Some(loc) = self.debug_loc {
            write!(f, " !dbg {}:{}", loc.line, loc.column)?;
        }
        Ok(())
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Br(dest) => write!(f, "br {dest}"),
            Terminator::CondBr {
                cond,
                then_dest,
                else_dest,
            } => write!(f, "br {cond}, {then_dest}, {else_dest}"),
            Terminator::Switch {
                value,
                default,
                cases,
            } => {
                write!(f, "switch {value}, {default} [")?;
                for (value, dest) in cases {
                    write!(f, " {value}: {dest}")?;
                }
                write!(f, " ]")
            }
            Terminator::Ret(Some(value)) => write!(f, "ret {value}"),
            Terminator::Ret(None) => write!(f, "ret void"),
            Terminator::Unreachable => write!(f, "unreachable"),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = if self.is_declaration() {
            "declare"
        } else {
            "define"
        };
        write!(f, "{keyword} ")?;
        if self.linkage == Linkage::Internal {
            write!(f, "internal ")?;
        }
        write!(f, "{} @{}(", self.ret, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {param}", self.value_type(*param))?;
        }
        write!(f, ")")?;
        if self.preserved {
            write!(f, " preserved")?;
        }
        if self.is_declaration() {
            return writeln!(f);
        }
        writeln!(f, " {{")?;
        for block in &self.blocks {
            writeln!(f, "{}:", block.id)?;
            for inst in &block.insts {
                writeln!(f, "  {inst}")?;
            }
            writeln!(f, "  {}", block.term)?;
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; module {}", self.name)?;
        for global in &self.globals {
            let linkage = if global.linkage == Linkage::Internal {
                "internal "
            } else {
                ""
            };
            let kind = if global.constant { "constant" } else { "global" };
            write!(f, "@{} = {linkage}{kind} {{", global.name)?;
            for (i, field) in global.init.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, " {} {field}", field.ty())?;
            }
            writeln!(f, " }}")?;
        }
        for alias in &self.aliases {
            writeln!(f, "@{} = alias @{}", alias.name, alias.target)?;
        }
        for (list, entries) in [("ctors", &self.ctors), ("dtors", &self.dtors)] {
            for entry in entries {
                writeln!(f, "; {list} {} @{}", entry.priority, entry.function)?;
            }
        }
        for func in &self.functions {
            writeln!(f)?;
            write!(f, "{func}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{BinOp, FunctionBuilder, Type};

    #[test]
    fn prints_function_body() {
        let mut b = FunctionBuilder::new("f", &[Type::I32, Type::I32], Type::I32);
        let (x, y) = (b.param(0), b.param(1));
        let q = b.binary(BinOp::SDiv, x, y);
        b.ret(Some(q));
        let text = b.finish().to_string();
        assert_eq!(
            text,
            "define i32 @f(i32 %0, i32 %1) {\nbb0:\n  %2 = sdiv i32 %0, %1\n  ret %2\n}\n"
        );
    }
}
