mod builder;
mod cfg;
mod display;
pub mod eval;
mod instruction;
mod module;
mod types;

pub use builder::FunctionBuilder;
pub use cfg::Dominators;
pub use instruction::{
    BinOp, BlockId, Callee, CastOp, Constant, DebugLoc, InstKind, Instruction, IntPredicate,
    Operand, RmwOp, Terminator, ValueId,
};
pub use module::{Alias, Block, Function, GlobalVariable, Linkage, Module, StaticInit};
pub use types::{Type, sign_extend, truncate_to};
