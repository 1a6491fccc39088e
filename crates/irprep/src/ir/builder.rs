use super::instruction::{
    BinOp, BlockId, Callee, CastOp, InstKind, IntPredicate, Operand, RmwOp, Terminator,
};
use super::module::{Block, Function, Linkage};
use super::types::Type;

/// Incremental construction of a `Function`.
///
/// Instructions are appended to the current block; result types follow the
/// operands (e.g. `binary` takes the type of its left operand).
pub struct FunctionBuilder {
    func: Function,
    current: usize,
}

impl FunctionBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>, params: &[Type], ret: Type) -> Self {
        let mut func = Function::declaration(name, params, ret);
        func.blocks.push(Block::new(BlockId(0)));
        Self { func, current: 0 }
    }

    #[must_use]
    pub fn linkage(mut self, linkage: Linkage) -> Self {
        self.func.linkage = linkage;
        self
    }

    #[must_use]
    pub fn param(&self, index: usize) -> Operand {
        Operand::Value(self.func.params[index])
    }

    #[must_use]
    pub fn current_block(&self) -> BlockId {
        self.func.blocks[self.current].id
    }

    pub fn new_block(&mut self) -> BlockId {
        self.func.add_block()
    }

    /// Continue emitting into `block`.
    ///
    /// # Panics
    /// If `block` was not created by this builder.
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = self
            .func
            .block_index(block)
            .expect("switch_to: unknown block");
    }

    fn push(&mut self, ty: Type, kind: InstKind) -> Operand {
        let (inst, result) = self.func.make_inst(ty, kind);
        self.func.blocks[self.current].insts.push(inst);
        result
    }

    fn terminate(&mut self, term: Terminator) {
        self.func.blocks[self.current].term = term;
    }

    pub fn binary(&mut self, op: BinOp, lhs: Operand, rhs: Operand) -> Operand {
        let ty = self.func.operand_type(&lhs);
        self.push(ty, InstKind::Binary { op, lhs, rhs })
    }

    pub fn icmp(&mut self, pred: IntPredicate, lhs: Operand, rhs: Operand) -> Operand {
        let ty = self.func.operand_type(&lhs).with_element(Type::I1);
        self.push(ty, InstKind::ICmp { pred, lhs, rhs })
    }

    pub fn cast(&mut self, op: CastOp, value: Operand, ty: Type) -> Operand {
        self.push(ty, InstKind::Cast { op, value })
    }

    pub fn select(&mut self, cond: Operand, then_value: Operand, else_value: Operand) -> Operand {
        let ty = self.func.operand_type(&then_value);
        self.push(
            ty,
            InstKind::Select {
                cond,
                then_value,
                else_value,
            },
        )
    }

    pub fn load(&mut self, ty: Type, ptr: Operand) -> Operand {
        self.push(ty, InstKind::Load { ptr, atomic: false })
    }

    pub fn atomic_load(&mut self, ty: Type, ptr: Operand) -> Operand {
        self.push(ty, InstKind::Load { ptr, atomic: true })
    }

    pub fn store(&mut self, value: Operand, ptr: Operand) {
        self.push(
            Type::Void,
            InstKind::Store {
                value,
                ptr,
                atomic: false,
            },
        );
    }

    pub fn atomic_store(&mut self, value: Operand, ptr: Operand) {
        self.push(
            Type::Void,
            InstKind::Store {
                value,
                ptr,
                atomic: true,
            },
        );
    }

    pub fn alloca(&mut self, allocated: Type) -> Operand {
        self.push(Type::Ptr, InstKind::Alloca { allocated })
    }

    pub fn ptr_add(&mut self, base: Operand, offset: Operand) -> Operand {
        self.push(Type::Ptr, InstKind::PtrAdd { base, offset })
    }

    /// Direct call. Returns `None` for `void` callees.
    pub fn call(&mut self, name: &str, args: Vec<Operand>, ret: Type) -> Option<Operand> {
        let is_void = ret.is_void();
        let result = self.push(
            ret,
            InstKind::Call {
                callee: Callee::Direct(name.to_string()),
                args,
            },
        );
        (!is_void).then_some(result)
    }

    pub fn inline_asm(&mut self, asm: &str, constraints: &str) {
        self.push(
            Type::Void,
            InstKind::Call {
                callee: Callee::InlineAsm {
                    asm: asm.to_string(),
                    constraints: constraints.to_string(),
                },
                args: Vec::new(),
            },
        );
    }

    pub fn phi(&mut self, ty: Type, incoming: Vec<(Operand, BlockId)>) -> Operand {
        self.push(ty, InstKind::Phi { incoming })
    }

    pub fn extract_element(&mut self, vector: Operand, index: u32) -> Operand {
        let ty = self.func.operand_type(&vector).element().clone();
        self.push(
            ty,
            InstKind::ExtractElement {
                vector,
                index: Operand::int(32, u64::from(index)),
            },
        )
    }

    pub fn insert_element(&mut self, vector: Operand, value: Operand, index: u32) -> Operand {
        let ty = self.func.operand_type(&vector);
        self.push(
            ty,
            InstKind::InsertElement {
                vector,
                value,
                index: Operand::int(32, u64::from(index)),
            },
        )
    }

    pub fn shuffle_vector(&mut self, lhs: Operand, rhs: Operand, mask: Vec<Option<u32>>) -> Operand {
        let elem = self.func.operand_type(&lhs).element().clone();
        let ty = Type::vector(elem, mask.len() as u32);
        self.push(ty, InstKind::ShuffleVector { lhs, rhs, mask })
    }

    pub fn atomic_rmw(&mut self, op: RmwOp, ptr: Operand, value: Operand) -> Operand {
        let ty = self.func.operand_type(&value);
        self.push(ty, InstKind::AtomicRmw { op, ptr, value })
    }

    pub fn cmpxchg(&mut self, ptr: Operand, expected: Operand, replacement: Operand) -> Operand {
        let ty = self.func.operand_type(&expected);
        self.push(
            ty,
            InstKind::CmpXchg {
                ptr,
                expected,
                replacement,
            },
        )
    }

    pub fn fence(&mut self) {
        self.push(Type::Void, InstKind::Fence);
    }

    pub fn br(&mut self, dest: BlockId) {
        self.terminate(Terminator::Br(dest));
    }

    pub fn cond_br(&mut self, cond: Operand, then_dest: BlockId, else_dest: BlockId) {
        self.terminate(Terminator::CondBr {
            cond,
            then_dest,
            else_dest,
        });
    }

    pub fn switch(&mut self, value: Operand, default: BlockId, cases: Vec<(u64, BlockId)>) {
        self.terminate(Terminator::Switch {
            value,
            default,
            cases,
        });
    }

    pub fn ret(&mut self, value: Option<Operand>) {
        self.terminate(Terminator::Ret(value));
    }

    pub fn unreachable(&mut self) {
        self.terminate(Terminator::Unreachable);
    }

    #[must_use]
    pub fn finish(self) -> Function {
        self.func
    }
}
