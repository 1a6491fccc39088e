use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::instruction::{BlockId, Constant, InstKind, Instruction, Operand, Terminator, ValueId};
use super::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Linkage {
    #[default]
    External,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    #[serde(default)]
    pub insts: Vec<Instruction>,
    pub term: Terminator,
}

impl Block {
    #[must_use]
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            insts: Vec::new(),
            term: Terminator::Unreachable,
        }
    }

    /// Index of the first non-PHI instruction.
    #[must_use]
    pub fn first_non_phi(&self) -> usize {
        self.insts
            .iter()
            .position(|inst| !inst.is_phi())
            .unwrap_or(self.insts.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    #[serde(default)]
    pub linkage: Linkage,
    /// Excluded from optimization, inlining and dead-code removal.
    #[serde(default)]
    pub preserved: bool,
    pub params: Vec<ValueId>,
    pub ret: Type,
    /// Empty for declarations. The first block is the entry block.
    #[serde(default)]
    pub blocks: Vec<Block>,
    /// Type of every value, indexed by `ValueId`.
    pub value_types: Vec<Type>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub value_names: BTreeMap<ValueId, String>,
}

impl Function {
    /// A body-less declaration.
    #[must_use]
    pub fn declaration(name: impl Into<String>, params: &[Type], ret: Type) -> Self {
        let mut func = Self {
            name: name.into(),
            linkage: Linkage::External,
            preserved: false,
            params: Vec::with_capacity(params.len()),
            ret,
            blocks: Vec::new(),
            value_types: Vec::new(),
            value_names: BTreeMap::new(),
        };
        for ty in params {
            let id = func.new_value(ty.clone());
            func.params.push(id);
        }
        func
    }

    #[must_use]
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn param_types(&self) -> Vec<Type> {
        self.params.iter().map(|id| self.value_type(*id)).collect()
    }

    /// Allocate a fresh value number of type `ty`.
    pub fn new_value(&mut self, ty: Type) -> ValueId {
        let id = ValueId(self.value_types.len() as u32);
        self.value_types.push(ty);
        id
    }

    /// Type of `id`; `void` for out-of-range ids (the verifier reports those).
    #[must_use]
    pub fn value_type(&self, id: ValueId) -> Type {
        self.value_types
            .get(id.0 as usize)
            .cloned()
            .unwrap_or(Type::Void)
    }

    #[must_use]
    pub fn operand_type(&self, operand: &Operand) -> Type {
        match operand {
            Operand::Value(id) => self.value_type(*id),
            Operand::Const(constant) => constant.ty(),
        }
    }

    /// Build an instruction of type `ty`, allocating a result value unless
    /// the type is `void`. Returns the instruction and an operand naming its
    /// result (`undef void` for `void` instructions).
    pub fn make_inst(&mut self, ty: Type, kind: InstKind) -> (Instruction, Operand) {
        if ty.is_void() {
            (Instruction::new(None, ty, kind), Operand::undef(Type::Void))
        } else {
            let id = self.new_value(ty.clone());
            (Instruction::new(Some(id), ty, kind), Operand::Value(id))
        }
    }

    #[must_use]
    pub fn entry(&self) -> Option<&Block> {
        self.blocks.first()
    }

    #[must_use]
    pub fn block_index(&self, id: BlockId) -> Option<usize> {
        self.blocks.iter().position(|block| block.id == id)
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|block| block.id == id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|block| block.id == id)
    }

    /// A block id not used by any block of this function.
    #[must_use]
    pub fn fresh_block_id(&self) -> BlockId {
        BlockId(self.blocks.iter().map(|b| b.id.0 + 1).max().unwrap_or(0))
    }

    /// Append a new empty block (terminated by `unreachable`) and return its id.
    pub fn add_block(&mut self) -> BlockId {
        let id = self.fresh_block_id();
        self.blocks.push(Block::new(id));
        id
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.iter().flat_map(|block| block.insts.iter())
    }

    pub fn instructions_mut(&mut self) -> impl Iterator<Item = &mut Instruction> {
        self.blocks.iter_mut().flat_map(|block| block.insts.iter_mut())
    }

    /// Every operand of every instruction and terminator.
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut Operand)) {
        for block in &mut self.blocks {
            for inst in &mut block.insts {
                for op in inst.operands_mut() {
                    f(op);
                }
            }
            for op in block.term.operands_mut() {
                f(op);
            }
        }
    }

    /// Number of instructions, terminators excluded.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|block| block.insts.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub name: String,
    #[serde(default)]
    pub linkage: Linkage,
    #[serde(default)]
    pub constant: bool,
    /// Initializer fields, laid out consecutively in memory.
    #[serde(default)]
    pub init: Vec<Constant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub name: String,
    #[serde(default)]
    pub linkage: Linkage,
    pub target: String,
}

/// One entry of the static constructor or destructor list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticInit {
    pub priority: u32,
    pub function: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    #[serde(default)]
    pub functions: Vec<Function>,
    #[serde(default)]
    pub globals: Vec<GlobalVariable>,
    #[serde(default)]
    pub aliases: Vec<Alias>,
    #[serde(default)]
    pub ctors: Vec<StaticInit>,
    #[serde(default)]
    pub dtors: Vec<StaticInit>,
}

impl Module {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    #[must_use]
    pub fn global(&self, name: &str) -> Option<&GlobalVariable> {
        self.globals.iter().find(|g| g.name == name)
    }

    #[must_use]
    pub fn alias(&self, name: &str) -> Option<&Alias> {
        self.aliases.iter().find(|a| a.name == name)
    }

    /// Whether `name` names a function, global variable or alias.
    #[must_use]
    pub fn has_symbol(&self, name: &str) -> bool {
        self.function(name).is_some() || self.global(name).is_some() || self.alias(name).is_some()
    }

    /// Follow aliases until a function is found. Cycles resolve to `None`.
    #[must_use]
    pub fn resolve_function(&self, name: &str) -> Option<&Function> {
        let mut current = name;
        for _ in 0..=self.aliases.len() {
            if let Some(func) = self.function(current) {
                return Some(func);
            }
            current = &self.alias(current)?.target;
        }
        None
    }

    /// Declare `name` with the given signature unless a symbol by that name exists.
    pub fn ensure_declared(&mut self, name: &str, params: &[Type], ret: Type) {
        if !self.has_symbol(name) {
            self.functions.push(Function::declaration(name, params, ret));
        }
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter().filter(|f| !f.is_declaration())
    }

    pub fn definitions_mut(&mut self) -> impl Iterator<Item = &mut Function> {
        self.functions.iter_mut().filter(|f| !f.is_declaration())
    }
}
