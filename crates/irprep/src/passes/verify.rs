// Structural verifier: read-only well-formedness checks over a whole module.
//
// Every finding is collected; `check_module` turns a non-empty list into the
// fatal `Error::Verification`.

use std::collections::{HashMap, HashSet};

use crate::config::PipelineConfig;
use crate::ir::{
    BlockId, Callee, CastOp, Constant, Dominators, Function, InstKind, Instruction, Linkage,
    Module, Operand, Terminator, Type, ValueId, truncate_to,
};
use crate::passes::audit::audit_operand_types;
use crate::{Error, Result};

/// All structural problems of `module`, one message per finding.
#[must_use]
pub fn verify_module(module: &Module) -> Vec<String> {
    let mut diags = Vec::new();
    verify_symbols(module, &mut diags);
    for func in &module.functions {
        FunctionVerifier::new(module, func, &mut diags).run();
    }
    diags
}

/// The fatal gate: structural verification unless `dont_verify`, then the
/// mandatory operand type audit.
///
/// # Errors
/// `Error::Verification` listing every structural finding, or
/// `Error::OperandTypes` from the audit.
pub fn check_module(config: &PipelineConfig, module: &Module) -> Result<()> {
    if config.dont_verify {
        tracing::debug!("structural verification disabled");
    } else {
        let diags = verify_module(module);
        if !diags.is_empty() {
            return Err(Error::Verification(diags.join("; ")));
        }
    }
    audit_operand_types(module)
}

/// Why `ty` is not a valid first-class type, if it is not.
fn type_problem(ty: &Type) -> Option<String> {
    match ty {
        Type::Int(bits) if !(1..=64).contains(bits) => {
            Some(format!("integer width {bits} is outside 1..=64"))
        }
        Type::Vector { elem, lanes } => {
            if *lanes == 0 {
                Some(format!("vector type {ty} has no lanes"))
            } else if !elem.is_scalar() {
                Some(format!("vector type {ty} has non-scalar elements"))
            } else {
                type_problem(elem)
            }
        }
        _ => None,
    }
}

fn unknown_symbols<'c>(module: &Module, constant: &'c Constant, out: &mut Vec<&'c str>) {
    match constant {
        Constant::Symbol(name) if !module.has_symbol(name) => out.push(name),
        Constant::Vector(lanes) => {
            for lane in lanes {
                unknown_symbols(module, lane, out);
            }
        }
        _ => {}
    }
}

fn verify_symbols(module: &Module, diags: &mut Vec<String>) {
    let mut seen = HashSet::new();
    let names = module
        .functions
        .iter()
        .map(|f| &f.name)
        .chain(module.globals.iter().map(|g| &g.name))
        .chain(module.aliases.iter().map(|a| &a.name));
    for name in names {
        if !seen.insert(name) {
            diags.push(format!("symbol '{name}' is defined more than once"));
        }
    }

    for alias in &module.aliases {
        if !module.has_symbol(&alias.target) {
            diags.push(format!(
                "alias '{}' targets unknown symbol '{}'",
                alias.name, alias.target
            ));
        } else if module.global(&alias.target).is_none()
            && module.resolve_function(&alias.name).is_none()
        {
            diags.push(format!("alias '{}' is part of an alias cycle", alias.name));
        }
    }

    for global in &module.globals {
        let mut unknown = Vec::new();
        for field in &global.init {
            unknown_symbols(module, field, &mut unknown);
        }
        for name in unknown {
            diags.push(format!(
                "global '{}' refers to unknown symbol '{name}'",
                global.name
            ));
        }
    }

    for (list, records) in [("constructor", &module.ctors), ("destructor", &module.dtors)] {
        for record in records {
            if module.resolve_function(&record.function).is_none() {
                diags.push(format!(
                    "{list} record names unknown function '{}'",
                    record.function
                ));
            }
        }
    }
}

struct FunctionVerifier<'a> {
    module: &'a Module,
    func: &'a Function,
    diags: &'a mut Vec<String>,
    params: HashSet<ValueId>,
    /// Defining (block index, instruction index) of every instruction result.
    defs: HashMap<ValueId, (usize, usize)>,
    dom: Dominators,
}

impl<'a> FunctionVerifier<'a> {
    fn new(module: &'a Module, func: &'a Function, diags: &'a mut Vec<String>) -> Self {
        Self {
            module,
            func,
            diags,
            params: HashSet::new(),
            defs: HashMap::new(),
            dom: func.dominators(),
        }
    }

    fn report(&mut self, msg: impl std::fmt::Display) {
        self.diags
            .push(format!("function '{}': {msg}", self.func.name));
    }

    fn run(mut self) {
        let func = self.func;
        for (i, ty) in func.value_types.iter().enumerate() {
            if let Some(problem) = type_problem(ty) {
                self.report(format_args!("%{i}: {problem}"));
            }
        }
        if let Some(problem) = type_problem(&func.ret) {
            self.report(format_args!("return type: {problem}"));
        }
        for &param in &func.params {
            if param.0 as usize >= func.value_types.len() {
                self.report(format_args!("parameter {param} has no type"));
            } else if func.value_type(param).is_void() {
                self.report(format_args!("parameter {param} has type void"));
            }
            if !self.params.insert(param) {
                self.report(format_args!("parameter {param} is declared twice"));
            }
        }
        if func.is_declaration() {
            if func.linkage == Linkage::Internal {
                self.report("declaration has internal linkage");
            }
            return;
        }

        self.collect_definitions();
        let block_ids = self.check_cfg();

        for (bi, block) in func.blocks.iter().enumerate() {
            let reachable = self.dom.is_reachable(block.id);
            for (ii, inst) in block.insts.iter().enumerate() {
                if let InstKind::Phi { incoming } = &inst.kind {
                    for (value, pred) in incoming {
                        if let Some(pred_idx) = func.block_index(*pred) {
                            let live = reachable && self.dom.is_reachable(*pred);
                            self.check_use(value, pred_idx, usize::MAX, live);
                        }
                    }
                } else {
                    for op in inst.operands() {
                        self.check_use(op, bi, ii, reachable);
                    }
                }
                if let Some(problem) = instruction_problem(self.module, func, inst) {
                    self.report(format_args!("{}: `{inst}`: {problem}", block.id));
                }
            }
            for op in block.term.operands() {
                self.check_use(op, bi, usize::MAX, reachable);
            }
            if let Some(problem) = terminator_problem(func, &block.term, &block_ids) {
                self.report(format_args!("{}: `{}`: {problem}", block.id, block.term));
            }
        }
    }

    fn collect_definitions(&mut self) {
        let func = self.func;
        for (bi, block) in func.blocks.iter().enumerate() {
            for (ii, inst) in block.insts.iter().enumerate() {
                let Some(result) = inst.result else {
                    continue;
                };
                if inst.ty.is_void() {
                    self.report(format_args!("`{inst}`: void instruction defines a value"));
                }
                if result.0 as usize >= func.value_types.len() {
                    self.report(format_args!("`{inst}`: result has no type entry"));
                } else if func.value_type(result) != inst.ty {
                    self.report(format_args!(
                        "`{inst}`: result type {} disagrees with the value table ({})",
                        inst.ty,
                        func.value_type(result)
                    ));
                }
                if self.params.contains(&result) || self.defs.insert(result, (bi, ii)).is_some() {
                    self.report(format_args!("value {result} is defined more than once"));
                }
            }
        }
    }

    /// Block ids, branch targets, entry predecessors and PHI placement.
    fn check_cfg(&mut self) -> HashSet<BlockId> {
        let func = self.func;
        let mut ids = HashSet::new();
        for block in &func.blocks {
            if !ids.insert(block.id) {
                self.report(format_args!("block id {} is used twice", block.id));
            }
        }
        let preds = func.predecessors();
        if let Some(entry) = func.entry()
            && preds.get(&entry.id).is_some_and(|p| !p.is_empty())
        {
            self.report("entry block has predecessors");
        }
        for block in &func.blocks {
            let first = block.first_non_phi();
            if block.insts[first..].iter().any(Instruction::is_phi) {
                self.report(format_args!("{}: PHI after a non-PHI instruction", block.id));
            }
            let expected: HashSet<BlockId> = preds
                .get(&block.id)
                .map(|p| p.iter().copied().collect())
                .unwrap_or_default();
            for phi in &block.insts[..first] {
                let InstKind::Phi { incoming } = &phi.kind else {
                    continue;
                };
                let mut got = HashSet::new();
                for (_, pred) in incoming {
                    if !got.insert(*pred) {
                        self.report(format_args!(
                            "{}: `{phi}`: two entries for {pred}",
                            block.id
                        ));
                    }
                }
                if got != expected {
                    self.report(format_args!(
                        "{}: `{phi}`: incoming blocks do not match the predecessors",
                        block.id
                    ));
                }
            }
        }
        ids
    }

    /// A use at instruction `at` of block `block_idx` (`usize::MAX` for the
    /// end of the block). Dominance is only checked for reachable uses.
    fn check_use(&mut self, op: &Operand, block_idx: usize, at: usize, check_dominance: bool) {
        let id = match op {
            Operand::Value(id) => *id,
            Operand::Const(constant) => {
                let mut unknown = Vec::new();
                unknown_symbols(self.module, constant, &mut unknown);
                for name in unknown {
                    self.report(format_args!("reference to unknown symbol '{name}'"));
                }
                return;
            }
        };
        if self.params.contains(&id) {
            return;
        }
        let Some(&(def_block, def_inst)) = self.defs.get(&id) else {
            self.report(format_args!("use of undefined value {id}"));
            return;
        };
        if !check_dominance {
            return;
        }
        let dominated = if def_block == block_idx {
            def_inst < at
        } else {
            let (def_id, use_id) = (self.func.blocks[def_block].id, self.func.blocks[block_idx].id);
            self.dom.dominates(def_id, use_id)
        };
        if !dominated {
            let use_block = self.func.blocks[block_idx].id;
            self.report(format_args!(
                "definition of {id} does not dominate its use in {use_block}"
            ));
        }
    }
}

fn same_shape(a: &Type, b: &Type) -> bool {
    a.lanes() == b.lanes()
}

fn cast_problem(op: CastOp, from: &Type, to: &Type) -> Option<String> {
    let ok = match op {
        CastOp::Trunc | CastOp::ZExt | CastOp::SExt => {
            match (from.int_width(), to.int_width()) {
                (Some(src), Some(dst)) if same_shape(from, to) => {
                    if op == CastOp::Trunc {
                        dst < src
                    } else {
                        dst > src
                    }
                }
                _ => false,
            }
        }
        CastOp::Bitcast => {
            !from.is_void() && !to.is_void() && from.store_size() == to.store_size()
        }
        CastOp::PtrToInt => {
            *from.element() == Type::Ptr && to.element().is_int() && same_shape(from, to)
        }
        CastOp::IntToPtr => {
            from.element().is_int() && *to.element() == Type::Ptr && same_shape(from, to)
        }
    };
    (!ok).then(|| format!("invalid {op} from {from} to {to}"))
}

/// First type error of `inst`, if any.
#[allow(clippy::too_many_lines)]
fn instruction_problem(module: &Module, func: &Function, inst: &Instruction) -> Option<String> {
    let ty = &inst.ty;
    let t = |op: &Operand| func.operand_type(op);
    match &inst.kind {
        InstKind::Binary { op, lhs, rhs } => {
            if t(lhs) != *ty || t(rhs) != *ty {
                return Some(format!("operands must have the result type {ty}"));
            }
            let elem = ty.element();
            let fits = if op.is_float() {
                elem.is_float()
            } else {
                elem.is_int()
            };
            if !fits {
                return Some(format!("{op} is not defined on {ty}"));
            }
        }
        InstKind::ICmp { lhs, rhs, .. } => {
            let operand = t(lhs);
            if operand != t(rhs) {
                return Some("operands have different types".into());
            }
            if !(operand.element().is_int() || *operand.element() == Type::Ptr) {
                return Some(format!("icmp is not defined on {operand}"));
            }
            if *ty != operand.with_element(Type::I1) {
                return Some(format!("result must be {}", operand.with_element(Type::I1)));
            }
        }
        InstKind::Cast { op, value } => return cast_problem(*op, &t(value), ty),
        InstKind::Select {
            cond,
            then_value,
            else_value,
        } => {
            let cond_ty = t(cond);
            if cond_ty != Type::I1 && cond_ty != ty.with_element(Type::I1) {
                return Some(format!("condition of type {cond_ty} is not i1"));
            }
            if t(then_value) != *ty || t(else_value) != *ty {
                return Some(format!("both arms must have type {ty}"));
            }
        }
        InstKind::Load { ptr, .. } => {
            if t(ptr) != Type::Ptr {
                return Some("address is not a pointer".into());
            }
            if ty.is_void() {
                return Some("load of void".into());
            }
        }
        InstKind::Store { value, ptr, .. } => {
            if t(ptr) != Type::Ptr {
                return Some("address is not a pointer".into());
            }
            if t(value).is_void() || !ty.is_void() {
                return Some("store must write a value and produce void".into());
            }
        }
        InstKind::Alloca { allocated } => {
            if allocated.is_void() || *ty != Type::Ptr {
                return Some("alloca must allocate a sized type and produce ptr".into());
            }
        }
        InstKind::PtrAdd { base, offset } => {
            if t(base) != Type::Ptr || !t(offset).is_int() || *ty != Type::Ptr {
                return Some("ptradd takes ptr and an integer offset".into());
            }
        }
        InstKind::Call { callee, args } => return call_problem(module, func, callee, args, ty),
        InstKind::Phi { incoming } => {
            if let Some((value, _)) = incoming.iter().find(|(value, _)| t(value) != *ty) {
                return Some(format!("incoming {value} is not of type {ty}"));
            }
        }
        InstKind::ExtractElement { vector, index } => {
            let vector_ty = t(vector);
            if !vector_ty.is_vector() || !t(index).is_int() || *ty != *vector_ty.element() {
                return Some("extractelement takes a vector and an integer index".into());
            }
        }
        InstKind::InsertElement {
            vector,
            value,
            index,
        } => {
            if !ty.is_vector()
                || t(vector) != *ty
                || t(value) != *ty.element()
                || !t(index).is_int()
            {
                return Some("insertelement lane does not match the vector".into());
            }
        }
        InstKind::ShuffleVector { lhs, rhs, mask } => {
            let input = t(lhs);
            let Some(lanes) = input.lanes() else {
                return Some("shufflevector inputs must be vectors".into());
            };
            if t(rhs) != input {
                return Some("shufflevector inputs differ".into());
            }
            if ty.lanes() != Some(mask.len() as u32) || ty.element() != input.element() {
                return Some("shufflevector result does not match the mask".into());
            }
            if mask.iter().flatten().any(|&lane| lane >= 2 * lanes) {
                return Some("shufflevector mask lane out of range".into());
            }
        }
        InstKind::AtomicRmw { op: _, ptr, value } => {
            if t(ptr) != Type::Ptr || t(value) != *ty || !ty.is_scalar() {
                return Some("atomicrmw takes a pointer and a scalar of the result type".into());
            }
        }
        InstKind::CmpXchg {
            ptr,
            expected,
            replacement,
        } => {
            if t(ptr) != Type::Ptr || t(expected) != *ty || t(replacement) != *ty {
                return Some("cmpxchg operands must match the result type".into());
            }
        }
        InstKind::Fence => {
            if !ty.is_void() {
                return Some("fence produces no value".into());
            }
        }
    }
    None
}

fn call_problem(
    module: &Module,
    func: &Function,
    callee: &Callee,
    args: &[Operand],
    ty: &Type,
) -> Option<String> {
    match callee {
        Callee::Direct(name) => {
            let Some(target) = module.resolve_function(name) else {
                // Intrinsics may be used without a declaration.
                return (!name.starts_with("llvm."))
                    .then(|| format!("callee '{name}' is not a function"));
            };
            let params = target.param_types();
            if params.len() != args.len() {
                return Some(format!(
                    "'{name}' takes {} argument(s), {} given",
                    params.len(),
                    args.len()
                ));
            }
            if let Some(i) = (0..args.len()).find(|&i| func.operand_type(&args[i]) != params[i]) {
                return Some(format!("argument {i} of '{name}' has the wrong type"));
            }
            if target.ret != *ty {
                return Some(format!("'{name}' returns {}, call expects {ty}", target.ret));
            }
            None
        }
        Callee::Indirect(target) => {
            (func.operand_type(target) != Type::Ptr).then(|| "indirect callee is not a pointer".into())
        }
        Callee::InlineAsm { .. } => None,
    }
}

fn terminator_problem(func: &Function, term: &Terminator, blocks: &HashSet<BlockId>) -> Option<String> {
    if let Some(dest) = term.successors().into_iter().find(|d| !blocks.contains(d)) {
        return Some(format!("branch to unknown block {dest}"));
    }
    match term {
        Terminator::CondBr { cond, .. } if func.operand_type(cond) != Type::I1 => {
            Some("branch condition is not i1".into())
        }
        Terminator::Switch { value, cases, .. } => {
            let ty = func.operand_type(value);
            let Some(width) = ty.int_width().filter(|_| !ty.is_vector()) else {
                return Some(format!("switch on non-integer {ty}"));
            };
            let mut seen = HashSet::new();
            for (case, _) in cases {
                if truncate_to(*case, width) != *case {
                    return Some(format!("case value {case} does not fit {ty}"));
                }
                if !seen.insert(*case) {
                    return Some(format!("duplicate case value {case}"));
                }
            }
            None
        }
        Terminator::Ret(value) => {
            let given = value.as_ref().map_or(Type::Void, |v| func.operand_type(v));
            (given != func.ret).then(|| format!("returns {given}, function returns {}", func.ret))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, FunctionBuilder, IntPredicate, StaticInit};

    fn module_with(func: Function) -> Module {
        let mut module = Module::new("m");
        module.functions.push(func);
        module
    }

    fn valid_function() -> Function {
        let mut b = FunctionBuilder::new("f", &[Type::I32, Type::I32], Type::I32);
        let (x, y) = (b.param(0), b.param(1));
        let then_bb = b.new_block();
        let join = b.new_block();
        let entry = b.current_block();
        let c = b.icmp(IntPredicate::Slt, x.clone(), y.clone());
        b.cond_br(c, then_bb, join);
        b.switch_to(then_bb);
        let s = b.binary(BinOp::Sub, y, x.clone());
        b.br(join);
        b.switch_to(join);
        let r = b.phi(Type::I32, vec![(x, entry), (s, then_bb)]);
        b.ret(Some(r));
        b.finish()
    }

    #[test]
    fn well_formed_module_has_no_findings() {
        assert!(verify_module(&module_with(valid_function())).is_empty());
    }

    #[test]
    fn use_outside_dominance_is_reported() {
        let mut func = valid_function();
        // Return the value computed only on the `then` path.
        let sub = func.blocks[1].insts[0].result.unwrap();
        func.blocks[2].term = Terminator::Ret(Some(Operand::Value(sub)));
        let diags = verify_module(&module_with(func));
        assert!(diags.iter().any(|d| d.contains("does not dominate")), "{diags:?}");
    }

    #[test]
    fn phi_entries_must_match_predecessors() {
        let mut func = valid_function();
        if let InstKind::Phi { incoming } = &mut func.blocks[2].insts[0].kind {
            incoming.pop();
        }
        let diags = verify_module(&module_with(func));
        assert!(diags.iter().any(|d| d.contains("do not match the predecessors")));
    }

    #[test]
    fn mismatched_operand_types_are_reported() {
        let mut b = FunctionBuilder::new("f", &[Type::I32, Type::I64], Type::I32);
        let (x, y) = (b.param(0), b.param(1));
        let r = b.binary(BinOp::Add, x, y);
        b.ret(Some(r));
        let diags = verify_module(&module_with(b.finish()));
        assert_eq!(diags.len(), 1);
        assert!(diags[0].contains("operands must have the result type"));
    }

    #[test]
    fn calls_are_checked_against_the_declaration() {
        let mut b = FunctionBuilder::new("f", &[], Type::Void);
        b.call("g", vec![Operand::int(32, 1)], Type::Void);
        b.call("missing", vec![], Type::Void);
        b.call("llvm.donothing", vec![], Type::Void);
        b.ret(None);
        let mut module = module_with(b.finish());
        module
            .functions
            .push(Function::declaration("g", &[Type::I64], Type::Void));
        let diags = verify_module(&module);
        assert_eq!(diags.len(), 2, "{diags:?}");
        assert!(diags.iter().any(|d| d.contains("wrong type")));
        assert!(diags.iter().any(|d| d.contains("'missing' is not a function")));
    }

    #[test]
    fn symbol_tables_are_checked() {
        let mut module = module_with(valid_function());
        module.functions.push(Function::declaration("f", &[], Type::Void));
        module.ctors.push(StaticInit {
            priority: 1,
            function: "init".into(),
        });
        let diags = verify_module(&module);
        assert!(diags.iter().any(|d| d.contains("'f' is defined more than once")));
        assert!(diags.iter().any(|d| d.contains("unknown function 'init'")));
    }

    #[test]
    fn bad_types_are_reported() {
        let mut func = Function::declaration("f", &[Type::Int(65)], Type::Void);
        func.value_types.push(Type::vector(Type::vector(Type::I8, 2), 2));
        let diags = verify_module(&module_with(func));
        assert!(diags.iter().any(|d| d.contains("outside 1..=64")));
        assert!(diags.iter().any(|d| d.contains("non-scalar elements")));
    }

    #[test]
    fn check_module_skips_verification_when_disabled() {
        let mut func = valid_function();
        func.blocks[2].term = Terminator::Br(BlockId(99));
        let module = module_with(func);

        let strict = PipelineConfig::default();
        assert!(matches!(check_module(&strict, &module), Err(Error::Verification(_))));

        let lax = PipelineConfig {
            dont_verify: true,
            ..PipelineConfig::default()
        };
        assert!(check_module(&lax, &module).is_ok());
    }
}
