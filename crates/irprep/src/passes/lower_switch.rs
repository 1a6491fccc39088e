// Switch lowering.
//
// `simple` turns a switch into one equality test per case, in case order.
// `canonical` groups consecutive case values with the same destination into
// ranges and dispatches with a balanced binary search over those ranges.

use std::collections::HashSet;

use crate::config::SwitchImpl;
use crate::ir::{
    BinOp, Block, BlockId, Function, InstKind, IntPredicate, Module, Operand, Terminator, Type,
};

/// Lower every switch terminator according to `strategy`. `native` leaves
/// the module untouched. Returns the number of lowered switches.
pub fn lower_switches(module: &mut Module, strategy: SwitchImpl) -> usize {
    if strategy == SwitchImpl::Native {
        return 0;
    }
    let count: usize = module
        .definitions_mut()
        .map(|func| lower_function(func, strategy))
        .sum();
    if count > 0 {
        tracing::debug!("lowered {count} switch(es) ({strategy:?})");
    }
    count
}

fn lower_function(func: &mut Function, strategy: SwitchImpl) -> usize {
    let mut count = 0;
    let mut idx = 0;
    while idx < func.blocks.len() {
        if matches!(func.blocks[idx].term, Terminator::Switch { .. }) {
            let term = std::mem::replace(&mut func.blocks[idx].term, Terminator::Unreachable);
            if let Terminator::Switch {
                value,
                default,
                cases,
            } = term
            {
                let mut lowering = Lowering::new(func, idx, value, default);
                match strategy {
                    SwitchImpl::Simple => lowering.equality_chain(&cases),
                    SwitchImpl::Canonical | SwitchImpl::Native => {
                        lowering.binary_search(&cluster(&cases));
                    }
                }
                lowering.finish();
                count += 1;
            }
        }
        idx += 1;
    }
    count
}

/// Inclusive range of case values sharing one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseRange {
    pub low: u64,
    pub high: u64,
    pub dest: BlockId,
}

/// Sort cases by (unsigned) value and merge adjacent values that branch to
/// the same block.
#[must_use]
pub fn cluster(cases: &[(u64, BlockId)]) -> Vec<CaseRange> {
    let mut sorted = cases.to_vec();
    sorted.sort_by_key(|(value, _)| *value);
    let mut ranges: Vec<CaseRange> = Vec::new();
    for (value, dest) in sorted {
        match ranges.last_mut() {
            Some(last) if last.dest == dest && last.high.checked_add(1) == Some(value) => {
                last.high = value;
            }
            _ => ranges.push(CaseRange {
                low: value,
                high: value,
                dest,
            }),
        }
    }
    ranges
}

struct Lowering<'f> {
    func: &'f mut Function,
    switch_block: BlockId,
    /// Layout position of the next synthesized block.
    insert_at: usize,
    value: Operand,
    value_ty: Type,
    width: u32,
    default: BlockId,
    synthesized: HashSet<BlockId>,
    /// Every emitted branch, as (source, destination).
    edges: Vec<(BlockId, BlockId)>,
}

impl<'f> Lowering<'f> {
    fn new(func: &'f mut Function, block_idx: usize, value: Operand, default: BlockId) -> Self {
        let value_ty = func.operand_type(&value);
        let width = value_ty.int_width().unwrap_or(64);
        Self {
            switch_block: func.blocks[block_idx].id,
            func,
            insert_at: block_idx + 1,
            value,
            value_ty,
            width,
            default,
            synthesized: HashSet::new(),
            edges: Vec::new(),
        }
    }

    fn new_block(&mut self) -> BlockId {
        let id = self.func.fresh_block_id();
        self.func.blocks.insert(self.insert_at, Block::new(id));
        self.insert_at += 1;
        self.synthesized.insert(id);
        id
    }

    fn emit(&mut self, block: BlockId, ty: Type, kind: InstKind) -> Operand {
        let (inst, result) = self.func.make_inst(ty, kind);
        if let Some(target) = self.func.block_mut(block) {
            target.insts.push(inst);
        }
        result
    }

    fn compare(&mut self, block: BlockId, pred: IntPredicate, lhs: Operand, rhs: u64) -> Operand {
        let rhs = Operand::int(self.width, rhs);
        self.emit(block, Type::I1, InstKind::ICmp { pred, lhs, rhs })
    }

    fn terminate(&mut self, block: BlockId, term: Terminator) {
        for dest in term.successors() {
            self.edges.push((block, dest));
        }
        if let Some(target) = self.func.block_mut(block) {
            target.term = term;
        }
    }

    fn branch(&mut self, block: BlockId, cond: Operand, then_dest: BlockId, else_dest: BlockId) {
        self.terminate(
            block,
            Terminator::CondBr {
                cond,
                then_dest,
                else_dest,
            },
        );
    }

    fn equality_chain(&mut self, cases: &[(u64, BlockId)]) {
        let mut current = self.switch_block;
        for (i, &(case, dest)) in cases.iter().enumerate() {
            let hit = self.compare(current, IntPredicate::Eq, self.value.clone(), case);
            let miss = if i + 1 == cases.len() {
                self.default
            } else {
                self.new_block()
            };
            self.branch(current, hit, dest, miss);
            current = miss;
        }
        if cases.is_empty() {
            self.terminate(current, Terminator::Br(self.default));
        }
    }

    fn binary_search(&mut self, ranges: &[CaseRange]) {
        if ranges.is_empty() {
            self.terminate(self.switch_block, Terminator::Br(self.default));
        } else {
            self.search(self.switch_block, ranges);
        }
    }

    fn search(&mut self, block: BlockId, ranges: &[CaseRange]) {
        if let [range] = ranges {
            self.range_check(block, *range);
            return;
        }
        let mid = ranges.len() / 2;
        let below = self.compare(block, IntPredicate::Ult, self.value.clone(), ranges[mid].low);
        let left = self.new_block();
        let right = self.new_block();
        self.branch(block, below, left, right);
        self.search(left, &ranges[..mid]);
        self.search(right, &ranges[mid..]);
    }

    fn range_check(&mut self, block: BlockId, range: CaseRange) {
        let hit = if range.low == range.high {
            self.compare(block, IntPredicate::Eq, self.value.clone(), range.low)
        } else {
            let offset = self.emit(
                block,
                self.value_ty.clone(),
                InstKind::Binary {
                    op: BinOp::Sub,
                    lhs: self.value.clone(),
                    rhs: Operand::int(self.width, range.low),
                },
            );
            self.compare(block, IntPredicate::Ule, offset, range.high - range.low)
        };
        self.branch(block, hit, range.dest, self.default);
    }

    /// PHIs of the original successors get one entry per block now
    /// branching to them, in place of the switch block's entry.
    fn finish(self) {
        let mut incoming: Vec<(BlockId, Vec<BlockId>)> = Vec::new();
        for (from, to) in self.edges {
            if self.synthesized.contains(&to) {
                continue;
            }
            match incoming.iter_mut().find(|(dest, _)| *dest == to) {
                Some((_, froms)) => {
                    if !froms.contains(&from) {
                        froms.push(from);
                    }
                }
                None => incoming.push((to, vec![from])),
            }
        }
        for (dest, froms) in incoming {
            self.func.replace_phi_pred(dest, self.switch_block, &froms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FunctionBuilder;

    /// `switch x [1 -> a, 2 -> b, 3 -> a] default d`, each target returning a
    /// distinct constant through a PHI in `exit`.
    fn three_cases() -> Function {
        let mut b = FunctionBuilder::new("f", &[Type::I32], Type::I32);
        let x = b.param(0);
        let a = b.new_block();
        let bb = b.new_block();
        let d = b.new_block();
        let exit = b.new_block();
        b.switch(x, d, vec![(1, a), (2, bb), (3, a)]);
        for block in [a, bb, d] {
            b.switch_to(block);
            b.br(exit);
        }
        b.switch_to(exit);
        let r = b.phi(
            Type::I32,
            vec![
                (Operand::int(32, 10), a),
                (Operand::int(32, 20), bb),
                (Operand::int(32, 0), d),
            ],
        );
        b.ret(Some(r));
        b.finish()
    }

    fn module_of(func: Function) -> Module {
        let mut module = Module::new("m");
        module.functions.push(func);
        module
    }

    fn switch_count(func: &Function) -> usize {
        func.blocks
            .iter()
            .filter(|b| matches!(b.term, Terminator::Switch { .. }))
            .count()
    }

    #[test]
    fn native_keeps_switches() {
        let mut module = module_of(three_cases());
        assert_eq!(lower_switches(&mut module, SwitchImpl::Native), 0);
        assert_eq!(switch_count(&module.functions[0]), 1);
    }

    #[test]
    fn simple_emits_ordered_equality_chain() {
        let mut module = module_of(three_cases());
        assert_eq!(lower_switches(&mut module, SwitchImpl::Simple), 1);
        let func = &module.functions[0];
        assert_eq!(switch_count(func), 0);

        let compared: Vec<u64> = func
            .instructions()
            .filter_map(|i| match &i.kind {
                InstKind::ICmp {
                    pred: IntPredicate::Eq,
                    rhs,
                    ..
                } => rhs.as_int().map(|(_, v)| v),
                _ => None,
            })
            .collect();
        assert_eq!(compared, vec![1, 2, 3]);
        // Two synthesized blocks sit right after the switch block.
        assert_eq!(func.blocks.len(), 7);
        let Terminator::CondBr { else_dest, .. } = &func.blocks[2].term else {
            panic!("expected the last link of the chain");
        };
        assert_eq!(*else_dest, func.blocks[5].id);
    }

    #[test]
    fn destination_phis_name_the_new_predecessors() {
        let mut module = module_of(three_cases());
        lower_switches(&mut module, SwitchImpl::Simple);
        let func = &module.functions[0];
        let preds = func.predecessors();
        for block in &func.blocks {
            for inst in block.insts.iter().filter(|i| i.is_phi()) {
                let InstKind::Phi { incoming } = &inst.kind else {
                    continue;
                };
                let mut got: Vec<_> = incoming.iter().map(|(_, p)| *p).collect();
                let mut want = preds[&block.id].clone();
                got.sort();
                want.sort();
                assert_eq!(got, want);
            }
        }
    }

    #[test]
    fn clustering_merges_adjacent_values() {
        let (a, b) = (BlockId(1), BlockId(2));
        let ranges = cluster(&[(5, a), (3, a), (4, a), (7, b), (8, a), (u64::MAX, b)]);
        assert_eq!(
            ranges,
            vec![
                CaseRange { low: 3, high: 5, dest: a },
                CaseRange { low: 7, high: 7, dest: b },
                CaseRange { low: 8, high: 8, dest: a },
                CaseRange {
                    low: u64::MAX,
                    high: u64::MAX,
                    dest: b
                },
            ]
        );
    }

    #[test]
    fn canonical_uses_range_checks() {
        let mut b = FunctionBuilder::new("f", &[Type::I8], Type::I32);
        let x = b.param(0);
        let lo = b.new_block();
        let hi = b.new_block();
        let d = b.new_block();
        let cases = (0..4).map(|v| (v, lo)).chain((10..12).map(|v| (v, hi))).collect();
        b.switch(x, d, cases);
        for (block, ret) in [(lo, 1), (hi, 2), (d, 0)] {
            b.switch_to(block);
            b.ret(Some(Operand::int(32, ret)));
        }
        let mut module = module_of(b.finish());
        lower_switches(&mut module, SwitchImpl::Canonical);

        let func = &module.functions[0];
        assert_eq!(switch_count(func), 0);
        let ule = func
            .instructions()
            .filter(|i| matches!(i.kind, InstKind::ICmp { pred: IntPredicate::Ule, .. }))
            .count();
        let ult = func
            .instructions()
            .filter(|i| matches!(i.kind, InstKind::ICmp { pred: IntPredicate::Ult, .. }))
            .count();
        // One pivot, one range check per cluster.
        assert_eq!((ult, ule), (1, 2));
    }
}
