// Control-flow graph queries and edits shared by the passes.

use std::collections::{HashMap, HashSet};

use super::instruction::{BlockId, InstKind, Operand, Terminator, ValueId};
use super::module::{Block, Function};

impl Function {
    /// Unique predecessor blocks of every block, in layout order.
    #[must_use]
    pub fn predecessors(&self) -> HashMap<BlockId, Vec<BlockId>> {
        let mut preds: HashMap<BlockId, Vec<BlockId>> =
            self.blocks.iter().map(|b| (b.id, Vec::new())).collect();
        for block in &self.blocks {
            for succ in block.term.unique_successors() {
                preds.entry(succ).or_default().push(block.id);
            }
        }
        preds
    }

    /// Blocks reachable from the entry block.
    #[must_use]
    pub fn reachable_blocks(&self) -> HashSet<BlockId> {
        let mut seen = HashSet::new();
        let Some(entry) = self.entry() else {
            return seen;
        };
        let mut stack = vec![entry.id];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(block) = self.block(id) {
                stack.extend(block.term.successors());
            }
        }
        seen
    }

    /// Reachable blocks in reverse post-order.
    #[must_use]
    pub fn reverse_post_order(&self) -> Vec<BlockId> {
        let mut order = Vec::new();
        let Some(entry) = self.entry() else {
            return order;
        };
        let mut visited = HashSet::new();
        // (block, next successor index to visit)
        let mut stack: Vec<(BlockId, usize)> = vec![(entry.id, 0)];
        visited.insert(entry.id);
        while let Some((id, next)) = stack.pop() {
            let succs = self
                .block(id)
                .map(|b| b.term.unique_successors())
                .unwrap_or_default();
            if let Some(&succ) = succs.get(next) {
                stack.push((id, next + 1));
                if self.block(succ).is_some() && visited.insert(succ) {
                    stack.push((succ, 0));
                }
            } else {
                order.push(id);
            }
        }
        order.reverse();
        order
    }

    /// Replace every use of `from` with `to`, PHI operands included.
    pub fn replace_all_uses(&mut self, from: ValueId, to: &Operand) {
        self.for_each_operand_mut(|op| {
            if op.as_value() == Some(from) {
                *op = to.clone();
            }
        });
    }

    /// Split the block at `block_idx` before instruction `inst_idx`.
    ///
    /// The tail instructions and the terminator move into a new block laid out
    /// right after the original one. The original block ends in `br` to the
    /// new block; PHIs in the old successors now name the new block.
    pub fn split_block(&mut self, block_idx: usize, inst_idx: usize) -> BlockId {
        let new_id = self.fresh_block_id();
        let old_id = self.blocks[block_idx].id;
        let block = &mut self.blocks[block_idx];
        let tail = block.insts.split_off(inst_idx);
        let term = std::mem::replace(&mut block.term, Terminator::Br(new_id));
        let succs = term.unique_successors();
        self.blocks.insert(
            block_idx + 1,
            Block {
                id: new_id,
                insts: tail,
                term,
            },
        );
        for succ in succs {
            self.replace_phi_pred(succ, old_id, &[new_id]);
        }
        new_id
    }

    /// In the PHIs of `block`, replace each entry coming from `old_pred` by
    /// one entry per block of `new_preds` carrying the same value.
    pub fn replace_phi_pred(&mut self, block: BlockId, old_pred: BlockId, new_preds: &[BlockId]) {
        let Some(target) = self.block_mut(block) else {
            return;
        };
        for inst in &mut target.insts {
            let InstKind::Phi { incoming } = &mut inst.kind else {
                continue;
            };
            let Some(pos) = incoming.iter().position(|(_, pred)| *pred == old_pred) else {
                continue;
            };
            let value = incoming[pos].0.clone();
            incoming.retain(|(_, pred)| *pred != old_pred);
            for &pred in new_preds {
                if !incoming.iter().any(|(_, p)| *p == pred) {
                    incoming.insert(pos.min(incoming.len()), (value.clone(), pred));
                }
            }
        }
    }

    /// Drop the PHI entries of `block` that come from `pred`.
    pub fn remove_phi_pred(&mut self, block: BlockId, pred: BlockId) {
        if let Some(target) = self.block_mut(block) {
            for inst in &mut target.insts {
                if let InstKind::Phi { incoming } = &mut inst.kind {
                    incoming.retain(|(_, p)| *p != pred);
                }
            }
        }
    }

    /// Immediate dominators of the reachable blocks.
    #[must_use]
    pub fn dominators(&self) -> Dominators {
        Dominators::compute(self)
    }
}

/// Dominator tree over the reachable blocks of a function
/// (Cooper, Harvey and Kennedy's iterative algorithm).
#[derive(Debug, Clone)]
pub struct Dominators {
    idom: HashMap<BlockId, BlockId>,
    rpo_index: HashMap<BlockId, usize>,
}

impl Dominators {
    #[must_use]
    pub fn compute(func: &Function) -> Self {
        let rpo = func.reverse_post_order();
        let rpo_index: HashMap<BlockId, usize> =
            rpo.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let preds = func.predecessors();
        let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
        let Some(&entry) = rpo.first() else {
            return Self { idom, rpo_index };
        };
        idom.insert(entry, entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for pred in preds.get(&block).into_iter().flatten() {
                    if !idom.contains_key(pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => *pred,
                        Some(current) => intersect(&idom, &rpo_index, *pred, current),
                    });
                }
                if let Some(new_idom) = new_idom
                    && idom.get(&block) != Some(&new_idom)
                {
                    idom.insert(block, new_idom);
                    changed = true;
                }
            }
        }
        Self { idom, rpo_index }
    }

    #[must_use]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.rpo_index.contains_key(&block)
    }

    #[must_use]
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(&block).copied().filter(|idom| *idom != block)
    }

    /// Whether `a` dominates `b`. Every block dominates itself.
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.immediate_dominator(current) {
                Some(next) => current = next,
                None => return false,
            }
        }
    }
}

fn intersect(
    idom: &HashMap<BlockId, BlockId>,
    rpo_index: &HashMap<BlockId, usize>,
    mut a: BlockId,
    mut b: BlockId,
) -> BlockId {
    while a != b {
        while rpo_index[&a] > rpo_index[&b] {
            a = idom[&a];
        }
        while rpo_index[&b] > rpo_index[&a] {
            b = idom[&b];
        }
    }
    a
}
