// Function deduplication.
//
// Functions whose bodies are identical up to value/block numbering, names and
// debug locations are merged: one definition is kept and every other one
// becomes an alias of it. Direct calls and symbol references are redirected
// to the kept definition, which can expose further duplicates, so the pass
// repeats until nothing new merges.

use std::collections::{BTreeMap, HashMap};

use crate::ir::{
    Alias, BlockId, Callee, Constant, Function, InstKind, Linkage, Module, Operand, ValueId,
};

/// Merge structurally identical definitions. Preserved functions and
/// declarations never merge. Returns the number of functions turned into
/// aliases.
pub fn deduplicate_functions(module: &mut Module, entry_point: &str) -> usize {
    let mut merged = 0;
    loop {
        let renames = find_duplicates(module, entry_point);
        if renames.is_empty() {
            break;
        }
        merged += renames.len();
        apply_renames(module, &renames);
    }
    if merged > 0 {
        tracing::debug!("merged {merged} duplicate function(s)");
    }
    merged
}

/// Duplicate name -> kept definition.
fn find_duplicates(module: &Module, entry_point: &str) -> BTreeMap<String, String> {
    let mut groups: Vec<(Function, Vec<&Function>)> = Vec::new();
    for func in module.definitions().filter(|f| !f.preserved) {
        let key = fingerprint(func);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(func),
            None => groups.push((key, vec![func])),
        }
    }
    let mut renames = BTreeMap::new();
    for (_, members) in groups.into_iter().filter(|(_, m)| m.len() > 1) {
        let kept = members
            .iter()
            .find(|f| f.name == entry_point)
            .unwrap_or(&members[0])
            .name
            .clone();
        for func in members.iter().filter(|f| f.name != kept) {
            renames.insert(func.name.clone(), kept.clone());
        }
    }
    renames
}

/// Canonical copy of `func`: anonymous, values numbered in definition order,
/// blocks numbered by layout position, no names or debug locations.
#[must_use]
pub fn fingerprint(func: &Function) -> Function {
    let mut values: HashMap<ValueId, ValueId> = HashMap::new();
    let mut value_types = Vec::new();
    let mut define = |id: ValueId, values: &mut HashMap<ValueId, ValueId>| {
        let next = ValueId(value_types.len() as u32);
        value_types.push(func.value_type(id));
        values.insert(id, next);
        next
    };
    let params: Vec<ValueId> = func.params.iter().map(|p| define(*p, &mut values)).collect();
    for inst in func.instructions() {
        if let Some(result) = inst.result {
            define(result, &mut values);
        }
    }
    let blocks: HashMap<BlockId, BlockId> = func
        .blocks
        .iter()
        .enumerate()
        .map(|(i, b)| (b.id, BlockId(i as u32)))
        .collect();
    let unknown_block = BlockId(u32::MAX);

    let mut canon = func.clone();
    canon.name.clear();
    canon.linkage = Linkage::External;
    canon.params = params;
    canon.value_types = value_types;
    canon.value_names.clear();
    let rename_value = |op: &mut Operand| {
        if let Operand::Value(id) = op {
            *id = values.get(id).copied().unwrap_or(ValueId(u32::MAX));
        }
    };
    canon.for_each_operand_mut(rename_value);
    for block in &mut canon.blocks {
        block.id = blocks.get(&block.id).copied().unwrap_or(unknown_block);
        for inst in &mut block.insts {
            inst.debug_loc = None;
            inst.result = inst.result.and_then(|r| values.get(&r).copied());
            if let InstKind::Phi { incoming } = &mut inst.kind {
                for (_, pred) in incoming {
                    *pred = blocks.get(pred).copied().unwrap_or(unknown_block);
                }
            }
        }
        block
            .term
            .map_successors(|succ| blocks.get(&succ).copied().unwrap_or(unknown_block));
    }
    canon
}

fn rename_constant(constant: &mut Constant, renames: &BTreeMap<String, String>) {
    match constant {
        Constant::Symbol(name) => {
            if let Some(kept) = renames.get(name.as_str()) {
                name.clone_from(kept);
            }
        }
        Constant::Vector(lanes) => {
            for lane in lanes {
                rename_constant(lane, renames);
            }
        }
        _ => {}
    }
}

fn apply_renames(module: &mut Module, renames: &BTreeMap<String, String>) {
    let mut aliases = Vec::new();
    module.functions.retain(|func| match renames.get(&func.name) {
        Some(kept) => {
            aliases.push(Alias {
                name: func.name.clone(),
                linkage: func.linkage,
                target: kept.clone(),
            });
            false
        }
        None => true,
    });
    module.aliases.extend(aliases);

    for func in &mut module.functions {
        func.for_each_operand_mut(|op| {
            if let Operand::Const(constant) = op {
                rename_constant(constant, renames);
            }
        });
        for inst in func.instructions_mut() {
            if let InstKind::Call {
                callee: Callee::Direct(name),
                ..
            } = &mut inst.kind
                && let Some(kept) = renames.get(name.as_str())
            {
                name.clone_from(kept);
            }
        }
    }
    for global in &mut module.globals {
        for field in &mut global.init {
            rename_constant(field, renames);
        }
    }
    for alias in &mut module.aliases {
        if alias.name != alias.target
            && let Some(kept) = renames.get(&alias.target)
        {
            alias.target.clone_from(kept);
        }
    }
    for record in module.ctors.iter_mut().chain(module.dtors.iter_mut()) {
        if let Some(kept) = renames.get(&record.function) {
            record.function.clone_from(kept);
        }
    }
}
