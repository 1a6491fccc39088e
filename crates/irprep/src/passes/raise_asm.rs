// Inline assembly raising: turn recognizable asm snippets into IR.

use crate::ir::{Callee, InstKind, Module};

/// Whether an inline asm call is a pure compiler barrier
/// (`asm volatile("" ::: "memory")`).
fn is_compiler_barrier(asm: &str, constraints: &str) -> bool {
    asm.trim().is_empty() && constraints.split(',').any(|c| c.trim() == "~{memory}")
}

/// Rewrite compiler-barrier inline asm into `fence`. Other asm is left as is.
///
/// Returns the number of rewritten calls.
pub fn raise_inline_asm(module: &mut Module) -> usize {
    let mut raised = 0;
    for func in module.definitions_mut() {
        for inst in func.instructions_mut() {
            let InstKind::Call {
                callee: Callee::InlineAsm { asm, constraints },
                args,
            } = &inst.kind
            else {
                continue;
            };
            if args.is_empty() && inst.ty.is_void() && is_compiler_barrier(asm, constraints) {
                inst.kind = InstKind::Fence;
                raised += 1;
            }
        }
    }
    if raised > 0 {
        tracing::debug!("raised {raised} inline asm barrier(s) to fences");
    }
    raised
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Type};

    #[test]
    fn memory_barrier_becomes_fence() {
        let mut b = FunctionBuilder::new("main", &[], Type::Void);
        b.inline_asm("", "~{memory},~{dirflag}");
        b.inline_asm("nop", "~{memory}");
        b.ret(None);
        let mut module = crate::ir::Module::new("m");
        module.functions.push(b.finish());

        assert_eq!(raise_inline_asm(&mut module), 1);
        let insts = &module.functions[0].blocks[0].insts;
        assert_eq!(insts[0].kind, InstKind::Fence);
        assert!(matches!(insts[1].kind, InstKind::Call { .. }));
    }
}
