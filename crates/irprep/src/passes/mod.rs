// Module transformation passes.
//
// Every pass is a plain function over `&mut Module` (or `&Module` for the
// read-only checks) returning how much it changed. Ordering lives in
// `crate::pipeline`.

mod audit;
mod dedup;
mod guards;
mod intrinsics;
mod lower_atomic;
mod lower_switch;
mod phi_cleanup;
mod raise_asm;
mod scalarize;
mod simplify_cfg;
mod static_init;
mod verify;

pub use audit::audit_operand_types;
pub use dedup::{deduplicate_functions, fingerprint};
pub use guards::{GuardKind, insert_div_zero_guards, insert_overshift_guards, is_guarded_op};
pub use intrinsics::{is_allowed_intrinsic, normalize_intrinsics};
pub use lower_atomic::lower_atomics;
pub use lower_switch::{CaseRange, cluster, lower_switches};
pub use phi_cleanup::normalize_phis;
pub use raise_asm::raise_inline_asm;
pub use scalarize::scalarize;
pub use simplify_cfg::{remove_unreachable_blocks, simplify_cfg, simplify_function_cfg};
pub use static_init::{CTORS_WRAPPER, DTORS_WRAPPER, inject_static_initializers};
pub use verify::{check_module, verify_module};
