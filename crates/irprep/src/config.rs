use serde::{Deserialize, Serialize};

/// Prefix of the functions the interpreter recognizes and handles itself
/// (guard report hooks among them).
pub const RUNTIME_HOOK_PREFIX: &str = "__interp_";

/// How `switch` terminators reach the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchImpl {
    /// Leave switches in place; the interpreter dispatches them directly.
    Native,
    /// One equality comparison per case, in case order.
    Simple,
    /// Range clustering plus a binary search over case values.
    #[default]
    Canonical,
}

/// Pipeline configuration. Read-only for the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)] // mirrors the independent pipeline switches
pub struct PipelineConfig {
    pub check_div_zero: bool,
    pub check_overshift: bool,
    pub dont_verify: bool,
    /// When false, functions calling runtime hooks are marked preserved
    /// before optimization so their call sites stay intact.
    pub optimize_interpreter_calls: bool,
    pub optimize: bool,
    pub switch_impl: SwitchImpl,
    pub entry_point: String,
    /// Symbols exempt from internalization and dead-code removal.
    pub preserved_functions: Vec<String>,
    pub disable_inline: bool,
    pub disable_internalize: bool,
    pub verify_each: bool,
    pub strip: bool,
    pub strip_debug: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            check_div_zero: true,
            check_overshift: true,
            dont_verify: false,
            optimize_interpreter_calls: false,
            optimize: false,
            switch_impl: SwitchImpl::default(),
            entry_point: "main".to_string(),
            preserved_functions: Vec::new(),
            disable_inline: false,
            disable_internalize: false,
            verify_each: false,
            strip: false,
            strip_debug: false,
        }
    }
}

impl PipelineConfig {
    /// Whether `name` survives internalization: listed as preserved or the entry point.
    #[must_use]
    pub fn is_preserved_symbol(&self, name: &str) -> bool {
        name == self.entry_point || self.preserved_functions.iter().any(|p| p == name)
    }
}
