#![allow(
    clippy::cast_possible_truncation, // lane counts and value ids are u32, vectors index with usize
    clippy::cast_possible_wrap, // integer constants are raw u64 bits reinterpreted as signed
    clippy::cast_sign_loss, // same, in the other direction
    clippy::too_many_lines, // pass bodies and the evaluator dispatch are long matches
    clippy::missing_errors_doc // every fallible operation returns crate::Error
)]

pub mod config;
pub mod error;
pub mod ir;
pub mod optimize;
pub mod passes;
pub mod pipeline;

/// Test harness module for writing unit and integration tests.
///
/// This module is only available when running tests or when the
/// `test-harness` feature is enabled.
#[cfg(any(test, feature = "test-harness"))]
pub mod test_harness;

pub use config::{PipelineConfig, SwitchImpl};
pub use error::{Error, Result};
pub use ir::Module;
pub use pipeline::{instrument_and_verify, optimize_and_prepare, prepare};
