//! `nx-check` - Correctness harness for nx-runtime.
//!
//! Loads a model on the host or the accelerator, feeds it seeded random
//! input, times the runs and compares the output with the reference
//! evaluator (or a stored reference) element by element.

pub mod compare;
pub mod config;
pub mod harness;
pub mod input;

pub use compare::{compare, Comparison, Mismatch};
pub use config::CheckConfig;
pub use harness::{run_check, CheckReport, DataSources};
