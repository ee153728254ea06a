//! `nx-exec` - Compiles and runs nx-runtime graphs.
//!
//! The [`Executor`] loads a model directory, rewrites the graph (batch-norm
//! folding, activation fusion, dead-step elimination), plans buffer reuse and
//! executes the plan on the session's [`nx_tensor::Target`]. The
//! [`reference`] module evaluates the same graph without any of that.

pub mod config;
pub mod error;
pub mod executor;
pub mod kernels;
pub mod memory;
pub mod passes;
pub mod plan;
pub mod reference;
pub mod store;

pub use config::CompileOptions;
pub use error::{Result, RuntimeError};
pub use executor::Executor;
pub use memory::MemoryPlan;
pub use plan::{ExecStats, ExecutionPlan};
pub use store::TensorStore;
