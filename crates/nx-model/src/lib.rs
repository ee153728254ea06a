//! `nx-model` - Model loading for nx-runtime.
//!
//! A model directory holds a JSON program description (`model.json`) and
//! its parameters in one combined container or one container per tensor.
//! Loading parses the operators, orders them topologically and infers every
//! value's shape, producing an immutable [`Graph`].

pub mod error;
pub mod graph;
pub mod loader;
pub mod op;
pub mod params;
pub mod program;
pub mod synth;

pub use error::{LoadError, Result};
pub use graph::Graph;
pub use loader::{Model, ModelLoader};
pub use op::{Op, OpKind};
pub use params::{ParamsFile, ParamsWriter};
pub use program::{OpDesc, ProgramDesc, VarDesc};
pub use synth::{residual_cnn, SynthConfig, SynthModel};
