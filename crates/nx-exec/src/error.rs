use thiserror::Error;

use nx_model::LoadError;
use nx_tensor::TensorError;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("no model loaded")]
    NotLoaded,
    #[error("a model is already loaded; inputs must be bound before loading")]
    AlreadyLoaded,
    #[error("unknown tensor: {0}")]
    UnknownTensor(String),
    #[error("tensor '{0}' has no data; load it (or run) first")]
    UninitializedSlot(String),
    #[error("size mismatch for '{name}': expected {expected} elements, got {got}")]
    SizeMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("target mismatch: session runs on {expected}, data given for {got}")]
    TargetMismatch { expected: String, got: String },
    #[error("device error: {0}")]
    Device(String),
    #[error("load error: {0}")]
    Load(#[from] LoadError),
    #[error("kernel failed in {step}: {source}")]
    Kernel {
        step: String,
        #[source]
        source: TensorError,
    },
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
