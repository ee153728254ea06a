use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing file: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("invalid program description: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid parameter container magic: expected 'NXPR', got {0:?}")]
    InvalidMagic([u8; 4]),
    #[error("unsupported parameter container version: {0}")]
    UnsupportedVersion(u32),
    #[error("unsupported parameter dtype id: {0}")]
    UnsupportedDType(u32),
    #[error("corrupt parameter container: {0}")]
    Corrupt(String),
    #[error("tensor not found: {0}")]
    TensorNotFound(String),
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),
    #[error("invalid attribute '{attr}' on {op}: {reason}")]
    InvalidAttribute {
        op: String,
        attr: String,
        reason: String,
    },
    #[error("shape mismatch for '{name}': declared {declared:?}, got {got:?}")]
    ShapeMismatch {
        name: String,
        declared: Vec<i64>,
        got: Vec<usize>,
    },
    #[error("incompatible operand shapes for {op}: {reason}")]
    IncompatibleShapes { op: String, reason: String },
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
    #[error("tensor error: {0}")]
    Tensor(#[from] nx_tensor::TensorError),
}

pub type Result<T> = std::result::Result<T, LoadError>;
