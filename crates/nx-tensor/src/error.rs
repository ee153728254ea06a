use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("{what}: expected {expected} elements, got {got}")]
    LengthMismatch {
        what: String,
        expected: usize,
        got: usize,
    },
    #[error("cannot broadcast {b:?} onto {a:?} at axis {axis}")]
    BroadcastError {
        a: Vec<usize>,
        b: Vec<usize>,
        axis: isize,
    },
    #[error("matmul dimension mismatch: [{m}x{k}] @ [{k2}x{n}]")]
    MatmulMismatch {
        m: usize,
        k: usize,
        k2: usize,
        n: usize,
    },
    #[error("unsupported dtype: {0}")]
    UnsupportedDType(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;
