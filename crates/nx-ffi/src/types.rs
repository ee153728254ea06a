use nx_exec::RuntimeError;

/// Status codes returned by all FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NxStatus {
    Ok = 0,
    ErrorInvalidArgument = 1,
    ErrorModelLoad = 2,
    ErrorNotLoaded = 3,
    ErrorUnknownTensor = 4,
    ErrorSizeMismatch = 5,
    ErrorRun = 6,
    ErrorDevice = 7,
    ErrorInternal = 8,
}

impl From<&RuntimeError> for NxStatus {
    fn from(e: &RuntimeError) -> Self {
        match e {
            RuntimeError::NotLoaded | RuntimeError::AlreadyLoaded => NxStatus::ErrorNotLoaded,
            RuntimeError::UnknownTensor(_) => NxStatus::ErrorUnknownTensor,
            RuntimeError::SizeMismatch { .. } => NxStatus::ErrorSizeMismatch,
            RuntimeError::UninitializedSlot(_) | RuntimeError::Kernel { .. } => NxStatus::ErrorRun,
            RuntimeError::TargetMismatch { .. } | RuntimeError::Device(_) => NxStatus::ErrorDevice,
            RuntimeError::Load(_) => NxStatus::ErrorModelLoad,
        }
    }
}

/// Execution target selector.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub enum NxTargetKind {
    Host = 0,
    Accelerator = 1,
}
