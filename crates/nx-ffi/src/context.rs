use nx_exec::Executor;
use nx_tensor::Target;

use crate::types::NxTargetKind;

/// Opaque handle owning one executor session.
pub struct NxExecutor {
    pub executor: Executor,
}

impl NxExecutor {
    pub fn new(kind: NxTargetKind) -> nx_exec::Result<Self> {
        let target = match kind {
            NxTargetKind::Host => Target::default_host(),
            NxTargetKind::Accelerator => Target::default_accelerator(),
        };
        Ok(Self {
            executor: Executor::new(target)?,
        })
    }
}
