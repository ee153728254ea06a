use serde::{Deserialize, Serialize};

/// Switches for the compile passes. Every pass is on by default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Fold inference batch norms into the preceding convolution.
    pub fold_batch_norm: bool,
    /// Merge relu/sigmoid into the producing kernel's epilogue.
    pub fuse_activations: bool,
    /// Share buffers between values with disjoint lifetimes.
    pub reuse_buffers: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            fold_batch_norm: true,
            fuse_activations: true,
            reuse_buffers: true,
        }
    }
}

impl CompileOptions {
    /// Every pass disabled: the plan mirrors the graph one step per operator.
    pub fn none() -> Self {
        CompileOptions {
            fold_batch_norm: false,
            fuse_activations: false,
            reuse_buffers: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_table_keeps_defaults() {
        let opts: CompileOptions = serde_json::from_str(r#"{"fuse_activations": false}"#).unwrap();
        assert!(opts.fold_batch_norm);
        assert!(!opts.fuse_activations);
        assert!(opts.reuse_buffers);
    }
}
