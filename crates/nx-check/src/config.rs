//! Harness configuration loaded from TOML.
//!
//! ```toml
//! input_name = "image"
//! input_shape = [1, 3, 224, 224]
//! output_name = "save_infer_model/scale_0"
//! atol = 1e-3
//! seed = 42
//! repeat = 10
//! combined = true
//!
//! [compile]
//! fold_batch_norm = true
//! fuse_activations = true
//! reuse_buffers = true
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use nx_exec::CompileOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Graph input the random data is loaded into.
    pub input_name: String,
    pub input_shape: Vec<usize>,
    /// Value compared against the reference.
    pub output_name: String,
    /// Absolute tolerance.
    pub atol: f32,
    /// Relative tolerance, scaled by the reference value.
    pub rtol: f32,
    /// Input RNG seed; drawn at random when absent.
    pub seed: Option<u64>,
    /// Timed runs after the preheat run.
    pub repeat: usize,
    /// Weights in one `params` file rather than one file per tensor.
    pub combined: bool,
    pub compile: CompileOptions,
}

impl Default for CheckConfig {
    fn default() -> Self {
        CheckConfig {
            input_name: "image".to_string(),
            input_shape: vec![1, 3, 224, 224],
            output_name: "save_infer_model/scale_0".to_string(),
            atol: 1e-3,
            rtol: 0.0,
            seed: None,
            repeat: 1,
            combined: true,
            compile: CompileOptions::default(),
        }
    }
}

impl CheckConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config '{}'", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("invalid config '{}'", path.display()))
    }

    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        let config: CheckConfig = toml::from_str(toml_str).context("TOML parse error")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("TOML serialise error")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.input_shape.is_empty(), "input_shape must not be empty");
        anyhow::ensure!(
            self.input_shape.iter().all(|&d| d > 0),
            "input_shape {:?} has a zero dim",
            self.input_shape
        );
        anyhow::ensure!(
            self.atol >= 0.0 && self.rtol >= 0.0,
            "tolerances must be non-negative (atol {}, rtol {})",
            self.atol,
            self.rtol
        );
        Ok(())
    }
}
