//! Loads a model directory into a validated [`Graph`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use nx_tensor::{Shape, Tensor};

use crate::error::{LoadError, Result};
use crate::graph::Graph;
use crate::params::ParamsFile;
use crate::program::{ProgramDesc, COMBINED_PARAMS_FILE, PROGRAM_FILE};

/// A loaded model: its program description and the graph built from it.
#[derive(Debug, Clone)]
pub struct Model {
    pub dir: PathBuf,
    pub program: ProgramDesc,
    pub graph: Graph,
}

/// Reads model directories.
///
/// A directory holds `model.json` plus either one combined `params`
/// container or one container per parameter at `<dir>/<name>`.
pub struct ModelLoader;

impl ModelLoader {
    pub fn load(dir: &Path, combined: bool) -> Result<Model> {
        Self::load_with_inputs(dir, combined, &[])
    }

    /// Like [`ModelLoader::load`], with caller-provided input shapes taking
    /// precedence over the declared ones.
    pub fn load_with_inputs(dir: &Path, combined: bool, inputs: &[(String, Shape)]) -> Result<Model> {
        let start = Instant::now();
        if !dir.is_dir() {
            return Err(LoadError::MissingFile(dir.to_path_buf()));
        }
        let program = ProgramDesc::from_file(&dir.join(PROGRAM_FILE))?;
        let params = Self::load_params(dir, &program, combined)?;
        let graph = Graph::build(&program, params, inputs)?;
        tracing::info!(
            dir = %dir.display(),
            combined,
            ops = graph.ops.len(),
            params = graph.params.len(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1e3,
            "model loaded"
        );
        Ok(Model {
            dir: dir.to_path_buf(),
            program,
            graph,
        })
    }

    /// Reads every persistable variable of `program` from `dir`.
    pub fn load_params(dir: &Path, program: &ProgramDesc, combined: bool) -> Result<BTreeMap<String, Tensor>> {
        let mut params = BTreeMap::new();
        if combined {
            let file = ParamsFile::open(&dir.join(COMBINED_PARAMS_FILE))?;
            for name in program.persistable() {
                params.insert(name.to_string(), file.get_f32(name)?);
            }
            let unused = file.len().saturating_sub(params.len());
            if unused > 0 {
                tracing::warn!(unused, "combined parameter file holds undeclared tensors");
            }
        } else {
            for name in program.persistable() {
                let file = ParamsFile::open(&dir.join(name))?;
                params.insert(name.to_string(), file.get_f32(name)?);
            }
        }
        tracing::debug!(count = params.len(), combined, "parameters loaded");
        Ok(params)
    }
}
