use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use nx_model::{Model, ModelLoader};
use nx_tensor::{create_backend, ComputeBackend, Shape, Target, Tensor};

use crate::config::CompileOptions;
use crate::error::{Result, RuntimeError};
use crate::plan::{ExecStats, ExecutionPlan};
use crate::store::TensorStore;

struct LoadedModel {
    model: Model,
    plan: ExecutionPlan,
    store: TensorStore,
    stats: ExecStats,
}

/// One inference session on a fixed target.
///
/// Inputs are bound before the model is loaded so their shapes drive shape
/// inference; outputs may be bound at any time. After `load_model`, the
/// cycle is `load_data` for every input, then `run`, then `read_output`,
/// repeated as often as needed.
pub struct Executor {
    target: Target,
    backend: Arc<dyn ComputeBackend>,
    options: CompileOptions,
    inputs: Vec<(String, Shape)>,
    outputs: Vec<String>,
    loaded: Option<LoadedModel>,
}

impl Executor {
    pub fn new(target: Target) -> Result<Self> {
        Self::with_options(target, CompileOptions::default())
    }

    pub fn with_options(target: Target, options: CompileOptions) -> Result<Self> {
        let backend = create_backend(&target).map_err(|e| RuntimeError::Device(e.to_string()))?;
        tracing::debug!(target = %target, backend = backend.name(), "executor created");
        Ok(Executor {
            target,
            backend,
            options,
            inputs: Vec::new(),
            outputs: Vec::new(),
            loaded: None,
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Registers input `name` with `shape`. Rebinding replaces the shape.
    pub fn bind_input(&mut self, name: &str, shape: impl Into<Shape>) -> Result<()> {
        if self.loaded.is_some() {
            return Err(RuntimeError::AlreadyLoaded);
        }
        let shape = shape.into();
        match self.inputs.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = shape,
            None => self.inputs.push((name.to_string(), shape)),
        }
        Ok(())
    }

    /// Registers output `name`. After loading, the name must be a value the
    /// compiled plan keeps.
    pub fn bind_output(&mut self, name: &str) -> Result<()> {
        if let Some(loaded) = &self.loaded {
            if loaded.store.slot(name).is_none() {
                return Err(RuntimeError::UnknownTensor(name.to_string()));
            }
        }
        if !self.outputs.iter().any(|n| n == name) {
            self.outputs.push(name.to_string());
        }
        Ok(())
    }

    /// Loads, compiles and allocates the model in `dir`.
    pub fn load_model(&mut self, dir: &Path, combined: bool) -> Result<()> {
        if self.loaded.is_some() {
            return Err(RuntimeError::AlreadyLoaded);
        }
        let start = Instant::now();
        let model = ModelLoader::load_with_inputs(dir, combined, &self.inputs)?;
        for name in &self.outputs {
            if model.graph.shape(name).is_none() {
                return Err(RuntimeError::UnknownTensor(name.clone()));
            }
        }
        let (plan, store, stats) = ExecutionPlan::compile(&model.graph, &self.target, &self.options, &self.outputs)?;
        tracing::info!(
            dir = %dir.display(),
            steps = plan.steps.len(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1e3,
            "model ready"
        );
        self.loaded = Some(LoadedModel {
            model,
            plan,
            store,
            stats,
        });
        Ok(())
    }

    fn loaded(&self) -> Result<&LoadedModel> {
        self.loaded.as_ref().ok_or(RuntimeError::NotLoaded)
    }

    /// Copies host-order `data` into input `name`, converting it to the
    /// device layout of `target`, which must be the session's target.
    pub fn load_data(&mut self, name: &str, data: &[f32], target: &Target) -> Result<()> {
        let loaded = self.loaded.as_mut().ok_or(RuntimeError::NotLoaded)?;
        if *target != self.target {
            return Err(RuntimeError::TargetMismatch {
                expected: self.target.to_string(),
                got: target.to_string(),
            });
        }
        loaded.store.write_host(name, data)
    }

    /// Executes the compiled plan once against the current inputs.
    pub fn run(&mut self) -> Result<()> {
        let loaded = self.loaded.as_mut().ok_or(RuntimeError::NotLoaded)?;
        if let Some(name) = loaded.store.uninitialized_input() {
            return Err(RuntimeError::UninitializedSlot(name.to_string()));
        }
        let start = Instant::now();
        loaded.plan.run(self.backend.as_ref(), &mut loaded.store)?;
        tracing::debug!(elapsed_ms = start.elapsed().as_secs_f64() * 1e3, "run complete");
        Ok(())
    }

    /// Reads a bound output, fetch target or input back in host order.
    pub fn read_output(&self, name: &str) -> Result<Tensor> {
        self.loaded()?.store.read_host(name)
    }

    /// Shape of any value of the loaded graph.
    pub fn tensor_shape(&self, name: &str) -> Result<Shape> {
        self.loaded()?
            .model
            .graph
            .shape(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownTensor(name.to_string()))
    }

    pub fn stats(&self) -> Result<&ExecStats> {
        Ok(&self.loaded()?.stats)
    }

    /// The loaded model, uncompiled.
    pub fn model(&self) -> Result<&Model> {
        Ok(&self.loaded()?.model)
    }

    /// Names of the graph's fetch targets.
    pub fn fetch_names(&self) -> Result<&[String]> {
        Ok(&self.loaded()?.model.graph.fetches)
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("target", &self.target)
            .field("backend", &self.backend.name())
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("loaded", &self.loaded.is_some())
            .finish()
    }
}
