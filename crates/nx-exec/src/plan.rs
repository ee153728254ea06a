//! Compiles a graph into an executable plan bound to a tensor store.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use nx_model::{Graph, Op};
use nx_tensor::{ComputeBackend, Target, TensorRef};

use crate::config::CompileOptions;
use crate::error::{Result, RuntimeError};
use crate::kernels::dispatch;
use crate::memory::MemoryPlan;
use crate::passes::{self, PassReport};
use crate::store::{Loc, SlotKind, TensorStore};

/// One compiled operation.
#[derive(Debug, Clone)]
pub struct Step {
    pub op: Op,
    pub inputs: Vec<Loc>,
    pub input_dims: Vec<Vec<usize>>,
    /// Output buffer id.
    pub output: usize,
    pub output_dims: Vec<usize>,
}

/// Compilation summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecStats {
    /// Compute operators in the loaded graph.
    pub ops_before: usize,
    /// Steps in the compiled plan.
    pub ops_after: usize,
    pub folded_batch_norms: usize,
    pub fused_activations: usize,
    pub buffers: usize,
    pub buffer_bytes: usize,
    pub param_bytes: usize,
}

impl ExecStats {
    pub fn planned_bytes(&self) -> usize {
        self.buffer_bytes + self.param_bytes
    }
}

/// Steps in execution order.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub steps: Vec<Step>,
}

impl ExecutionPlan {
    /// Optimizes `graph` for `target`, plans memory, and allocates the store.
    ///
    /// `outputs` are the caller's bound outputs; they and the fetch targets
    /// stay materialized.
    pub fn compile(
        graph: &Graph,
        target: &Target,
        options: &CompileOptions,
        outputs: &[String],
    ) -> Result<(ExecutionPlan, TensorStore, ExecStats)> {
        let mut protected: HashSet<String> = graph.fetches.iter().cloned().collect();
        protected.extend(outputs.iter().cloned());

        let mut g = graph.clone();
        let report: PassReport = passes::optimize(&mut g, options, &protected);
        let memory = MemoryPlan::build(&g, &protected, options.reuse_buffers);

        let layout = target.layout();
        let mut param_index = HashMap::new();
        let mut params = Vec::with_capacity(g.params.len());
        for (name, tensor) in &g.params {
            param_index.insert(name.as_str(), params.len());
            params.push(layout.host_to_device(tensor.data(), tensor.shape().dims()));
        }

        let stats = ExecStats {
            ops_before: graph.compute_op_count(),
            ops_after: g.ops.len(),
            folded_batch_norms: report.folded_batch_norms,
            fused_activations: report.fused_activations,
            buffers: memory.buffer_count(),
            buffer_bytes: memory.total_bytes(),
            param_bytes: params.iter().map(Vec::len).sum::<usize>() * std::mem::size_of::<f32>(),
        };
        if let Some(capacity) = target.device_memory {
            if stats.planned_bytes() > capacity {
                return Err(RuntimeError::Device(format!(
                    "plan needs {} bytes but {} has {} bytes of device memory",
                    stats.planned_bytes(),
                    target,
                    capacity
                )));
            }
        }

        let locate = |name: &str| -> Result<Loc> {
            if let Some(&i) = param_index.get(name) {
                Ok(Loc::Param(i))
            } else {
                memory
                    .buffer(name)
                    .map(Loc::Buffer)
                    .ok_or_else(|| RuntimeError::UnknownTensor(name.to_string()))
            }
        };
        let dims = |name: &str| -> Result<Vec<usize>> {
            g.shape(name)
                .map(|s| s.dims().to_vec())
                .ok_or_else(|| RuntimeError::UnknownTensor(name.to_string()))
        };

        let mut steps = Vec::with_capacity(g.ops.len());
        for op in &g.ops {
            let out = op
                .output()
                .ok_or_else(|| RuntimeError::Device(format!("{} produces nothing", op.describe())))?;
            let output = match locate(out)? {
                Loc::Buffer(id) => id,
                Loc::Param(_) => return Err(RuntimeError::Device(format!("{} writes a parameter", op.describe()))),
            };
            steps.push(Step {
                op: op.clone(),
                inputs: op.inputs.iter().map(|n| locate(n)).collect::<Result<_>>()?,
                input_dims: op.inputs.iter().map(|n| dims(n)).collect::<Result<_>>()?,
                output,
                output_dims: dims(out)?,
            });
        }

        let mut store = TensorStore::new(layout, &memory.buffer_sizes, params);
        for feed in &g.feeds {
            let shape = g.shape(feed).cloned().ok_or_else(|| RuntimeError::UnknownTensor(feed.clone()))?;
            store.add_slot(feed, SlotKind::Input, shape, locate(feed)?);
        }
        for name in &protected {
            if store.slot(name).is_some() {
                continue;
            }
            let shape = g.shape(name).cloned().ok_or_else(|| RuntimeError::UnknownTensor(name.clone()))?;
            store.add_slot(name, SlotKind::Output, shape, locate(name)?);
        }

        tracing::info!(
            target = %target,
            ops_before = stats.ops_before,
            ops_after = stats.ops_after,
            folded = stats.folded_batch_norms,
            fused = stats.fused_activations,
            buffers = stats.buffers,
            planned_bytes = stats.planned_bytes(),
            allocated_bytes = store.bytes(),
            "compiled"
        );
        Ok((ExecutionPlan { steps }, store, stats))
    }

    /// Executes every step against `store`.
    pub fn run(&self, backend: &dyn ComputeBackend, store: &mut TensorStore) -> Result<()> {
        for step in &self.steps {
            let numel: usize = step.output_dims.iter().product();
            let mut out = store.take_buffer(step.output);
            let result = {
                let inputs: Vec<TensorRef<'_>> = step
                    .inputs
                    .iter()
                    .zip(&step.input_dims)
                    .map(|(&loc, dims)| TensorRef::new(store.data(loc, dims.iter().product()), dims))
                    .collect();
                dispatch(backend, &step.op, &inputs, &step.output_dims, &mut out[..numel])
            };
            store.restore_buffer(step.output, out);
            result.map_err(|source| RuntimeError::Kernel {
                step: step.op.describe(),
                source,
            })?;
        }
        store.mark_outputs_written();
        Ok(())
    }
}
