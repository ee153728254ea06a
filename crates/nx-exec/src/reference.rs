//! Straightforward host interpretation of an uncompiled graph.
//!
//! No passes, no buffer reuse: every value gets a fresh tensor, and every
//! kernel runs on the host backend in host layout. Compiled execution on
//! any target is checked against this.

use std::collections::BTreeMap;

use nx_model::{Graph, OpKind};
use nx_tensor::{CpuBackend, Tensor, TensorRef};

use crate::error::{Result, RuntimeError};
use crate::kernels::dispatch;

/// Evaluates `graph` on `inputs` (one tensor per feed, host order) and
/// returns every value it computed, feeds included.
pub fn evaluate(graph: &Graph, inputs: &[(String, Tensor)]) -> Result<BTreeMap<String, Tensor>> {
    let backend = CpuBackend::new();
    let mut values: BTreeMap<String, Tensor> = BTreeMap::new();

    for feed in &graph.feeds {
        let (_, tensor) = inputs
            .iter()
            .find(|(n, _)| n == feed)
            .ok_or_else(|| RuntimeError::UninitializedSlot(feed.clone()))?;
        let expected = graph.shape(feed).ok_or_else(|| RuntimeError::UnknownTensor(feed.clone()))?;
        if tensor.numel() != expected.numel() {
            return Err(RuntimeError::SizeMismatch {
                name: feed.clone(),
                expected: expected.numel(),
                got: tensor.numel(),
            });
        }
        let tensor = tensor
            .clone()
            .reshape(expected.clone())
            .map_err(|e| RuntimeError::Device(e.to_string()))?;
        values.insert(feed.clone(), tensor);
    }

    for op in &graph.ops {
        if matches!(op.kind, OpKind::Feed | OpKind::Fetch) {
            continue;
        }
        let Some(out_name) = op.output() else {
            continue;
        };
        let out_shape = graph
            .shape(out_name)
            .ok_or_else(|| RuntimeError::UnknownTensor(out_name.to_string()))?;
        let mut out = Tensor::zeros(out_shape.clone());
        {
            let operands = op
                .inputs
                .iter()
                .map(|n| {
                    values
                        .get(n)
                        .or_else(|| graph.param(n))
                        .map(|t| TensorRef::new(t.data(), t.shape().dims()))
                        .ok_or_else(|| RuntimeError::UnknownTensor(n.clone()))
                })
                .collect::<Result<Vec<_>>>()?;
            dispatch(&backend, op, &operands, out_shape.dims(), out.data_mut()).map_err(|source| {
                RuntimeError::Kernel {
                    step: op.describe(),
                    source,
                }
            })?;
        }
        values.insert(out_name.to_string(), out);
    }
    tracing::debug!(values = values.len(), "reference evaluation done");
    Ok(values)
}
