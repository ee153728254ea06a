//! Graph rewrites applied before memory planning.
//!
//! Every pass works on an owned copy of the model's graph. Values in the
//! protected set (fetch targets and bound outputs) are never folded away.

mod dce;
mod fold_bn;
mod fuse;

use std::collections::HashSet;

use nx_model::Graph;

use crate::config::CompileOptions;

pub use dce::eliminate_dead_steps;
pub use fold_bn::fold_batch_norm;
pub use fuse::fuse_activations;

/// What the passes changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub folded_batch_norms: usize,
    pub fused_activations: usize,
    pub eliminated: usize,
}

/// Runs the enabled passes in order: batch-norm folding, activation fusion,
/// dead-step elimination.
pub fn optimize(graph: &mut Graph, options: &CompileOptions, protected: &HashSet<String>) -> PassReport {
    let mut report = PassReport::default();
    if options.fold_batch_norm {
        report.folded_batch_norms = fold_batch_norm(graph, protected);
        tracing::debug!(folded = report.folded_batch_norms, "batch-norm folding");
    }
    if options.fuse_activations {
        report.fused_activations = fuse_activations(graph, protected);
        tracing::debug!(fused = report.fused_activations, "activation fusion");
    }
    report.eliminated = eliminate_dead_steps(graph, protected);
    tracing::debug!(eliminated = report.eliminated, remaining = graph.ops.len(), "dead-step elimination");
    report
}

/// The op at `producer` writes `value`, which only the op at `consumer`
/// reads and which nobody outside the graph observes.
fn sole_edge(graph: &Graph, value: &str, consumer: usize, protected: &HashSet<String>) -> Option<usize> {
    if protected.contains(value) || graph.feeds.iter().any(|f| f == value) {
        return None;
    }
    if graph.consumers(value) != [consumer] {
        return None;
    }
    graph.producer(value)
}
