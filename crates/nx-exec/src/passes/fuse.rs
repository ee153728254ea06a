use std::collections::HashSet;

use nx_model::{Graph, OpKind};

use super::sole_edge;

/// Merges a relu or sigmoid into the epilogue of the conv, batch-norm or
/// elementwise op feeding it. Returns the number of fused activations.
pub fn fuse_activations(graph: &mut Graph, protected: &HashSet<String>) -> usize {
    let mut fused = 0;
    let mut i = 0;
    while i < graph.ops.len() {
        let OpKind::Activation(act) = graph.ops[i].kind else {
            i += 1;
            continue;
        };
        let producer = sole_edge(graph, &graph.ops[i].inputs[0], i, protected)
            .filter(|&p| graph.ops[p].accepts_activation());
        let Some(p) = producer else {
            i += 1;
            continue;
        };

        let out = graph.ops[i].outputs[0].clone();
        let target = &mut graph.ops[p];
        match &mut target.kind {
            OpKind::Conv2d { params, .. } => params.activation = act,
            OpKind::BatchNorm { activation, .. } | OpKind::Elementwise { activation, .. } => *activation = act,
            _ => {
                i += 1;
                continue;
            }
        }
        target.outputs = vec![out];
        graph.ops.remove(i);
        fused += 1;
    }
    fused
}
