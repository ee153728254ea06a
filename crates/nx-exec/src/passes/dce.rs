use std::collections::HashSet;

use nx_model::{Graph, OpKind};

/// Drops feed/fetch markers and every step whose outputs never reach a
/// protected value, then prunes parameters nothing reads. Returns the number
/// of removed steps.
pub fn eliminate_dead_steps(graph: &mut Graph, protected: &HashSet<String>) -> usize {
    let before = graph.ops.len();
    let mut live: HashSet<String> = protected.clone();
    let mut keep = vec![false; graph.ops.len()];
    for (i, op) in graph.ops.iter().enumerate().rev() {
        if matches!(op.kind, OpKind::Feed | OpKind::Fetch) {
            continue;
        }
        if op.outputs.iter().any(|o| live.contains(o)) {
            keep[i] = true;
            live.extend(op.inputs.iter().cloned());
        }
    }
    let mut flags = keep.into_iter();
    graph.ops.retain(|_| flags.next().unwrap_or(false));
    graph.params.retain(|name, _| live.contains(name));
    before - graph.ops.len()
}
