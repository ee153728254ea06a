//! Liveness-based buffer assignment.

use std::collections::{HashMap, HashSet};

use nx_model::Graph;

/// Which buffer holds each non-parameter value, and how large each buffer is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryPlan {
    /// Buffer capacities in elements.
    pub buffer_sizes: Vec<usize>,
    pub assignment: HashMap<String, usize>,
}

impl MemoryPlan {
    /// Plans buffers for `graph` (already optimized, in execution order).
    ///
    /// Graph inputs and every value in `dedicated` get a buffer of their own.
    /// With `reuse`, a buffer is released after the last step reading its
    /// value and handed to the next value that fits, preferring the smallest
    /// such buffer.
    pub fn build(graph: &Graph, dedicated: &HashSet<String>, reuse: bool) -> MemoryPlan {
        let mut plan = MemoryPlan::default();
        let numel = |name: &str| graph.shape(name).map(|s| s.numel()).unwrap_or(0);

        let mut last_use: HashMap<&str, usize> = HashMap::new();
        for (step, op) in graph.ops.iter().enumerate() {
            for input in &op.inputs {
                last_use.insert(input.as_str(), step);
            }
        }

        for feed in &graph.feeds {
            plan.allocate(feed, numel(feed));
        }

        let mut free: Vec<usize> = Vec::new();
        for (step, op) in graph.ops.iter().enumerate() {
            for out in &op.outputs {
                let size = numel(out);
                let pinned = !reuse || dedicated.contains(out);
                match (pinned, plan.best_fit(&free, size)) {
                    (false, Some(pos)) => {
                        let id = free.swap_remove(pos);
                        plan.assignment.insert(out.clone(), id);
                    }
                    _ => plan.allocate(out, size),
                }
            }
            if !reuse {
                continue;
            }
            let released = op
                .inputs
                .iter()
                .chain(op.outputs.iter().filter(|o| !last_use.contains_key(o.as_str())))
                .filter(|v| last_use.get(v.as_str()).map_or(true, |&s| s == step))
                .filter(|v| !dedicated.contains(*v) && !graph.feeds.contains(*v));
            for value in released {
                if let Some(&id) = plan.assignment.get(value) {
                    if !free.contains(&id) {
                        free.push(id);
                    }
                }
            }
        }
        plan
    }

    fn allocate(&mut self, name: &str, size: usize) {
        self.assignment.insert(name.to_string(), self.buffer_sizes.len());
        self.buffer_sizes.push(size);
    }

    /// Position in `free` of the smallest buffer holding at least `size`.
    fn best_fit(&self, free: &[usize], size: usize) -> Option<usize> {
        free.iter()
            .enumerate()
            .filter(|(_, &id)| self.buffer_sizes[id] >= size)
            .min_by_key(|(_, &id)| (self.buffer_sizes[id], id))
            .map(|(pos, _)| pos)
    }

    pub fn buffer(&self, name: &str) -> Option<usize> {
        self.assignment.get(name).copied()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffer_sizes.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.buffer_sizes.iter().sum::<usize>() * std::mem::size_of::<f32>()
    }
}
