//! Validated, topologically ordered computation graph.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use nx_tensor::{Shape, Tensor};

use crate::error::{LoadError, Result};
use crate::op::{Op, OpKind};
use crate::program::ProgramDesc;

/// An immutable graph: operators in execution order, every value's shape,
/// and the parameter tensors.
#[derive(Debug, Clone)]
pub struct Graph {
    pub name: String,
    /// Graph inputs, in feed order.
    pub feeds: Vec<String>,
    /// Graph outputs, in fetch order.
    pub fetches: Vec<String>,
    /// Operators in a valid execution order.
    pub ops: Vec<Op>,
    pub shapes: HashMap<String, Shape>,
    pub params: BTreeMap<String, Tensor>,
}

impl Graph {
    /// Parses the program's operators, orders them topologically and infers
    /// every value's shape.
    ///
    /// `feed_shapes` override the declared shapes of graph inputs. Unknown
    /// (`-1`) dims of a declared input shape that is not overridden are taken
    /// as 1.
    pub fn build(
        program: &ProgramDesc,
        params: BTreeMap<String, Tensor>,
        feed_shapes: &[(String, Shape)],
    ) -> Result<Graph> {
        let parsed = program
            .ops
            .iter()
            .map(Op::from_desc)
            .collect::<Result<Vec<_>>>()?;

        let mut feeds = program.feed.clone();
        let mut fetches = program.fetch.clone();
        for op in &parsed {
            match op.kind {
                OpKind::Feed => push_unique(&mut feeds, &op.outputs[0]),
                OpKind::Fetch => push_unique(&mut fetches, &op.inputs[0]),
                _ => {}
            }
        }
        if feeds.is_empty() {
            return Err(LoadError::InvalidGraph("program has no feed targets".to_string()));
        }
        if fetches.is_empty() {
            return Err(LoadError::InvalidGraph("program has no fetch targets".to_string()));
        }
        for (name, _) in feed_shapes {
            if !feeds.contains(name) {
                return Err(LoadError::InvalidGraph(format!("'{}' is not a feed target", name)));
            }
        }

        let ops = topo_sort(parsed, &params, &feeds)?;

        let mut shapes = HashMap::new();
        for (name, tensor) in &params {
            check_declared(program, name, tensor.shape())?;
            shapes.insert(name.clone(), tensor.shape().clone());
        }
        for name in &feeds {
            let shape = match feed_shapes.iter().find(|(n, _)| n == name) {
                Some((_, s)) => s.clone(),
                None => declared_feed_shape(program, name)?,
            };
            if !shape.is_positive() {
                return Err(LoadError::InvalidGraph(format!(
                    "feed '{}' has a zero dim: {}",
                    name, shape
                )));
            }
            check_declared(program, name, &shape)?;
            shapes.insert(name.clone(), shape);
        }

        for op in &ops {
            if matches!(op.kind, OpKind::Feed | OpKind::Fetch) {
                continue;
            }
            let inputs = op
                .inputs
                .iter()
                .map(|n| {
                    shapes
                        .get(n)
                        .ok_or_else(|| LoadError::InvalidGraph(format!("'{}' has no shape", n)))
                })
                .collect::<Result<Vec<_>>>()?;
            let shape = op.infer_shape(&inputs)?;
            for out in &op.outputs {
                check_declared(program, out, &shape)?;
                shapes.insert(out.clone(), shape.clone());
            }
        }

        for name in &fetches {
            if !shapes.contains_key(name) {
                return Err(LoadError::InvalidGraph(format!("fetch target '{}' is never produced", name)));
            }
        }

        tracing::debug!(
            graph = %program.name,
            ops = ops.len(),
            params = params.len(),
            "graph built"
        );
        Ok(Graph {
            name: program.name.clone(),
            feeds,
            fetches,
            ops,
            shapes,
            params,
        })
    }

    pub fn shape(&self, name: &str) -> Option<&Shape> {
        self.shapes.get(name)
    }

    pub fn param(&self, name: &str) -> Option<&Tensor> {
        self.params.get(name)
    }

    pub fn is_param(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// Index of the operator producing `name`.
    pub fn producer(&self, name: &str) -> Option<usize> {
        self.ops.iter().position(|op| op.outputs.iter().any(|o| o == name))
    }

    /// Indices of the operators reading `name`.
    pub fn consumers(&self, name: &str) -> Vec<usize> {
        self.ops
            .iter()
            .enumerate()
            .filter(|(_, op)| op.inputs.iter().any(|i| i == name))
            .map(|(i, _)| i)
            .collect()
    }

    /// Number of operators that compute something (feed and fetch excluded).
    pub fn compute_op_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| !matches!(op.kind, OpKind::Feed | OpKind::Fetch))
            .count()
    }
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|n| n == name) {
        list.push(name.to_string());
    }
}

/// Kahn's algorithm, breaking ties by program order.
fn topo_sort(ops: Vec<Op>, params: &BTreeMap<String, Tensor>, feeds: &[String]) -> Result<Vec<Op>> {
    let mut producer: HashMap<&str, usize> = HashMap::new();
    for (i, op) in ops.iter().enumerate() {
        for out in &op.outputs {
            if params.contains_key(out) {
                return Err(LoadError::InvalidGraph(format!("{} overwrites parameter '{}'", op.describe(), out)));
            }
            if producer.insert(out.as_str(), i).is_some() {
                return Err(LoadError::InvalidGraph(format!("'{}' is produced more than once", out)));
            }
        }
    }

    let mut pending = vec![0usize; ops.len()];
    let mut users: Vec<Vec<usize>> = vec![Vec::new(); ops.len()];
    for (i, op) in ops.iter().enumerate() {
        for input in &op.inputs {
            match producer.get(input.as_str()) {
                Some(&p) => {
                    pending[i] += 1;
                    users[p].push(i);
                }
                None if params.contains_key(input) || feeds.contains(input) => {}
                None => {
                    return Err(LoadError::InvalidGraph(format!(
                        "{} reads undefined value '{}'",
                        op.describe(),
                        input
                    )))
                }
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..ops.len())
        .filter(|&i| pending[i] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::with_capacity(ops.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &u in &users[i] {
            pending[u] -= 1;
            if pending[u] == 0 {
                ready.push(Reverse(u));
            }
        }
    }
    if order.len() != ops.len() {
        let stuck: Vec<String> = (0..ops.len())
            .filter(|&i| pending[i] > 0)
            .map(|i| ops[i].describe())
            .collect();
        return Err(LoadError::InvalidGraph(format!("cycle through {}", stuck.join("; "))));
    }

    let mut slots: Vec<Option<Op>> = ops.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

fn declared_feed_shape(program: &ProgramDesc, name: &str) -> Result<Shape> {
    let dims = program
        .var(name)
        .and_then(|v| v.shape.as_ref())
        .ok_or_else(|| LoadError::InvalidGraph(format!("feed '{}' has no declared shape", name)))?;
    if dims.iter().any(|&d| d < 0) {
        tracing::debug!(feed = name, ?dims, "resolving unknown feed dims to 1");
    }
    Ok(Shape::new(dims.iter().map(|&d| if d < 0 { 1 } else { d as usize }).collect()))
}

/// A declared shape must match `got` except where it says `-1`.
fn check_declared(program: &ProgramDesc, name: &str, got: &Shape) -> Result<()> {
    let Some(declared) = program.var(name).and_then(|v| v.shape.as_ref()) else {
        return Ok(());
    };
    let matches = declared.len() == got.ndim()
        && declared
            .iter()
            .zip(got.dims())
            .all(|(&d, &g)| d < 0 || d as usize == g);
    if matches {
        Ok(())
    } else {
        Err(LoadError::ShapeMismatch {
            name: name.to_string(),
            declared: declared.clone(),
            got: got.dims().to_vec(),
        })
    }
}
