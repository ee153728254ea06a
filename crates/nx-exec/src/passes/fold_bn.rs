use std::collections::HashSet;

use nx_model::{Graph, OpKind};
use nx_tensor::{Activation, BatchNormParams, Tensor};

use super::sole_edge;

/// Folds `conv2d -> batch_norm` pairs into a single convolution with
/// rescaled filters and a bias. Returns the number of folds.
pub fn fold_batch_norm(graph: &mut Graph, protected: &HashSet<String>) -> usize {
    let mut folded = 0;
    let mut i = 0;
    while i < graph.ops.len() {
        match fold_at(graph, i, protected) {
            Some(()) => folded += 1,
            None => i += 1,
        }
    }
    folded
}

/// Folds the batch norm at `bn_idx` into its producer, removing it.
fn fold_at(graph: &mut Graph, bn_idx: usize, protected: &HashSet<String>) -> Option<()> {
    let bn = &graph.ops[bn_idx];
    let epsilon = match bn.kind {
        OpKind::BatchNorm {
            epsilon,
            activation: Activation::Identity,
        } => epsilon,
        _ => return None,
    };
    let conv_idx = sole_edge(graph, &bn.inputs[0], bn_idx, protected)?;
    let conv = &graph.ops[conv_idx];
    let OpKind::Conv2d { params, has_bias } = &conv.kind else {
        return None;
    };
    if params.activation != Activation::Identity {
        return None;
    }

    let p = |name: &String| graph.param(name);
    let (scale, bias, mean, variance) = (p(&bn.inputs[1])?, p(&bn.inputs[2])?, p(&bn.inputs[3])?, p(&bn.inputs[4])?);
    let filter = p(&conv.inputs[1])?;
    let conv_bias = if *has_bias { Some(p(&conv.inputs[2])?) } else { None };

    let (mul, add) = BatchNormParams {
        scale: scale.data(),
        bias: bias.data(),
        mean: mean.data(),
        variance: variance.data(),
        epsilon,
        activation: Activation::Identity,
    }
    .folded();

    let oc = filter.shape().dim(0);
    if mul.len() != oc {
        return None;
    }
    let per_oc = filter.numel() / oc;
    let mut new_filter = filter.clone();
    for (o, chunk) in new_filter.data_mut().chunks_mut(per_oc).enumerate() {
        for w in chunk {
            *w *= mul[o];
        }
    }
    let new_bias: Vec<f32> = (0..oc)
        .map(|o| conv_bias.map(|b| b.data()[o]).unwrap_or(0.0) * mul[o] + add[o])
        .collect();

    let out = bn.outputs[0].clone();
    let filter_name = format!("{}.folded_filter", out);
    let bias_name = format!("{}.folded_bias", out);
    tracing::trace!(conv = %conv.describe(), bn = %bn.describe(), "folding batch norm");

    let bias_tensor = Tensor::from_vec(new_bias, [oc]).ok()?;
    graph.shapes.insert(filter_name.clone(), new_filter.shape().clone());
    graph.shapes.insert(bias_name.clone(), bias_tensor.shape().clone());
    graph.params.insert(filter_name.clone(), new_filter);
    graph.params.insert(bias_name.clone(), bias_tensor);

    let conv = &mut graph.ops[conv_idx];
    conv.inputs.truncate(1);
    conv.inputs.push(filter_name);
    conv.inputs.push(bias_name);
    if let OpKind::Conv2d { has_bias, .. } = &mut conv.kind {
        *has_bias = true;
    }
    conv.outputs = vec![out];
    graph.ops.remove(bn_idx);
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nx_model::{OpDesc, ProgramDesc, VarDesc};
    use std::collections::BTreeMap;

    fn graph(with_second_reader: bool) -> Graph {
        let mut ops = vec![
            OpDesc::new("conv2d")
                .input("Input", "x")
                .input("Filter", "w")
                .output("Output", "c"),
            OpDesc::new("batch_norm")
                .input("X", "c")
                .input("Scale", "s")
                .input("Bias", "b")
                .input("Mean", "m")
                .input("Variance", "v")
                .output("Y", "y")
                .attr("epsilon", 0.0),
        ];
        if with_second_reader {
            ops.push(OpDesc::new("relu").input("X", "c").output("Out", "r"));
        }
        let program = ProgramDesc {
            name: "fold".to_string(),
            feed: vec!["x".to_string()],
            fetch: vec!["y".to_string()],
            vars: vec![VarDesc::new("x", Some(vec![1, 1, 1, 2]), false)],
            ops,
        };
        let mut params = BTreeMap::new();
        params.insert("w".to_string(), Tensor::from_vec(vec![1.0, 2.0], [2, 1, 1, 1]).unwrap());
        params.insert("s".to_string(), Tensor::from_vec(vec![2.0, 1.0], [2]).unwrap());
        params.insert("b".to_string(), Tensor::from_vec(vec![1.0, 0.0], [2]).unwrap());
        params.insert("m".to_string(), Tensor::from_vec(vec![0.0, 1.0], [2]).unwrap());
        params.insert("v".to_string(), Tensor::from_vec(vec![4.0, 1.0], [2]).unwrap());
        Graph::build(&program, params, &[]).unwrap()
    }

    #[test]
    fn test_folds_into_conv() {
        let mut g = graph(false);
        assert_eq!(fold_batch_norm(&mut g, &HashSet::new()), 1);
        assert_eq!(g.ops.len(), 1);
        let conv = &g.ops[0];
        assert_eq!(conv.outputs, vec!["y"]);
        // mul = [2/2, 1/1] = [1, 1]; add = [1 - 0, 0 - 1] = [1, -1]
        assert_eq!(g.param(&conv.inputs[1]).unwrap().data(), &[1.0, 2.0]);
        assert_eq!(g.param(&conv.inputs[2]).unwrap().data(), &[1.0, -1.0]);
    }

    #[test]
    fn test_shared_conv_output_not_folded() {
        let mut g = graph(true);
        assert_eq!(fold_batch_norm(&mut g, &HashSet::new()), 0);
        assert_eq!(g.ops.len(), 3);
    }

    #[test]
    fn test_protected_conv_output_not_folded() {
        let mut g = graph(false);
        let protected: HashSet<String> = ["c".to_string()].into();
        assert_eq!(fold_batch_norm(&mut g, &protected), 0);
    }
}
