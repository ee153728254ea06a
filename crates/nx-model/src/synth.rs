//! Deterministic synthetic models for tests and the harness's self-test.

use std::collections::BTreeMap;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use nx_tensor::Tensor;

use crate::error::{LoadError, Result};
use crate::params::ParamsWriter;
use crate::program::{OpDesc, ProgramDesc, VarDesc, COMBINED_PARAMS_FILE, PROGRAM_FILE};

/// Shape of the generated residual network.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthConfig {
    pub input_name: String,
    pub output_name: String,
    /// `[N, C, H, W]`; the batch dim is declared as `-1`.
    pub input_shape: [usize; 4],
    pub base_channels: usize,
    pub num_classes: usize,
    /// Residual blocks; every block after the first halves the spatial size
    /// and doubles the channels.
    pub blocks: usize,
}

impl Default for SynthConfig {
    fn default() -> Self {
        SynthConfig {
            input_name: "image".to_string(),
            output_name: "save_infer_model/scale_0".to_string(),
            input_shape: [1, 3, 32, 32],
            base_channels: 8,
            num_classes: 10,
            blocks: 2,
        }
    }
}

/// A generated model, not yet on disk.
#[derive(Debug, Clone)]
pub struct SynthModel {
    pub program: ProgramDesc,
    pub params: BTreeMap<String, Tensor>,
}

impl SynthModel {
    /// Writes `model.json`, the combined `params` container and one
    /// container per parameter, so the directory loads either way.
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join(PROGRAM_FILE), self.program.to_json()?)?;
        let writer = ParamsWriter::default();
        let tensors = || self.params.iter().map(|(n, t)| (n.as_str(), t));
        writer.write_combined(&dir.join(COMBINED_PARAMS_FILE), tensors())?;
        writer.write_separate(dir, tensors())?;
        tracing::debug!(dir = %dir.display(), params = self.params.len(), "synthetic model written");
        Ok(())
    }
}

/// Builds a small ResNet-style classifier: conv/bn/relu stem, max pool,
/// depthwise conv, residual blocks, a sigmoid channel gate, global average
/// pooling, a fully connected layer and a scaled softmax.
pub fn residual_cnn(config: &SynthConfig, seed: u64) -> Result<SynthModel> {
    if config.base_channels == 0 || config.num_classes == 0 || config.input_shape.contains(&0) {
        return Err(LoadError::InvalidGraph(format!("degenerate synthetic config {:?}", config)));
    }
    let mut b = Builder::new(seed);
    let [_, in_c, _, _] = config.input_shape;
    let c = config.base_channels;

    b.vars.push(VarDesc::new(
        &config.input_name,
        Some(vec![-1, in_c as i64, config.input_shape[2] as i64, config.input_shape[3] as i64]),
        false,
    ));
    b.ops.push(OpDesc::new("feed").input("X", "feed").output("Out", &config.input_name));

    let x = b.conv("conv1", &config.input_name, in_c, c, 3, 1, 1);
    let x = b.batch_norm("bn_conv1", &x, c);
    let x = b.unary("relu", &x);
    let x = b.pool(&x, "max", 3, 2, 1);

    let x = b.depthwise("dw1", &x, c);
    let mut x = b.unary("relu", &x);

    let mut channels = c;
    for i in 0..config.blocks {
        let (out_c, stride) = if i == 0 { (channels, 1) } else { (channels * 2, 2) };
        x = b.residual_block(&format!("res{}", i + 2), &x, channels, out_c, stride);
        channels = out_c;
    }

    // Squeeze-style gate: x * sigmoid(mean over H, W).
    let squeezed = b.global_pool(&x);
    let gate = b.unary("sigmoid", &squeezed);
    let x = b.binary("elementwise_mul", &x, &gate, 0);

    let pooled = b.global_pool(&x);
    let x = b.next_name("flatten");
    b.ops.push(
        OpDesc::new("flatten2")
            .input("X", &pooled)
            .output("Out", &x)
            .attr("axis", 1),
    );

    let fc_w = b.param("fc_0.w_0", vec![channels, config.num_classes], channels);
    let fc_b = b.param("fc_0.b_0", vec![config.num_classes], channels);
    let logits = b.next_name("fc_0.tmp");
    b.ops.push(OpDesc::new("mul").input("X", &x).input("Y", &fc_w).output("Out", &logits));
    let logits = b.binary("elementwise_add", &logits, &fc_b, 1);

    let prob = b.next_name("softmax");
    b.ops.push(OpDesc::new("softmax").input("X", &logits).output("Out", &prob));
    b.ops.push(
        OpDesc::new("scale")
            .input("X", &prob)
            .output("Out", &config.output_name)
            .attr("scale", 1.0)
            .attr("bias", 0.0)
            .attr("bias_after_scale", true),
    );
    b.vars.push(VarDesc::new(
        &config.output_name,
        Some(vec![-1, config.num_classes as i64]),
        false,
    ));
    b.ops.push(OpDesc::new("fetch").input("X", &config.output_name).output("Out", "fetch"));

    let program = ProgramDesc {
        name: "synthetic_resnet".to_string(),
        feed: vec![config.input_name.clone()],
        fetch: vec![config.output_name.clone()],
        vars: b.vars,
        ops: b.ops,
    };
    Ok(SynthModel {
        program,
        params: b.params,
    })
}

struct Builder {
    rng: StdRng,
    ops: Vec<OpDesc>,
    vars: Vec<VarDesc>,
    params: BTreeMap<String, Tensor>,
    counter: usize,
}

impl Builder {
    fn new(seed: u64) -> Self {
        Builder {
            rng: StdRng::seed_from_u64(seed),
            ops: Vec::new(),
            vars: Vec::new(),
            params: BTreeMap::new(),
            counter: 0,
        }
    }

    fn next_name(&mut self, prefix: &str) -> String {
        let name = format!("{}.tmp_{}", prefix, self.counter);
        self.counter += 1;
        name
    }

    /// Adds a persistable tensor drawn uniformly from `±sqrt(3 / fan_in)`.
    fn param(&mut self, name: &str, dims: Vec<usize>, fan_in: usize) -> String {
        let bound = (3.0 / fan_in.max(1) as f32).sqrt();
        self.param_in(name, dims, -bound, bound)
    }

    fn param_in(&mut self, name: &str, dims: Vec<usize>, lo: f32, hi: f32) -> String {
        let shape: Vec<i64> = dims.iter().map(|&d| d as i64).collect();
        let mut tensor = Tensor::zeros(dims);
        for v in tensor.data_mut() {
            *v = self.rng.gen_range(lo..hi);
        }
        self.vars.push(VarDesc::new(name, Some(shape), true));
        self.params.insert(name.to_string(), tensor);
        name.to_string()
    }

    #[allow(clippy::too_many_arguments)]
    fn conv(&mut self, name: &str, x: &str, in_c: usize, out_c: usize, k: usize, stride: usize, pad: usize) -> String {
        let w = self.param(&format!("{}_weights", name), vec![out_c, in_c, k, k], in_c * k * k);
        let out = self.next_name(name);
        self.ops.push(
            OpDesc::new("conv2d")
                .input("Input", x)
                .input("Filter", &w)
                .output("Output", &out)
                .attr("strides", json!([stride, stride]))
                .attr("paddings", json!([pad, pad]))
                .attr("dilations", json!([1, 1]))
                .attr("groups", 1),
        );
        out
    }

    fn depthwise(&mut self, name: &str, x: &str, c: usize) -> String {
        let w = self.param(&format!("{}_weights", name), vec![c, 1, 3, 3], 9);
        let bias = self.param_in(&format!("{}_bias", name), vec![c], -0.1, 0.1);
        let out = self.next_name(name);
        self.ops.push(
            OpDesc::new("depthwise_conv2d")
                .input("Input", x)
                .input("Filter", &w)
                .input("Bias", &bias)
                .output("Output", &out)
                .attr("strides", json!([1, 1]))
                .attr("paddings", json!([1, 1]))
                .attr("groups", c),
        );
        out
    }

    fn batch_norm(&mut self, name: &str, x: &str, c: usize) -> String {
        let scale = self.param_in(&format!("{}_scale", name), vec![c], 0.5, 1.5);
        let bias = self.param_in(&format!("{}_offset", name), vec![c], -0.1, 0.1);
        let mean = self.param_in(&format!("{}_mean", name), vec![c], -0.1, 0.1);
        let var = self.param_in(&format!("{}_variance", name), vec![c], 0.5, 1.5);
        let out = self.next_name(name);
        self.ops.push(
            OpDesc::new("batch_norm")
                .input("X", x)
                .input("Scale", &scale)
                .input("Bias", &bias)
                .input("Mean", &mean)
                .input("Variance", &var)
                .output("Y", &out)
                .attr("epsilon", 1e-5)
                .attr("is_test", true),
        );
        out
    }

    fn unary(&mut self, op_type: &str, x: &str) -> String {
        let out = self.next_name(op_type);
        self.ops.push(OpDesc::new(op_type).input("X", x).output("Out", &out));
        out
    }

    fn binary(&mut self, op_type: &str, x: &str, y: &str, axis: i64) -> String {
        let out = self.next_name(op_type);
        self.ops.push(
            OpDesc::new(op_type)
                .input("X", x)
                .input("Y", y)
                .output("Out", &out)
                .attr("axis", axis),
        );
        out
    }

    fn pool(&mut self, x: &str, kind: &str, k: usize, stride: usize, pad: usize) -> String {
        let out = self.next_name("pool2d");
        self.ops.push(
            OpDesc::new("pool2d")
                .input("X", x)
                .output("Out", &out)
                .attr("pooling_type", kind)
                .attr("ksize", json!([k, k]))
                .attr("strides", json!([stride, stride]))
                .attr("paddings", json!([pad, pad])),
        );
        out
    }

    fn global_pool(&mut self, x: &str) -> String {
        let out = self.next_name("pool2d");
        self.ops.push(
            OpDesc::new("pool2d")
                .input("X", x)
                .output("Out", &out)
                .attr("pooling_type", "avg")
                .attr("ksize", json!([1, 1]))
                .attr("global_pooling", true),
        );
        out
    }

    /// conv-bn-relu-conv-bn, plus a projected or identity shortcut, then relu.
    fn residual_block(&mut self, name: &str, x: &str, in_c: usize, out_c: usize, stride: usize) -> String {
        let a = self.conv(&format!("{}a", name), x, in_c, out_c, 3, stride, 1);
        let a = self.batch_norm(&format!("bn{}a", name), &a, out_c);
        let a = self.unary("relu", &a);
        let a = self.conv(&format!("{}b", name), &a, out_c, out_c, 3, 1, 1);
        let a = self.batch_norm(&format!("bn{}b", name), &a, out_c);

        let shortcut = if stride != 1 || in_c != out_c {
            let s = self.conv(&format!("{}_branch1", name), x, in_c, out_c, 1, stride, 0);
            self.batch_norm(&format!("bn{}_branch1", name), &s, out_c)
        } else {
            x.to_string()
        };
        let sum = self.binary("elementwise_add", &a, &shortcut, -1);
        self.unary("relu", &sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::op::OpKind;

    #[test]
    fn test_deterministic_per_seed() {
        let a = residual_cnn(&SynthConfig::default(), 42).unwrap();
        let b = residual_cnn(&SynthConfig::default(), 42).unwrap();
        let c = residual_cnn(&SynthConfig::default(), 43).unwrap();
        assert_eq!(a.program, b.program);
        assert_eq!(a.params, b.params);
        assert_ne!(a.params, c.params);
    }

    #[test]
    fn test_builds_valid_graph() {
        let config = SynthConfig::default();
        let model = residual_cnn(&config, 5).unwrap();
        let g = Graph::build(&model.program, model.params.clone(), &[]).unwrap();
        assert_eq!(g.feeds, vec![config.input_name.clone()]);
        assert_eq!(g.fetches, vec![config.output_name.clone()]);
        assert_eq!(g.shape(&config.output_name).unwrap().dims(), &[1, 10]);
        // The stem pool halves 32 to 16; the second block halves again.
        let gate_input = g
            .ops
            .iter()
            .find(|op| op.op_type == "elementwise_mul")
            .map(|op| g.shape(&op.inputs[0]).unwrap().dims().to_vec())
            .unwrap();
        assert_eq!(gate_input, vec![1, 16, 8, 8]);
        assert!(g.ops.iter().any(|op| matches!(op.kind, OpKind::Conv2d { has_bias: true, .. })));
    }

    #[test]
    fn test_batch_norm_channels_follow_conv() {
        let model = residual_cnn(&SynthConfig::default(), 5).unwrap();
        assert_eq!(model.params["bn_conv1_scale"].numel(), 8);
        assert_eq!(model.params["bnres3a_variance"].numel(), 16);
    }
}
