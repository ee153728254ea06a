//! Typed operators parsed from [`OpDesc`] records, with shape inference.

use serde_json::Value;

use nx_tensor::broadcast::resolve_axis;
use nx_tensor::{Activation, BinaryOp, Conv2dParams, Pool2dParams, PoolKind, Shape};

use crate::error::{LoadError, Result};
use crate::program::OpDesc;

/// What an operator computes. Operand order is fixed per kind and documented
/// on each variant; see [`Op::inputs`].
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    /// Marks its output as a graph input. No operands.
    Feed,
    /// Marks its single operand as a graph output.
    Fetch,
    /// `[input, filter]` or `[input, filter, bias]`.
    Conv2d { params: Conv2dParams, has_bias: bool },
    /// `[x, scale, bias, mean, variance]`.
    BatchNorm { epsilon: f32, activation: Activation },
    /// `[x]`.
    Activation(Activation),
    /// `[x]`.
    Pool2d(Pool2dParams),
    /// `[x, y]`.
    Elementwise {
        op: BinaryOp,
        axis: isize,
        activation: Activation,
    },
    /// `[x, y]`, both flattened to matrices.
    Mul {
        x_num_col_dims: usize,
        y_num_col_dims: usize,
    },
    /// `[x, y]`, both 2-D.
    Matmul {
        transpose_x: bool,
        transpose_y: bool,
        alpha: f32,
    },
    /// `[x]`.
    Scale {
        scale: f32,
        bias: f32,
        bias_after_scale: bool,
    },
    /// `[x]`; `axis` must name the last axis.
    Softmax { axis: i64 },
    /// `[x]`.
    Flatten { axis: usize },
    /// `[x]`.
    Reshape { shape: Vec<i64> },
}

/// One operator of the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    /// Operator type as written in the program description.
    pub op_type: String,
    pub kind: OpKind,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl Op {
    pub fn from_desc(desc: &OpDesc) -> Result<Op> {
        let a = Attrs { desc };
        let x = || a.input("X");
        let out = || a.output("Out");
        let (kind, inputs, outputs) = match desc.op_type.as_str() {
            "feed" => (OpKind::Feed, vec![], vec![out()?]),
            "fetch" => (OpKind::Fetch, vec![x()?], vec![]),
            "conv2d" | "depthwise_conv2d" => {
                a.host_layout("data_format")?;
                a.explicit_padding()?;
                let params = Conv2dParams {
                    strides: a.pair("strides", [1, 1])?,
                    paddings: a.paddings()?,
                    dilations: a.pair("dilations", [1, 1])?,
                    groups: a.usize("groups", 1)?,
                    activation: Activation::Identity,
                };
                let mut inputs = vec![a.input("Input")?, a.input("Filter")?];
                let bias = a.optional_input("Bias")?;
                let has_bias = bias.is_some();
                inputs.extend(bias);
                (OpKind::Conv2d { params, has_bias }, inputs, vec![a.output("Output")?])
            }
            "batch_norm" => {
                a.host_layout("data_layout")?;
                let inputs = ["X", "Scale", "Bias", "Mean", "Variance"]
                    .iter()
                    .map(|s| a.input(s))
                    .collect::<Result<Vec<_>>>()?;
                let kind = OpKind::BatchNorm {
                    epsilon: a.f32("epsilon", 1e-5)?,
                    activation: Activation::Identity,
                };
                (kind, inputs, vec![a.output("Y")?])
            }
            "relu" => (OpKind::Activation(Activation::Relu), vec![x()?], vec![out()?]),
            "sigmoid" => (OpKind::Activation(Activation::Sigmoid), vec![x()?], vec![out()?]),
            "pool2d" => {
                if a.bool("adaptive", false)? {
                    return Err(a.invalid("adaptive", "adaptive pooling is not supported".to_string()));
                }
                a.host_layout("data_format")?;
                a.explicit_padding()?;
                let kind = match a.str("pooling_type", "max")?.as_str() {
                    "max" => PoolKind::Max,
                    "avg" => PoolKind::Avg,
                    other => return Err(a.invalid("pooling_type", format!("unknown pooling type '{}'", other))),
                };
                let params = Pool2dParams {
                    kind,
                    ksize: a.pair("ksize", [1, 1])?,
                    strides: a.pair("strides", [1, 1])?,
                    paddings: a.paddings()?,
                    global: a.bool("global_pooling", false)?,
                    exclusive: a.bool("exclusive", true)?,
                    ceil_mode: a.bool("ceil_mode", false)?,
                };
                (OpKind::Pool2d(params), vec![x()?], vec![out()?])
            }
            "elementwise_add" | "elementwise_mul" => {
                let op = if desc.op_type == "elementwise_add" {
                    BinaryOp::Add
                } else {
                    BinaryOp::Mul
                };
                let kind = OpKind::Elementwise {
                    op,
                    axis: a.int("axis", -1)? as isize,
                    activation: Activation::Identity,
                };
                (kind, vec![x()?, a.input("Y")?], vec![out()?])
            }
            "mul" => {
                let kind = OpKind::Mul {
                    x_num_col_dims: a.usize("x_num_col_dims", 1)?,
                    y_num_col_dims: a.usize("y_num_col_dims", 1)?,
                };
                (kind, vec![x()?, a.input("Y")?], vec![out()?])
            }
            "matmul" => {
                let kind = OpKind::Matmul {
                    transpose_x: a.bool("transpose_X", false)?,
                    transpose_y: a.bool("transpose_Y", false)?,
                    alpha: a.f32("alpha", 1.0)?,
                };
                (kind, vec![x()?, a.input("Y")?], vec![out()?])
            }
            "scale" => {
                let kind = OpKind::Scale {
                    scale: a.f32("scale", 1.0)?,
                    bias: a.f32("bias", 0.0)?,
                    bias_after_scale: a.bool("bias_after_scale", true)?,
                };
                (kind, vec![x()?], vec![out()?])
            }
            "softmax" => (OpKind::Softmax { axis: a.int("axis", -1)? }, vec![x()?], vec![out()?]),
            "flatten" | "flatten2" => {
                let kind = OpKind::Flatten {
                    axis: a.usize("axis", 1)?,
                };
                (kind, vec![x()?], vec![out()?])
            }
            "reshape" | "reshape2" => {
                for slot in ["Shape", "ShapeTensor"] {
                    if a.optional_input(slot)?.is_some() {
                        return Err(a.invalid("shape", format!("runtime '{}' input is not supported", slot)));
                    }
                }
                let kind = OpKind::Reshape {
                    shape: a.ints("shape", &[])?,
                };
                (kind, vec![x()?], vec![out()?])
            }
            other => return Err(LoadError::UnsupportedOperator(other.to_string())),
        };
        Ok(Op {
            op_type: desc.op_type.clone(),
            kind,
            inputs,
            outputs,
        })
    }

    /// The single value this operator produces, if any.
    pub fn output(&self) -> Option<&str> {
        self.outputs.first().map(String::as_str)
    }

    /// Human-readable identity for diagnostics, e.g. `conv2d -> conv1.tmp_0`.
    pub fn describe(&self) -> String {
        match self.output() {
            Some(out) => format!("{} -> {}", self.op_type, out),
            None => format!("{} <- {}", self.op_type, self.inputs.join(", ")),
        }
    }

    /// True for element-wise operators whose epilogue can absorb an
    /// activation.
    pub fn accepts_activation(&self) -> bool {
        match &self.kind {
            OpKind::Conv2d { params, .. } => params.activation == Activation::Identity,
            OpKind::BatchNorm { activation, .. } | OpKind::Elementwise { activation, .. } => {
                *activation == Activation::Identity
            }
            _ => false,
        }
    }

    /// Infers the output shape from the input shapes, in operand order.
    pub fn infer_shape(&self, inputs: &[&Shape]) -> Result<Shape> {
        let err = |reason: String| LoadError::IncompatibleShapes {
            op: self.describe(),
            reason,
        };
        let tensor_err = |e: nx_tensor::TensorError| err(e.to_string());
        let x = inputs
            .first()
            .ok_or_else(|| err("missing operand".to_string()))?;
        let dims = x.dims();
        match &self.kind {
            OpKind::Feed | OpKind::Fetch => Ok((*x).clone()),
            OpKind::Conv2d { params, has_bias } => {
                let out = params
                    .output_dims(x.as_nchw().map_err(tensor_err)?, inputs[1].as_nchw().map_err(tensor_err)?)
                    .map_err(tensor_err)?;
                if *has_bias && inputs[2].numel() != out[1] {
                    return Err(err(format!("bias {} does not match {} output channels", inputs[2], out[1])));
                }
                Ok(Shape::from(out))
            }
            OpKind::BatchNorm { .. } => {
                if dims.len() < 2 {
                    return Err(err(format!("input {} has no channel axis", x)));
                }
                for p in &inputs[1..] {
                    if p.numel() != dims[1] {
                        return Err(err(format!("parameter {} does not match {} channels", p, dims[1])));
                    }
                }
                Ok((*x).clone())
            }
            OpKind::Activation(_) | OpKind::Scale { .. } => Ok((*x).clone()),
            OpKind::Softmax { axis } => {
                let rank = dims.len() as i64;
                if rank == 0 || (*axis != -1 && *axis != rank - 1) {
                    return Err(err(format!("softmax over axis {} of {} is not supported", axis, x)));
                }
                Ok((*x).clone())
            }
            OpKind::Pool2d(params) => {
                let out = params.output_dims(x.as_nchw().map_err(tensor_err)?).map_err(tensor_err)?;
                Ok(Shape::from(out))
            }
            OpKind::Elementwise { axis, .. } => {
                resolve_axis(dims, inputs[1].dims(), *axis).map_err(tensor_err)?;
                Ok((*x).clone())
            }
            OpKind::Mul {
                x_num_col_dims,
                y_num_col_dims,
            } => {
                let y = inputs[1];
                if *x_num_col_dims == 0
                    || *x_num_col_dims >= dims.len()
                    || *y_num_col_dims == 0
                    || *y_num_col_dims >= y.ndim()
                {
                    return Err(err(format!(
                        "num_col_dims ({}, {}) out of range for {} and {}",
                        x_num_col_dims, y_num_col_dims, x, y
                    )));
                }
                let k = x.flat_size(*x_num_col_dims..dims.len());
                let k2 = y.flat_size(0..*y_num_col_dims);
                if k != k2 {
                    return Err(err(format!("inner dims differ: {} vs {}", k, k2)));
                }
                let mut out = dims[..*x_num_col_dims].to_vec();
                out.extend_from_slice(&y.dims()[*y_num_col_dims..]);
                Ok(Shape::new(out))
            }
            OpKind::Matmul {
                transpose_x,
                transpose_y,
                ..
            } => {
                let y = inputs[1];
                if dims.len() != 2 || y.ndim() != 2 {
                    return Err(err(format!("matmul needs 2-D operands, got {} and {}", x, y)));
                }
                let (m, k) = if *transpose_x { (dims[1], dims[0]) } else { (dims[0], dims[1]) };
                let (k2, n) = if *transpose_y { (y.dim(1), y.dim(0)) } else { (y.dim(0), y.dim(1)) };
                if k != k2 {
                    return Err(err(format!("inner dims differ: {} vs {}", k, k2)));
                }
                Ok(Shape::new(vec![m, n]))
            }
            OpKind::Flatten { axis } => {
                if *axis > dims.len() {
                    return Err(err(format!("axis {} out of range for {}", axis, x)));
                }
                Ok(Shape::new(vec![x.flat_size(0..*axis), x.flat_size(*axis..dims.len())]))
            }
            OpKind::Reshape { shape } => reshape_dims(dims, shape).map(Shape::new).map_err(err),
        }
    }
}

/// Resolves a reshape target: `0` copies the input dim at that index and a
/// single `-1` absorbs the remaining elements.
pub fn reshape_dims(input: &[usize], target: &[i64]) -> std::result::Result<Vec<usize>, String> {
    let numel: usize = input.iter().product();
    let mut out = Vec::with_capacity(target.len());
    let mut infer = None;
    for (i, &d) in target.iter().enumerate() {
        match d {
            0 => out.push(
                *input
                    .get(i)
                    .ok_or_else(|| format!("shape[{}] = 0 has no input dim to copy", i))?,
            ),
            -1 if infer.is_none() => {
                infer = Some(i);
                out.push(1);
            }
            -1 => return Err("more than one -1 in reshape target".to_string()),
            d if d > 0 => out.push(d as usize),
            d => return Err(format!("invalid reshape dim {}", d)),
        }
    }
    let known: usize = out.iter().product();
    if let Some(i) = infer {
        if known == 0 || numel % known != 0 {
            return Err(format!("cannot infer -1 for {:?} from {:?}", target, input));
        }
        out[i] = numel / known;
    } else if known != numel {
        return Err(format!("reshape {:?} -> {:?} changes element count", input, target));
    }
    Ok(out)
}

/// Typed access to an [`OpDesc`]'s slots and attributes.
struct Attrs<'a> {
    desc: &'a OpDesc,
}

impl Attrs<'_> {
    fn invalid(&self, attr: &str, reason: String) -> LoadError {
        LoadError::InvalidAttribute {
            op: self.desc.op_type.clone(),
            attr: attr.to_string(),
            reason,
        }
    }

    fn slot(&self, names: Option<&Vec<String>>, slot: &str) -> Result<Option<String>> {
        match names.map(Vec::as_slice) {
            None | Some([]) => Ok(None),
            Some([name]) => Ok(Some(name.clone())),
            Some(many) => Err(LoadError::InvalidGraph(format!(
                "{} slot '{}' holds {} names, expected one",
                self.desc.op_type,
                slot,
                many.len()
            ))),
        }
    }

    fn optional_input(&self, slot: &str) -> Result<Option<String>> {
        self.slot(self.desc.inputs.get(slot), slot)
    }

    fn input(&self, slot: &str) -> Result<String> {
        self.optional_input(slot)?.ok_or_else(|| {
            LoadError::InvalidGraph(format!("{} is missing input slot '{}'", self.desc.op_type, slot))
        })
    }

    fn output(&self, slot: &str) -> Result<String> {
        self.slot(self.desc.outputs.get(slot), slot)?.ok_or_else(|| {
            LoadError::InvalidGraph(format!("{} is missing output slot '{}'", self.desc.op_type, slot))
        })
    }

    fn get(&self, name: &str) -> Option<&Value> {
        self.desc.attrs.get(name)
    }

    fn int(&self, name: &str, default: i64) -> Result<i64> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => v
                .as_i64()
                .ok_or_else(|| self.invalid(name, format!("expected an integer, got {}", v))),
        }
    }

    fn usize(&self, name: &str, default: usize) -> Result<usize> {
        let v = self.int(name, default as i64)?;
        usize::try_from(v).map_err(|_| self.invalid(name, format!("expected a non-negative integer, got {}", v)))
    }

    fn f32(&self, name: &str, default: f32) -> Result<f32> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => v
                .as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| self.invalid(name, format!("expected a number, got {}", v))),
        }
    }

    fn bool(&self, name: &str, default: bool) -> Result<bool> {
        match self.get(name) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(v) => v
                .as_i64()
                .map(|i| i != 0)
                .ok_or_else(|| self.invalid(name, format!("expected a boolean, got {}", v))),
        }
    }

    fn optional_str(&self, name: &str) -> Result<Option<String>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(v) => Err(self.invalid(name, format!("expected a string, got {}", v))),
        }
    }

    /// Layout attributes must name the host order, or leave it open.
    fn host_layout(&self, name: &str) -> Result<()> {
        match self.optional_str(name)?.as_deref() {
            None | Some("NCHW") | Some("AnyLayout") => Ok(()),
            Some(other) => Err(self.invalid(name, format!("unsupported layout {}", other))),
        }
    }

    /// Only explicit paddings are supported; `SAME`/`VALID` are rejected.
    fn explicit_padding(&self) -> Result<()> {
        match self.optional_str("padding_algorithm")?.as_deref() {
            None | Some("EXPLICIT") => Ok(()),
            Some(other) => Err(self.invalid(
                "padding_algorithm",
                format!("padding algorithm {} is not supported", other),
            )),
        }
    }

    fn str(&self, name: &str, default: &str) -> Result<String> {
        Ok(self.optional_str(name)?.unwrap_or_else(|| default.to_string()))
    }

    fn ints(&self, name: &str, default: &[i64]) -> Result<Vec<i64>> {
        match self.get(name) {
            None => Ok(default.to_vec()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_i64()
                        .ok_or_else(|| self.invalid(name, format!("expected integers, got {}", v)))
                })
                .collect(),
            Some(v) => Err(self.invalid(name, format!("expected an integer list, got {}", v))),
        }
    }

    fn pair(&self, name: &str, default: [usize; 2]) -> Result<[usize; 2]> {
        let v = self.ints(name, &[default[0] as i64, default[1] as i64])?;
        match v.as_slice() {
            &[a, b] if a >= 0 && b >= 0 => Ok([a as usize, b as usize]),
            _ => Err(self.invalid(name, format!("expected two non-negative integers, got {:?}", v))),
        }
    }

    /// `paddings` as `[h, w]`; the four-value `[top, bottom, left, right]`
    /// form is accepted when symmetric.
    fn paddings(&self) -> Result<[usize; 2]> {
        let v = self.ints("paddings", &[0, 0])?;
        match v.as_slice() {
            &[t, b, l, r] if t == b && l == r && t >= 0 && l >= 0 => Ok([t as usize, l as usize]),
            &[_, _, _, _] => Err(self.invalid("paddings", format!("asymmetric paddings {:?}", v))),
            _ => self.pair("paddings", [0, 0]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conv_desc() -> OpDesc {
        OpDesc::new("conv2d")
            .input("Input", "x")
            .input("Filter", "w")
            .output("Output", "y")
            .attr("strides", json!([2, 2]))
            .attr("paddings", json!([3, 3, 3, 3]))
    }

    #[test]
    fn test_parse_conv() {
        let op = Op::from_desc(&conv_desc()).unwrap();
        assert_eq!(op.inputs, vec!["x", "w"]);
        assert_eq!(op.outputs, vec!["y"]);
        match &op.kind {
            OpKind::Conv2d { params, has_bias } => {
                assert_eq!(params.strides, [2, 2]);
                assert_eq!(params.paddings, [3, 3]);
                assert!(!has_bias);
            }
            other => panic!("unexpected kind {:?}", other),
        }
        let out = op
            .infer_shape(&[&Shape::from([1, 3, 224, 224]), &Shape::from([64, 3, 7, 7])])
            .unwrap();
        assert_eq!(out.dims(), &[1, 64, 112, 112]);
    }

    #[test]
    fn test_asymmetric_padding_rejected() {
        let desc = conv_desc().attr("paddings", json!([1, 0, 1, 1]));
        assert!(matches!(Op::from_desc(&desc), Err(LoadError::InvalidAttribute { .. })));
    }

    #[test]
    fn test_conv_layout_and_padding_algorithm() {
        let ok = conv_desc()
            .attr("data_format", "AnyLayout")
            .attr("padding_algorithm", "EXPLICIT");
        assert!(Op::from_desc(&ok).is_ok());
        assert!(Op::from_desc(&conv_desc().attr("data_format", "NCHW")).is_ok());

        let nhwc = conv_desc().attr("data_format", "NHWC");
        match Op::from_desc(&nhwc) {
            Err(LoadError::InvalidAttribute { attr, .. }) => assert_eq!(attr, "data_format"),
            other => panic!("unexpected {:?}", other),
        }
        let same = conv_desc().attr("padding_algorithm", "SAME");
        match Op::from_desc(&same) {
            Err(LoadError::InvalidAttribute { attr, .. }) => assert_eq!(attr, "padding_algorithm"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_pool_layout_and_padding_algorithm() {
        let pool = || {
            OpDesc::new("pool2d")
                .input("X", "a")
                .output("Out", "b")
                .attr("ksize", json!([2, 2]))
        };
        assert!(Op::from_desc(&pool().attr("padding_algorithm", "EXPLICIT")).is_ok());
        assert!(matches!(
            Op::from_desc(&pool().attr("data_format", "NHWC")),
            Err(LoadError::InvalidAttribute { .. })
        ));
        assert!(matches!(
            Op::from_desc(&pool().attr("padding_algorithm", "VALID")),
            Err(LoadError::InvalidAttribute { .. })
        ));
    }

    #[test]
    fn test_batch_norm_layout() {
        let bn = OpDesc::new("batch_norm")
            .input("X", "x")
            .input("Scale", "s")
            .input("Bias", "b")
            .input("Mean", "m")
            .input("Variance", "v")
            .output("Y", "y");
        assert!(Op::from_desc(&bn.clone().attr("data_layout", "NCHW")).is_ok());
        assert!(matches!(
            Op::from_desc(&bn.attr("data_layout", "NHWC")),
            Err(LoadError::InvalidAttribute { .. })
        ));
    }

    #[test]
    fn test_unsupported_operator() {
        let desc = OpDesc::new("lstm").input("X", "a").output("Out", "b");
        match Op::from_desc(&desc) {
            Err(LoadError::UnsupportedOperator(t)) => assert_eq!(t, "lstm"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_slot() {
        let desc = OpDesc::new("relu").output("Out", "b");
        assert!(matches!(Op::from_desc(&desc), Err(LoadError::InvalidGraph(_))));
    }

    #[test]
    fn test_pool_defaults() {
        let desc = OpDesc::new("pool2d")
            .input("X", "a")
            .output("Out", "b")
            .attr("pooling_type", "avg")
            .attr("global_pooling", true);
        let op = Op::from_desc(&desc).unwrap();
        match &op.kind {
            OpKind::Pool2d(p) => {
                assert_eq!(p.kind, PoolKind::Avg);
                assert!(p.global && p.exclusive && !p.ceil_mode);
            }
            other => panic!("unexpected kind {:?}", other),
        }
        let out = op.infer_shape(&[&Shape::from([1, 512, 7, 7])]).unwrap();
        assert_eq!(out.dims(), &[1, 512, 1, 1]);
    }

    #[test]
    fn test_mul_shape() {
        let desc = OpDesc::new("mul")
            .input("X", "a")
            .input("Y", "w")
            .output("Out", "b");
        let op = Op::from_desc(&desc).unwrap();
        let out = op
            .infer_shape(&[&Shape::from([2, 512, 1, 1]), &Shape::from([512, 1000])])
            .unwrap();
        assert_eq!(out.dims(), &[2, 1000]);
        assert!(op.infer_shape(&[&Shape::from([2, 3]), &Shape::from([4, 5])]).is_err());
    }

    #[test]
    fn test_matmul_transposed_shape() {
        let desc = OpDesc::new("matmul")
            .input("X", "a")
            .input("Y", "b")
            .output("Out", "c")
            .attr("transpose_Y", true);
        let op = Op::from_desc(&desc).unwrap();
        let out = op.infer_shape(&[&Shape::from([2, 3]), &Shape::from([5, 3])]).unwrap();
        assert_eq!(out.dims(), &[2, 5]);
    }

    #[test]
    fn test_elementwise_broadcast_checked() {
        let desc = OpDesc::new("elementwise_add")
            .input("X", "a")
            .input("Y", "b")
            .output("Out", "c")
            .attr("axis", 1);
        let op = Op::from_desc(&desc).unwrap();
        assert!(op.infer_shape(&[&Shape::from([1, 4, 2, 2]), &Shape::from([4])]).is_ok());
        assert!(matches!(
            op.infer_shape(&[&Shape::from([1, 4, 2, 2]), &Shape::from([3])]),
            Err(LoadError::IncompatibleShapes { .. })
        ));
    }

    #[test]
    fn test_reshape_dims() {
        assert_eq!(reshape_dims(&[2, 3, 4], &[0, -1]).unwrap(), vec![2, 12]);
        assert_eq!(reshape_dims(&[2, 3, 4], &[4, 6]).unwrap(), vec![4, 6]);
        assert!(reshape_dims(&[2, 3, 4], &[-1, -1]).is_err());
        assert!(reshape_dims(&[2, 3, 4], &[5, -1]).is_err());
        assert!(reshape_dims(&[2, 3], &[7]).is_err());
    }

    #[test]
    fn test_flatten_shape() {
        let desc = OpDesc::new("flatten2").input("X", "a").output("Out", "b");
        let op = Op::from_desc(&desc).unwrap();
        let out = op.infer_shape(&[&Shape::from([2, 8, 1, 1])]).unwrap();
        assert_eq!(out.dims(), &[2, 8]);
    }

    #[test]
    fn test_bool_attribute_accepts_integers() {
        let desc = OpDesc::new("scale")
            .input("X", "a")
            .output("Out", "b")
            .attr("bias_after_scale", 0)
            .attr("scale", 3);
        let op = Op::from_desc(&desc).unwrap();
        assert_eq!(
            op.kind,
            OpKind::Scale {
                scale: 3.0,
                bias: 0.0,
                bias_after_scale: false
            }
        );
    }
}
