use std::fmt::Debug;
use std::sync::Arc;

use crate::accel::AcceleratorBackend;
use crate::cpu::CpuBackend;
use crate::error::{Result, TensorError};
use crate::layout::Layout;
use crate::target::{Target, TargetKind};

/// Borrowed tensor data together with its logical dims.
///
/// `data` is stored in the layout of the backend it is handed to.
#[derive(Debug, Clone, Copy)]
pub struct TensorRef<'a> {
    pub data: &'a [f32],
    pub dims: &'a [usize],
}

impl<'a> TensorRef<'a> {
    pub fn new(data: &'a [f32], dims: &'a [usize]) -> Self {
        TensorRef { data, dims }
    }

    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Dims as `[N, C, H, W]`, failing for other ranks.
    pub fn nchw(&self) -> Result<[usize; 4]> {
        match self.dims {
            &[n, c, h, w] => Ok([n, c, h, w]),
            other => Err(TensorError::InvalidArgument(format!(
                "expected a rank-4 tensor, got dims {:?}",
                other
            ))),
        }
    }

    fn check(&self, what: &str) -> Result<()> {
        check_len(what, self.numel(), self.data.len())
    }
}

/// Element-wise activation applied as a kernel epilogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    #[default]
    Identity,
    Relu,
    Sigmoid,
}

impl Activation {
    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Identity => x,
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        }
    }
}

/// Binary element-wise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Mul,
}

impl BinaryOp {
    #[inline]
    pub fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Mul => a * b,
        }
    }
}

/// 2-D convolution attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Conv2dParams {
    pub strides: [usize; 2],
    pub paddings: [usize; 2],
    pub dilations: [usize; 2],
    pub groups: usize,
    /// Activation fused into the output.
    pub activation: Activation,
}

impl Default for Conv2dParams {
    fn default() -> Self {
        Conv2dParams {
            strides: [1, 1],
            paddings: [0, 0],
            dilations: [1, 1],
            groups: 1,
            activation: Activation::Identity,
        }
    }
}

impl Conv2dParams {
    /// Output dims for an `[N, C, H, W]` input and an `[OC, C/groups, KH, KW]`
    /// filter.
    pub fn output_dims(&self, input: [usize; 4], filter: [usize; 4]) -> Result<[usize; 4]> {
        let [n, c, h, w] = input;
        let [oc, icg, kh, kw] = filter;
        if self.groups == 0 || self.strides.contains(&0) || self.dilations.contains(&0) {
            return Err(TensorError::InvalidArgument(format!(
                "conv2d: groups, strides and dilations must be positive, got {:?}",
                self
            )));
        }
        if icg * self.groups != c || oc % self.groups != 0 {
            return Err(TensorError::ShapeMismatch {
                expected: vec![oc, c / self.groups, kh, kw],
                got: filter.to_vec(),
            });
        }
        let out_h = conv_out_size(h, kh, self.strides[0], self.paddings[0], self.dilations[0])?;
        let out_w = conv_out_size(w, kw, self.strides[1], self.paddings[1], self.dilations[1])?;
        Ok([n, oc, out_h, out_w])
    }
}

fn conv_out_size(input: usize, kernel: usize, stride: usize, pad: usize, dilation: usize) -> Result<usize> {
    if kernel == 0 {
        return Err(TensorError::InvalidArgument("kernel size must be positive".to_string()));
    }
    let extent = dilation * (kernel - 1) + 1;
    let padded = input + 2 * pad;
    if padded < extent {
        return Err(TensorError::InvalidArgument(format!(
            "kernel extent {} exceeds padded input {}",
            extent, padded
        )));
    }
    Ok((padded - extent) / stride + 1)
}

/// Pooling reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Max,
    Avg,
}

/// 2-D pooling attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Pool2dParams {
    pub kind: PoolKind,
    pub ksize: [usize; 2],
    pub strides: [usize; 2],
    pub paddings: [usize; 2],
    /// Pool over the whole spatial extent; ksize/strides/paddings are ignored.
    pub global: bool,
    /// Average only over elements inside the input (padding excluded).
    pub exclusive: bool,
    pub ceil_mode: bool,
}

impl Pool2dParams {
    /// Kernel, strides and paddings actually used for an input of `[H, W]`.
    pub fn window(&self, hw: [usize; 2]) -> ([usize; 2], [usize; 2], [usize; 2]) {
        if self.global {
            (hw, [1, 1], [0, 0])
        } else {
            (self.ksize, self.strides, self.paddings)
        }
    }

    /// Output dims for an `[N, C, H, W]` input.
    pub fn output_dims(&self, input: [usize; 4]) -> Result<[usize; 4]> {
        let [n, c, h, w] = input;
        let (k, s, p) = self.window([h, w]);
        if s.contains(&0) || k.contains(&0) {
            return Err(TensorError::InvalidArgument(format!(
                "pool2d: ksize and strides must be positive, got {:?}",
                self
            )));
        }
        let mut out = [0usize; 2];
        for (i, len) in [h, w].into_iter().enumerate() {
            let padded = len + 2 * p[i];
            if padded < k[i] {
                return Err(TensorError::InvalidArgument(format!(
                    "pool window {} exceeds padded input {}",
                    k[i], padded
                )));
            }
            out[i] = if self.ceil_mode {
                (padded - k[i]).div_ceil(s[i]) + 1
            } else {
                (padded - k[i]) / s[i] + 1
            };
        }
        Ok([n, c, out[0], out[1]])
    }

    /// Reduces one pooling window, `read(y, x)` fetching an input element.
    ///
    /// `oy`, `ox` are output coordinates; `hw` the input extent.
    #[inline]
    pub(crate) fn reduce(&self, hw: [usize; 2], oy: usize, ox: usize, read: impl Fn(usize, usize) -> f32) -> f32 {
        let (k, s, p) = self.window(hw);
        let y0 = (oy * s[0]) as isize - p[0] as isize;
        let x0 = (ox * s[1]) as isize - p[1] as isize;
        let y1 = (y0 + k[0] as isize).min(hw[0] as isize);
        let x1 = (x0 + k[1] as isize).min(hw[1] as isize);
        let y0 = y0.max(0) as usize;
        let x0 = x0.max(0) as usize;
        let (y1, x1) = (y1.max(0) as usize, x1.max(0) as usize);

        match self.kind {
            PoolKind::Max => {
                let mut acc = f32::NEG_INFINITY;
                for y in y0..y1 {
                    for x in x0..x1 {
                        acc = acc.max(read(y, x));
                    }
                }
                acc
            }
            PoolKind::Avg => {
                let mut acc = 0.0f32;
                for y in y0..y1 {
                    for x in x0..x1 {
                        acc += read(y, x);
                    }
                }
                let count = if self.exclusive {
                    (y1.saturating_sub(y0)) * (x1.saturating_sub(x0))
                } else {
                    k[0] * k[1]
                };
                if count == 0 {
                    0.0
                } else {
                    acc / count as f32
                }
            }
        }
    }
}

/// Inference-mode batch normalization parameters, one entry per channel.
#[derive(Debug, Clone, Copy)]
pub struct BatchNormParams<'a> {
    pub scale: &'a [f32],
    pub bias: &'a [f32],
    pub mean: &'a [f32],
    pub variance: &'a [f32],
    pub epsilon: f32,
    pub activation: Activation,
}

impl BatchNormParams<'_> {
    /// Per-channel `(multiplier, offset)` so that `y = x * mul + add`.
    pub fn folded(&self) -> (Vec<f32>, Vec<f32>) {
        let mul: Vec<f32> = self
            .scale
            .iter()
            .zip(self.variance)
            .map(|(s, v)| s / (v + self.epsilon).sqrt())
            .collect();
        let add = mul
            .iter()
            .zip(self.bias.iter().zip(self.mean))
            .map(|(m, (b, mean))| b - mean * m)
            .collect();
        (mul, add)
    }

    fn check(&self, channels: usize) -> Result<()> {
        for (what, v) in [
            ("batch_norm scale", self.scale),
            ("batch_norm bias", self.bias),
            ("batch_norm mean", self.mean),
            ("batch_norm variance", self.variance),
        ] {
            check_len(what, channels, v.len())?;
        }
        Ok(())
    }
}

/// Trait for pluggable compute backends.
///
/// Every kernel reads inputs stored in [`ComputeBackend::layout`] and writes
/// into a caller-provided output slice of the exact output size. Dims passed
/// alongside data are always logical (host-order) dims.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu", "accelerator").
    fn name(&self) -> &str;

    /// Storage layout of rank-4 tensors handed to this backend.
    fn layout(&self) -> Layout;

    /// Grouped, dilated 2-D convolution with optional bias and fused activation.
    ///
    /// - `input`: `[N, C, H, W]`
    /// - `filter`: `[OC, C/groups, KH, KW]`
    /// - `bias`: length `OC`
    fn conv2d(
        &self,
        input: TensorRef<'_>,
        filter: TensorRef<'_>,
        bias: Option<&[f32]>,
        params: &Conv2dParams,
        out: &mut [f32],
    ) -> Result<()>;

    /// Max or average pooling over an `[N, C, H, W]` input.
    fn pool2d(&self, input: TensorRef<'_>, params: &Pool2dParams, out: &mut [f32]) -> Result<()>;

    /// Per-channel normalization along dim 1.
    fn batch_norm(
        &self,
        input: TensorRef<'_>,
        params: &BatchNormParams<'_>,
        out: &mut [f32],
    ) -> Result<()>;

    /// `out = activation(x op y)`, with `y` broadcast onto `x` starting at `axis`
    /// (`-1` aligns the trailing dims).
    fn binary(
        &self,
        op: BinaryOp,
        x: TensorRef<'_>,
        y: TensorRef<'_>,
        axis: isize,
        activation: Activation,
        out: &mut [f32],
    ) -> Result<()>;

    /// `out[i] = activation(x[i])`.
    fn activation(&self, x: &[f32], activation: Activation, out: &mut [f32]) -> Result<()>;

    /// `out[i] = x[i] * scale + bias`, or `(x[i] + bias) * scale` when
    /// `bias_after_scale` is false.
    fn scale(
        &self,
        x: &[f32],
        scale: f32,
        bias: f32,
        bias_after_scale: bool,
        out: &mut [f32],
    ) -> Result<()>;

    /// Row-major matrix product: `[m, k] @ [k, n] -> [m, n]`.
    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize, out: &mut [f32]) -> Result<()>;

    /// Softmax over the last logical axis.
    fn softmax(&self, x: TensorRef<'_>, out: &mut [f32]) -> Result<()>;
}

/// Builds the backend that executes on `target`.
pub fn create_backend(target: &Target) -> Result<Arc<dyn ComputeBackend>> {
    match target.kind {
        TargetKind::Host => Ok(Arc::new(CpuBackend::new())),
        TargetKind::Accelerator => Ok(Arc::new(AcceleratorBackend::new(target.clone())?)),
    }
}

pub(crate) fn check_len(what: &str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(TensorError::LengthMismatch {
            what: what.to_string(),
            expected,
            got,
        });
    }
    Ok(())
}

/// Validates conv2d operands and returns the output dims.
pub(crate) fn check_conv(
    input: &TensorRef<'_>,
    filter: &TensorRef<'_>,
    bias: Option<&[f32]>,
    params: &Conv2dParams,
    out: &[f32],
) -> Result<[usize; 4]> {
    input.check("conv2d input")?;
    filter.check("conv2d filter")?;
    let out_dims = params.output_dims(input.nchw()?, filter.nchw()?)?;
    if let Some(b) = bias {
        check_len("conv2d bias", out_dims[1], b.len())?;
    }
    check_len("conv2d output", out_dims.iter().product(), out.len())?;
    Ok(out_dims)
}

pub(crate) fn check_pool(input: &TensorRef<'_>, params: &Pool2dParams, out: &[f32]) -> Result<[usize; 4]> {
    input.check("pool2d input")?;
    let out_dims = params.output_dims(input.nchw()?)?;
    check_len("pool2d output", out_dims.iter().product(), out.len())?;
    Ok(out_dims)
}

/// Validates batch-norm operands and returns the channel count.
pub(crate) fn check_batch_norm(input: &TensorRef<'_>, params: &BatchNormParams<'_>, out: &[f32]) -> Result<usize> {
    input.check("batch_norm input")?;
    if input.dims.len() < 2 {
        return Err(TensorError::InvalidArgument(format!(
            "batch_norm needs at least rank 2, got {:?}",
            input.dims
        )));
    }
    let channels = input.dims[1];
    params.check(channels)?;
    check_len("batch_norm output", input.numel(), out.len())?;
    Ok(channels)
}

pub(crate) fn check_matmul(a: &[f32], b: &[f32], m: usize, k: usize, n: usize, out: &[f32]) -> Result<()> {
    check_len("matmul lhs", m * k, a.len())?;
    check_len("matmul rhs", k * n, b.len())?;
    check_len("matmul output", m * n, out.len())
}

pub(crate) fn check_softmax(x: &TensorRef<'_>, out: &[f32]) -> Result<usize> {
    x.check("softmax input")?;
    check_len("softmax output", x.numel(), out.len())?;
    match x.dims.last() {
        Some(&n) if n > 0 => Ok(n),
        _ => Err(TensorError::InvalidArgument(
            "softmax needs a non-empty last axis".to_string(),
        )),
    }
}

/// Numerically stable softmax of one row.
#[inline]
pub(crate) fn softmax_row(row: &[f32], out: &mut [f32]) {
    let max_val = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for (o, &v) in out.iter_mut().zip(row) {
        let e = (v - max_val).exp();
        *o = e;
        sum += e;
    }
    for o in out.iter_mut() {
        *o /= sum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv_output_dims() {
        let p = Conv2dParams {
            strides: [2, 2],
            paddings: [3, 3],
            ..Default::default()
        };
        assert_eq!(p.output_dims([1, 3, 224, 224], [64, 3, 7, 7]).unwrap(), [1, 64, 112, 112]);
    }

    #[test]
    fn test_conv_output_dims_grouped_and_dilated() {
        let p = Conv2dParams {
            paddings: [2, 2],
            dilations: [2, 2],
            groups: 4,
            ..Default::default()
        };
        assert_eq!(p.output_dims([1, 8, 10, 10], [8, 2, 3, 3]).unwrap(), [1, 8, 10, 10]);
        // Filter input channels must equal C / groups.
        assert!(p.output_dims([1, 8, 10, 10], [8, 8, 3, 3]).is_err());
    }

    #[test]
    fn test_pool_output_dims() {
        let p = Pool2dParams {
            kind: PoolKind::Max,
            ksize: [3, 3],
            strides: [2, 2],
            paddings: [1, 1],
            global: false,
            exclusive: true,
            ceil_mode: false,
        };
        assert_eq!(p.output_dims([1, 64, 112, 112]).unwrap(), [1, 64, 56, 56]);
        let ceil = Pool2dParams { ceil_mode: true, paddings: [0, 0], ..p.clone() };
        assert_eq!(ceil.output_dims([1, 1, 6, 6]).unwrap(), [1, 1, 3, 3]);
        let global = Pool2dParams { global: true, ..p };
        assert_eq!(global.output_dims([1, 512, 7, 7]).unwrap(), [1, 512, 1, 1]);
    }

    #[test]
    fn test_activation_apply() {
        assert_eq!(Activation::Relu.apply(-2.0), 0.0);
        assert_eq!(Activation::Identity.apply(-2.0), -2.0);
        assert!((Activation::Sigmoid.apply(0.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_batch_norm_folded() {
        let bn = BatchNormParams {
            scale: &[2.0],
            bias: &[1.0],
            mean: &[3.0],
            variance: &[4.0 - 1e-5],
            epsilon: 1e-5,
            activation: Activation::Identity,
        };
        let (mul, add) = bn.folded();
        assert!((mul[0] - 1.0).abs() < 1e-5);
        assert!((add[0] + 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_create_backend_per_target() {
        let host = create_backend(&Target::default_host()).unwrap();
        assert_eq!(host.layout(), Layout::Nchw);
        let accel = create_backend(&Target::default_accelerator().with_max_threads(2)).unwrap();
        assert_eq!(accel.layout(), Layout::Nhwc);
    }
}
