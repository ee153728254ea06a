pub(crate) mod conv;
pub(crate) mod matmul;
pub(crate) mod pool;
pub(crate) mod unary;

use crate::backend::{
    check_batch_norm, check_conv, check_len, check_matmul, check_pool, check_softmax, softmax_row,
    Activation, BatchNormParams, BinaryOp, ComputeBackend, Conv2dParams, Pool2dParams, TensorRef,
};
use crate::broadcast::Broadcast;
use crate::error::Result;
use crate::layout::Layout;

/// Pure-Rust host compute backend.
///
/// Implements all operations with straightforward single-threaded loops in
/// NCHW order, optimized for correctness rather than peak performance. It is
/// the host target's backend and the numerical reference for the others.
#[derive(Debug, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn layout(&self) -> Layout {
        Layout::Nchw
    }

    fn conv2d(
        &self,
        input: TensorRef<'_>,
        filter: TensorRef<'_>,
        bias: Option<&[f32]>,
        params: &Conv2dParams,
        out: &mut [f32],
    ) -> Result<()> {
        let [n, oc, oh, ow] = check_conv(&input, &filter, bias, params, out)?;
        let in_dims = input.nchw()?;
        let f_dims = filter.nchw()?;
        let plane = oh * ow;
        for b in 0..n {
            for o in 0..oc {
                let start = (b * oc + o) * plane;
                conv::conv_plane_nchw(
                    input.data,
                    in_dims,
                    filter.data,
                    f_dims,
                    bias,
                    params,
                    b,
                    o,
                    [oh, ow],
                    &mut out[start..start + plane],
                );
            }
        }
        Ok(())
    }

    fn pool2d(&self, input: TensorRef<'_>, params: &Pool2dParams, out: &mut [f32]) -> Result<()> {
        let [_, _, oh, ow] = check_pool(&input, params, out)?;
        let [n, c, h, w] = input.nchw()?;
        for (i, out_plane) in out.chunks_mut(oh * ow).enumerate().take(n * c) {
            let plane = &input.data[i * h * w..(i + 1) * h * w];
            pool::pool_plane_nchw(plane, [h, w], params, [oh, ow], out_plane);
        }
        Ok(())
    }

    fn batch_norm(
        &self,
        input: TensorRef<'_>,
        params: &BatchNormParams<'_>,
        out: &mut [f32],
    ) -> Result<()> {
        check_batch_norm(&input, params, out)?;
        let (mul, add) = params.folded();
        for (i, (o, &x)) in out.iter_mut().zip(input.data).enumerate() {
            let ch = Layout::Nchw.channel_of(input.dims, i);
            *o = params.activation.apply(x * mul[ch] + add[ch]);
        }
        Ok(())
    }

    fn binary(
        &self,
        op: BinaryOp,
        x: TensorRef<'_>,
        y: TensorRef<'_>,
        axis: isize,
        activation: Activation,
        out: &mut [f32],
    ) -> Result<()> {
        let plan = Broadcast::new(Layout::Nchw, op, x, y, axis, activation)?;
        check_len("binary output", plan.numel(), out.len())?;
        plan.fill(0, out);
        Ok(())
    }

    fn activation(&self, x: &[f32], activation: Activation, out: &mut [f32]) -> Result<()> {
        check_len("activation output", x.len(), out.len())?;
        unary::activation_into(x, activation, out);
        Ok(())
    }

    fn scale(
        &self,
        x: &[f32],
        scale: f32,
        bias: f32,
        bias_after_scale: bool,
        out: &mut [f32],
    ) -> Result<()> {
        check_len("scale output", x.len(), out.len())?;
        unary::scale_into(x, scale, bias, bias_after_scale, out);
        Ok(())
    }

    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize, out: &mut [f32]) -> Result<()> {
        check_matmul(a, b, m, k, n, out)?;
        for i in 0..m {
            matmul::matmul_row(&a[i * k..(i + 1) * k], b, n, &mut out[i * n..(i + 1) * n]);
        }
        Ok(())
    }

    fn softmax(&self, x: TensorRef<'_>, out: &mut [f32]) -> Result<()> {
        let row_len = check_softmax(&x, out)?;
        for (row, out_row) in x.data.chunks(row_len).zip(out.chunks_mut(row_len)) {
            softmax_row(row, out_row);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PoolKind;
    use approx::assert_abs_diff_eq;

    fn backend() -> CpuBackend {
        CpuBackend::new()
    }

    #[test]
    fn test_matmul_basic() {
        let b = backend();
        let mut c = vec![0.0; 4];
        b.matmul(&[1.0, 2.0, 3.0, 4.0], &[5.0, 6.0, 7.0, 8.0], 2, 2, 2, &mut c)
            .unwrap();
        assert_eq!(c, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_length_mismatch() {
        let mut c = vec![0.0; 4];
        assert!(backend().matmul(&[1.0, 2.0, 3.0], &[1.0; 4], 2, 2, 2, &mut c).is_err());
    }

    #[test]
    fn test_conv_identity_kernel() {
        // 1x1 conv with weight 2 and bias 1 doubles then shifts.
        let b = backend();
        let x = [1.0, 2.0, 3.0, 4.0];
        let mut out = [0.0; 4];
        b.conv2d(
            TensorRef::new(&x, &[1, 1, 2, 2]),
            TensorRef::new(&[2.0], &[1, 1, 1, 1]),
            Some(&[1.0]),
            &Conv2dParams::default(),
            &mut out,
        )
        .unwrap();
        assert_eq!(out, [3.0, 5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_conv_3x3_padded_sum() {
        // All-ones 3x3 kernel over a 3x3 ones input with padding 1 counts
        // the in-bounds neighbours of each pixel.
        let b = backend();
        let x = [1.0f32; 9];
        let mut out = [0.0; 9];
        let params = Conv2dParams {
            paddings: [1, 1],
            ..Default::default()
        };
        b.conv2d(
            TensorRef::new(&x, &[1, 1, 3, 3]),
            TensorRef::new(&[1.0; 9], &[1, 1, 3, 3]),
            None,
            &params,
            &mut out,
        )
        .unwrap();
        assert_eq!(out, [4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0]);
    }

    #[test]
    fn test_conv_grouped_fused_relu() {
        // Two groups, one channel each; second filter negates.
        let b = backend();
        let x = [1.0, 2.0];
        let mut out = [0.0; 2];
        let params = Conv2dParams {
            groups: 2,
            activation: Activation::Relu,
            ..Default::default()
        };
        b.conv2d(
            TensorRef::new(&x, &[1, 2, 1, 1]),
            TensorRef::new(&[3.0, -1.0], &[2, 1, 1, 1]),
            None,
            &params,
            &mut out,
        )
        .unwrap();
        assert_eq!(out, [3.0, 0.0]);
    }

    #[test]
    fn test_max_pool() {
        let b = backend();
        let x: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let params = Pool2dParams {
            kind: PoolKind::Max,
            ksize: [2, 2],
            strides: [2, 2],
            paddings: [0, 0],
            global: false,
            exclusive: true,
            ceil_mode: false,
        };
        let mut out = [0.0; 4];
        b.pool2d(TensorRef::new(&x, &[1, 1, 4, 4]), &params, &mut out).unwrap();
        assert_eq!(out, [5.0, 7.0, 13.0, 15.0]);
    }

    #[test]
    fn test_avg_pool_exclusive_padding() {
        let b = backend();
        let x = [1.0, 2.0, 3.0, 4.0];
        let mut params = Pool2dParams {
            kind: PoolKind::Avg,
            ksize: [2, 2],
            strides: [1, 1],
            paddings: [1, 1],
            global: false,
            exclusive: true,
            ceil_mode: false,
        };
        let mut out = [0.0; 9];
        b.pool2d(TensorRef::new(&x, &[1, 1, 2, 2]), &params, &mut out).unwrap();
        // Corner windows see one element; the centre sees all four.
        assert_abs_diff_eq!(out[0], 1.0);
        assert_abs_diff_eq!(out[4], 2.5);

        params.exclusive = false;
        b.pool2d(TensorRef::new(&x, &[1, 1, 2, 2]), &params, &mut out).unwrap();
        assert_abs_diff_eq!(out[0], 0.25);
    }

    #[test]
    fn test_global_avg_pool() {
        let b = backend();
        let x = [1.0, 2.0, 3.0, 4.0, 10.0, 10.0, 10.0, 10.0];
        let params = Pool2dParams {
            kind: PoolKind::Avg,
            ksize: [1, 1],
            strides: [1, 1],
            paddings: [0, 0],
            global: true,
            exclusive: true,
            ceil_mode: false,
        };
        let mut out = [0.0; 2];
        b.pool2d(TensorRef::new(&x, &[1, 2, 2, 2]), &params, &mut out).unwrap();
        assert_abs_diff_eq!(out[0], 2.5);
        assert_abs_diff_eq!(out[1], 10.0);
    }

    #[test]
    fn test_batch_norm() {
        let b = backend();
        let x = [1.0, 1.0, 1.0, 1.0];
        let params = BatchNormParams {
            scale: &[1.0, 2.0],
            bias: &[0.0, 1.0],
            mean: &[1.0, 0.0],
            variance: &[1.0, 1.0],
            epsilon: 0.0,
            activation: Activation::Identity,
        };
        let mut out = [0.0; 4];
        b.batch_norm(TensorRef::new(&x, &[1, 2, 1, 2]), &params, &mut out).unwrap();
        assert_eq!(out, [0.0, 0.0, 3.0, 3.0]);
    }

    #[test]
    fn test_binary_add_relu() {
        let b = backend();
        let mut out = [0.0; 3];
        b.binary(
            BinaryOp::Add,
            TensorRef::new(&[1.0, -5.0, 2.0], &[3]),
            TensorRef::new(&[1.0, 1.0, 1.0], &[3]),
            -1,
            Activation::Relu,
            &mut out,
        )
        .unwrap();
        assert_eq!(out, [2.0, 0.0, 3.0]);
    }

    #[test]
    fn test_scale_modes() {
        let b = backend();
        let mut out = [0.0; 2];
        b.scale(&[1.0, 2.0], 2.0, 1.0, true, &mut out).unwrap();
        assert_eq!(out, [3.0, 5.0]);
        b.scale(&[1.0, 2.0], 2.0, 1.0, false, &mut out).unwrap();
        assert_eq!(out, [4.0, 6.0]);
    }

    #[test]
    fn test_softmax_rows() {
        let b = backend();
        let mut out = [0.0; 6];
        b.softmax(TensorRef::new(&[1.0, 2.0, 3.0, 0.0, 0.0, 0.0], &[2, 3]), &mut out)
            .unwrap();
        let sum0: f32 = out[..3].iter().sum();
        assert_abs_diff_eq!(sum0, 1.0, epsilon = 1e-6);
        assert!(out[0] < out[1] && out[1] < out[2]);
        assert_abs_diff_eq!(out[4], 1.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_activation_length_mismatch() {
        let mut out = [0.0; 2];
        assert!(backend().activation(&[1.0], Activation::Relu, &mut out).is_err());
    }
}
