//! Data-parallel accelerator backend.
//!
//! Rank-4 tensors live in NHWC order (conv filters as OHWI). Work is split
//! across a dedicated rayon pool sized by [`Target::max_threads`]; each
//! output element is produced by exactly one task with a fixed accumulation
//! order, so repeated runs are bitwise identical.

mod conv;
mod pool;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::backend::{
    check_batch_norm, check_conv, check_len, check_matmul, check_pool, check_softmax, softmax_row,
    Activation, BatchNormParams, BinaryOp, ComputeBackend, Conv2dParams, Pool2dParams, TensorRef,
};
use crate::broadcast::Broadcast;
use crate::cpu::{matmul::matmul_row, unary};
use crate::error::{Result, TensorError};
use crate::layout::Layout;
use crate::target::Target;

#[derive(Debug)]
pub struct AcceleratorBackend {
    target: Target,
    pool: ThreadPool,
}

impl AcceleratorBackend {
    pub fn new(target: Target) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(target.max_threads.max(1))
            .thread_name(|i| format!("nx-accel-{}", i))
            .build()
            .map_err(|e| TensorError::Backend(format!("failed to start accelerator pool: {}", e)))?;
        tracing::debug!(threads = target.max_threads, arch = %target.arch, "accelerator backend ready");
        Ok(AcceleratorBackend { target, pool })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Runs `f` over `chunk`-sized pieces of `out` in parallel, passing the
    /// offset of each piece.
    fn injective(&self, out: &mut [f32], f: impl Fn(usize, &mut [f32]) + Sync) {
        let chunk = self.target.injective_chunk(out.len());
        self.pool.install(|| {
            out.par_chunks_mut(chunk)
                .enumerate()
                .for_each(|(i, piece)| f(i * chunk, piece));
        });
    }
}

impl ComputeBackend for AcceleratorBackend {
    fn name(&self) -> &str {
        "accelerator"
    }

    fn layout(&self) -> Layout {
        Layout::Nhwc
    }

    fn conv2d(
        &self,
        input: TensorRef<'_>,
        filter: TensorRef<'_>,
        bias: Option<&[f32]>,
        params: &Conv2dParams,
        out: &mut [f32],
    ) -> Result<()> {
        let [_, oc, oh, ow] = check_conv(&input, &filter, bias, params, out)?;
        let in_dims = input.nchw()?;
        let f_dims = filter.nchw()?;
        if out.is_empty() {
            return Ok(());
        }
        self.pool.install(|| {
            out.par_chunks_mut(ow * oc).enumerate().for_each(|(row, out_row)| {
                conv::conv_row_nhwc(
                    input.data,
                    in_dims,
                    filter.data,
                    f_dims,
                    bias,
                    params,
                    row / oh,
                    row % oh,
                    out_row,
                );
            });
        });
        Ok(())
    }

    fn pool2d(&self, input: TensorRef<'_>, params: &Pool2dParams, out: &mut [f32]) -> Result<()> {
        let [_, c, oh, ow] = check_pool(&input, params, out)?;
        let in_dims = input.nchw()?;
        if out.is_empty() {
            return Ok(());
        }
        self.pool.install(|| {
            out.par_chunks_mut(ow * c).enumerate().for_each(|(row, out_row)| {
                pool::pool_row_nhwc(input.data, in_dims, params, row / oh, row % oh, out_row);
            });
        });
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
        self.injective(out, |start, piece| {
            for (i, o) in piece.iter_mut().enumerate() {
                let off = start + i;
                let ch = Layout::Nhwc.channel_of(input.dims, off);
                *o = params.activation.apply(input.data[off] * mul[ch] + add[ch]);
            }
        });
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
        let plan = Broadcast::new(Layout::Nhwc, op, x, y, axis, activation)?;
        check_len("binary output", plan.numel(), out.len())?;
        self.injective(out, |start, piece| plan.fill(start, piece));
        Ok(())
    }

    fn activation(&self, x: &[f32], activation: Activation, out: &mut [f32]) -> Result<()> {
        check_len("activation output", x.len(), out.len())?;
        self.injective(out, |start, piece| {
            unary::activation_into(&x[start..start + piece.len()], activation, piece)
        });
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
        self.injective(out, |start, piece| {
            unary::scale_into(&x[start..start + piece.len()], scale, bias, bias_after_scale, piece)
        });
        Ok(())
    }

    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize, out: &mut [f32]) -> Result<()> {
        check_matmul(a, b, m, k, n, out)?;
        if n == 0 {
            return Ok(());
        }
        self.pool.install(|| {
            out.par_chunks_mut(n).enumerate().for_each(|(i, out_row)| {
                matmul_row(&a[i * k..(i + 1) * k], b, n, out_row);
            });
        });
        Ok(())
    }

    fn softmax(&self, x: TensorRef<'_>, out: &mut [f32]) -> Result<()> {
        let row_len = check_softmax(&x, out)?;
        if Layout::Nhwc.is_host_order(x.dims) {
            self.pool.install(|| {
                x.data
                    .par_chunks(row_len)
                    .zip(out.par_chunks_mut(row_len))
                    .for_each(|(row, out_row)| softmax_row(row, out_row));
            });
            return Ok(());
        }
        // The last logical axis is W, which is strided in NHWC.
        let host = Layout::Nhwc.device_to_host(x.data, x.dims);
        let mut tmp = vec![0.0f32; host.len()];
        self.pool.install(|| {
            host.par_chunks(row_len)
                .zip(tmp.par_chunks_mut(row_len))
                .for_each(|(row, out_row)| softmax_row(row, out_row));
        });
        out.copy_from_slice(&Layout::Nhwc.host_to_device(&tmp, x.dims));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PoolKind;
    use crate::cpu::CpuBackend;
    use approx::assert_abs_diff_eq;

    fn accel() -> AcceleratorBackend {
        AcceleratorBackend::new(Target::default_accelerator().with_max_threads(3)).unwrap()
    }

    fn pseudo(n: usize, seed: u32) -> Vec<f32> {
        // Small deterministic values in [-1, 1).
        (0..n)
            .map(|i| {
                let v = (i as u32).wrapping_mul(2654435761).wrapping_add(seed.wrapping_mul(40503));
                (v % 2000) as f32 / 1000.0 - 1.0
            })
            .collect()
    }

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_conv_matches_cpu() {
        let nhwc = Layout::Nhwc;
        let in_dims = [2usize, 4, 7, 6];
        let f_dims = [6usize, 2, 3, 3];
        let x = pseudo(in_dims.iter().product(), 1);
        let f = pseudo(f_dims.iter().product(), 2);
        let bias = pseudo(6, 3);
        let params = Conv2dParams {
            strides: [2, 1],
            paddings: [1, 2],
            dilations: [1, 2],
            groups: 2,
            activation: Activation::Relu,
        };
        let out_dims = params.output_dims(in_dims, f_dims).unwrap();
        let numel: usize = out_dims.iter().product();

        let mut expected = vec![0.0; numel];
        CpuBackend::new()
            .conv2d(TensorRef::new(&x, &in_dims), TensorRef::new(&f, &f_dims), Some(&bias), &params, &mut expected)
            .unwrap();

        let dx = nhwc.host_to_device(&x, &in_dims);
        let df = nhwc.host_to_device(&f, &f_dims);
        let mut got = vec![0.0; numel];
        accel()
            .conv2d(TensorRef::new(&dx, &in_dims), TensorRef::new(&df, &f_dims), Some(&bias), &params, &mut got)
            .unwrap();
        assert_close(&nhwc.device_to_host(&got, &out_dims), &expected);
    }

    #[test]
    fn test_pool_matches_cpu() {
        let nhwc = Layout::Nhwc;
        let dims = [1usize, 3, 5, 5];
        let x = pseudo(75, 4);
        for kind in [PoolKind::Max, PoolKind::Avg] {
            let params = Pool2dParams {
                kind,
                ksize: [3, 3],
                strides: [2, 2],
                paddings: [1, 1],
                global: false,
                exclusive: true,
                ceil_mode: false,
            };
            let out_dims = params.output_dims(dims).unwrap();
            let numel: usize = out_dims.iter().product();
            let mut expected = vec![0.0; numel];
            CpuBackend::new().pool2d(TensorRef::new(&x, &dims), &params, &mut expected).unwrap();
            let dx = nhwc.host_to_device(&x, &dims);
            let mut got = vec![0.0; numel];
            accel().pool2d(TensorRef::new(&dx, &dims), &params, &mut got).unwrap();
            assert_close(&nhwc.device_to_host(&got, &out_dims), &expected);
        }
    }

    #[test]
    fn test_batch_norm_matches_cpu() {
        let nhwc = Layout::Nhwc;
        let dims = [1usize, 3, 2, 2];
        let x = pseudo(12, 5);
        let params = BatchNormParams {
            scale: &[1.0, 0.5, 2.0],
            bias: &[0.1, 0.2, 0.3],
            mean: &[0.0, -0.5, 0.25],
            variance: &[1.0, 2.0, 0.5],
            epsilon: 1e-5,
            activation: Activation::Sigmoid,
        };
        let mut expected = vec![0.0; 12];
        CpuBackend::new().batch_norm(TensorRef::new(&x, &dims), &params, &mut expected).unwrap();
        let dx = nhwc.host_to_device(&x, &dims);
        let mut got = vec![0.0; 12];
        accel().batch_norm(TensorRef::new(&dx, &dims), &params, &mut got).unwrap();
        assert_close(&nhwc.device_to_host(&got, &dims), &expected);
    }

    #[test]
    fn test_binary_channel_broadcast() {
        let nhwc = Layout::Nhwc;
        let dims = [1usize, 2, 3, 3];
        let x = pseudo(18, 6);
        let y = [0.5f32, -0.5];
        let mut expected = vec![0.0; 18];
        CpuBackend::new()
            .binary(BinaryOp::Add, TensorRef::new(&x, &dims), TensorRef::new(&y, &[2]), 1, Activation::Identity, &mut expected)
            .unwrap();
        let dx = nhwc.host_to_device(&x, &dims);
        let mut got = vec![0.0; 18];
        accel()
            .binary(BinaryOp::Add, TensorRef::new(&dx, &dims), TensorRef::new(&y, &[2]), 1, Activation::Identity, &mut got)
            .unwrap();
        assert_close(&nhwc.device_to_host(&got, &dims), &expected);
    }

    #[test]
    fn test_matmul_matches_cpu() {
        let (m, k, n) = (5, 7, 3);
        let a = pseudo(m * k, 7);
        let b = pseudo(k * n, 8);
        let mut expected = vec![0.0; m * n];
        CpuBackend::new().matmul(&a, &b, m, k, n, &mut expected).unwrap();
        let mut got = vec![0.0; m * n];
        accel().matmul(&a, &b, m, k, n, &mut got).unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_softmax_rank4_strided() {
        let nhwc = Layout::Nhwc;
        let dims = [1usize, 2, 2, 3];
        let x = pseudo(12, 9);
        let mut expected = vec![0.0; 12];
        CpuBackend::new().softmax(TensorRef::new(&x, &dims), &mut expected).unwrap();
        let dx = nhwc.host_to_device(&x, &dims);
        let mut got = vec![0.0; 12];
        accel().softmax(TensorRef::new(&dx, &dims), &mut got).unwrap();
        assert_close(&nhwc.device_to_host(&got, &dims), &expected);
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let backend = accel();
        let x = pseudo(4096, 10);
        let mut first = vec![0.0; 4096];
        let mut second = vec![0.0; 4096];
        backend.scale(&x, 0.3, 0.1, false, &mut first).unwrap();
        backend.scale(&x, 0.3, 0.1, false, &mut second).unwrap();
        assert_eq!(first, second);
    }
}
