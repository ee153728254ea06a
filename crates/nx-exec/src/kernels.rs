//! Maps one operator onto backend kernels.

use std::borrow::Cow;

use nx_model::{Op, OpKind};
use nx_tensor::{BatchNormParams, ComputeBackend, Layout, Result, TensorError, TensorRef};

/// Computes `op` on `backend`. Operands and `out` are stored in the
/// backend's layout; dims are logical.
pub fn dispatch(
    backend: &dyn ComputeBackend,
    op: &Op,
    inputs: &[TensorRef<'_>],
    out_dims: &[usize],
    out: &mut [f32],
) -> Result<()> {
    let layout = backend.layout();
    match &op.kind {
        OpKind::Feed | OpKind::Fetch => Err(TensorError::InvalidArgument(format!(
            "{} has no kernel",
            op.op_type
        ))),
        OpKind::Conv2d { params, has_bias } => {
            let bias = if *has_bias { Some(inputs[2].data) } else { None };
            backend.conv2d(inputs[0], inputs[1], bias, params, out)
        }
        OpKind::BatchNorm { epsilon, activation } => {
            let params = BatchNormParams {
                scale: inputs[1].data,
                bias: inputs[2].data,
                mean: inputs[3].data,
                variance: inputs[4].data,
                epsilon: *epsilon,
                activation: *activation,
            };
            backend.batch_norm(inputs[0], &params, out)
        }
        OpKind::Activation(act) => backend.activation(inputs[0].data, *act, out),
        OpKind::Pool2d(params) => backend.pool2d(inputs[0], params, out),
        OpKind::Elementwise { op, axis, activation } => {
            backend.binary(*op, inputs[0], inputs[1], *axis, *activation, out)
        }
        OpKind::Mul {
            x_num_col_dims,
            y_num_col_dims,
        } => {
            let (x, y) = (inputs[0], inputs[1]);
            let m: usize = x.dims[..*x_num_col_dims].iter().product();
            let k: usize = x.dims[*x_num_col_dims..].iter().product();
            let n: usize = y.dims[*y_num_col_dims..].iter().product();
            let (xh, yh) = (host_order(layout, x), host_order(layout, y));
            write_host_order(layout, out_dims, out, |buf| backend.matmul(&xh, &yh, m, k, n, buf))
        }
        OpKind::Matmul {
            transpose_x,
            transpose_y,
            alpha,
        } => {
            let (x, y) = (inputs[0], inputs[1]);
            let (m, k) = if *transpose_x { (x.dims[1], x.dims[0]) } else { (x.dims[0], x.dims[1]) };
            let n = if *transpose_y { y.dims[0] } else { y.dims[1] };
            let xh = if *transpose_x { transpose(x.data, x.dims[0], x.dims[1]) } else { Cow::Borrowed(x.data) };
            let yh = if *transpose_y { transpose(y.data, y.dims[0], y.dims[1]) } else { Cow::Borrowed(y.data) };
            backend.matmul(&xh, &yh, m, k, n, out)?;
            if *alpha != 1.0 {
                for v in out.iter_mut() {
                    *v *= alpha;
                }
            }
            Ok(())
        }
        OpKind::Scale {
            scale,
            bias,
            bias_after_scale,
        } => backend.scale(inputs[0].data, *scale, *bias, *bias_after_scale, out),
        OpKind::Softmax { .. } => backend.softmax(inputs[0], out),
        OpKind::Flatten { .. } | OpKind::Reshape { .. } => {
            let x = host_order(layout, inputs[0]);
            write_host_order(layout, out_dims, out, |buf| {
                if buf.len() != x.len() {
                    return Err(TensorError::LengthMismatch {
                        what: "reshape output".to_string(),
                        expected: x.len(),
                        got: buf.len(),
                    });
                }
                buf.copy_from_slice(&x);
                Ok(())
            })
        }
    }
}

/// The operand's data in host (row-major NCHW) order.
fn host_order<'a>(layout: Layout, t: TensorRef<'a>) -> Cow<'a, [f32]> {
    if layout.is_host_order(t.dims) {
        Cow::Borrowed(t.data)
    } else {
        Cow::Owned(layout.device_to_host(t.data, t.dims))
    }
}

/// Runs `f` on a host-order view of `out`, converting back to `layout`.
fn write_host_order(
    layout: Layout,
    out_dims: &[usize],
    out: &mut [f32],
    f: impl FnOnce(&mut [f32]) -> Result<()>,
) -> Result<()> {
    if layout.is_host_order(out_dims) {
        return f(out);
    }
    let mut tmp = vec![0.0f32; out.len()];
    f(&mut tmp)?;
    out.copy_from_slice(&layout.host_to_device(&tmp, out_dims));
    Ok(())
}

fn transpose(data: &[f32], rows: usize, cols: usize) -> Cow<'static, [f32]> {
    let mut t = vec![0.0f32; data.len()];
    for r in 0..rows {
        for c in 0..cols {
            t[c * rows + r] = data[r * cols + c];
        }
    }
    Cow::Owned(t)
}
