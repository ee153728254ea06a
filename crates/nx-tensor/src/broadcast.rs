//! Axis-aligned broadcasting for binary element-wise kernels.
//!
//! `y`'s dims line up with `x`'s dims starting at `axis`; every aligned `y`
//! dim must equal the `x` dim or be 1. The output always has `x`'s dims.

use crate::backend::{Activation, BinaryOp, TensorRef};
use crate::error::{Result, TensorError};
use crate::layout::Layout;

/// Resolves `axis` (negative counts from the trailing alignment) and checks
/// that `y` broadcasts onto `x`.
pub fn resolve_axis(x_dims: &[usize], y_dims: &[usize], axis: isize) -> Result<usize> {
    let err = || TensorError::BroadcastError {
        a: x_dims.to_vec(),
        b: y_dims.to_vec(),
        axis,
    };
    if y_dims.len() > x_dims.len() {
        return Err(err());
    }
    let axis = if axis < 0 {
        (x_dims.len() - y_dims.len()) as isize + axis + 1
    } else {
        axis
    };
    if axis < 0 || axis as usize + y_dims.len() > x_dims.len() {
        return Err(err());
    }
    let axis = axis as usize;
    for (i, &d) in y_dims.iter().enumerate() {
        if d != 1 && d != x_dims[axis + i] {
            return Err(err());
        }
    }
    Ok(axis)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pattern {
    /// Identical dims: element-wise zip.
    Same,
    /// `y` holds one value.
    Scalar,
    /// `y` varies only along dim 1 of `x` (per-channel bias and friends).
    Channel,
    /// Anything else: map through logical coordinates.
    General,
}

/// A validated broadcast, ready to fill output ranges.
#[derive(Debug, Clone, Copy)]
pub struct Broadcast<'a> {
    x: TensorRef<'a>,
    y: TensorRef<'a>,
    axis: usize,
    pattern: Pattern,
    op: BinaryOp,
    activation: Activation,
    layout: Layout,
}

impl<'a> Broadcast<'a> {
    pub fn new(
        layout: Layout,
        op: BinaryOp,
        x: TensorRef<'a>,
        y: TensorRef<'a>,
        axis: isize,
        activation: Activation,
    ) -> Result<Self> {
        crate::backend::check_len("binary lhs", x.numel(), x.data.len())?;
        crate::backend::check_len("binary rhs", y.numel(), y.data.len())?;
        let axis = resolve_axis(x.dims, y.dims, axis)?;
        let pattern = if x.dims == y.dims {
            Pattern::Same
        } else if y.numel() == 1 {
            Pattern::Scalar
        } else if x.dims.len() >= 2 && varies_only_at(y.dims, axis, 1) {
            Pattern::Channel
        } else {
            Pattern::General
        };
        Ok(Broadcast {
            x,
            y,
            axis,
            pattern,
            op,
            activation,
            layout,
        })
    }

    pub fn numel(&self) -> usize {
        self.x.numel()
    }

    /// Fills `out` with output elements `start..start + out.len()`.
    pub fn fill(&self, start: usize, out: &mut [f32]) {
        let (x, y) = (self.x.data, self.y.data);
        let f = |a: f32, b: f32| self.activation.apply(self.op.apply(a, b));
        match self.pattern {
            Pattern::Same => {
                for (i, o) in out.iter_mut().enumerate() {
                    *o = f(x[start + i], y[start + i]);
                }
            }
            Pattern::Scalar => {
                for (i, o) in out.iter_mut().enumerate() {
                    *o = f(x[start + i], y[0]);
                }
            }
            Pattern::Channel => {
                for (i, o) in out.iter_mut().enumerate() {
                    let ch = self.layout.channel_of(self.x.dims, start + i);
                    *o = f(x[start + i], y[ch]);
                }
            }
            Pattern::General => {
                let mut cx = vec![0usize; self.x.dims.len()];
                let mut cy = vec![0usize; self.y.dims.len()];
                for (i, o) in out.iter_mut().enumerate() {
                    self.layout.coords(self.x.dims, start + i, &mut cx);
                    for (d, c) in cy.iter_mut().enumerate() {
                        *c = if self.y.dims[d] == 1 { 0 } else { cx[self.axis + d] };
                    }
                    let yo = self.layout.offset(self.y.dims, &cy);
                    *o = f(x[start + i], y[yo]);
                }
            }
        }
    }
}

/// True when the only non-unit dim of `y` (aligned at `axis`) sits at `dim`.
fn varies_only_at(y_dims: &[usize], axis: usize, dim: usize) -> bool {
    y_dims
        .iter()
        .enumerate()
        .all(|(i, &d)| d == 1 || axis + i == dim)
}
