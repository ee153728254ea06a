// Row kernel shared by the host and accelerator matmul paths.

/// Computes one output row: `out_row = a_row @ b` for `b` of shape `[k, n]`.
///
/// Accumulates over `k` in ascending order for every output element, so the
/// result does not depend on how rows are distributed across threads.
#[inline]
pub(crate) fn matmul_row(a_row: &[f32], b: &[f32], n: usize, out_row: &mut [f32]) {
    out_row.fill(0.0);
    for (p, &a) in a_row.iter().enumerate() {
        let b_row = &b[p * n..(p + 1) * n];
        for (o, &bv) in out_row.iter_mut().zip(b_row) {
            *o += a * bv;
        }
    }
}
