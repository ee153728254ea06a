use crate::backend::Pool2dParams;

/// Pools one NHWC output row `(batch, oy)`; `out_row` holds `out_w * C`
/// elements.
pub(crate) fn pool_row_nhwc(
    input: &[f32],
    in_dims: [usize; 4],
    params: &Pool2dParams,
    batch: usize,
    oy: usize,
    out_row: &mut [f32],
) {
    let [_, c, h, w] = in_dims;
    for (ox, pixel) in out_row.chunks_exact_mut(c).enumerate() {
        for (ch, o) in pixel.iter_mut().enumerate() {
            *o = params.reduce([h, w], oy, ox, |y, x| input[((batch * h + y) * w + x) * c + ch]);
        }
    }
}
