use crate::backend::Conv2dParams;

/// Computes one NHWC output row `(batch, oy)` of a convolution.
///
/// Input is `[N, H, W, C]`, the filter `[OC, KH, KW, C/groups]` and
/// `out_row` holds `out_w * OC` elements.
#[allow(clippy::too_many_arguments)]
pub(crate) fn conv_row_nhwc(
    input: &[f32],
    in_dims: [usize; 4],
    filter: &[f32],
    f_dims: [usize; 4],
    bias: Option<&[f32]>,
    params: &Conv2dParams,
    batch: usize,
    oy: usize,
    out_row: &mut [f32],
) {
    let [_, c, h, w] = in_dims;
    let [n_oc, icg, kh, kw] = f_dims;
    let ocg = n_oc / params.groups;
    let [sh, sw] = params.strides;
    let [ph, pw] = params.paddings;
    let [dh, dw] = params.dilations;

    for (ox, pixel) in out_row.chunks_exact_mut(n_oc).enumerate() {
        for (oc, o) in pixel.iter_mut().enumerate() {
            let group = oc / ocg;
            let mut acc = bias.map(|b| b[oc]).unwrap_or(0.0);
            for ky in 0..kh {
                let iy = (oy * sh + ky * dh) as isize - ph as isize;
                if iy < 0 || iy >= h as isize {
                    continue;
                }
                for kx in 0..kw {
                    let ix = (ox * sw + kx * dw) as isize - pw as isize;
                    if ix < 0 || ix >= w as isize {
                        continue;
                    }
                    let in_base = ((batch * h + iy as usize) * w + ix as usize) * c + group * icg;
                    let f_base = ((oc * kh + ky) * kw + kx) * icg;
                    let x = &input[in_base..in_base + icg];
                    let k = &filter[f_base..f_base + icg];
                    acc += x.iter().zip(k).map(|(a, b)| a * b).sum::<f32>();
                }
            }
            *o = params.activation.apply(acc);
        }
    }
}
