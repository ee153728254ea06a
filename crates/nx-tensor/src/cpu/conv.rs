use crate::backend::Conv2dParams;

/// Direct NCHW convolution of one `(batch, output channel)` plane.
///
/// `out_plane` has `out_h * out_w` elements. Filter layout is
/// `[OC, C/groups, KH, KW]`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn conv_plane_nchw(
    input: &[f32],
    in_dims: [usize; 4],
    filter: &[f32],
    f_dims: [usize; 4],
    bias: Option<&[f32]>,
    params: &Conv2dParams,
    batch: usize,
    oc: usize,
    out_hw: [usize; 2],
    out_plane: &mut [f32],
) {
    let [_, c, h, w] = in_dims;
    let [n_oc, icg, kh, kw] = f_dims;
    let ocg = n_oc / params.groups;
    let group = oc / ocg;
    let [sh, sw] = params.strides;
    let [ph, pw] = params.paddings;
    let [dh, dw] = params.dilations;
    let b = bias.map(|b| b[oc]).unwrap_or(0.0);

    for oy in 0..out_hw[0] {
        for ox in 0..out_hw[1] {
            let mut acc = b;
            for ic in 0..icg {
                let ci = group * icg + ic;
                let in_base = (batch * c + ci) * h * w;
                let f_base = (oc * icg + ic) * kh * kw;
                for ky in 0..kh {
                    let iy = (oy * sh + ky * dh) as isize - ph as isize;
                    if iy < 0 || iy >= h as isize {
                        continue;
                    }
                    let row = in_base + iy as usize * w;
                    for kx in 0..kw {
                        let ix = (ox * sw + kx * dw) as isize - pw as isize;
                        if ix < 0 || ix >= w as isize {
                            continue;
                        }
                        acc += input[row + ix as usize] * filter[f_base + ky * kw + kx];
                    }
                }
            }
            out_plane[oy * out_hw[1] + ox] = params.activation.apply(acc);
        }
    }
}
