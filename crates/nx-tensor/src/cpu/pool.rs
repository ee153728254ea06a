use crate::backend::Pool2dParams;

/// Pools one NCHW `(batch, channel)` plane of `hw` into `out_plane`.
pub(crate) fn pool_plane_nchw(plane: &[f32], hw: [usize; 2], params: &Pool2dParams, out_hw: [usize; 2], out_plane: &mut [f32]) {
    let w = hw[1];
    for oy in 0..out_hw[0] {
        for ox in 0..out_hw[1] {
            out_plane[oy * out_hw[1] + ox] = params.reduce(hw, oy, ox, |y, x| plane[y * w + x]);
        }
    }
}
