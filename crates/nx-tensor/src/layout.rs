use std::fmt;

/// Memory order a backend keeps rank-4 feature maps in.
///
/// Logical dims are always `[N, C, H, W]`. Tensors of any other rank are
/// stored row-major in both layouts, so conversions only touch rank 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Host order: channels outermost after batch.
    Nchw,
    /// Channels-last device order.
    Nhwc,
}

impl Layout {
    /// Storage offset of logical coordinates `coords` in a tensor of `dims`.
    pub fn offset(&self, dims: &[usize], coords: &[usize]) -> usize {
        match (self, dims) {
            (Layout::Nhwc, &[_, c, h, w]) => {
                ((coords[0] * h + coords[2]) * w + coords[3]) * c + coords[1]
            }
            _ => {
                let mut off = 0;
                for (d, &i) in dims.iter().zip(coords) {
                    off = off * d + i;
                }
                off
            }
        }
    }

    /// Writes the logical coordinates of storage offset `offset` into `coords`.
    pub fn coords(&self, dims: &[usize], mut offset: usize, coords: &mut [usize]) {
        match (self, dims) {
            (Layout::Nhwc, &[_, c, h, w]) => {
                coords[1] = offset % c;
                offset /= c;
                coords[3] = offset % w;
                offset /= w;
                coords[2] = offset % h;
                coords[0] = offset / h;
            }
            _ => {
                for i in (0..dims.len()).rev() {
                    coords[i] = offset % dims[i];
                    offset /= dims[i];
                }
            }
        }
    }

    /// Index of the channel axis for the storage offset `offset`, treating
    /// dim 1 as the channel dim.
    pub fn channel_of(&self, dims: &[usize], offset: usize) -> usize {
        match (self, dims) {
            (Layout::Nhwc, &[_, c, _, _]) => offset % c,
            _ if dims.len() >= 2 => {
                let inner: usize = dims[2..].iter().product();
                (offset / inner) % dims[1]
            }
            _ => 0,
        }
    }

    /// Converts host-order data of logical `dims` into this layout.
    pub fn host_to_device(&self, data: &[f32], dims: &[usize]) -> Vec<f32> {
        match (self, dims) {
            (Layout::Nhwc, &[n, c, h, w]) => {
                let mut out = vec![0.0f32; data.len()];
                for b in 0..n {
                    for ch in 0..c {
                        for y in 0..h {
                            for x in 0..w {
                                out[((b * h + y) * w + x) * c + ch] =
                                    data[((b * c + ch) * h + y) * w + x];
                            }
                        }
                    }
                }
                out
            }
            _ => data.to_vec(),
        }
    }

    /// Converts data stored in this layout back into host order.
    pub fn device_to_host(&self, data: &[f32], dims: &[usize]) -> Vec<f32> {
        match (self, dims) {
            (Layout::Nhwc, &[n, c, h, w]) => {
                let mut out = vec![0.0f32; data.len()];
                for b in 0..n {
                    for y in 0..h {
                        for x in 0..w {
                            for ch in 0..c {
                                out[((b * c + ch) * h + y) * w + x] =
                                    data[((b * h + y) * w + x) * c + ch];
                            }
                        }
                    }
                }
                out
            }
            _ => data.to_vec(),
        }
    }

    /// True when converting between host order and this layout is a no-op
    /// for a tensor of `dims`.
    pub fn is_host_order(&self, dims: &[usize]) -> bool {
        match self {
            Layout::Nchw => true,
            // Spatially trivial or single-channel maps read identically.
            Layout::Nhwc => dims.len() != 4 || dims[1] == 1 || dims[2] * dims[3] == 1,
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Nchw => write!(f, "NCHW"),
            Layout::Nhwc => write!(f, "NHWC"),
        }
    }
}
