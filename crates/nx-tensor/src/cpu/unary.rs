// Element-wise helpers shared by the host and accelerator backends.

use crate::backend::Activation;

#[inline]
pub(crate) fn activation_into(x: &[f32], activation: Activation, out: &mut [f32]) {
    for (o, &v) in out.iter_mut().zip(x) {
        *o = activation.apply(v);
    }
}

#[inline]
pub(crate) fn scale_into(x: &[f32], scale: f32, bias: f32, bias_after_scale: bool, out: &mut [f32]) {
    if bias_after_scale {
        for (o, &v) in out.iter_mut().zip(x) {
            *o = v * scale + bias;
        }
    } else {
        for (o, &v) in out.iter_mut().zip(x) {
            *o = (v + bias) * scale;
        }
    }
}
