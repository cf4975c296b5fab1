// Zeroth-order real spherical harmonic basis constant; maps the stored
// DC coefficient to a displayable base color around mid-gray.
pub const SH_C0: f32 = 0.28209479177387814;

// Stored opacity logits are clamped before exponentiation so that
// sigmoid never overflows.
pub(crate) const OPACITY_LOGIT_LIMIT: f32 = 20.0;

// Linear per-axis scale substituted for points that carry no scale
// fields (a near-degenerate point).
pub(crate) const DEFAULT_SCALE: f32 = 1e-4;

pub(crate) const DEFAULT_OPACITY: f32 = 1.0;
pub(crate) const NEUTRAL_GRAY: f32 = 0.5;
pub(crate) const IDENTITY_QUAT: [f32; 4] = [1.0, 0.0, 0.0, 0.0];

#[inline]
pub(crate) fn clamp_u8(x: f32) -> u8 {
    x.round().clamp(0.0, 255.0) as u8
}

#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    let x = x.clamp(-OPACITY_LOGIT_LIMIT, OPACITY_LOGIT_LIMIT);
    1.0 / (1.0 + (-x).exp())
}

#[inline]
pub(crate) fn all_finite(values: &[f32]) -> bool {
    values.iter().all(|v| v.is_finite())
}

#[inline]
pub(crate) fn normalize_quat(q: [f32; 4]) -> [f32; 4] {
    let norm = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    if norm > 0.0 && norm.is_finite() {
        [q[0] / norm, q[1] / norm, q[2] / norm, q[3] / norm]
    } else {
        IDENTITY_QUAT
    }
}
