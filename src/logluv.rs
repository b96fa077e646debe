//! LogLuv-style HDR packing.
//!
//! Linear RGB is carried through 8-bit RGBA buffers as:
//!
//! ```text
//! x = X' / S        chromaticity, 8 bits
//! y = Y  / S        chromaticity, 8 bits
//! z = floor(Le)/255 log-luminance, high byte
//! w = fract(Le)     log-luminance, low byte
//!
//! Le = 2 * log2(Y) + 127
//! ```
//!
//! where `(X', Y, S)` is the LogLuv XYZ' transform of the input with its
//! luminance row scaled so that white has `Y = 1`. `Le <= 0` is reserved for
//! black: the all-zero pixel decodes to exactly zero, which is also what
//! out-of-bounds texture reads return.
//!
//! These functions mirror `shaders/logluv.wgsl` and are used by the CPU
//! substrate and by tests.

use glam::{Mat3, Vec3, Vec4};

/// Offset added to `2 * log2(Y)` so the log-luminance fits in `[0, 256)`.
pub const LOG_LUMA_BIAS: f32 = 127.0;

/// Largest storable log-luminance (`Y` just above `2^64`).
pub const MAX_LOG_LUMA: f32 = 255.99;

/// Floor for the `y` chromaticity channel when dividing during decode.
pub const MIN_CHROMA: f32 = 1.0 / 255.0;

/// Weights of the luminance the codec stores (sums to 1).
pub const LUMA_WEIGHTS: Vec3 = Vec3::new(0.3, 0.6, 0.1);

const MIN_POSITIVE: f32 = 1.0e-30;

/// RGB -> (X', Y, S).
const RGB_TO_LOGLUV: Mat3 = Mat3::from_cols(
    Vec3::new(0.2209, 0.3, 0.4184),
    Vec3::new(0.1138, 0.6, 0.7319),
    Vec3::new(0.0102, 0.1, 0.2969),
);

/// (X', Y, S) -> RGB.
const LOGLUV_TO_RGB: Mat3 = Mat3::from_cols(
    Vec3::new(6.001365, -2.700757, -1.799552),
    Vec3::new(-1.505164, 3.506326, -6.522463),
    Vec3::new(0.300783, -1.088194, 5.626816),
);

/// Luminance of a linear colour, as stored by [`encode`].
pub fn rgb_luma(rgb: Vec3) -> f32 {
    LUMA_WEIGHTS.dot(rgb.max(Vec3::ZERO))
}

/// Pack a non-negative linear colour. Negative components are clamped to 0.
pub fn encode(rgb: Vec3) -> Vec4 {
    let p = RGB_TO_LOGLUV * rgb.max(Vec3::ZERO);
    let le = (2.0 * p.y.max(MIN_POSITIVE).log2() + LOG_LUMA_BIAS).clamp(0.0, MAX_LOG_LUMA);
    if le <= 0.0 {
        return Vec4::ZERO;
    }

    let s = p.z.max(MIN_POSITIVE);
    Vec4::new(p.x / s, p.y / s, le.floor() / 255.0, le - le.floor())
}

/// Log-luminance `Le` stored in the `z`/`w` channels.
pub fn log_luma(enc: Vec4) -> f32 {
    enc.z * 255.0 + enc.w
}

/// Luminance of an encoded pixel, without decoding the chromaticity.
pub fn luma(enc: Vec4) -> f32 {
    let le = log_luma(enc);
    if le > 0.0 {
        ((le - LOG_LUMA_BIAS) * 0.5).exp2()
    } else {
        0.0
    }
}

/// Unpack to linear RGB. Output is never negative.
pub fn decode(enc: Vec4) -> Vec3 {
    let y = luma(enc);
    let s = y / enc.y.max(MIN_CHROMA);
    let p = Vec3::new(enc.x * s, y, s);
    (LOGLUV_TO_RGB * p).max(Vec3::ZERO)
}

/// Store a `[0, 1]` RGBA value the way an 8-bit unorm target does.
pub fn quantize(v: Vec4) -> [u8; 4] {
    let q = (v.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
    [q.x as u8, q.y as u8, q.z as u8, q.w as u8]
}

/// Read an 8-bit unorm pixel back as `[0, 1]` floats.
pub fn dequantize(px: [u8; 4]) -> Vec4 {
    Vec4::new(px[0] as f32, px[1] as f32, px[2] as f32, px[3] as f32) / 255.0
}
