//! Compositor stages: parameters and per-pixel reference kernels.
//!
//! Every stage reads and writes LogLuv-encoded pixels except the final
//! tonemap, which writes plain opaque colour. The kernels here are what the
//! CPU substrate executes; `shaders/*.wgsl` implement the same maths for the
//! GPU.

use std::fmt;

use glam::{Vec2, Vec3, Vec4};

use crate::logluv;

/// Number of horizontal + vertical blur pass pairs per frame.
pub const BLUR_PASSES: u32 = 5;

/// Blur taps as `(offset, weight)`. The weights sum to 0.98 and are applied
/// as-is, so every 1D pass dims the bloom by 2%.
pub const BLUR_TAPS: [(f32, f32); 9] = [
    (-4.0, 0.05),
    (-3.0, 0.09),
    (-2.0, 0.12),
    (-1.0, 0.15),
    (0.0, 0.16),
    (1.0, 0.15),
    (2.0, 0.12),
    (3.0, 0.09),
    (4.0, 0.05),
];

// Filmic curve constants (Uncharted 2).
pub const FILMIC_A: f32 = 0.15;
pub const FILMIC_B: f32 = 0.50;
pub const FILMIC_C: f32 = 0.10;
pub const FILMIC_D: f32 = 0.20;
pub const FILMIC_E: f32 = 0.02;
pub const FILMIC_F: f32 = 0.30;

/// Scale applied to linear colour before the filmic curve.
pub const EXPOSURE_BIAS: f32 = 2.0;

/// Linear value the curve is normalised against.
pub const WHITE_POINT: f32 = 11.2;

/// Default luma cutoff for the threshold stage.
pub const DEFAULT_LUMA_THRESHOLD: f32 = 2.0;

/// Default scale applied to pixels that pass the threshold.
pub const DEFAULT_BLOOM_STRENGTH: f32 = 0.2;

/// The four shader programs of the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Copy,
    Threshold,
    Blur,
    Tonemap,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::Copy,
        StageKind::Threshold,
        StageKind::Blur,
        StageKind::Tonemap,
    ];

    /// How many input images a draw with this stage binds.
    pub fn input_count(self) -> usize {
        match self {
            StageKind::Tonemap => 2,
            _ => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StageKind::Copy => "copy",
            StageKind::Threshold => "threshold",
            StageKind::Blur => "blur",
            StageKind::Tonemap => "tonemap",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Copy stage: tint applied to the source colour before encoding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CopyParams {
    pub tint: Vec3,
}

impl Default for CopyParams {
    fn default() -> Self {
        Self { tint: Vec3::ONE }
    }
}

/// Threshold stage parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThresholdParams {
    pub luma_threshold: f32,
    pub bloom_strength: f32,
}

impl Default for ThresholdParams {
    fn default() -> Self {
        Self {
            luma_threshold: DEFAULT_LUMA_THRESHOLD,
            bloom_strength: DEFAULT_BLOOM_STRENGTH,
        }
    }
}

/// Direction of a 1D blur pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlurAxis {
    Horizontal,
    Vertical,
}

impl BlurAxis {
    /// `(ScaleX, ScaleY)`: exactly one component is 1.
    pub fn scale(self) -> Vec2 {
        match self {
            BlurAxis::Horizontal => Vec2::X,
            BlurAxis::Vertical => Vec2::Y,
        }
    }
}

/// Blur stage parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlurParams {
    /// Tap spacing in texels.
    pub spread: f32,
    pub axis: BlurAxis,
}

impl BlurParams {
    /// Parameters for one half of pass `pass` (1-based); spread equals the pass number.
    pub fn for_pass(pass: u32, axis: BlurAxis) -> Self {
        Self {
            spread: pass as f32,
            axis,
        }
    }
}

/// Uniforms for a single draw, typed per stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StageUniforms {
    Copy(CopyParams),
    Threshold(ThresholdParams),
    Blur(BlurParams),
    Tonemap,
}

impl StageUniforms {
    pub fn stage(&self) -> StageKind {
        match self {
            StageUniforms::Copy(_) => StageKind::Copy,
            StageUniforms::Threshold(_) => StageKind::Threshold,
            StageUniforms::Blur(_) => StageKind::Blur,
            StageUniforms::Tonemap => StageKind::Tonemap,
        }
    }

    /// Pack into the `params` vec4 of the shader uniform block.
    pub fn as_vec4(&self) -> [f32; 4] {
        match self {
            StageUniforms::Copy(p) => [p.tint.x, p.tint.y, p.tint.z, 0.0],
            StageUniforms::Threshold(p) => [p.luma_threshold, p.bloom_strength, 0.0, 0.0],
            StageUniforms::Blur(p) => {
                let scale = p.axis.scale();
                [p.spread, scale.x, scale.y, 0.0]
            }
            StageUniforms::Tonemap => [0.0; 4],
        }
    }
}

/// Copy: plain source colour (alpha dropped) -> encoded `rgb * tint`.
pub fn copy_pixel(src: Vec4, params: &CopyParams) -> Vec4 {
    logluv::encode(src.truncate() * params.tint)
}

/// Threshold: keep pixels at or above the luma cutoff, scaled by the strength.
pub fn threshold_pixel(enc: Vec4, params: &ThresholdParams) -> Vec4 {
    if logluv::luma(enc) < params.luma_threshold {
        return Vec4::ZERO;
    }
    logluv::encode(logluv::decode(enc) * params.bloom_strength)
}

/// Blur: 9-tap 1D convolution around `pos`, accumulated in linear space.
///
/// `load` returns the encoded texel covering a source position (zero outside
/// the image).
pub fn blur_pixel(load: impl Fn(Vec2) -> Vec4, pos: Vec2, params: &BlurParams) -> Vec4 {
    let direction = params.axis.scale() * params.spread;
    let sum = BLUR_TAPS
        .iter()
        .fold(Vec3::ZERO, |acc, &(offset, weight)| {
            acc + logluv::decode(load(pos + direction * offset)) * weight
        });
    logluv::encode(sum)
}

/// Tonemap: decode scene and bloom, add, apply the filmic curve. Opaque output.
pub fn tonemap_pixel(scene: Vec4, bloom: Vec4) -> Vec4 {
    let rgb = logluv::decode(scene) + logluv::decode(bloom);
    filmic(rgb).extend(1.0)
}

/// Uncharted 2 partial curve, componentwise.
pub fn uncharted2_partial(x: Vec3) -> Vec3 {
    let (a, b, c, d, e, f) = (FILMIC_A, FILMIC_B, FILMIC_C, FILMIC_D, FILMIC_E, FILMIC_F);
    (x * (a * x + Vec3::splat(c * b)) + Vec3::splat(d * e))
        / (x * (a * x + Vec3::splat(b)) + Vec3::splat(d * f))
        - Vec3::splat(e / f)
}

/// Exposure-biased filmic curve normalised so that `WHITE_POINT / EXPOSURE_BIAS` maps to 1.
pub fn filmic(rgb: Vec3) -> Vec3 {
    let curr = uncharted2_partial(rgb * EXPOSURE_BIAS);
    let white_scale = Vec3::ONE / uncharted2_partial(Vec3::splat(WHITE_POINT));
    curr * white_scale
}
