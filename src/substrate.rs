//! The rendering substrate the compositor draws through.
//!
//! A substrate compiles pixel shaders, owns 8-bit RGBA image buffers and
//! executes rectangle draws in submission order. [`crate::cpu::CpuSubstrate`]
//! runs the stage kernels in software; [`crate::gpu::GpuSubstrate`] runs the
//! WGSL programs through wgpu.

use std::fmt;

use image::RgbaImage;

use crate::error::{AllocationError, CompileError, DrawError};
use crate::shaders::ShaderProgram;
use crate::stages::{StageKind, StageUniforms};

/// Handle to an image owned by a substrate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageHandle(pub(crate) u32);

impl ImageHandle {
    pub fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image#{}", self.0)
    }
}

/// Handle to a compiled shader program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub(crate) u32);

impl ShaderHandle {
    pub fn id(self) -> u32 {
        self.0
    }
}

/// Destination rectangle of a draw, in target pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl DrawRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle covering a whole `width` x `height` target.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }

    /// Whether a pixel centre lies inside the rectangle.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        let (rx, ry) = (x - self.x, y - self.y);
        rx >= 0.0 && ry >= 0.0 && rx < self.width && ry < self.height
    }
}

/// One rectangle draw: shader, destination, up to two inputs, uniforms.
#[derive(Clone, Copy, Debug)]
pub struct DrawCall {
    pub shader: ShaderHandle,
    pub rect: DrawRect,
    pub inputs: [Option<ImageHandle>; 2],
    pub uniforms: StageUniforms,
}

impl DrawCall {
    pub fn new(shader: ShaderHandle, rect: DrawRect, uniforms: StageUniforms) -> Self {
        Self {
            shader,
            rect,
            inputs: [None; 2],
            uniforms,
        }
    }

    /// Bind the next input slot.
    pub fn input(mut self, image: ImageHandle) -> Self {
        if let Some(slot) = self.inputs.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(image);
        }
        self
    }

    pub fn bound_inputs(&self) -> impl Iterator<Item = ImageHandle> + '_ {
        self.inputs.iter().flatten().copied()
    }

    /// Checks shared by every substrate before executing a draw.
    pub fn validate(&self, target: ImageHandle, stage: StageKind) -> Result<(), DrawError> {
        let got = self.uniforms.stage();
        if got != stage {
            return Err(DrawError::UniformMismatch { stage, got });
        }

        let bound = self.inputs[..stage.input_count()].iter().flatten().count();
        if bound < stage.input_count() {
            return Err(DrawError::MissingInput {
                stage,
                expected: stage.input_count(),
                got: bound,
            });
        }

        if self.bound_inputs().any(|input| input == target) {
            return Err(DrawError::TargetBoundAsInput(target.id()));
        }

        Ok(())
    }
}

/// Operations the compositor needs from the host graphics layer.
///
/// Draws are executed in call order; a draw that reads an image observes every
/// earlier draw that wrote it.
pub trait RenderSubstrate {
    /// Compile a pixel shader. Failures are fatal for the compositor.
    fn compile_shader(&mut self, program: &ShaderProgram) -> Result<ShaderHandle, CompileError>;

    /// Allocate a zero-filled 8-bit RGBA image.
    fn allocate_image(&mut self, width: u32, height: u32) -> Result<ImageHandle, AllocationError>;

    /// Free an image. Unknown handles are ignored.
    fn release_image(&mut self, image: ImageHandle);

    fn image_dimensions(&self, image: ImageHandle) -> Result<(u32, u32), DrawError>;

    /// Draw `call.rect` into `target`, overwriting covered pixels.
    fn draw_rect(&mut self, target: ImageHandle, call: &DrawCall) -> Result<(), DrawError>;

    /// Replace an image's contents. Dimensions must match.
    fn write_pixels(&mut self, image: ImageHandle, pixels: &RgbaImage) -> Result<(), DrawError>;

    /// Copy an image's contents back to host memory.
    fn read_pixels(&mut self, image: ImageHandle) -> Result<RgbaImage, DrawError>;
}
