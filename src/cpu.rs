//! Software rendering substrate.
//!
//! Images are `image::RgbaImage` buffers. Shaders are validated with naga at
//! compile time and executed by running the matching stage kernel per pixel,
//! storing results through the same 8-bit quantisation a unorm target uses.

use std::collections::HashMap;

use glam::{Vec2, Vec4};
use image::{Rgba, RgbaImage};

use crate::error::{AllocationError, CompileError, DrawError};
use crate::logluv;
use crate::shaders::ShaderProgram;
use crate::stages::{self, StageKind, StageUniforms};
use crate::substrate::{DrawCall, DrawRect, ImageHandle, RenderSubstrate, ShaderHandle};

/// Largest width or height accepted by default.
pub const DEFAULT_MAX_DIMENSION: u32 = 16384;

const BYTES_PER_PIXEL: u64 = 4;

struct CompiledShader {
    stage: StageKind,
    label: String,
}

/// Nearest-texel reads from an input image.
struct TexelSource<'a> {
    image: &'a RgbaImage,
}

impl<'a> TexelSource<'a> {
    fn load(&self, pos: Vec2) -> Vec4 {
        let p = pos.floor();
        let (w, h) = self.image.dimensions();
        if p.x < 0.0 || p.y < 0.0 || p.x >= w as f32 || p.y >= h as f32 {
            return Vec4::ZERO;
        }
        logluv::dequantize(self.image.get_pixel(p.x as u32, p.y as u32).0)
    }

    /// Stretch the source over the destination rectangle.
    fn source_position(&self, frag: Vec2, rect: &DrawRect) -> Vec2 {
        let (w, h) = self.image.dimensions();
        (frag - Vec2::new(rect.x, rect.y)) * Vec2::new(w as f32, h as f32)
            / Vec2::new(rect.width, rect.height)
    }
}

/// Software substrate with an optional memory budget.
pub struct CpuSubstrate {
    images: HashMap<ImageHandle, RgbaImage>,
    shaders: HashMap<ShaderHandle, CompiledShader>,
    next_image: u32,
    next_shader: u32,
    max_dimension: u32,
    memory_budget: Option<u64>,
    memory_used: u64,
}

impl CpuSubstrate {
    pub fn new() -> Self {
        Self {
            images: HashMap::new(),
            shaders: HashMap::new(),
            next_image: 0,
            next_shader: 0,
            max_dimension: DEFAULT_MAX_DIMENSION,
            memory_budget: None,
            memory_used: 0,
        }
    }

    /// Fail allocations once live images would exceed `bytes`.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    pub fn with_max_dimension(mut self, limit: u32) -> Self {
        self.max_dimension = limit;
        self
    }

    /// Bytes held by live images.
    pub fn memory_used(&self) -> u64 {
        self.memory_used
    }

    pub fn live_images(&self) -> usize {
        self.images.len()
    }

    /// Borrow an image's pixels without copying.
    pub fn image(&self, image: ImageHandle) -> Option<&RgbaImage> {
        self.images.get(&image)
    }

    fn source(&self, call: &DrawCall, slot: usize) -> Result<Option<TexelSource<'_>>, DrawError> {
        let Some(handle) = call.inputs[slot] else {
            return Ok(None);
        };
        let image = self
            .images
            .get(&handle)
            .ok_or(DrawError::UnknownImage(handle.id()))?;
        Ok(Some(TexelSource { image }))
    }
}

fn shade(call: &DrawCall, src0: &TexelSource<'_>, src1: Option<&TexelSource<'_>>, frag: Vec2) -> Vec4 {
    let pos = src0.source_position(frag, &call.rect);
    match (&call.uniforms, src1) {
        (StageUniforms::Copy(params), _) => stages::copy_pixel(src0.load(pos), params),
        (StageUniforms::Threshold(params), _) => stages::threshold_pixel(src0.load(pos), params),
        (StageUniforms::Blur(params), _) => stages::blur_pixel(|p| src0.load(p), pos, params),
        (StageUniforms::Tonemap, Some(bloom)) => {
            let bloom_pos = bloom.source_position(frag, &call.rect);
            stages::tonemap_pixel(src0.load(pos), bloom.load(bloom_pos))
        }
        (StageUniforms::Tonemap, None) => stages::tonemap_pixel(src0.load(pos), Vec4::ZERO),
    }
}

impl Default for CpuSubstrate {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSubstrate for CpuSubstrate {
    fn compile_shader(&mut self, program: &ShaderProgram) -> Result<ShaderHandle, CompileError> {
        program.validate()?;

        let handle = ShaderHandle(self.next_shader);
        self.next_shader += 1;
        self.shaders.insert(
            handle,
            CompiledShader {
                stage: program.stage,
                label: program.label.clone(),
            },
        );
        log::info!("Compiled '{}' ({} stage)", program.label, program.stage);
        Ok(handle)
    }

    fn allocate_image(&mut self, width: u32, height: u32) -> Result<ImageHandle, AllocationError> {
        if width == 0 || height == 0 {
            return Err(AllocationError::InvalidDimensions { width, height });
        }
        if width > self.max_dimension || height > self.max_dimension {
            return Err(AllocationError::ExceedsLimit {
                width,
                height,
                limit: self.max_dimension,
            });
        }

        let requested = width as u64 * height as u64 * BYTES_PER_PIXEL;
        let available = self
            .memory_budget
            .map(|budget| budget.saturating_sub(self.memory_used))
            .unwrap_or(u64::MAX);
        if requested > available {
            return Err(AllocationError::OutOfMemory { requested, available });
        }

        let mut data = Vec::new();
        data.try_reserve_exact(requested as usize)
            .map_err(|_| AllocationError::OutOfMemory { requested, available })?;
        data.resize(requested as usize, 0u8);
        let image = RgbaImage::from_raw(width, height, data)
            .ok_or(AllocationError::InvalidDimensions { width, height })?;

        let handle = ImageHandle(self.next_image);
        self.next_image += 1;
        self.images.insert(handle, image);
        self.memory_used += requested;
        log::debug!("Allocated {} ({}x{})", handle, width, height);
        Ok(handle)
    }

    fn release_image(&mut self, image: ImageHandle) {
        if let Some(released) = self.images.remove(&image) {
            let (w, h) = released.dimensions();
            self.memory_used -= w as u64 * h as u64 * BYTES_PER_PIXEL;
            log::debug!("Released {}", image);
        }
    }

    fn image_dimensions(&self, image: ImageHandle) -> Result<(u32, u32), DrawError> {
        self.images
            .get(&image)
            .map(|img| img.dimensions())
            .ok_or(DrawError::UnknownImage(image.id()))
    }

    fn draw_rect(&mut self, target: ImageHandle, call: &DrawCall) -> Result<(), DrawError> {
        let shader = self
            .shaders
            .get(&call.shader)
            .ok_or(DrawError::UnknownShader(call.shader.id()))?;
        call.validate(target, shader.stage)?;
        for input in call.bound_inputs() {
            self.image_dimensions(input)?;
        }
        log::trace!("Draw '{}' into {}", shader.label, target);

        // Take the target out so inputs can be borrowed while it is written.
        let mut out = self
            .images
            .remove(&target)
            .ok_or(DrawError::UnknownImage(target.id()))?;

        let result = self.source(call, 0).and_then(|src0| {
            let src1 = self.source(call, 1)?;
            let src0 = src0.ok_or(DrawError::MissingInput {
                stage: shader.stage,
                expected: shader.stage.input_count(),
                got: 0,
            })?;

            let (w, h) = out.dimensions();
            for y in 0..h {
                for x in 0..w {
                    let frag = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                    if call.rect.contains(frag.x, frag.y) {
                        let color = shade(call, &src0, src1.as_ref(), frag);
                        out.put_pixel(x, y, Rgba(logluv::quantize(color)));
                    }
                }
            }
            Ok(())
        });

        self.images.insert(target, out);
        result
    }

    fn write_pixels(&mut self, image: ImageHandle, pixels: &RgbaImage) -> Result<(), DrawError> {
        let dst = self
            .images
            .get_mut(&image)
            .ok_or(DrawError::UnknownImage(image.id()))?;
        if dst.dimensions() != pixels.dimensions() {
            return Err(DrawError::SizeMismatch {
                handle: image.id(),
                expected: dst.dimensions(),
                actual: pixels.dimensions(),
            });
        }
        dst.copy_from_slice(pixels.as_raw());
        Ok(())
    }

    fn read_pixels(&mut self, image: ImageHandle) -> Result<RgbaImage, DrawError> {
        self.images
            .get(&image)
            .cloned()
            .ok_or(DrawError::UnknownImage(image.id()))
    }
}
