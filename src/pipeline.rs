//! Bloom post-process orchestration.
//!
//! Per frame, with `scene` owned by the caller:
//!
//! ```text
//! Threshold(scene -> bloom)
//! for pass in 1..=5:
//!     Blur-H(bloom -> temp, spread = pass)
//!     Blur-V(temp -> bloom, spread = pass)
//! Tonemap(scene, bloom -> temp)
//! ```
//!
//! `temp` is returned for presentation. Both scratch buffers are allocated on
//! the first frame and reallocated whenever the scene size changes.

use std::marker::PhantomData;

use glam::Vec3;

use crate::config::BloomSettings;
use crate::error::{AllocationError, CompileError, DrawError, PipelineError};
use crate::shaders::ShaderProgram;
use crate::stages::{
    BlurAxis, BlurParams, CopyParams, StageKind, StageUniforms, ThresholdParams, BLUR_PASSES,
};
use crate::substrate::{DrawCall, DrawRect, ImageHandle, RenderSubstrate, ShaderHandle};

/// Whether scratch buffers exist, and for which scene size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Ready { width: u32, height: u32 },
}

#[derive(Clone, Copy, Debug)]
struct StagePrograms {
    copy: ShaderHandle,
    threshold: ShaderHandle,
    blur: ShaderHandle,
    tonemap: ShaderHandle,
}

#[derive(Clone, Copy, Debug)]
struct ScratchBuffers {
    temp: ImageHandle,
    bloom: ImageHandle,
    width: u32,
    height: u32,
}

/// Owns the compiled stage programs and the `temp`/`bloom` scratch buffers
/// of one substrate `S`.
pub struct BloomPipeline<S: RenderSubstrate> {
    programs: StagePrograms,
    scratch: Option<ScratchBuffers>,
    settings: BloomSettings,
    _substrate: PhantomData<fn() -> S>,
}

impl<S: RenderSubstrate> BloomPipeline<S> {
    /// Compile the four stage programs. No buffers are allocated yet.
    pub fn new(substrate: &mut S, settings: BloomSettings) -> Result<Self, CompileError> {
        let mut compile = |stage| substrate.compile_shader(&ShaderProgram::builtin(stage));
        let programs = StagePrograms {
            copy: compile(StageKind::Copy)?,
            threshold: compile(StageKind::Threshold)?,
            blur: compile(StageKind::Blur)?,
            tonemap: compile(StageKind::Tonemap)?,
        };

        Ok(Self {
            programs,
            scratch: None,
            settings: settings.sanitize(),
            _substrate: PhantomData,
        })
    }

    pub fn state(&self) -> PipelineState {
        match self.scratch {
            Some(s) => PipelineState::Ready {
                width: s.width,
                height: s.height,
            },
            None => PipelineState::Uninitialized,
        }
    }

    pub fn settings(&self) -> &BloomSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: BloomSettings) {
        self.settings = settings.sanitize();
    }

    /// Run one frame with the pipeline's settings. Returns the display-ready buffer.
    pub fn post_process(&mut self, substrate: &mut S, scene: ImageHandle) -> Result<ImageHandle, PipelineError> {
        let params = self.settings.threshold_params();
        self.post_process_with(substrate, scene, params)
    }

    /// Run one frame with threshold parameters overridden for this call.
    ///
    /// The returned handle stays owned by the pipeline and is overwritten by
    /// the next frame.
    pub fn post_process_with(
        &mut self,
        substrate: &mut S,
        scene: ImageHandle,
        params: ThresholdParams,
    ) -> Result<ImageHandle, PipelineError> {
        let (width, height) = substrate.image_dimensions(scene)?;
        let scratch = self.ensure_scratch(substrate, width, height)?;
        if scene == scratch.temp || scene == scratch.bloom {
            return Err(DrawError::TargetBoundAsInput(scene.id()).into());
        }

        let actual = substrate.image_dimensions(scratch.bloom)?;
        if actual != (width, height) {
            return Err(PipelineError::DimensionMismatch {
                expected: actual,
                actual: (width, height),
            });
        }

        let rect = DrawRect::full(width, height);
        let programs = self.programs;

        log::debug!("Threshold {} -> {} ({:?})", scene, scratch.bloom, params);
        let threshold = DrawCall::new(programs.threshold, rect, StageUniforms::Threshold(params)).input(scene);
        substrate.draw_rect(scratch.bloom, &threshold)?;

        for pass in 1..=BLUR_PASSES {
            log::debug!("Blur pass {}", pass);
            let horizontal = StageUniforms::Blur(BlurParams::for_pass(pass, BlurAxis::Horizontal));
            let call = DrawCall::new(programs.blur, rect, horizontal).input(scratch.bloom);
            substrate.draw_rect(scratch.temp, &call)?;

            let vertical = StageUniforms::Blur(BlurParams::for_pass(pass, BlurAxis::Vertical));
            let call = DrawCall::new(programs.blur, rect, vertical).input(scratch.temp);
            substrate.draw_rect(scratch.bloom, &call)?;
        }

        log::debug!("Tonemap {} + {} -> {}", scene, scratch.bloom, scratch.temp);
        let tonemap = DrawCall::new(programs.tonemap, rect, StageUniforms::Tonemap)
            .input(scene)
            .input(scratch.bloom);
        substrate.draw_rect(scratch.temp, &tonemap)?;

        Ok(scratch.temp)
    }

    /// Copy a plain-colour `source` into `target` as encoded HDR, scaled by `tint`.
    pub fn draw_image(
        &self,
        substrate: &mut S,
        target: ImageHandle,
        source: ImageHandle,
        rect: DrawRect,
        tint: Vec3,
    ) -> Result<(), DrawError> {
        let call = DrawCall::new(self.programs.copy, rect, StageUniforms::Copy(CopyParams { tint }))
            .input(source);
        substrate.draw_rect(target, &call)
    }

    /// Return the scratch buffers to the substrate.
    pub fn release(mut self, substrate: &mut S) {
        self.release_scratch(substrate);
    }

    fn release_scratch(&mut self, substrate: &mut S) {
        if let Some(old) = self.scratch.take() {
            substrate.release_image(old.temp);
            substrate.release_image(old.bloom);
        }
    }

    fn ensure_scratch(&mut self, substrate: &mut S, width: u32, height: u32) -> Result<ScratchBuffers, AllocationError> {
        if let Some(s) = self.scratch {
            if (s.width, s.height) == (width, height) {
                return Ok(s);
            }
            log::info!(
                "Scene resized from {}x{} to {}x{}, reallocating bloom buffers",
                s.width,
                s.height,
                width,
                height
            );
        } else {
            log::info!("Allocating {}x{} bloom buffers", width, height);
        }
        self.release_scratch(substrate);

        let temp = substrate.allocate_image(width, height)?;
        let bloom = match substrate.allocate_image(width, height) {
            Ok(bloom) => bloom,
            Err(e) => {
                substrate.release_image(temp);
                return Err(e);
            }
        };

        let scratch = ScratchBuffers {
            temp,
            bloom,
            width,
            height,
        };
        self.scratch = Some(scratch);
        Ok(scratch)
    }
}
