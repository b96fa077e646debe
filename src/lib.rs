pub mod logluv;
pub mod stages;
pub mod shaders;
pub mod substrate;
pub mod cpu;
pub mod gpu;
pub mod pipeline;
pub mod config;
pub mod error;

pub mod cli;

pub use config::BloomSettings;
pub use cpu::CpuSubstrate;
pub use error::{AllocationError, CompileError, DeviceError, DrawError, PipelineError};
pub use gpu::{GpuContext, GpuSubstrate};
pub use pipeline::{BloomPipeline, PipelineState};
pub use shaders::ShaderProgram;
pub use stages::{BlurAxis, BlurParams, CopyParams, StageKind, StageUniforms, ThresholdParams};
pub use substrate::{DrawCall, DrawRect, ImageHandle, RenderSubstrate, ShaderHandle};
