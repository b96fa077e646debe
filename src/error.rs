//! Error taxonomy for the compositor.
//!
//! Shader compilation failures are fatal at startup, allocation failures are
//! fatal for the frame that hit them, and draw errors indicate a caller bug
//! (bad handle, feedback loop, wrong uniforms for a stage).

use thiserror::Error;

use crate::stages::StageKind;

/// A shader program failed to parse or validate.
#[derive(Debug, Error)]
#[error("shader '{label}' failed to compile: {message}")]
pub struct CompileError {
    pub label: String,
    pub message: String,
}

/// An image buffer could not be created.
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("cannot allocate a {width}x{height} image")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("{width}x{height} image exceeds the maximum dimension of {limit}")]
    ExceedsLimit { width: u32, height: u32, limit: u32 },

    #[error("out of image memory: requested {requested} bytes with {available} bytes available")]
    OutOfMemory { requested: u64, available: u64 },

    #[error("device error while allocating: {0}")]
    Device(String),
}

/// A draw, upload or readback was rejected by the substrate.
#[derive(Debug, Error)]
pub enum DrawError {
    #[error("unknown image handle {0}")]
    UnknownImage(u32),

    #[error("unknown shader handle {0}")]
    UnknownShader(u32),

    #[error("image {0} is bound both as render target and as input")]
    TargetBoundAsInput(u32),

    #[error("{stage} stage expects {expected} input image(s), got {got}")]
    MissingInput {
        stage: StageKind,
        expected: usize,
        got: usize,
    },

    #[error("uniforms for the {got} stage passed to the {stage} shader")]
    UniformMismatch { stage: StageKind, got: StageKind },

    #[error("pixel data is {actual:?} but image {handle} is {expected:?}")]
    SizeMismatch {
        handle: u32,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("failed to read back image: {0}")]
    Readback(String),
}

/// A post-process frame could not be completed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Draw(#[from] DrawError),

    #[error("scene is {actual:?} but bloom buffers are {expected:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

/// Headless GPU initialisation failures.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    #[error("failed to request GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
}
