pub mod context;
pub mod substrate;

pub use context::GpuContext;
pub use substrate::GpuSubstrate;
