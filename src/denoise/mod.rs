// Copyright @yucwang 2026

pub mod accelerator;
pub mod cpu;
pub mod device_pool;
pub mod session;

pub use accelerator::{Accelerator, ContextFailure, DenoiserKey, InputKind, PixelFormat};
pub use cpu::CpuAccelerator;
pub use session::{AcceleratorSession, DenoiseRequest, DenoisedFrame};
