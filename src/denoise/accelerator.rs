// Copyright @yucwang 2026

//! Narrow interface to a hardware denoising accelerator.
//!
//! The session only ever talks to the accelerator through this trait: device
//! memory is addressed by opaque [`DevicePtr`] handles, denoisers by
//! [`DenoiserHandle`], and every entry point reports failure as a
//! [`CallFailure`] naming the call that failed.

use crate::math::constants::Float;

use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};

/// Opaque address of an accelerator-side allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(u64);

impl DevicePtr {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DenoiserHandle(u64);

impl DenoiserHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    Rgb,
    RgbAlbedo,
    RgbAlbedoNormal,
}

impl InputKind {
    pub fn input_count(self) -> usize {
        match self {
            InputKind::Rgb => 1,
            InputKind::RgbAlbedo => 2,
            InputKind::RgbAlbedoNormal => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Float3,
    Float4,
}

impl PixelFormat {
    pub fn from_channels(channels: usize) -> Option<Self> {
        match channels {
            3 => Some(PixelFormat::Float3),
            4 => Some(PixelFormat::Float4),
            _ => None,
        }
    }

    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Float3 => 3,
            PixelFormat::Float4 => 4,
        }
    }
}

/// Everything that decides whether a loaded denoiser can be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DenoiserKey {
    pub input_kind: InputKind,
    pub pixel_format: PixelFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Ldr,
    Hdr,
}

/// Device memory the denoiser needs for a given resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DenoiserSizes {
    pub state_bytes: usize,
    pub min_scratch_bytes: usize,
    pub recommended_scratch_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSpan {
    pub ptr: Option<DevicePtr>,
    pub bytes: usize,
}

/// Device image as seen by the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub data: DevicePtr,
    pub width: usize,
    pub height: usize,
    pub row_stride: usize,
    pub pixel_stride: usize,
    pub format: PixelFormat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DenoiseParams {
    pub hdr_intensity: DevicePtr,
    /// 0 keeps the fully denoised result, 1 returns the noisy input.
    pub blend_factor: Float,
    pub denoise_alpha: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcceleratorCall {
    Malloc,
    Free,
    Upload,
    Download,
    CreateDenoiser,
    DestroyDenoiser,
    SetModel,
    ComputeMemoryResources,
    Setup,
    ComputeIntensity,
    Invoke,
}

impl AcceleratorCall {
    pub fn name(self) -> &'static str {
        match self {
            AcceleratorCall::Malloc => "malloc",
            AcceleratorCall::Free => "free",
            AcceleratorCall::Upload => "upload",
            AcceleratorCall::Download => "download",
            AcceleratorCall::CreateDenoiser => "create denoiser",
            AcceleratorCall::DestroyDenoiser => "destroy denoiser",
            AcceleratorCall::SetModel => "set model",
            AcceleratorCall::ComputeMemoryResources => "compute memory resources",
            AcceleratorCall::Setup => "setup",
            AcceleratorCall::ComputeIntensity => "compute intensity",
            AcceleratorCall::Invoke => "invoke",
        }
    }
}

/// An accelerator entry point returned an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    pub call: AcceleratorCall,
    pub detail: String,
}

impl CallFailure {
    pub fn new(call: AcceleratorCall, detail: impl Into<String>) -> Self {
        Self { call, detail: detail.into() }
    }
}

impl Display for CallFailure {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "Accelerator {} failed: {}", self.call.name(), self.detail)
    }
}

impl std::error::Error for CallFailure {}

/// Minimum driver version that ships the denoiser entry points.
pub fn min_driver_version() -> &'static str {
    if cfg!(target_os = "linux") {
        "435.12"
    } else {
        "435.80"
    }
}

/// Why the accelerator context could not be acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextFailure {
    /// No accelerator device or device memory is available at all.
    NoDevice,
    /// The accelerator driver library could not be found.
    DriverNotFound,
    /// A driver was found but it predates the denoiser entry points.
    DriverTooOld,
    /// The driver loaded but its function table could not be resolved.
    EntryPointsMissing,
    ContextCreation(String),
}

impl Display for ContextFailure {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ContextFailure::NoDevice => fmt.write_str("No accelerator device available.")?,
            ContextFailure::DriverNotFound => fmt.write_str("No accelerator driver was found.")?,
            ContextFailure::DriverTooOld => {
                fmt.write_str("The accelerator driver found was too old for denoising.")?
            }
            ContextFailure::EntryPointsMissing => {
                fmt.write_str("The accelerator failed to initialize for denoising.")?
            }
            ContextFailure::ContextCreation(detail) => {
                write!(fmt, "Failed to create accelerator context: {}.", detail)?
            }
        }
        write!(fmt, " The required driver version is {} or newer", min_driver_version())
    }
}

impl std::error::Error for ContextFailure {}

pub const LOG_LEVEL_FATAL: u32 = 1;
pub const LOG_LEVEL_ERROR: u32 = 2;
pub const LOG_LEVEL_HINT: u32 = 3;
pub const LOG_LEVEL_STATUS: u32 = 4;

/// Accelerator diagnostics callback: level, tag, message.
pub type LogCallback = fn(u32, &str, &str);

pub fn log_accelerator_message(level: u32, tag: &str, message: &str) {
    match level {
        LOG_LEVEL_FATAL => log::error!("accelerator [FATAL] {} {}", tag, message),
        LOG_LEVEL_ERROR => log::error!("accelerator {} {}", tag, message),
        LOG_LEVEL_HINT => log::warn!("accelerator [HINT] {} {}", tag, message),
        LOG_LEVEL_STATUS => log::debug!("accelerator [STATUS] {} {}", tag, message),
        _ => log::warn!("accelerator [UNKNOWN] {} {}", tag, message),
    }
}

/// The opaque denoising library.
///
/// Calls are made from a single thread and on the implicit default stream;
/// an implementation may assume no two calls overlap.
pub trait Accelerator: Send {
    /// Load the driver library and resolve its entry points.
    fn init(&mut self) -> Result<(), ContextFailure>;

    fn create_context(&mut self, log_callback: LogCallback, log_level: u32) -> Result<(), ContextFailure>;

    fn malloc(&mut self, bytes: usize) -> Result<DevicePtr, CallFailure>;
    fn free(&mut self, ptr: DevicePtr) -> Result<(), CallFailure>;
    fn upload(&mut self, dst: DevicePtr, src: &[u8]) -> Result<(), CallFailure>;
    fn download(&mut self, src: DevicePtr, dst: &mut [u8]) -> Result<(), CallFailure>;

    fn create_denoiser(&mut self, key: DenoiserKey) -> Result<DenoiserHandle, CallFailure>;
    fn set_model(&mut self, denoiser: DenoiserHandle, model: ModelKind) -> Result<(), CallFailure>;
    fn destroy_denoiser(&mut self, denoiser: DenoiserHandle) -> Result<(), CallFailure>;

    fn compute_memory_resources(&mut self,
                                denoiser: DenoiserHandle,
                                width: usize,
                                height: usize) -> Result<DenoiserSizes, CallFailure>;

    fn setup(&mut self,
             denoiser: DenoiserHandle,
             width: usize,
             height: usize,
             state: DeviceSpan,
             scratch: DeviceSpan) -> Result<(), CallFailure>;

    /// Write the HDR intensity scalar for `color` into `intensity`.
    fn compute_intensity(&mut self,
                         denoiser: DenoiserHandle,
                         color: &ImageDesc,
                         intensity: DevicePtr,
                         scratch: DeviceSpan) -> Result<(), CallFailure>;

    /// `inputs` holds color first, then albedo and normals when configured.
    fn invoke(&mut self,
              denoiser: DenoiserHandle,
              params: &DenoiseParams,
              state: DeviceSpan,
              inputs: &[ImageDesc],
              offset: (usize, usize),
              output: &ImageDesc,
              scratch: DeviceSpan) -> Result<(), CallFailure>;
}

/// A backend shared behind a mutex, so a caller can keep inspecting it while
/// a session owns the boxed handle.
impl<A: Accelerator> Accelerator for Arc<Mutex<A>> {
    fn init(&mut self) -> Result<(), ContextFailure> {
        locked(self).init()
    }

    fn create_context(&mut self, log_callback: LogCallback, log_level: u32) -> Result<(), ContextFailure> {
        locked(self).create_context(log_callback, log_level)
    }

    fn malloc(&mut self, bytes: usize) -> Result<DevicePtr, CallFailure> {
        locked(self).malloc(bytes)
    }

    fn free(&mut self, ptr: DevicePtr) -> Result<(), CallFailure> {
        locked(self).free(ptr)
    }

    fn upload(&mut self, dst: DevicePtr, src: &[u8]) -> Result<(), CallFailure> {
        locked(self).upload(dst, src)
    }

    fn download(&mut self, src: DevicePtr, dst: &mut [u8]) -> Result<(), CallFailure> {
        locked(self).download(src, dst)
    }

    fn create_denoiser(&mut self, key: DenoiserKey) -> Result<DenoiserHandle, CallFailure> {
        locked(self).create_denoiser(key)
    }

    fn set_model(&mut self, denoiser: DenoiserHandle, model: ModelKind) -> Result<(), CallFailure> {
        locked(self).set_model(denoiser, model)
    }

    fn destroy_denoiser(&mut self, denoiser: DenoiserHandle) -> Result<(), CallFailure> {
        locked(self).destroy_denoiser(denoiser)
    }

    fn compute_memory_resources(&mut self,
                                denoiser: DenoiserHandle,
                                width: usize,
                                height: usize) -> Result<DenoiserSizes, CallFailure> {
        locked(self).compute_memory_resources(denoiser, width, height)
    }

    fn setup(&mut self,
             denoiser: DenoiserHandle,
             width: usize,
             height: usize,
             state: DeviceSpan,
             scratch: DeviceSpan) -> Result<(), CallFailure> {
        locked(self).setup(denoiser, width, height, state, scratch)
    }

    fn compute_intensity(&mut self,
                         denoiser: DenoiserHandle,
                         color: &ImageDesc,
                         intensity: DevicePtr,
                         scratch: DeviceSpan) -> Result<(), CallFailure> {
        locked(self).compute_intensity(denoiser, color, intensity, scratch)
    }

    fn invoke(&mut self,
              denoiser: DenoiserHandle,
              params: &DenoiseParams,
              state: DeviceSpan,
              inputs: &[ImageDesc],
              offset: (usize, usize),
              output: &ImageDesc,
              scratch: DeviceSpan) -> Result<(), CallFailure> {
        locked(self).invoke(denoiser, params, state, inputs, offset, output, scratch)
    }
}

fn locked<A>(shared: &Mutex<A>) -> MutexGuard<'_, A> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_failures_are_distinct_and_hint_driver() {
        let messages = [
            ContextFailure::NoDevice.to_string(),
            ContextFailure::DriverNotFound.to_string(),
            ContextFailure::DriverTooOld.to_string(),
            ContextFailure::EntryPointsMissing.to_string(),
        ];
        for (i, a) in messages.iter().enumerate() {
            assert!(a.ends_with(&format!("{} or newer", min_driver_version())));
            for b in messages.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_pixel_format_from_channels() {
        assert_eq!(PixelFormat::from_channels(3), Some(PixelFormat::Float3));
        assert_eq!(PixelFormat::from_channels(4), Some(PixelFormat::Float4));
        assert_eq!(PixelFormat::from_channels(2), None);
        assert_eq!(PixelFormat::Float4.channels(), 4);
    }
}
