// Copyright @yucwang 2026

use crate::core::error::{ConfigurationError, DisplayError};
use crate::denoise::accelerator::{
    log_accelerator_message, Accelerator, AcceleratorCall, CallFailure, ContextFailure,
    DenoiseParams, DenoiserHandle, DenoiserKey, DenoiserSizes, ImageDesc, InputKind, ModelKind,
    PixelFormat, LOG_LEVEL_STATUS,
};
use crate::denoise::device_pool::{DeviceBlock, DeviceBufferPool, ImageRole};
use crate::math::constants::{Float, ELEMENT_BYTES};

/// Channels of the auxiliary albedo and normal planes.
const AUX_CHANNELS: usize = 3;

/// One denoise request over a full frame of packed floats.
#[derive(Debug, Clone, Copy)]
pub struct DenoiseRequest<'a> {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub color: &'a [Float],
    pub albedo: Option<&'a [Float]>,
    pub normals: Option<&'a [Float]>,
}

impl<'a> DenoiseRequest<'a> {
    pub fn color(width: usize, height: usize, channels: usize, color: &'a [Float]) -> Self {
        Self { width, height, channels, color, albedo: None, normals: None }
    }

    pub fn with_albedo(mut self, albedo: &'a [Float]) -> Self {
        self.albedo = Some(albedo);
        self
    }

    pub fn with_normals(mut self, normals: &'a [Float]) -> Self {
        self.normals = Some(normals);
        self
    }

    /// Validate the request and derive the denoiser configuration it needs.
    pub fn key(&self) -> Result<DenoiserKey, ConfigurationError> {
        let input_kind = match (self.albedo.is_some(), self.normals.is_some()) {
            (false, false) => InputKind::Rgb,
            (true, false) => InputKind::RgbAlbedo,
            (true, true) => InputKind::RgbAlbedoNormal,
            (false, true) => return Err(ConfigurationError::NormalsWithoutAlbedo),
        };
        let pixel_format = PixelFormat::from_channels(self.channels)
            .ok_or(ConfigurationError::UnsupportedChannelCount(self.channels))?;
        if self.width == 0 || self.height == 0 {
            return Err(ConfigurationError::EmptyFrame);
        }

        let pixels = self.width * self.height;
        check_len("color", self.color, pixels * self.channels)?;
        if let Some(albedo) = self.albedo {
            check_len("albedo", albedo, pixels * AUX_CHANNELS)?;
        }
        if let Some(normals) = self.normals {
            check_len("normals", normals, pixels * AUX_CHANNELS)?;
        }

        Ok(DenoiserKey { input_kind, pixel_format })
    }
}

fn check_len(buffer: &'static str, data: &[Float], expected: usize) -> Result<(), ConfigurationError> {
    if data.len() != expected {
        return Err(ConfigurationError::BufferSizeMismatch { buffer, expected, actual: data.len() });
    }
    Ok(())
}

/// Denoised pixels borrowed from the session's host mirror.
///
/// The session reuses the mirror for the next frame, so the pixels must be
/// copied out before the frame is released.
#[derive(Debug)]
pub struct DenoisedFrame<'a> {
    pixels: &'a [Float],
    width: usize,
    height: usize,
    channels: usize,
}

impl<'a> DenoisedFrame<'a> {
    pub fn pixels(&self) -> &'a [Float] {
        self.pixels
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn release(self) {}
}

#[derive(Debug)]
struct LoadedDenoiser {
    handle: DenoiserHandle,
    key: DenoiserKey,
}

#[derive(Debug, Default)]
struct ReadyState {
    intensity: DeviceBlock,
    denoiser: Option<LoadedDenoiser>,
    state: DeviceBlock,
    scratch: DeviceBlock,
    scratch_at_minimum: bool,
    setup_for: Option<(usize, usize)>,
}

#[derive(Debug)]
enum SessionState {
    Uninitialized,
    Ready(ReadyState),
    Unavailable(ContextFailure),
}

/// Drives the accelerator through upload, intensity, invoke and download.
///
/// Not reentrant: one `process` at a time, and the returned frame borrows the
/// session until it is released.
pub struct AcceleratorSession {
    accelerator: Box<dyn Accelerator>,
    state: SessionState,
    pool: DeviceBufferPool,
    last_error: String,
    rebuilds: usize,
}

impl AcceleratorSession {
    pub fn new(accelerator: Box<dyn Accelerator>) -> Self {
        Self {
            accelerator,
            state: SessionState::Uninitialized,
            pool: DeviceBufferPool::new(),
            last_error: String::new(),
            rebuilds: 0,
        }
    }

    /// Message of the most recent failed `process`, empty after a success.
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    /// Times a loaded denoiser had to be replaced by a differently configured one.
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, SessionState::Ready(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self.state, SessionState::Unavailable(_))
    }

    pub fn loaded_key(&self) -> Option<DenoiserKey> {
        match &self.state {
            SessionState::Ready(ready) => ready.denoiser.as_ref().map(|loaded| loaded.key),
            _ => None,
        }
    }

    pub fn pool(&self) -> &DeviceBufferPool {
        &self.pool
    }

    pub fn process(&mut self, request: &DenoiseRequest<'_>) -> Result<DenoisedFrame<'_>, DisplayError> {
        self.last_error.clear();
        if let Err(err) = self.run(request) {
            self.last_error = err.to_string();
            return Err(err);
        }

        let pixel_count = request.width * request.height * request.channels;
        let pixels = self.pool.host_mirror().as_floats().unwrap_or(&[]);
        Ok(DenoisedFrame {
            pixels: &pixels[..pixel_count.min(pixels.len())],
            width: request.width,
            height: request.height,
            channels: request.channels,
        })
    }

    fn run(&mut self, request: &DenoiseRequest<'_>) -> Result<(), DisplayError> {
        let key = request.key()?;
        let Self { accelerator, state, pool, rebuilds, .. } = self;
        let accelerator: &mut dyn Accelerator = accelerator.as_mut();

        let ready = ensure_ready(accelerator, state)?;
        let handle = load_denoiser(accelerator, ready, key, rebuilds)?;
        prepare_resources(accelerator, ready, handle, request.width, request.height)?;

        let (width, height) = (request.width, request.height);
        pool.ensure(ImageRole::Output, width, height, request.channels, accelerator)?;
        pool.ensure_host_mirror()?;
        pool.ensure(ImageRole::Color, width, height, request.channels, accelerator)?;
        if request.albedo.is_some() {
            pool.ensure(ImageRole::Albedo, width, height, AUX_CHANNELS, accelerator)?;
        }
        if request.normals.is_some() {
            pool.ensure(ImageRole::Normals, width, height, AUX_CHANNELS, accelerator)?;
        }

        pool.upload(ImageRole::Color, bytemuck::cast_slice(request.color), accelerator)?;
        if let Some(albedo) = request.albedo {
            pool.upload(ImageRole::Albedo, bytemuck::cast_slice(albedo), accelerator)?;
        }
        if let Some(normals) = request.normals {
            pool.upload(ImageRole::Normals, bytemuck::cast_slice(normals), accelerator)?;
        }

        let mut inputs = Vec::with_capacity(key.input_kind.input_count());
        let roles = [ImageRole::Color, ImageRole::Albedo, ImageRole::Normals];
        for role in roles.iter().take(key.input_kind.input_count()) {
            inputs.push(device_desc(pool, *role)?);
        }
        let output = device_desc(pool, ImageRole::Output)?;
        let intensity = ready
            .intensity
            .ptr()
            .ok_or_else(|| CallFailure::new(AcceleratorCall::ComputeIntensity, "no intensity buffer"))?;

        accelerator.compute_intensity(handle, &inputs[0], intensity, ready.scratch.span())?;
        let params = DenoiseParams { hdr_intensity: intensity, blend_factor: 0.0, denoise_alpha: false };
        accelerator.invoke(handle,
                           &params,
                           ready.state.span(),
                           &inputs,
                           (0, 0),
                           &output,
                           ready.scratch.span())?;

        pool.download_output(accelerator)
    }

    /// Destroy the denoiser and free every device allocation. A later
    /// `process` acquires a fresh context; an unavailable accelerator stays
    /// unavailable.
    pub fn shutdown(&mut self) -> Result<(), DisplayError> {
        let accelerator: &mut dyn Accelerator = self.accelerator.as_mut();
        let mut first_failure = None;
        if let SessionState::Ready(ready) = &mut self.state {
            if let Some(loaded) = ready.denoiser.take() {
                if let Err(failure) = accelerator.destroy_denoiser(loaded.handle) {
                    first_failure.get_or_insert(failure);
                }
            }
            for block in [&mut ready.intensity, &mut ready.state, &mut ready.scratch].iter_mut() {
                if let Err(failure) = block.release(accelerator) {
                    first_failure.get_or_insert(failure);
                }
            }
            ready.setup_for = None;
        }
        if let SessionState::Ready(_) = self.state {
            self.state = SessionState::Uninitialized;
        }
        if let Err(failure) = self.pool.release_all(accelerator) {
            first_failure.get_or_insert(failure);
        }
        match first_failure {
            Some(failure) => Err(failure.into()),
            None => Ok(()),
        }
    }
}

impl Drop for AcceleratorSession {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::warn!("accelerator session teardown: {}", err);
        }
    }
}

fn device_desc(pool: &DeviceBufferPool, role: ImageRole) -> Result<ImageDesc, DisplayError> {
    pool.image(role).desc().ok_or_else(|| {
        CallFailure::new(AcceleratorCall::Invoke, format!("{:?} image not allocated", role)).into()
    })
}

/// Acquire the context on first use. A failure is remembered and reported
/// on every later request without retrying.
fn ensure_ready<'s>(accelerator: &mut dyn Accelerator,
                    state: &'s mut SessionState) -> Result<&'s mut ReadyState, DisplayError> {
    if let SessionState::Uninitialized = state {
        *state = match acquire_context(accelerator) {
            Ok(ready) => {
                log::info!("accelerator context ready");
                SessionState::Ready(ready)
            }
            Err(reason) => {
                log::error!("denoising disabled: {}", reason);
                SessionState::Unavailable(reason)
            }
        };
    }

    match state {
        SessionState::Ready(ready) => Ok(ready),
        SessionState::Unavailable(reason) => Err(DisplayError::AcceleratorUnavailable(reason.clone())),
        SessionState::Uninitialized => Err(DisplayError::AcceleratorUnavailable(ContextFailure::NoDevice)),
    }
}

fn acquire_context(accelerator: &mut dyn Accelerator) -> Result<ReadyState, ContextFailure> {
    let mut ready = ReadyState::default();
    if ready.intensity.ensure(accelerator, ELEMENT_BYTES, "intensity").is_err() {
        return Err(ContextFailure::NoDevice);
    }

    let acquired = accelerator
        .init()
        .and_then(|_| accelerator.create_context(log_accelerator_message, LOG_LEVEL_STATUS));
    if let Err(reason) = acquired {
        if let Err(failure) = ready.intensity.release(accelerator) {
            log::warn!("{}", failure);
        }
        return Err(reason);
    }
    Ok(ready)
}

/// Reuse the loaded denoiser when its configuration matches, otherwise
/// destroy it and create one for `key`.
fn load_denoiser(accelerator: &mut dyn Accelerator,
                 ready: &mut ReadyState,
                 key: DenoiserKey,
                 rebuilds: &mut usize) -> Result<DenoiserHandle, DisplayError> {
    if let Some(loaded) = &ready.denoiser {
        if loaded.key == key {
            return Ok(loaded.handle);
        }
    }

    if let Some(loaded) = ready.denoiser.take() {
        log::info!("denoiser configuration changed from {:?} to {:?}, rebuilding", loaded.key, key);
        *rebuilds += 1;
        ready.setup_for = None;
        accelerator.destroy_denoiser(loaded.handle)?;
    }

    let handle = accelerator.create_denoiser(key)?;
    if let Err(failure) = accelerator.set_model(handle, ModelKind::Hdr) {
        if let Err(destroy_failure) = accelerator.destroy_denoiser(handle) {
            log::warn!("{}", destroy_failure);
        }
        return Err(failure.into());
    }
    ready.denoiser = Some(LoadedDenoiser { handle, key });
    ready.setup_for = None;
    Ok(handle)
}

/// Grow state and scratch to what the denoiser asks for at this resolution
/// and rerun setup whenever either grew or the resolution changed.
fn prepare_resources(accelerator: &mut dyn Accelerator,
                     ready: &mut ReadyState,
                     handle: DenoiserHandle,
                     width: usize,
                     height: usize) -> Result<(), DisplayError> {
    let sizes = accelerator.compute_memory_resources(handle, width, height)?;
    let state_grown = ready.state.ensure(accelerator, sizes.state_bytes, "denoiser state")?;
    let scratch_grown = ensure_scratch(accelerator, ready, &sizes)?;

    if state_grown || scratch_grown || ready.setup_for != Some((width, height)) {
        ready.setup_for = None;
        accelerator.setup(handle, width, height, ready.state.span(), ready.scratch.span())?;
        ready.setup_for = Some((width, height));
    }
    Ok(())
}

fn ensure_scratch(accelerator: &mut dyn Accelerator,
                  ready: &mut ReadyState,
                  sizes: &DenoiserSizes) -> Result<bool, DisplayError> {
    if ready.scratch_at_minimum && ready.scratch.capacity() >= sizes.min_scratch_bytes {
        return Ok(false);
    }

    match ready.scratch.ensure(accelerator, sizes.recommended_scratch_bytes, "denoiser scratch") {
        Ok(grown) => {
            ready.scratch_at_minimum = false;
            Ok(grown)
        }
        Err(DisplayError::Allocation(failure)) if sizes.min_scratch_bytes < sizes.recommended_scratch_bytes => {
            log::warn!("{}, retrying with the minimum scratch size", failure);
            let grown = ready.scratch.ensure(accelerator, sizes.min_scratch_bytes, "denoiser scratch")?;
            ready.scratch_at_minimum = true;
            Ok(grown)
        }
        Err(err) => Err(err),
    }
}
