// Copyright @yucwang 2026

//! Host-memory accelerator backend.
//!
//! "Device" allocations are plain host words held in a slab, and the denoise
//! step is a small edge-aware 3x3 filter standing in for the hardware
//! network. Counters and failure injection make it the backend the session
//! is tested against.

use crate::denoise::accelerator::{
    Accelerator, AcceleratorCall, CallFailure, ContextFailure, DenoiseParams, DenoiserHandle,
    DenoiserKey, DenoiserSizes, DevicePtr, DeviceSpan, ImageDesc, LogCallback, ModelKind,
    LOG_LEVEL_STATUS,
};
use crate::math::constants::{Float, Vector3f, ELEMENT_BYTES, MIDDLE_GREY};

use slab::Slab;

const LUMINANCE_SIGMA: Float = 0.5;
const ALBEDO_SIGMA: Float = 0.1;
const NORMAL_POWER: i32 = 8;
const STATE_HEADER_BYTES: usize = 256;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CpuStats {
    pub allocations: usize,
    pub frees: usize,
    pub denoisers_created: usize,
    pub denoisers_destroyed: usize,
    pub setups: usize,
    pub invocations: usize,
}

#[derive(Debug)]
struct CpuDenoiser {
    key: DenoiserKey,
    model: Option<ModelKind>,
    setup_size: Option<(usize, usize)>,
}

pub struct CpuAccelerator {
    context_failure: Option<ContextFailure>,
    initialized: bool,
    log_callback: Option<LogCallback>,
    memory: Slab<Vec<u32>>,
    denoisers: Slab<CpuDenoiser>,
    memory_limit: Option<usize>,
    pending_failures: Vec<AcceleratorCall>,
    stats: CpuStats,
}

impl Default for CpuAccelerator {
    fn default() -> Self {
        Self::new()
    }
}

fn luminance(rgb: &Vector3f) -> Float {
    0.2126 * rgb.x + 0.7152 * rgb.y + 0.0722 * rgb.z
}

fn ptr_from_key(key: usize) -> DevicePtr {
    DevicePtr::new(key as u64 + 1)
}

fn key_from_ptr(ptr: DevicePtr) -> usize {
    (ptr.raw() as usize).wrapping_sub(1)
}

impl CpuAccelerator {
    pub fn new() -> Self {
        Self {
            context_failure: None,
            initialized: false,
            log_callback: None,
            memory: Slab::new(),
            denoisers: Slab::new(),
            memory_limit: None,
            pending_failures: Vec::new(),
            stats: CpuStats::default(),
        }
    }

    /// Backend that behaves like a machine without a usable accelerator.
    pub fn unavailable(reason: ContextFailure) -> Self {
        Self { context_failure: Some(reason), ..Self::new() }
    }

    /// Refuse any single allocation larger than `bytes`.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Make the next invocation of `call` fail once.
    pub fn fail_next(&mut self, call: AcceleratorCall) {
        self.pending_failures.push(call);
    }

    pub fn stats(&self) -> CpuStats {
        self.stats
    }

    pub fn live_allocations(&self) -> usize {
        self.memory.len()
    }

    pub fn live_denoisers(&self) -> usize {
        self.denoisers.len()
    }

    fn check_injected(&mut self, call: AcceleratorCall) -> Result<(), CallFailure> {
        if let Some(index) = self.pending_failures.iter().position(|&c| c == call) {
            self.pending_failures.remove(index);
            return Err(CallFailure::new(call, "injected failure"));
        }
        Ok(())
    }

    fn status(&self, message: &str) {
        if let Some(callback) = self.log_callback {
            callback(LOG_LEVEL_STATUS, "cpu", message);
        }
    }

    fn denoiser(&mut self, call: AcceleratorCall, handle: DenoiserHandle) -> Result<&mut CpuDenoiser, CallFailure> {
        self.denoisers
            .get_mut(handle.raw() as usize)
            .ok_or_else(|| CallFailure::new(call, "invalid denoiser handle"))
    }

    fn block(&self, call: AcceleratorCall, ptr: DevicePtr) -> Result<&Vec<u32>, CallFailure> {
        self.memory
            .get(key_from_ptr(ptr))
            .ok_or_else(|| CallFailure::new(call, "invalid device pointer"))
    }

    fn read_image(&self, call: AcceleratorCall, image: &ImageDesc) -> Result<Vec<Float>, CallFailure> {
        let words = self.block(call, image.data)?;
        let count = image.row_stride * image.height / ELEMENT_BYTES;
        if count > words.len() {
            return Err(CallFailure::new(call, "image exceeds its device allocation"));
        }
        Ok(words[..count].iter().map(|&w| Float::from_bits(w)).collect())
    }

    fn check_span(call: AcceleratorCall, span: DeviceSpan, required: usize, what: &str) -> Result<(), CallFailure> {
        if span.bytes < required || (required > 0 && span.ptr.is_none()) {
            return Err(CallFailure::new(
                call,
                format!("{} buffer holds {} bytes, needs {}", what, span.bytes, required),
            ));
        }
        Ok(())
    }

    fn sizes_for(key: DenoiserKey, width: usize, height: usize) -> DenoiserSizes {
        let pixels = width * height;
        let channels = key.pixel_format.channels();
        DenoiserSizes {
            state_bytes: STATE_HEADER_BYTES + pixels * ELEMENT_BYTES,
            min_scratch_bytes: pixels * channels * ELEMENT_BYTES,
            recommended_scratch_bytes: 2 * pixels * channels * ELEMENT_BYTES,
        }
    }
}

struct Guide<'a> {
    data: &'a [Float],
    width: usize,
}

impl<'a> Guide<'a> {
    fn at(&self, x: usize, y: usize) -> Vector3f {
        let base = (x + self.width * y) * 3;
        Vector3f::new(self.data[base], self.data[base + 1], self.data[base + 2])
    }
}

fn filter_pixel(color: &[Float],
                channels: usize,
                width: usize,
                height: usize,
                x: usize,
                y: usize,
                intensity: Float,
                albedo: Option<&Guide<'_>>,
                normals: Option<&Guide<'_>>) -> Vector3f {
    let rgb_at = |px: usize, py: usize| {
        let base = (px + width * py) * channels;
        Vector3f::new(color[base], color[base + 1], color[base + 2])
    };

    let center = rgb_at(x, y);
    let center_lum = luminance(&center) * intensity;
    let mut sum = Vector3f::zeros();
    let mut weight_sum = 0.0;

    let x0 = x.saturating_sub(1);
    let y0 = y.saturating_sub(1);
    let x1 = (x + 1).min(width - 1);
    let y1 = (y + 1).min(height - 1);
    for ny in y0..=y1 {
        for nx in x0..=x1 {
            let sample = rgb_at(nx, ny);
            let d_lum = luminance(&sample) * intensity - center_lum;
            let mut weight = (-(d_lum * d_lum) / (2.0 * LUMINANCE_SIGMA * LUMINANCE_SIGMA)).exp();
            if let Some(albedo) = albedo {
                let d = (albedo.at(nx, ny) - albedo.at(x, y)).norm_squared();
                weight *= (-d / (2.0 * ALBEDO_SIGMA * ALBEDO_SIGMA)).exp();
            }
            if let Some(normals) = normals {
                let cos = normals.at(nx, ny).dot(&normals.at(x, y)).max(0.0);
                weight *= cos.powi(NORMAL_POWER);
            }
            sum += sample * weight;
            weight_sum += weight;
        }
    }

    if weight_sum > 0.0 {
        sum / weight_sum
    } else {
        center
    }
}

fn box_alpha(color: &[Float], width: usize, height: usize, x: usize, y: usize) -> Float {
    let mut sum = 0.0;
    let mut count = 0.0;
    for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
        for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
            sum += color[(nx + width * ny) * 4 + 3];
            count += 1.0;
        }
    }
    sum / count
}

impl Accelerator for CpuAccelerator {
    fn init(&mut self) -> Result<(), ContextFailure> {
        if let Some(reason) = &self.context_failure {
            return Err(reason.clone());
        }
        self.initialized = true;
        Ok(())
    }

    fn create_context(&mut self, log_callback: LogCallback, _log_level: u32) -> Result<(), ContextFailure> {
        if !self.initialized {
            return Err(ContextFailure::ContextCreation(String::from("library not initialized")));
        }
        self.log_callback = Some(log_callback);
        self.status("host context created");
        Ok(())
    }

    fn malloc(&mut self, bytes: usize) -> Result<DevicePtr, CallFailure> {
        self.check_injected(AcceleratorCall::Malloc)?;
        if let Some(limit) = self.memory_limit {
            if bytes > limit {
                return Err(CallFailure::new(AcceleratorCall::Malloc, "out of device memory"));
            }
        }
        let words = (bytes + ELEMENT_BYTES - 1) / ELEMENT_BYTES;
        let key = self.memory.insert(vec![0u32; words]);
        self.stats.allocations += 1;
        Ok(ptr_from_key(key))
    }

    fn free(&mut self, ptr: DevicePtr) -> Result<(), CallFailure> {
        self.check_injected(AcceleratorCall::Free)?;
        let key = key_from_ptr(ptr);
        if !self.memory.contains(key) {
            return Err(CallFailure::new(AcceleratorCall::Free, "invalid device pointer"));
        }
        self.memory.remove(key);
        self.stats.frees += 1;
        Ok(())
    }

    fn upload(&mut self, dst: DevicePtr, src: &[u8]) -> Result<(), CallFailure> {
        self.check_injected(AcceleratorCall::Upload)?;
        let words = self
            .memory
            .get_mut(key_from_ptr(dst))
            .ok_or_else(|| CallFailure::new(AcceleratorCall::Upload, "invalid device pointer"))?;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(words.as_mut_slice());
        if src.len() > bytes.len() {
            return Err(CallFailure::new(AcceleratorCall::Upload, "copy exceeds device allocation"));
        }
        bytes[..src.len()].copy_from_slice(src);
        Ok(())
    }

    fn download(&mut self, src: DevicePtr, dst: &mut [u8]) -> Result<(), CallFailure> {
        self.check_injected(AcceleratorCall::Download)?;
        let words = self.block(AcceleratorCall::Download, src)?;
        let bytes: &[u8] = bytemuck::cast_slice(words.as_slice());
        if dst.len() > bytes.len() {
            return Err(CallFailure::new(AcceleratorCall::Download, "copy exceeds device allocation"));
        }
        dst.copy_from_slice(&bytes[..dst.len()]);
        Ok(())
    }

    fn create_denoiser(&mut self, key: DenoiserKey) -> Result<DenoiserHandle, CallFailure> {
        self.check_injected(AcceleratorCall::CreateDenoiser)?;
        if !self.initialized {
            return Err(CallFailure::new(AcceleratorCall::CreateDenoiser, "no context"));
        }
        let index = self.denoisers.insert(CpuDenoiser { key, model: None, setup_size: None });
        self.stats.denoisers_created += 1;
        self.status("denoiser created");
        Ok(DenoiserHandle::new(index as u64))
    }

    fn set_model(&mut self, denoiser: DenoiserHandle, model: ModelKind) -> Result<(), CallFailure> {
        self.check_injected(AcceleratorCall::SetModel)?;
        self.denoiser(AcceleratorCall::SetModel, denoiser)?.model = Some(model);
        Ok(())
    }

    fn destroy_denoiser(&mut self, denoiser: DenoiserHandle) -> Result<(), CallFailure> {
        self.check_injected(AcceleratorCall::DestroyDenoiser)?;
        let index = denoiser.raw() as usize;
        if !self.denoisers.contains(index) {
            return Err(CallFailure::new(AcceleratorCall::DestroyDenoiser, "invalid denoiser handle"));
        }
        self.denoisers.remove(index);
        self.stats.denoisers_destroyed += 1;
        Ok(())
    }

    fn compute_memory_resources(&mut self,
                                denoiser: DenoiserHandle,
                                width: usize,
                                height: usize) -> Result<DenoiserSizes, CallFailure> {
        self.check_injected(AcceleratorCall::ComputeMemoryResources)?;
        let key = self.denoiser(AcceleratorCall::ComputeMemoryResources, denoiser)?.key;
        Ok(Self::sizes_for(key, width, height))
    }

    fn setup(&mut self,
             denoiser: DenoiserHandle,
             width: usize,
             height: usize,
             state: DeviceSpan,
             scratch: DeviceSpan) -> Result<(), CallFailure> {
        self.check_injected(AcceleratorCall::Setup)?;
        let key = self.denoiser(AcceleratorCall::Setup, denoiser)?.key;
        let sizes = Self::sizes_for(key, width, height);
        Self::check_span(AcceleratorCall::Setup, state, sizes.state_bytes, "state")?;
        Self::check_span(AcceleratorCall::Setup, scratch, sizes.min_scratch_bytes, "scratch")?;
        self.denoiser(AcceleratorCall::Setup, denoiser)?.setup_size = Some((width, height));
        self.stats.setups += 1;
        Ok(())
    }

    fn compute_intensity(&mut self,
                         denoiser: DenoiserHandle,
                         color: &ImageDesc,
                         intensity: DevicePtr,
                         _scratch: DeviceSpan) -> Result<(), CallFailure> {
        self.check_injected(AcceleratorCall::ComputeIntensity)?;
        self.denoiser(AcceleratorCall::ComputeIntensity, denoiser)?;
        let pixels = self.read_image(AcceleratorCall::ComputeIntensity, color)?;
        let channels = color.format.channels();

        let mut log_sum = 0.0f64;
        let mut count = 0usize;
        for rgb in pixels.chunks_exact(channels) {
            let lum = luminance(&Vector3f::new(rgb[0], rgb[1], rgb[2]));
            if lum > 1e-8 {
                log_sum += (lum as f64).ln();
                count += 1;
            }
        }
        let value = if count == 0 {
            1.0
        } else {
            MIDDLE_GREY / ((log_sum / count as f64).exp() as Float)
        };

        let bits = value.to_bits().to_le_bytes();
        self.upload(intensity, &bits)
            .map_err(|failure| CallFailure::new(AcceleratorCall::ComputeIntensity, failure.detail))
    }

    fn invoke(&mut self,
              denoiser: DenoiserHandle,
              params: &DenoiseParams,
              state: DeviceSpan,
              inputs: &[ImageDesc],
              offset: (usize, usize),
              output: &ImageDesc,
              scratch: DeviceSpan) -> Result<(), CallFailure> {
        const CALL: AcceleratorCall = AcceleratorCall::Invoke;
        self.check_injected(CALL)?;
        let (key, model, setup_size) = {
            let record = self.denoiser(CALL, denoiser)?;
            (record.key, record.model, record.setup_size)
        };
        if model.is_none() {
            return Err(CallFailure::new(CALL, "no model loaded"));
        }
        if setup_size != Some((output.width, output.height)) {
            return Err(CallFailure::new(CALL, "denoiser not set up for this resolution"));
        }
        if offset != (0, 0) {
            return Err(CallFailure::new(CALL, "tiled invocation is not supported"));
        }
        if inputs.len() != key.input_kind.input_count() {
            return Err(CallFailure::new(
                CALL,
                format!("expected {} inputs, got {}", key.input_kind.input_count(), inputs.len()),
            ));
        }
        let sizes = Self::sizes_for(key, output.width, output.height);
        Self::check_span(CALL, state, sizes.state_bytes, "state")?;
        Self::check_span(CALL, scratch, sizes.min_scratch_bytes, "scratch")?;

        let color_desc = &inputs[0];
        if color_desc.format != key.pixel_format || output.format != key.pixel_format {
            return Err(CallFailure::new(CALL, "pixel format does not match denoiser"));
        }
        let color = self.read_image(CALL, color_desc)?;
        let albedo = match inputs.get(1) {
            Some(desc) => Some(self.read_image(CALL, desc)?),
            None => None,
        };
        let normals = match inputs.get(2) {
            Some(desc) => Some(self.read_image(CALL, desc)?),
            None => None,
        };
        let intensity_words = self.block(CALL, params.hdr_intensity)?;
        let intensity = match model {
            Some(ModelKind::Hdr) => intensity_words.first().map(|&w| Float::from_bits(w)).unwrap_or(1.0),
            _ => 1.0,
        };

        let (width, height) = (output.width, output.height);
        let channels = key.pixel_format.channels();
        let albedo_guide = albedo.as_ref().map(|data| Guide { data, width });
        let normal_guide = normals.as_ref().map(|data| Guide { data, width });

        let mut result = vec![0.0 as Float; width * height * channels];
        for y in 0..height {
            for x in 0..width {
                let filtered = filter_pixel(&color, channels, width, height, x, y, intensity,
                                            albedo_guide.as_ref(), normal_guide.as_ref());
                let base = (x + width * y) * channels;
                for c in 0..3 {
                    let noisy = color[base + c];
                    result[base + c] = filtered[c] * (1.0 - params.blend_factor) + noisy * params.blend_factor;
                }
                if channels == 4 {
                    result[base + 3] = if params.denoise_alpha {
                        box_alpha(&color, width, height, x, y)
                    } else {
                        color[base + 3]
                    };
                }
            }
        }

        self.upload(output.data, bytemuck::cast_slice(&result))
            .map_err(|failure| CallFailure::new(CALL, failure.detail))?;
        self.stats.invocations += 1;
        Ok(())
    }
}
