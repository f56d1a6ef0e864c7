// Copyright @yucwang 2026

use crate::core::error::{AllocationFailure, ConfigurationError, DisplayError};
use crate::denoise::accelerator::{
    Accelerator, AcceleratorCall, CallFailure, DevicePtr, DeviceSpan, ImageDesc, PixelFormat,
};
use crate::math::bitmap::Bitmap;
use crate::math::constants::ELEMENT_BYTES;

/// Grow-only device allocation. The capacity never shrinks; a request that
/// fits reuses the block untouched.
#[derive(Debug, Default)]
pub struct DeviceBlock {
    ptr: Option<DevicePtr>,
    capacity: usize,
}

impl DeviceBlock {
    pub fn ptr(&self) -> Option<DevicePtr> {
        self.ptr
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn span(&self) -> DeviceSpan {
        DeviceSpan { ptr: self.ptr, bytes: self.capacity }
    }

    /// Make sure at least `bytes` are allocated. Returns `true` when a new
    /// allocation was made. On failure the block is left empty so the next
    /// attempt starts from scratch.
    pub fn ensure(&mut self,
                  accelerator: &mut dyn Accelerator,
                  bytes: usize,
                  what: &'static str) -> Result<bool, DisplayError> {
        if bytes == 0 || (self.ptr.is_some() && self.capacity >= bytes) {
            return Ok(false);
        }

        self.release(accelerator)?;
        let ptr = accelerator.malloc(bytes).map_err(|failure| AllocationFailure {
            what,
            bytes,
            detail: failure.detail,
        })?;
        log::debug!("allocated {} device bytes for {}", bytes, what);
        self.ptr = Some(ptr);
        self.capacity = bytes;
        Ok(true)
    }

    pub fn release(&mut self, accelerator: &mut dyn Accelerator) -> Result<(), CallFailure> {
        self.capacity = 0;
        match self.ptr.take() {
            Some(ptr) => accelerator.free(ptr),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageRole {
    Color,
    Albedo,
    Normals,
    Output,
}

impl ImageRole {
    const ALL: [ImageRole; 4] = [ImageRole::Color, ImageRole::Albedo, ImageRole::Normals, ImageRole::Output];

    fn index(self) -> usize {
        match self {
            ImageRole::Color => 0,
            ImageRole::Albedo => 1,
            ImageRole::Normals => 2,
            ImageRole::Output => 3,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ImageRole::Color => "color image",
            ImageRole::Albedo => "albedo image",
            ImageRole::Normals => "normals image",
            ImageRole::Output => "output image",
        }
    }
}

/// Packed float image living in device memory.
#[derive(Debug)]
pub struct DeviceImage {
    width: usize,
    height: usize,
    pixel_stride: usize,
    row_stride: usize,
    format: PixelFormat,
    block: DeviceBlock,
}

impl Default for DeviceImage {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            pixel_stride: 0,
            row_stride: 0,
            format: PixelFormat::Float3,
            block: DeviceBlock::default(),
        }
    }
}

impl DeviceImage {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel_stride(&self) -> usize {
        self.pixel_stride
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn capacity(&self) -> usize {
        self.block.capacity()
    }

    /// Bytes covered by the current logical size.
    pub fn logical_bytes(&self) -> usize {
        self.row_stride * self.height
    }

    pub fn desc(&self) -> Option<ImageDesc> {
        self.block.ptr().map(|data| ImageDesc {
            data,
            width: self.width,
            height: self.height,
            row_stride: self.row_stride,
            pixel_stride: self.pixel_stride,
            format: self.format,
        })
    }

    /// Rows must be tightly packed for the current width and the logical
    /// extent must fit the allocation, whatever width the block was sized for.
    fn check_strides(&self, call: AcceleratorCall) -> Result<ImageDesc, CallFailure> {
        let desc = self
            .desc()
            .ok_or_else(|| CallFailure::new(call, "no device image allocated"))?;
        if self.row_stride != self.width * self.pixel_stride {
            return Err(CallFailure::new(
                call,
                format!("row stride {} incompatible with width {}", self.row_stride, self.width),
            ));
        }
        if self.logical_bytes() > self.capacity() {
            return Err(CallFailure::new(
                call,
                format!("image needs {} bytes but holds {}", self.logical_bytes(), self.capacity()),
            ));
        }
        Ok(desc)
    }
}

/// Device images for every denoiser role plus the host mirror of the output.
#[derive(Debug, Default)]
pub struct DeviceBufferPool {
    images: [DeviceImage; 4],
    host_mirror: Bitmap,
    allocations: usize,
}

impl DeviceBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image(&self, role: ImageRole) -> &DeviceImage {
        &self.images[role.index()]
    }

    /// Number of device allocations made so far.
    pub fn allocation_count(&self) -> usize {
        self.allocations
    }

    pub fn ensure(&mut self,
                  role: ImageRole,
                  width: usize,
                  height: usize,
                  channels: usize,
                  accelerator: &mut dyn Accelerator) -> Result<&DeviceImage, DisplayError> {
        let format = PixelFormat::from_channels(channels)
            .ok_or(ConfigurationError::UnsupportedChannelCount(channels))?;
        let pixel_stride = ELEMENT_BYTES * channels;
        let row_stride = pixel_stride * width;
        let required = row_stride * height;

        let image = &mut self.images[role.index()];
        image.width = width;
        image.height = height;
        image.pixel_stride = pixel_stride;
        image.row_stride = row_stride;
        image.format = format;

        if image.block.ensure(accelerator, required, role.label())? {
            self.allocations += 1;
            log::debug!("{} grown to {}x{}x{}", role.label(), width, height, channels);
        }
        Ok(&self.images[role.index()])
    }

    /// Grow the host mirror so it can take the current output image.
    pub fn ensure_host_mirror(&mut self) -> Result<bool, DisplayError> {
        let output = &self.images[ImageRole::Output.index()];
        let (width, height, pixel_stride) = (output.width, output.height, output.pixel_stride);
        self.host_mirror
            .ensure(width, height, pixel_stride)
            .map_err(|err| {
                DisplayError::from(AllocationFailure {
                    what: "host output buffer",
                    bytes: width * height * pixel_stride,
                    detail: err.to_string(),
                })
            })
    }

    pub fn host_mirror(&self) -> &Bitmap {
        &self.host_mirror
    }

    pub fn upload(&mut self,
                  role: ImageRole,
                  src: &[u8],
                  accelerator: &mut dyn Accelerator) -> Result<(), DisplayError> {
        let desc = self.images[role.index()].check_strides(AcceleratorCall::Upload)?;
        let bytes = desc.row_stride * desc.height;
        if src.len() != bytes {
            return Err(CallFailure::new(
                AcceleratorCall::Upload,
                format!("{} expects {} bytes, got {}", role.label(), bytes, src.len()),
            )
            .into());
        }
        accelerator.upload(desc.data, src)?;
        Ok(())
    }

    /// Copy the output image into the host mirror.
    pub fn download_output(&mut self, accelerator: &mut dyn Accelerator) -> Result<(), DisplayError> {
        let desc = self.images[ImageRole::Output.index()].check_strides(AcceleratorCall::Download)?;
        let bytes = desc.row_stride * desc.height;
        if self.host_mirror.len() < bytes {
            return Err(CallFailure::new(AcceleratorCall::Download, "host buffer not large enough").into());
        }
        accelerator.download(desc.data, &mut self.host_mirror.as_bytes_mut()[..bytes])?;
        Ok(())
    }

    /// Free every device image and the host mirror. Keeps going past
    /// failures and reports the first one.
    pub fn release_all(&mut self, accelerator: &mut dyn Accelerator) -> Result<(), CallFailure> {
        let mut first_failure = None;
        for role in ImageRole::ALL.iter() {
            if let Err(failure) = self.images[role.index()].block.release(accelerator) {
                first_failure.get_or_insert(failure);
            }
        }
        self.host_mirror.release();
        match first_failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denoise::cpu::CpuAccelerator;

    #[test]
    fn test_ensure_same_size_reuses_allocation() {
        let mut accel = CpuAccelerator::new();
        let mut pool = DeviceBufferPool::new();

        pool.ensure(ImageRole::Color, 16, 8, 3, &mut accel).unwrap();
        pool.ensure(ImageRole::Color, 16, 8, 3, &mut accel).unwrap();

        assert_eq!(pool.allocation_count(), 1);
        assert_eq!(accel.stats().allocations, 1);
    }

    #[test]
    fn test_ensure_larger_size_reallocates_once() {
        let mut accel = CpuAccelerator::new();
        let mut pool = DeviceBufferPool::new();

        pool.ensure(ImageRole::Output, 4, 4, 3, &mut accel).unwrap();
        let image = pool.ensure(ImageRole::Output, 8, 8, 4, &mut accel).unwrap();

        assert!(image.capacity() >= 8 * 8 * 4 * ELEMENT_BYTES);
        assert_eq!(image.format(), PixelFormat::Float4);
        assert_eq!(pool.allocation_count(), 2);
        assert_eq!(accel.stats().frees, 1);
    }

    #[test]
    fn test_ensure_smaller_size_keeps_capacity() {
        let mut accel = CpuAccelerator::new();
        let mut pool = DeviceBufferPool::new();

        pool.ensure(ImageRole::Color, 8, 8, 4, &mut accel).unwrap();
        let image = pool.ensure(ImageRole::Color, 2, 2, 3, &mut accel).unwrap();

        assert_eq!(image.capacity(), 8 * 8 * 4 * ELEMENT_BYTES);
        assert_eq!(image.row_stride(), 2 * 3 * ELEMENT_BYTES);
        assert_eq!(image.width(), 2);
        assert_eq!(pool.allocation_count(), 1);
    }

    #[test]
    fn test_ensure_rejects_unsupported_channels() {
        let mut accel = CpuAccelerator::new();
        let mut pool = DeviceBufferPool::new();

        let err = pool.ensure(ImageRole::Color, 4, 4, 2, &mut accel).unwrap_err();
        assert_eq!(err, DisplayError::Configuration(ConfigurationError::UnsupportedChannelCount(2)));
        assert_eq!(accel.stats().allocations, 0);
    }

    #[test]
    fn test_failed_allocation_leaves_pool_usable() {
        let mut accel = CpuAccelerator::new();
        let mut pool = DeviceBufferPool::new();

        accel.fail_next(AcceleratorCall::Malloc);
        let err = pool.ensure(ImageRole::Albedo, 4, 4, 3, &mut accel).unwrap_err();
        assert!(matches!(err, DisplayError::Allocation(_)));
        assert_eq!(pool.image(ImageRole::Albedo).capacity(), 0);

        pool.ensure(ImageRole::Albedo, 4, 4, 3, &mut accel).unwrap();
        assert_eq!(pool.image(ImageRole::Albedo).capacity(), 4 * 4 * 3 * ELEMENT_BYTES);
    }

    #[test]
    fn test_host_mirror_follows_output_and_only_grows() {
        let mut accel = CpuAccelerator::new();
        let mut pool = DeviceBufferPool::new();

        pool.ensure(ImageRole::Output, 4, 4, 4, &mut accel).unwrap();
        assert!(pool.ensure_host_mirror().unwrap());
        pool.ensure(ImageRole::Output, 2, 2, 4, &mut accel).unwrap();
        assert!(!pool.ensure_host_mirror().unwrap());
        assert_eq!(pool.host_mirror().len(), 2 * 2 * 4 * ELEMENT_BYTES);
    }

    #[test]
    fn test_upload_download_round_trip_through_output() {
        let mut accel = CpuAccelerator::new();
        let mut pool = DeviceBufferPool::new();
        pool.ensure(ImageRole::Output, 2, 1, 3, &mut accel).unwrap();
        pool.ensure_host_mirror().unwrap();

        let pixels: [f32; 6] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        pool.upload(ImageRole::Output, bytemuck::cast_slice(&pixels), &mut accel).unwrap();
        pool.download_output(&mut accel).unwrap();

        assert_eq!(pool.host_mirror().as_floats().unwrap(), &pixels);
    }

    #[test]
    fn test_upload_rejects_wrong_length() {
        let mut accel = CpuAccelerator::new();
        let mut pool = DeviceBufferPool::new();
        pool.ensure(ImageRole::Color, 2, 2, 3, &mut accel).unwrap();

        let err = pool.upload(ImageRole::Color, &[0u8; 8], &mut accel).unwrap_err();
        assert!(matches!(err, DisplayError::AcceleratorCall(CallFailure { call: AcceleratorCall::Upload, .. })));
    }

    #[test]
    fn test_release_all_frees_everything() {
        let mut accel = CpuAccelerator::new();
        let mut pool = DeviceBufferPool::new();
        pool.ensure(ImageRole::Color, 2, 2, 3, &mut accel).unwrap();
        pool.ensure(ImageRole::Output, 2, 2, 3, &mut accel).unwrap();

        pool.release_all(&mut accel).unwrap();
        assert_eq!(accel.live_allocations(), 0);
        assert_eq!(pool.image(ImageRole::Color).capacity(), 0);
    }
}
