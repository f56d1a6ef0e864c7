// Copyright @yucwang 2026

use crate::core::accumulation::AccumulationSource;
use crate::core::error::{AllocationFailure, DisplayError};
use crate::core::params::OpenParams;
use crate::core::render_output::{ChannelLayout, DataType, RenderOutput};
use crate::core::resolver::SampleResolver;
use crate::denoise::accelerator::{Accelerator, PixelFormat};
use crate::denoise::session::{AcceleratorSession, DenoiseRequest};
use crate::math::bitmap::Bitmap;
use crate::math::constants::{Float, ELEMENT_BYTES};

use std::ops::Range;

/// Inclusive pixel bounds in full-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveRegion {
    pub x_min: usize,
    pub x_max: usize,
    pub y_min: usize,
    pub y_max: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Overwrite,
    Redraw,
    Size,
    MultiResolution,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QueryInfo {
    Overwrite { overwrite: bool, interactive: bool },
    Redraw { redraw: bool },
    Size { width: usize, height: usize, aspect_ratio: Float },
    MultiResolution { supported: bool },
}

struct AccumulationBinding {
    layout: ChannelLayout,
    source: AccumulationSource,
}

/// Host side of one display surface.
///
/// Fed either by tiles from the image protocol or by a live accumulation
/// surface, and read by the presentation side through
/// [`FrameStore::float_framebuffer`].
pub struct FrameStore {
    width: usize,
    height: usize,
    crop_origin: (usize, usize),
    crop_size: (usize, usize),
    active_region: ActiveRegion,
    use_active_region: bool,
    channels: usize,
    bytes_per_sample: usize,
    raw: Bitmap,
    denoised: Option<Bitmap>,
    show_denoised: bool,
    denoise_requested: bool,
    dirty: bool,
    denoise_pending: bool,
    ready: bool,
    accumulation: Option<AccumulationBinding>,
    session: Option<AcceleratorSession>,
}

impl FrameStore {
    /// Unbound store. `accelerator` backs the denoiser when denoising gets
    /// enabled.
    pub fn new(denoise: bool, accelerator: Option<Box<dyn Accelerator>>) -> Self {
        Self {
            width: 0,
            height: 0,
            crop_origin: (0, 0),
            crop_size: (0, 0),
            active_region: ActiveRegion { x_min: 0, x_max: 0, y_min: 0, y_max: 0 },
            use_active_region: false,
            channels: 0,
            bytes_per_sample: 0,
            raw: Bitmap::default(),
            denoised: None,
            show_denoised: false,
            denoise_requested: denoise,
            dirty: false,
            denoise_pending: false,
            ready: false,
            accumulation: None,
            session: accelerator.map(AcceleratorSession::new),
        }
    }

    /// Store for a tile-protocol open.
    pub fn open(params: &OpenParams, accelerator: Option<Box<dyn Accelerator>>) -> Result<Self, DisplayError> {
        let mut store = Self::new(params.denoise, accelerator);
        store.bind(params.width,
                   params.height,
                   params.channels,
                   params.format.bytes_per_sample(),
                   params.denoise)?;
        store.crop_origin = params.crop_origin;
        store.crop_size = params.crop_size;
        store.ready = true;
        Ok(store)
    }

    /// (Re)allocate the host buffers for a new frame configuration. Prior
    /// buffers are freed first, the active region covers the whole frame and
    /// the crop is reset to the full image.
    pub fn bind(&mut self,
                width: usize,
                height: usize,
                channels: usize,
                bytes_per_sample: usize,
                denoise: bool) -> Result<(), DisplayError> {
        self.release_buffers();

        self.width = width;
        self.height = height;
        self.crop_origin = (0, 0);
        self.crop_size = (width, height);
        self.channels = channels;
        self.bytes_per_sample = bytes_per_sample;
        self.active_region = ActiveRegion {
            x_min: 0,
            x_max: width.saturating_sub(1),
            y_min: 0,
            y_max: height.saturating_sub(1),
        };
        self.use_active_region = false;
        self.dirty = false;
        self.denoise_requested = denoise;

        let entry_size = self.entry_size();
        self.raw = allocate_host(width, height, entry_size, "framebuffer")?;
        if self.denoise_enabled() {
            self.denoised = Some(allocate_host(width, height, entry_size, "denoised framebuffer")?);
        } else if denoise {
            log::warn!("denoising needs 3 or 4 float channels, showing {} channels undenoised", channels);
        }

        log::info!("display surface bound at {}x{} with {} channels of {} bytes",
                   width, height, channels, bytes_per_sample);
        Ok(())
    }

    /// Bind to a live accumulation surface. The element types of `outputs`
    /// and their fit against the surface's planes are validated before any
    /// buffer is touched.
    pub fn rebind(&mut self,
                  width: usize,
                  height: usize,
                  outputs: Vec<RenderOutput>,
                  source: AccumulationSource) -> Result<(), DisplayError> {
        let layout = ChannelLayout::new(outputs)?;
        if source.width() != width || source.height() != height {
            return Err(DisplayError::BadParams(format!(
                "accumulation surface is {}x{}, display is {}x{}",
                source.width(),
                source.height(),
                width,
                height
            )));
        }

        source.check_layout(layout.outputs())?;

        let channels = layout.channels();
        self.accumulation = Some(AccumulationBinding { layout, source });
        if let Err(err) = self.bind(width, height, channels, ELEMENT_BYTES, self.denoise_requested) {
            self.accumulation = None;
            return Err(err);
        }
        Ok(())
    }

    /// Copy one tile into the framebuffer.
    ///
    /// Ranges are end-exclusive and relative to the crop origin. Each source
    /// pixel is `entry_size` bytes; only as many bytes as both sides hold
    /// are copied.
    pub fn write_tile(&mut self,
                      x: Range<usize>,
                      y: Range<usize>,
                      entry_size: usize,
                      data: &[u8]) -> Result<(), DisplayError> {
        if self.raw.is_empty() {
            return Err(DisplayError::BadParams(String::from("tile written to an unbound surface")));
        }
        if x.start > x.end || y.start > y.end || entry_size == 0 {
            return Err(DisplayError::BadParams(format!("malformed tile {:?} x {:?}", x, y)));
        }

        let outside = || {
            DisplayError::BadParams(format!(
                "tile {:?} x {:?} at crop origin {:?} outside the {}x{} frame",
                x, y, self.crop_origin, self.width, self.height
            ))
        };
        let (x0, x1) = offset_range(self.crop_origin.0, &x).ok_or_else(outside)?;
        let (y0, y1) = offset_range(self.crop_origin.1, &y).ok_or_else(outside)?;
        if x1 > self.width || y1 > self.height {
            return Err(outside());
        }
        let expected = ((x1 - x0) * (y1 - y0))
            .checked_mul(entry_size)
            .ok_or_else(|| DisplayError::BadParams(format!("tile entry size {} is too large", entry_size)))?;
        if data.len() < expected {
            return Err(DisplayError::BadParams(format!(
                "tile holds {} bytes, expected {}",
                data.len(),
                expected
            )));
        }
        if x0 == x1 || y0 == y1 {
            return Ok(());
        }

        let copy = entry_size.min(self.entry_size());
        let mut offset = 0;
        for py in y0..y1 {
            for px in x0..x1 {
                self.raw[(px, py)][..copy].copy_from_slice(&data[offset..offset + copy]);
                offset += entry_size;
            }
        }

        self.active_region = ActiveRegion { x_min: x0, x_max: x1 - 1, y_min: y0, y_max: y1 - 1 };
        self.use_active_region = x0 != 0 || y0 != 0 || x1 != self.width || y1 != self.height;
        self.dirty = true;
        Ok(())
    }

    /// The renderer has new samples in the accumulation surface.
    pub fn notify(&mut self) {
        if !self.ready {
            log::debug!("display surface ready for reading");
            self.ready = true;
        }
        self.dirty = true;
    }

    pub fn query(&self, kind: QueryKind) -> QueryInfo {
        match kind {
            QueryKind::Overwrite => QueryInfo::Overwrite { overwrite: true, interactive: true },
            QueryKind::Redraw => QueryInfo::Redraw { redraw: true },
            QueryKind::Size => QueryInfo::Size {
                width: self.crop_size.0,
                height: self.crop_size.1,
                aspect_ratio: 1.0,
            },
            QueryKind::MultiResolution => QueryInfo::MultiResolution { supported: true },
        }
    }

    /// Pixels for presentation, refreshed if anything changed since the
    /// last read: resolve the accumulation surface, then denoise. A failed
    /// denoise shows the raw pixels instead.
    ///
    /// Reading consumes the dirty flag, so an unchanged surface is served
    /// from the previous refresh. A denoise that failed on an allocation or
    /// accelerator call is retried on the next read even without new
    /// samples; an unavailable accelerator is not.
    ///
    /// `None` until bound or when samples are not stored as floats.
    pub fn float_framebuffer(&mut self) -> Option<&[Float]> {
        if self.raw.is_empty() || self.bytes_per_sample != ELEMENT_BYTES {
            return None;
        }
        if self.dirty {
            self.resolve_accumulation();
            self.dirty = false;
            self.denoise_pending = true;
        }
        if self.denoise_pending {
            match self.denoise_raw() {
                Ok(shown) => {
                    self.show_denoised = shown;
                    self.denoise_pending = false;
                }
                Err(err @ DisplayError::AcceleratorUnavailable(_)) => {
                    log::debug!("showing undenoised pixels: {}", err);
                    self.show_denoised = false;
                    self.denoise_pending = false;
                }
                Err(err) => {
                    log::warn!("denoising failed, showing undenoised pixels: {}", err);
                    self.show_denoised = false;
                    self.denoise_pending = err.is_retryable();
                }
            }
        }
        match (&self.denoised, self.show_denoised) {
            (Some(denoised), true) => denoised.as_floats(),
            _ => self.raw.as_floats(),
        }
    }

    fn resolve_accumulation(&mut self) {
        if let Some(binding) = &self.accumulation {
            if let Err(err) = SampleResolver::resolve(&binding.source, &binding.layout, &mut self.raw) {
                log::warn!("failed resolving accumulation surface: {}", err);
            }
        }
    }

    /// `Ok(true)` when the denoised buffer now holds the current frame.
    fn denoise_raw(&mut self) -> Result<bool, DisplayError> {
        let (session, denoised) = match (self.session.as_mut(), self.denoised.as_mut()) {
            (Some(session), Some(denoised)) => (session, denoised),
            _ => return Ok(false),
        };
        let color = match self.raw.as_floats() {
            Some(color) => color,
            None => return Ok(false),
        };

        let request = DenoiseRequest::color(self.width, self.height, self.channels, color);
        let frame = session.process(&request)?;
        let copied = match denoised.as_floats_mut() {
            Some(out) if out.len() == frame.pixels().len() => {
                out.copy_from_slice(frame.pixels());
                true
            }
            _ => false,
        };
        frame.release();
        Ok(copied)
    }

    /// Bounds of the last tile, only when it did not cover the whole frame.
    pub fn active_region(&self) -> Option<ActiveRegion> {
        if self.use_active_region {
            Some(self.active_region)
        } else {
            None
        }
    }

    /// Release host buffers and accelerator resources. Safe to call twice.
    pub fn close(&mut self) {
        self.release_buffers();
        self.accumulation = None;
        self.ready = false;
        self.dirty = false;
        if let Some(session) = self.session.as_mut() {
            if let Err(err) = session.shutdown() {
                log::warn!("failed releasing accelerator resources: {}", err);
            }
        }
    }

    fn release_buffers(&mut self) {
        self.raw.release();
        self.denoised = None;
        self.show_denoised = false;
        self.denoise_pending = false;
    }

    fn denoise_enabled(&self) -> bool {
        let float_layout = self
            .accumulation
            .as_ref()
            .map(|binding| binding.layout.data_type() == DataType::Float)
            .unwrap_or(true);
        self.denoise_requested
            && self.session.is_some()
            && float_layout
            && self.bytes_per_sample == ELEMENT_BYTES
            && PixelFormat::from_channels(self.channels).is_some()
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

    pub fn entry_size(&self) -> usize {
        self.channels * self.bytes_per_sample
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn raw(&self) -> &Bitmap {
        &self.raw
    }

    pub fn session(&self) -> Option<&AcceleratorSession> {
        self.session.as_ref()
    }
}

fn offset_range(origin: usize, range: &Range<usize>) -> Option<(usize, usize)> {
    Some((origin.checked_add(range.start)?, origin.checked_add(range.end)?))
}

fn allocate_host(width: usize,
                 height: usize,
                 entry_size: usize,
                 what: &'static str) -> Result<Bitmap, DisplayError> {
    let mut bitmap = Bitmap::default();
    bitmap.ensure(width, height, entry_size).map_err(|err| AllocationFailure {
        what,
        bytes: width * height * entry_size,
        detail: err.to_string(),
    })?;
    Ok(bitmap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::ParamList;
    use crate::denoise::accelerator::{AcceleratorCall, ContextFailure};
    use crate::denoise::cpu::CpuAccelerator;

    use std::sync::{Arc, Mutex};

    fn tile_store(width: usize, height: usize, channels: usize, params: ParamList) -> FrameStore {
        let params = OpenParams::from_param_list(width, height, channels, &params).unwrap();
        FrameStore::open(&params, None).unwrap()
    }

    fn denoising_store(width: usize,
                       height: usize,
                       accelerator: Box<dyn Accelerator>) -> FrameStore {
        let list = ParamList::new().with_int("use_denoiser", 1);
        let params = OpenParams::from_param_list(width, height, 3, &list).unwrap();
        FrameStore::open(&params, Some(accelerator)).unwrap()
    }

    fn pattern(len: usize) -> Vec<Float> {
        (0..len).map(|i| i as Float * 0.25).collect()
    }

    #[test]
    fn test_full_tile_round_trips_exactly() {
        let mut store = tile_store(4, 4, 3, ParamList::new());
        let pixels = pattern(4 * 4 * 3);

        store.write_tile(0..4, 0..4, 12, bytemuck::cast_slice(&pixels)).unwrap();

        assert!(store.is_dirty());
        assert_eq!(store.float_framebuffer().unwrap(), pixels.as_slice());
        assert_eq!(store.active_region(), None);
    }

    #[test]
    fn test_rebind_resets_active_region() {
        let mut store = tile_store(4, 4, 3, ParamList::new());
        let pixels = pattern(2 * 2 * 3);
        store.write_tile(0..2, 0..2, 12, bytemuck::cast_slice(&pixels)).unwrap();
        assert_eq!(store.active_region(), Some(ActiveRegion { x_min: 0, x_max: 1, y_min: 0, y_max: 1 }));

        store.bind(8, 8, 3, 4, false).unwrap();
        assert_eq!(store.active_region(), None);
        assert_eq!(store.raw().len(), 8 * 8 * 12);
        assert_eq!(store.query(QueryKind::Size),
                   QueryInfo::Size { width: 8, height: 8, aspect_ratio: 1.0 });
    }

    #[test]
    fn test_tile_outside_frame_rejected() {
        let mut store = tile_store(4, 4, 3, ParamList::new());
        let pixels = pattern(2 * 2 * 3);

        let err = store.write_tile(3..5, 0..2, 12, bytemuck::cast_slice(&pixels)).unwrap_err();
        assert!(matches!(err, DisplayError::BadParams(_)));
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_short_tile_rejected() {
        let mut store = tile_store(4, 4, 3, ParamList::new());
        let err = store.write_tile(0..2, 0..2, 12, &[0u8; 12]).unwrap_err();
        assert!(matches!(err, DisplayError::BadParams(_)));
    }

    #[test]
    fn test_crop_origin_offsets_tiles() {
        let list = ParamList::new().with_ints("origin", &[2, 1]).with_ints("OriginalSize", &[4, 4]);
        let mut store = tile_store(2, 2, 1, list);
        store.write_tile(0..2, 0..2, 4, bytemuck::cast_slice(&[1.0f32, 2.0, 3.0, 4.0])).unwrap();

        assert_eq!(store.active_region(), Some(ActiveRegion { x_min: 2, x_max: 3, y_min: 1, y_max: 2 }));
        assert_eq!(store.query(QueryKind::Size),
                   QueryInfo::Size { width: 2, height: 2, aspect_ratio: 1.0 });
        let pixels = store.float_framebuffer().unwrap();
        assert_eq!(pixels[4 + 2], 1.0);
        assert_eq!(pixels[4 + 3], 2.0);
        assert_eq!(pixels[8 + 2], 3.0);
        assert_eq!(pixels[8 + 3], 4.0);
        assert_eq!(pixels[0], 0.0);
    }

    #[test]
    fn test_uint8_tiles_stored_but_not_presented_as_floats() {
        let mut store = tile_store(2, 1, 3, ParamList::new().with_string("format", "uint8"));
        store.write_tile(0..2, 0..1, 3, &[1, 2, 3, 4, 5, 6]).unwrap();

        assert_eq!(store.raw().as_bytes(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(store.float_framebuffer(), None);
    }

    #[test]
    fn test_wider_source_entries_are_truncated() {
        let mut store = tile_store(2, 1, 1, ParamList::new());
        let source = [1.0f32, 9.0, 2.0, 9.0];
        store.write_tile(0..2, 0..1, 8, bytemuck::cast_slice(&source)).unwrap();
        assert_eq!(store.float_framebuffer().unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn test_queries() {
        let store = tile_store(4, 4, 3, ParamList::new());
        assert_eq!(store.query(QueryKind::Overwrite),
                   QueryInfo::Overwrite { overwrite: true, interactive: true });
        assert_eq!(store.query(QueryKind::Redraw), QueryInfo::Redraw { redraw: true });
        assert_eq!(store.query(QueryKind::MultiResolution), QueryInfo::MultiResolution { supported: true });
    }

    #[test]
    fn test_denoised_frame_presented() {
        let mut store = denoising_store(4, 4, Box::new(CpuAccelerator::new()));
        let pixels = vec![0.5f32; 4 * 4 * 3];
        store.write_tile(0..4, 0..4, 12, bytemuck::cast_slice(&pixels)).unwrap();

        let presented = store.float_framebuffer().unwrap().to_vec();
        for value in presented {
            assert!((value - 0.5).abs() < 1e-5);
        }
        assert!(store.session().unwrap().is_ready());
    }

    #[test]
    fn test_unavailable_accelerator_degrades_to_raw() {
        let accelerator = CpuAccelerator::unavailable(ContextFailure::DriverTooOld);
        let mut store = denoising_store(4, 4, Box::new(accelerator));
        let pixels = pattern(4 * 4 * 3);
        store.write_tile(0..4, 0..4, 12, bytemuck::cast_slice(&pixels)).unwrap();

        assert_eq!(store.float_framebuffer().unwrap(), pixels.as_slice());
        assert!(store.session().unwrap().is_unavailable());
    }

    #[test]
    fn test_failed_denoise_shows_raw_then_recovers() {
        let cpu = Arc::new(Mutex::new(CpuAccelerator::new()));
        let mut store = denoising_store(4, 4, Box::new(Arc::clone(&cpu)));
        let pixels = pattern(4 * 4 * 3);
        store.write_tile(0..4, 0..4, 12, bytemuck::cast_slice(&pixels)).unwrap();
        let denoised = store.float_framebuffer().unwrap().to_vec();
        assert_ne!(denoised, pixels);

        cpu.lock().unwrap().fail_next(AcceleratorCall::Invoke);
        store.write_tile(0..4, 0..4, 12, bytemuck::cast_slice(&pixels)).unwrap();
        assert_eq!(store.float_framebuffer().unwrap(), pixels.as_slice());
        assert!(store.session().unwrap().last_error().contains("invoke"));

        store.write_tile(0..4, 0..4, 12, bytemuck::cast_slice(&pixels)).unwrap();
        assert_eq!(store.float_framebuffer().unwrap(), denoised.as_slice());
        assert_eq!(cpu.lock().unwrap().stats().denoisers_created, 1);
    }

    #[test]
    fn test_accumulation_resolved_on_notify_only() {
        let outputs = vec![RenderOutput::float("Ci", 3)];
        let source = AccumulationSource::new(2, 2, &outputs);
        let mut store = FrameStore::new(false, None);
        store.rebind(2, 2, outputs, source.clone()).unwrap();
        {
            let mut writer = source.write();
            for y in 0..2 {
                for x in 0..2 {
                    for c in 0..3 {
                        writer.add(x, y, 0, c, 4.0);
                    }
                    writer.add_weight(x, y, 2.0);
                }
            }
        }

        store.notify();
        assert!(store.is_ready());
        assert_eq!(store.float_framebuffer().unwrap(), &[2.0; 12]);
        assert!(!store.is_dirty());

        source.write().add(0, 0, 0, 0, 4.0);
        assert_eq!(store.float_framebuffer().unwrap()[0], 2.0);
        store.notify();
        assert_eq!(store.float_framebuffer().unwrap()[0], 4.0);
    }

    #[test]
    fn test_rebind_rejects_mixed_outputs_before_binding() {
        let outputs = vec![RenderOutput::float("Ci", 3), RenderOutput::uint("id", 1)];
        let source = AccumulationSource::new(2, 2, &outputs);
        let mut store = FrameStore::new(false, None);

        assert!(matches!(store.rebind(2, 2, outputs, source), Err(DisplayError::Configuration(_))));
        assert!(store.raw().is_empty());
    }

    #[test]
    fn test_rebind_rejects_layout_wider_than_surface() {
        let source = AccumulationSource::new(2, 2, &[RenderOutput::float("Ci", 3)]);
        let mut store = FrameStore::new(false, None);
        let err = store.rebind(2, 2, vec![RenderOutput::float("Ci", 4)], source).unwrap_err();
        assert!(matches!(err, DisplayError::BadParams(_)));
        assert!(store.raw().is_empty());

        let outputs = vec![RenderOutput::float("Ci", 3), RenderOutput::float("a", 1)];
        let source = AccumulationSource::new(2, 2, &outputs);
        let wider = vec![RenderOutput::float("Ci", 3), RenderOutput::float("a", 3)];
        assert!(matches!(store.rebind(2, 2, wider, source.clone()), Err(DisplayError::BadParams(_))));
        assert!(store.raw().is_empty());

        store.rebind(2, 2, outputs, source).unwrap();
        assert_eq!(store.channels(), 4);
    }

    #[test]
    fn test_tile_range_overflow_rejected() {
        let list = ParamList::new().with_ints("origin", &[1, 0]).with_ints("OriginalSize", &[4, 4]);
        let mut store = tile_store(2, 2, 1, list);

        let err = store.write_tile(usize::MAX - 1..usize::MAX, 0..1, 4, &[0u8; 4]).unwrap_err();
        assert!(matches!(err, DisplayError::BadParams(_)));
        let err = store.write_tile(0..2, 0..1, usize::MAX, &[0u8; 4]).unwrap_err();
        assert!(matches!(err, DisplayError::BadParams(_)));
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_failed_denoise_retried_on_next_read() {
        let cpu = Arc::new(Mutex::new(CpuAccelerator::new()));
        let mut store = denoising_store(4, 4, Box::new(Arc::clone(&cpu)));
        let pixels = pattern(4 * 4 * 3);
        cpu.lock().unwrap().fail_next(AcceleratorCall::Invoke);
        store.write_tile(0..4, 0..4, 12, bytemuck::cast_slice(&pixels)).unwrap();

        assert_eq!(store.float_framebuffer().unwrap(), pixels.as_slice());
        assert_ne!(store.float_framebuffer().unwrap(), pixels.as_slice());
        assert_eq!(cpu.lock().unwrap().stats().invocations, 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let cpu = Arc::new(Mutex::new(CpuAccelerator::new()));
        let mut store = denoising_store(2, 2, Box::new(Arc::clone(&cpu)));
        store.write_tile(0..2, 0..2, 12, bytemuck::cast_slice(&[0.5f32; 12])).unwrap();
        store.float_framebuffer().unwrap();

        store.close();
        store.close();
        assert_eq!(store.float_framebuffer(), None);
        assert_eq!(cpu.lock().unwrap().live_allocations(), 0);

        let mut never_bound = FrameStore::new(false, None);
        never_bound.close();
    }
}
