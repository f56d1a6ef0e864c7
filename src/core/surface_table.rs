// Copyright @yucwang 2026

use crate::core::accumulation::AccumulationSource;
use crate::core::error::DisplayError;
use crate::core::frame_store::{ActiveRegion, FrameStore, QueryInfo, QueryKind};
use crate::core::params::{reorder_channels, OpenParams, ParamList, DENOISE_PARAM};
use crate::core::render_output::RenderOutput;
use crate::denoise::accelerator::Accelerator;
use crate::math::constants::Float;

use slab::Slab;

use std::ops::Range;

/// Produces one accelerator backend per denoising surface.
pub type AcceleratorFactory = Box<dyn FnMut() -> Box<dyn Accelerator> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(usize);

impl SurfaceHandle {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> usize {
        self.0
    }
}

/// Result of a tile-protocol open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedSurface {
    pub handle: SurfaceHandle,
    /// Indices into the offered channel names, in the order tiles must
    /// deliver them.
    pub channel_order: Vec<usize>,
}

/// Pixels of the surface the presentation side draws.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresentedFrame<'a> {
    pub pixels: &'a [Float],
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

/// Every live display surface, in creation order.
///
/// The protocol side addresses surfaces by [`SurfaceHandle`], the
/// presentation side by their position in creation order.
pub struct SurfaceTable {
    surfaces: Slab<FrameStore>,
    order: Vec<usize>,
    accelerators: Option<AcceleratorFactory>,
}

impl Default for SurfaceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceTable {
    /// Table without an accelerator; surfaces asking for denoising show
    /// their raw pixels.
    pub fn new() -> Self {
        Self { surfaces: Slab::new(), order: Vec::new(), accelerators: None }
    }

    pub fn with_accelerator<F>(factory: F) -> Self
        where F: FnMut() -> Box<dyn Accelerator> + Send + 'static {
        Self { accelerators: Some(Box::new(factory)), ..Self::new() }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn accelerator_for(&mut self, denoise: bool) -> Option<Box<dyn Accelerator>> {
        if !denoise {
            return None;
        }
        match self.accelerators.as_mut() {
            Some(factory) => Some(factory()),
            None => {
                log::warn!("denoising requested but no accelerator is configured");
                None
            }
        }
    }

    fn insert(&mut self, store: FrameStore) -> SurfaceHandle {
        let key = self.surfaces.insert(store);
        self.order.push(key);
        SurfaceHandle(key)
    }

    fn store(&self, handle: SurfaceHandle) -> Result<&FrameStore, DisplayError> {
        self.surfaces.get(handle.0).ok_or(DisplayError::UnknownSurface)
    }

    fn store_mut(&mut self, handle: SurfaceHandle) -> Result<&mut FrameStore, DisplayError> {
        self.surfaces.get_mut(handle.0).ok_or(DisplayError::UnknownSurface)
    }

    pub fn surface(&self, handle: SurfaceHandle) -> Option<&FrameStore> {
        self.surfaces.get(handle.0)
    }

    /// Tile protocol: open a surface of `width` x `height` pixels carrying
    /// the named channels.
    pub fn open<S: AsRef<str>>(&mut self,
                               width: usize,
                               height: usize,
                               channel_names: &[S],
                               params: &ParamList) -> Result<OpenedSurface, DisplayError> {
        let open = OpenParams::from_param_list(width, height, channel_names.len(), params)?;
        let channel_order = reorder_channels(channel_names);
        let accelerator = self.accelerator_for(open.denoise);
        let store = FrameStore::open(&open, accelerator)?;
        let handle = self.insert(store);
        log::info!("opened display surface {:?} for a {}x{} crop", handle, width, height);
        Ok(OpenedSurface { handle, channel_order })
    }

    pub fn write_tile(&mut self,
                      handle: SurfaceHandle,
                      x: Range<usize>,
                      y: Range<usize>,
                      entry_size: usize,
                      data: &[u8]) -> Result<(), DisplayError> {
        self.store_mut(handle)?.write_tile(x, y, entry_size, data)
    }

    pub fn query(&self, handle: SurfaceHandle, kind: QueryKind) -> Result<QueryInfo, DisplayError> {
        Ok(self.store(handle)?.query(kind))
    }

    /// Tile protocol: release the surface and forget it.
    pub fn close(&mut self, handle: SurfaceHandle) -> Result<(), DisplayError> {
        if !self.surfaces.contains(handle.0) {
            return Err(DisplayError::UnknownSurface);
        }
        let mut store = self.surfaces.remove(handle.0);
        self.order.retain(|&key| key != handle.0);
        store.close();
        log::info!("closed display surface {:?}", handle);
        Ok(())
    }

    /// Accumulation protocol: register a display before its first bind.
    pub fn register_display(&mut self, params: &ParamList) -> Result<SurfaceHandle, DisplayError> {
        let denoise = params.find_int(DENOISE_PARAM)?.unwrap_or(0) != 0;
        let accelerator = self.accelerator_for(denoise);
        Ok(self.insert(FrameStore::new(denoise, accelerator)))
    }

    pub fn rebind(&mut self,
                  handle: SurfaceHandle,
                  width: usize,
                  height: usize,
                  outputs: Vec<RenderOutput>,
                  source: AccumulationSource) -> Result<(), DisplayError> {
        self.store_mut(handle)?.rebind(width, height, outputs, source)
    }

    pub fn notify(&mut self, handle: SurfaceHandle) -> Result<(), DisplayError> {
        self.store_mut(handle)?.notify();
        Ok(())
    }

    /// Accumulation protocol: release buffers but keep the registration
    /// so the display can be bound again.
    pub fn close_display(&mut self, handle: SurfaceHandle) -> Result<(), DisplayError> {
        self.store_mut(handle)?.close();
        Ok(())
    }

    /// Drop every surface.
    pub fn clear(&mut self) {
        for (_, store) in self.surfaces.iter_mut() {
            store.close();
        }
        self.surfaces.clear();
        self.order.clear();
    }

    fn store_at(&self, index: usize) -> Option<&FrameStore> {
        self.order.get(index).and_then(|&key| self.surfaces.get(key))
    }

    fn store_at_mut(&mut self, index: usize) -> Option<&mut FrameStore> {
        let key = *self.order.get(index)?;
        self.surfaces.get_mut(key)
    }

    pub fn channel_count(&self, index: usize) -> Option<usize> {
        self.store_at(index).map(|store| store.channels())
    }

    pub fn float_framebuffer(&mut self, index: usize) -> Option<&[Float]> {
        self.store_at_mut(index)?.float_framebuffer()
    }

    pub fn active_region(&self, index: usize) -> Option<ActiveRegion> {
        self.store_at(index)?.active_region()
    }

    /// Only the first surface is ever presented.
    pub fn presentation_surface(&mut self) -> Option<PresentedFrame<'_>> {
        let store = self.store_at_mut(0)?;
        let (width, height, channels) = (store.width(), store.height(), store.channels());
        let pixels = store.float_framebuffer()?;
        Some(PresentedFrame { pixels, width, height, channels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denoise::cpu::CpuAccelerator;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn pattern(len: usize) -> Vec<Float> {
        (0..len).map(|i| (i % 7) as Float * 0.5).collect()
    }

    #[test]
    fn test_tile_frame_presented_unchanged() {
        let mut table = SurfaceTable::new();
        let opened = table.open(4, 4, &["r", "g", "b"], &ParamList::new()).unwrap();
        let pixels = pattern(4 * 4 * 3);

        table.write_tile(opened.handle, 0..4, 0..4, 12, bytemuck::cast_slice(&pixels)).unwrap();

        assert_eq!(table.channel_count(0), Some(3));
        assert_eq!(table.float_framebuffer(0).unwrap(), pixels.as_slice());
        assert_eq!(table.active_region(0), None);
        let frame = table.presentation_surface().unwrap();
        assert_eq!((frame.width, frame.height, frame.channels), (4, 4, 3));
    }

    #[test]
    fn test_open_reports_channel_order() {
        let mut table = SurfaceTable::new();
        let opened = table.open(2, 2, &["a", "b", "g", "r"], &ParamList::new()).unwrap();
        assert_eq!(opened.channel_order, vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_indices_follow_creation_order() {
        let mut table = SurfaceTable::new();
        let first = table.open(2, 2, &["r", "g", "b"], &ParamList::new()).unwrap().handle;
        table.open(3, 3, &["r", "g", "b", "a"], &ParamList::new()).unwrap();

        assert_eq!(table.channel_count(1), Some(4));
        table.close(first).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.channel_count(0), Some(4));
        assert_eq!(table.channel_count(1), None);
    }

    #[test]
    fn test_unknown_handle_rejected() {
        let mut table = SurfaceTable::new();
        let handle = table.open(2, 2, &["r", "g", "b"], &ParamList::new()).unwrap().handle;
        table.close(handle).unwrap();

        assert_eq!(table.close(handle), Err(DisplayError::UnknownSurface));
        assert_eq!(table.query(handle, QueryKind::Redraw), Err(DisplayError::UnknownSurface));
        assert!(table.write_tile(handle, 0..1, 0..1, 12, &[0u8; 12]).is_err());
        assert!(table.presentation_surface().is_none());
    }

    #[test]
    fn test_accumulation_display_denoised_on_read() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let mut table = SurfaceTable::with_accelerator(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::new(CpuAccelerator::new()) as Box<dyn Accelerator>
        });
        let handle = table.register_display(&ParamList::new().with_int(DENOISE_PARAM, 1)).unwrap();

        let outputs = vec![RenderOutput::float("Ci", 3)];
        let source = AccumulationSource::new(4, 4, &outputs);
        table.rebind(handle, 4, 4, outputs, source.clone()).unwrap();
        {
            let mut writer = source.write();
            for y in 0..4 {
                for x in 0..4 {
                    for c in 0..3 {
                        writer.add(x, y, 0, c, 0.9);
                    }
                    writer.add_weight(x, y, 3.0);
                }
            }
        }
        table.notify(handle).unwrap();

        let frame = table.presentation_surface().unwrap();
        assert_eq!(frame.pixels.len(), 48);
        for value in frame.pixels {
            assert!((value - 0.3).abs() < 1e-5);
        }
        assert!(table.surface(handle).unwrap().session().unwrap().is_ready());
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_denoise_without_accelerator_shows_raw() {
        let mut table = SurfaceTable::new();
        let list = ParamList::new().with_int(DENOISE_PARAM, 1);
        let opened = table.open(2, 2, &["r", "g", "b"], &list).unwrap();
        let pixels = pattern(2 * 2 * 3);
        table.write_tile(opened.handle, 0..2, 0..2, 12, bytemuck::cast_slice(&pixels)).unwrap();

        assert_eq!(table.float_framebuffer(0).unwrap(), pixels.as_slice());
    }

    #[test]
    fn test_closed_display_stays_registered() {
        let mut table = SurfaceTable::new();
        let handle = table.register_display(&ParamList::new()).unwrap();
        let outputs = vec![RenderOutput::float("Ci", 3)];
        table.rebind(handle, 2, 2, outputs.clone(), AccumulationSource::new(2, 2, &outputs)).unwrap();

        table.close_display(handle).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.float_framebuffer(0), None);

        table.rebind(handle, 2, 2, outputs.clone(), AccumulationSource::new(2, 2, &outputs)).unwrap();
        table.clear();
        assert!(table.is_empty());
    }
}
