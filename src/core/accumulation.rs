// Copyright @yucwang 2026

use crate::core::error::DisplayError;
use crate::core::render_output::RenderOutput;
use crate::math::constants::{Float, UInt, ELEMENT_BYTES};

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Live sample surface shared with the renderer.
///
/// Every render output with `n` elements occupies `n` consecutive planes of
/// `width * height` four-byte words starting at its byte offset. A separate
/// plane holds the accumulated sample weight per pixel as floats. Float
/// outputs hold running sums, uint outputs hold the last id written.
#[derive(Debug, Clone)]
pub struct AccumulationSource {
    width: usize,
    height: usize,
    words: Arc<RwLock<Vec<u32>>>,
    plane_offsets: Vec<usize>,
    weight_offset: usize,
}

impl AccumulationSource {
    /// Lay `outputs` out back to back with the weight plane last.
    pub fn new(width: usize, height: usize, outputs: &[RenderOutput]) -> Self {
        let plane_bytes = width * height * ELEMENT_BYTES;
        let mut plane_offsets = Vec::with_capacity(outputs.len());
        let mut offset = 0;
        for output in outputs {
            plane_offsets.push(offset);
            offset += output.elements * plane_bytes;
        }
        let weight_offset = offset;
        let total_words = (weight_offset + plane_bytes) / ELEMENT_BYTES;

        Self {
            width,
            height,
            words: Arc::new(RwLock::new(vec![0u32; total_words])),
            plane_offsets,
            weight_offset,
        }
    }

    /// Wrap a surface laid out by the renderer itself.
    pub fn from_parts(width: usize,
                      height: usize,
                      words: Arc<RwLock<Vec<u32>>>,
                      plane_offsets: Vec<usize>,
                      weight_offset: usize,
                      outputs: &[RenderOutput]) -> Result<Self, DisplayError> {
        let surface_bytes = read_lock(&words).len() * ELEMENT_BYTES;
        let misaligned = plane_offsets
            .iter()
            .chain(std::iter::once(&weight_offset))
            .any(|offset| offset % ELEMENT_BYTES != 0);
        if misaligned {
            return Err(DisplayError::BadParams(String::from("plane offsets must be word aligned")));
        }
        check_planes(width * height * ELEMENT_BYTES, surface_bytes, &plane_offsets, weight_offset, outputs)?;

        Ok(Self { width, height, words, plane_offsets, weight_offset })
    }

    /// Check that `outputs` describes this surface: one plane group per
    /// output, each group and the weight plane inside the surface without
    /// running into one another.
    pub fn check_layout(&self, outputs: &[RenderOutput]) -> Result<(), DisplayError> {
        let surface_bytes = read_lock(&self.words).len() * ELEMENT_BYTES;
        check_planes(self.pixel_count() * ELEMENT_BYTES,
                     surface_bytes,
                     &self.plane_offsets,
                     self.weight_offset,
                     outputs)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn plane_offsets(&self) -> &[usize] {
        &self.plane_offsets
    }

    pub fn weight_offset(&self) -> usize {
        self.weight_offset
    }

    /// The shared words, for the renderer side.
    pub fn handle(&self) -> Arc<RwLock<Vec<u32>>> {
        Arc::clone(&self.words)
    }

    pub fn read(&self) -> SurfaceReader<'_> {
        SurfaceReader { source: self, words: read_lock(&self.words) }
    }

    pub fn write(&self) -> SurfaceWriter<'_> {
        let words = self.words.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        SurfaceWriter { source: self, words }
    }

    fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    fn element_word(&self, output: usize, element: usize, pixel: usize) -> usize {
        self.plane_offsets[output] / ELEMENT_BYTES + element * self.pixel_count() + pixel
    }

    fn weight_word(&self, pixel: usize) -> usize {
        self.weight_offset / ELEMENT_BYTES + pixel
    }
}

fn check_planes(plane_bytes: usize,
                surface_bytes: usize,
                plane_offsets: &[usize],
                weight_offset: usize,
                outputs: &[RenderOutput]) -> Result<(), DisplayError> {
    if plane_offsets.len() != outputs.len() {
        return Err(DisplayError::BadParams(format!(
            "{} render outputs for {} accumulated outputs",
            outputs.len(),
            plane_offsets.len()
        )));
    }

    let mut spans = Vec::with_capacity(outputs.len() + 1);
    for (output, &offset) in outputs.iter().zip(plane_offsets.iter()) {
        let end = output
            .elements
            .checked_mul(plane_bytes)
            .and_then(|bytes| bytes.checked_add(offset))
            .ok_or_else(|| DisplayError::BadParams(format!("render output {} is too large", output.name)))?;
        spans.push((offset, end, output.name.as_str()));
    }
    let weight_end = weight_offset
        .checked_add(plane_bytes)
        .ok_or_else(|| DisplayError::BadParams(String::from("weight plane is too large")))?;
    spans.push((weight_offset, weight_end, "weight"));
    spans.sort_by_key(|&(start, _, _)| start);

    for (index, &(_, end, name)) in spans.iter().enumerate() {
        let limit = spans.get(index + 1).map(|&(start, _, _)| start).unwrap_or(surface_bytes);
        if end > limit || end > surface_bytes {
            return Err(DisplayError::BadParams(format!(
                "{} planes end at byte {}, past the next plane or the {} byte surface",
                name, end, surface_bytes
            )));
        }
    }
    Ok(())
}

fn read_lock(words: &RwLock<Vec<u32>>) -> RwLockReadGuard<'_, Vec<u32>> {
    words.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Read access held for the duration of a resolve.
pub struct SurfaceReader<'a> {
    source: &'a AccumulationSource,
    words: RwLockReadGuard<'a, Vec<u32>>,
}

impl<'a> SurfaceReader<'a> {
    pub fn weight(&self, pixel: usize) -> Float {
        Float::from_bits(self.words[self.source.weight_word(pixel)])
    }

    /// Raw stored word of one element of one output.
    pub fn word(&self, output: usize, element: usize, pixel: usize) -> u32 {
        self.words[self.source.element_word(output, element, pixel)]
    }
}

/// Renderer-side write access.
pub struct SurfaceWriter<'a> {
    source: &'a AccumulationSource,
    words: RwLockWriteGuard<'a, Vec<u32>>,
}

impl<'a> SurfaceWriter<'a> {
    fn pixel(&self, x: usize, y: usize) -> usize {
        x + self.source.width * y
    }

    /// Add `value` to the running sum of a float output element.
    pub fn add(&mut self, x: usize, y: usize, output: usize, element: usize, value: Float) {
        let index = self.source.element_word(output, element, self.pixel(x, y));
        let sum = Float::from_bits(self.words[index]) + value;
        self.words[index] = sum.to_bits();
    }

    /// Overwrite an id element.
    pub fn store_id(&mut self, x: usize, y: usize, output: usize, element: usize, id: UInt) {
        let index = self.source.element_word(output, element, self.pixel(x, y));
        self.words[index] = id;
    }

    pub fn add_weight(&mut self, x: usize, y: usize, weight: Float) {
        let index = self.source.weight_word(self.pixel(x, y));
        let total = Float::from_bits(self.words[index]) + weight;
        self.words[index] = total.to_bits();
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|word| *word = 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planar_layout_offsets() {
        let outputs = [RenderOutput::float("Ci", 3), RenderOutput::float("a", 1)];
        let source = AccumulationSource::new(2, 2, &outputs);

        assert_eq!(source.plane_offsets(), &[0, 48]);
        assert_eq!(source.weight_offset(), 64);
        assert_eq!(source.handle().read().unwrap().len(), 20);
    }

    #[test]
    fn test_writer_accumulates_into_planes() {
        let source = AccumulationSource::new(2, 1, &[RenderOutput::float("Ci", 3)]);
        {
            let mut writer = source.write();
            writer.add(1, 0, 0, 2, 0.5);
            writer.add(1, 0, 0, 2, 0.25);
            writer.add_weight(1, 0, 2.0);
        }

        let reader = source.read();
        assert_eq!(Float::from_bits(reader.word(0, 2, 1)), 0.75);
        assert_eq!(reader.weight(1), 2.0);
        assert_eq!(reader.weight(0), 0.0);
    }

    #[test]
    fn test_layout_checked_against_planes() {
        let source = AccumulationSource::new(2, 2, &[RenderOutput::float("Ci", 3), RenderOutput::float("a", 1)]);

        assert!(source.check_layout(&[RenderOutput::float("Ci", 3), RenderOutput::float("a", 1)]).is_ok());
        assert!(source.check_layout(&[RenderOutput::float("Ci", 4), RenderOutput::float("a", 1)]).is_err());
        assert!(source.check_layout(&[RenderOutput::float("Ci", 3), RenderOutput::float("a", 3)]).is_err());
        assert!(source.check_layout(&[RenderOutput::float("Ci", 3)]).is_err());
    }

    #[test]
    fn test_from_parts_rejects_overlapping_weight_plane() {
        let outputs = [RenderOutput::float("Ci", 3)];
        let words = Arc::new(RwLock::new(vec![0u32; 16]));
        let err = AccumulationSource::from_parts(2, 2, words, vec![0], 32, &outputs).unwrap_err();
        assert!(matches!(err, DisplayError::BadParams(_)));
    }

    #[test]
    fn test_from_parts_rejects_short_surface() {
        let outputs = [RenderOutput::float("Ci", 3)];
        let words = Arc::new(RwLock::new(vec![0u32; 8]));
        let err = AccumulationSource::from_parts(2, 2, words, vec![0], 48, &outputs).unwrap_err();
        assert!(matches!(err, DisplayError::BadParams(_)));
    }
}
