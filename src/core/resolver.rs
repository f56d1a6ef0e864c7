// Copyright @yucwang 2026

use crate::core::accumulation::AccumulationSource;
use crate::core::error::{AllocationFailure, ConfigurationError, DisplayError};
use crate::core::render_output::{ChannelLayout, DataType};
use crate::math::bitmap::Bitmap;
use crate::math::constants::Float;

/// Turns running sample sums into averaged display pixels.
pub struct SampleResolver;

impl SampleResolver {
    /// Resolve the whole surface into `dest`, packing every output's elements
    /// contiguously per pixel in declaration order.
    ///
    /// Float elements are divided by the pixel's sample weight; uint
    /// elements are ids and are copied bit for bit. The source is only read,
    /// so resolving an unchanged surface twice gives identical bytes.
    pub fn resolve(source: &AccumulationSource,
                   layout: &ChannelLayout,
                   dest: &mut Bitmap) -> Result<(), DisplayError> {
        let (width, height) = (source.width(), source.height());
        source.check_layout(layout.outputs())?;

        dest.ensure(width, height, layout.entry_size()).map_err(|err| AllocationFailure {
            what: "resolved framebuffer",
            bytes: width * height * layout.entry_size(),
            detail: err.to_string(),
        })?;
        let resolved_bytes = dest.len();
        let words = dest.words_mut().ok_or(ConfigurationError::BufferSizeMismatch {
            buffer: "resolved framebuffer",
            expected: width * height * layout.entry_size(),
            actual: resolved_bytes,
        })?;

        let surface = source.read();
        let mut out = 0;
        for pixel in 0..width * height {
            let weight = surface.weight(pixel);
            debug_assert!(weight > 0.0, "pixel {} resolved before any sample landed", pixel);
            let rcp = if weight > 0.0 { 1.0 / weight } else { 1.0 };

            for (index, output) in layout.outputs().iter().enumerate() {
                for element in 0..output.elements {
                    let raw = surface.word(index, element, pixel);
                    words[out] = match output.data_type {
                        DataType::UInt => raw,
                        _ => (Float::from_bits(raw) * rcp).to_bits(),
                    };
                    out += 1;
                }
            }
        }
        Ok(())
    }
}
