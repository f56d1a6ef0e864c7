// Copyright @yucwang 2026

use crate::core::error::DisplayError;
use crate::math::constants::{Float, Int};

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    Ints(Vec<Int>),
    Floats(Vec<Float>),
}

/// Named parameters handed over by the image protocol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamList {
    entries: Vec<(String, ParamValue)>,
}

impl ParamList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_string(mut self, name: &str, value: &str) -> Self {
        self.entries.push((name.to_string(), ParamValue::String(value.to_string())));
        self
    }

    pub fn with_ints(mut self, name: &str, values: &[Int]) -> Self {
        self.entries.push((name.to_string(), ParamValue::Ints(values.to_vec())));
        self
    }

    pub fn with_int(self, name: &str, value: Int) -> Self {
        self.with_ints(name, &[value])
    }

    /// Place an open inside a larger image. Missing values keep the
    /// whole-image defaults.
    pub fn with_crop_window(mut self, origin: Option<(Int, Int)>, original_size: Option<(Int, Int)>) -> Self {
        if let Some((x, y)) = origin {
            self = self.with_ints("origin", &[x, y]);
        }
        if let Some((width, height)) = original_size {
            self = self.with_ints("OriginalSize", &[width, height]);
        }
        self
    }

    pub fn with_floats(mut self, name: &str, values: &[Float]) -> Self {
        self.entries.push((name.to_string(), ParamValue::Floats(values.to_vec())));
        self
    }

    fn find(&self, name: &str) -> Option<&ParamValue> {
        self.entries.iter().rev().find(|(key, _)| key == name).map(|(_, value)| value)
    }

    pub fn find_string(&self, name: &str) -> Option<&str> {
        match self.find(name) {
            Some(ParamValue::String(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    /// First `count` ints of `name`. A parameter with fewer values is an error.
    pub fn find_ints(&self, name: &str, count: usize) -> Result<Option<&[Int]>, DisplayError> {
        match self.find(name) {
            Some(ParamValue::Ints(values)) if values.len() >= count => Ok(Some(&values[..count])),
            Some(ParamValue::Ints(values)) => Err(DisplayError::BadParams(format!(
                "{} needs {} ints, got {}",
                name,
                count,
                values.len()
            ))),
            _ => Ok(None),
        }
    }

    pub fn find_int(&self, name: &str) -> Result<Option<Int>, DisplayError> {
        Ok(self.find_ints(name, 1)?.map(|values| values[0]))
    }
}

/// Storage format of one sample in a tile framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Float32,
    UInt16,
    UInt8,
}

impl SampleFormat {
    /// Unknown names fall back to float.
    pub fn from_name(name: &str) -> Self {
        match name {
            "uint8" => SampleFormat::UInt8,
            "uint16" => SampleFormat::UInt16,
            "float32" => SampleFormat::Float32,
            other => {
                log::warn!("unknown sample format {}, using float32", other);
                SampleFormat::Float32
            }
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Float32 => 4,
            SampleFormat::UInt16 => 2,
            SampleFormat::UInt8 => 1,
        }
    }
}

impl Default for SampleFormat {
    fn default() -> Self {
        SampleFormat::Float32
    }
}

pub const DENOISE_PARAM: &str = "use_denoiser";

/// Everything a tile-protocol open needs to size a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenParams {
    /// Full image size.
    pub width: usize,
    pub height: usize,
    /// Origin of the region the renderer writes, in full-image pixels.
    pub crop_origin: (usize, usize),
    /// Size of the region the renderer writes.
    pub crop_size: (usize, usize),
    pub channels: usize,
    pub format: SampleFormat,
    pub denoise: bool,
}

fn non_negative(name: &str, value: Int) -> Result<usize, DisplayError> {
    if value < 0 {
        return Err(DisplayError::BadParams(format!("{} must not be negative, got {}", name, value)));
    }
    Ok(value as usize)
}

impl OpenParams {
    /// `width` and `height` are the size of the region being rendered;
    /// `OriginalSize` and `origin` place it in the full image.
    pub fn from_param_list(width: usize,
                           height: usize,
                           channels: usize,
                           params: &ParamList) -> Result<Self, DisplayError> {
        let format = params
            .find_string("format")
            .map(SampleFormat::from_name)
            .unwrap_or_default();

        let crop_origin = match params.find_ints("origin", 2)? {
            Some(origin) => (non_negative("origin", origin[0])?, non_negative("origin", origin[1])?),
            None => (0, 0),
        };
        let (full_width, full_height) = match params.find_ints("OriginalSize", 2)? {
            Some(size) => (non_negative("OriginalSize", size[0])?, non_negative("OriginalSize", size[1])?),
            None => (0, 0),
        };
        let full_width = if full_width == 0 { width } else { full_width };
        let full_height = if full_height == 0 { height } else { full_height };

        if crop_origin.0 + width > full_width || crop_origin.1 + height > full_height {
            return Err(DisplayError::BadParams(format!(
                "crop {}x{} at ({}, {}) does not fit the {}x{} image",
                width, height, crop_origin.0, crop_origin.1, full_width, full_height
            )));
        }

        let denoise = params.find_int(DENOISE_PARAM)?.unwrap_or(0) != 0;
        Ok(Self {
            width: full_width,
            height: full_height,
            crop_origin,
            crop_size: (width, height),
            channels,
            format,
            denoise,
        })
    }

    pub fn entry_size(&self) -> usize {
        self.channels * self.format.bytes_per_sample()
    }
}

/// Whether `name` is `<prefix>.NNN` with exactly three digits.
fn is_numbered(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('.'))
        .map(|digits| digits.len() == 3 && digits.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

fn is_single(name: &str, channel: char) -> bool {
    let mut chars = name.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if c.eq_ignore_ascii_case(&channel))
}

/// `r`, `R` or `Ci.NNN.r`.
fn is_color_component(name: &str, component: char) -> bool {
    if is_single(name, component) {
        return true;
    }
    match name.rsplit_once('.') {
        Some((stem, last)) => last.len() == 1 && last.starts_with(component) && is_numbered(stem, "Ci"),
        None => false,
    }
}

/// `a`, `A` or `a.NNN`.
fn is_plain_channel(name: &str, channel: char) -> bool {
    is_single(name, channel) || is_numbered(name, &channel.to_string())
}

const LEADING_CHANNELS: [(char, bool); 5] = [('r', true), ('g', true), ('b', true), ('a', false), ('z', false)];

/// Order in which incoming channels are stored: the first channel matching
/// each of r, g, b, a and z, then every other channel in its given order.
pub fn reorder_channels<S: AsRef<str>>(names: &[S]) -> Vec<usize> {
    let mut order: Vec<usize> = Vec::with_capacity(names.len());
    for &(channel, color) in LEADING_CHANNELS.iter() {
        let found = names.iter().map(AsRef::<str>::as_ref).enumerate().position(|(i, name)| {
            let matched = if color {
                is_color_component(name, channel)
            } else {
                is_plain_channel(name, channel)
            };
            matched && !order.contains(&i)
        });
        if let Some(i) = found {
            order.push(i);
        }
    }
    for i in 0..names.len() {
        if !order.contains(&i) {
            order.push(i);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_params() {
        let params = OpenParams::from_param_list(8, 6, 4, &ParamList::new()).unwrap();
        assert_eq!((params.width, params.height), (8, 6));
        assert_eq!(params.crop_origin, (0, 0));
        assert_eq!(params.crop_size, (8, 6));
        assert_eq!(params.format, SampleFormat::Float32);
        assert_eq!(params.entry_size(), 16);
        assert!(!params.denoise);
    }

    #[test]
    fn test_crop_inside_original_size() {
        let list = ParamList::new()
            .with_ints("origin", &[2, 1])
            .with_ints("OriginalSize", &[10, 10])
            .with_string("format", "uint8")
            .with_int(DENOISE_PARAM, 1);
        let params = OpenParams::from_param_list(4, 3, 3, &list).unwrap();

        assert_eq!((params.width, params.height), (10, 10));
        assert_eq!(params.crop_origin, (2, 1));
        assert_eq!(params.crop_size, (4, 3));
        assert_eq!(params.entry_size(), 3);
        assert!(params.denoise);
    }

    #[test]
    fn test_crop_window_builder() {
        let list = ParamList::new().with_crop_window(Some((2, 1)), Some((10, 10)));
        let params = OpenParams::from_param_list(4, 3, 3, &list).unwrap();
        assert_eq!((params.width, params.height), (10, 10));
        assert_eq!(params.crop_origin, (2, 1));

        let list = ParamList::new().with_crop_window(None, None);
        let params = OpenParams::from_param_list(4, 3, 3, &list).unwrap();
        assert_eq!((params.width, params.height), (4, 3));
        assert_eq!(params.crop_origin, (0, 0));
    }

    #[test]
    fn test_crop_outside_image_rejected() {
        let list = ParamList::new().with_ints("origin", &[8, 0]).with_ints("OriginalSize", &[10, 10]);
        assert!(OpenParams::from_param_list(4, 4, 3, &list).is_err());
    }

    #[test]
    fn test_short_int_param_rejected() {
        let list = ParamList::new().with_ints("origin", &[3]);
        let err = OpenParams::from_param_list(4, 4, 3, &list).unwrap_err();
        assert!(matches!(err, DisplayError::BadParams(_)));
    }

    #[test]
    fn test_unknown_format_falls_back_to_float() {
        assert_eq!(SampleFormat::from_name("half"), SampleFormat::Float32);
        assert_eq!(SampleFormat::from_name("uint16").bytes_per_sample(), 2);
    }

    #[test]
    fn test_reorder_puts_rgbaz_first() {
        let names = ["id", "z", "B", "a", "g", "Ci.000.r", "extra"];
        assert_eq!(reorder_channels(&names), vec![5, 4, 2, 3, 1, 0, 6]);
    }

    #[test]
    fn test_reorder_keeps_unmatched_order() {
        let names = ["u", "v", "w"];
        assert_eq!(reorder_channels(&names), vec![0, 1, 2]);
        assert_eq!(reorder_channels(&["a.001", "Ci.12.r"]), vec![0, 1]);
    }
}
