// Copyright @yucwang 2026

use crate::core::error::ConfigurationError;
use crate::math::constants::ELEMENT_BYTES;

use std::fmt::{self, Display, Formatter};

/// Element type the renderer declares for a render output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Float,
    /// Ids and indices. Never averaged.
    UInt,
    Int,
    Half,
    Other,
}

impl Display for DataType {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Float => "float",
            DataType::UInt => "uint",
            DataType::Int => "int",
            DataType::Half => "half",
            DataType::Other => "other",
        };
        fmt.write_str(name)
    }
}

/// One named channel group produced by the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
    pub name: String,
    pub data_type: DataType,
    pub elements: usize,
}

impl RenderOutput {
    pub fn new(name: &str, data_type: DataType, elements: usize) -> Self {
        Self { name: name.to_string(), data_type, elements }
    }

    pub fn float(name: &str, elements: usize) -> Self {
        Self::new(name, DataType::Float, elements)
    }

    pub fn uint(name: &str, elements: usize) -> Self {
        Self::new(name, DataType::UInt, elements)
    }
}

/// Validated set of render outputs packed into one display pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLayout {
    outputs: Vec<RenderOutput>,
    data_type: DataType,
    channels: usize,
    color_index: Option<usize>,
    alpha_index: Option<usize>,
}

impl ChannelLayout {
    pub fn new(outputs: Vec<RenderOutput>) -> Result<Self, ConfigurationError> {
        let first = outputs.first().ok_or(ConfigurationError::EmptyLayout)?;
        let data_type = first.data_type;

        let mut channels = 0;
        let mut color_index = None;
        let mut alpha_index = None;
        for (i, output) in outputs.iter().enumerate() {
            match output.data_type {
                DataType::Float | DataType::UInt => {}
                other => {
                    return Err(ConfigurationError::UnsupportedElementType {
                        output: output.name.clone(),
                        data_type: other.to_string(),
                    })
                }
            }
            if output.data_type != data_type {
                return Err(ConfigurationError::MismatchedElementType { output: output.name.clone() });
            }
            if output.elements == 0 {
                return Err(ConfigurationError::ZeroElements { output: output.name.clone() });
            }
            match output.name.as_str() {
                "Ci" => color_index = Some(i),
                "a" => alpha_index = Some(i),
                _ => {}
            }
            channels += output.elements;
        }

        Ok(Self { outputs, data_type, channels, color_index, alpha_index })
    }

    pub fn outputs(&self) -> &[RenderOutput] {
        &self.outputs
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Bytes per packed display pixel.
    pub fn entry_size(&self) -> usize {
        self.channels * ELEMENT_BYTES
    }

    pub fn color_index(&self) -> Option<usize> {
        self.color_index
    }

    pub fn alpha_index(&self) -> Option<usize> {
        self.alpha_index
    }
}
