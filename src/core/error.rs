// Copyright @yucwang 2026

use crate::denoise::accelerator::{CallFailure, ContextFailure};

use std::fmt::{self, Display, Formatter};

/// Configuration that can never work; rejected before any resource is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    EmptyLayout,
    ZeroElements { output: String },
    UnsupportedElementType { output: String, data_type: String },
    MismatchedElementType { output: String },
    UnsupportedChannelCount(usize),
    NormalsWithoutAlbedo,
    BufferSizeMismatch { buffer: &'static str, expected: usize, actual: usize },
    EmptyFrame,
}

impl Display for ConfigurationError {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::EmptyLayout => fmt.write_str("No render outputs configured"),
            ConfigurationError::ZeroElements { output } => {
                write!(fmt, "Render output {} has no elements", output)
            }
            ConfigurationError::UnsupportedElementType { output, data_type } => write!(
                fmt,
                "Unsupported datatype {} for render output {}. Supported types are Int, Float",
                data_type, output
            ),
            ConfigurationError::MismatchedElementType { output } => write!(
                fmt,
                "Mismatching datatype between render output {} and previous render output",
                output
            ),
            ConfigurationError::UnsupportedChannelCount(count) => {
                write!(fmt, "Unsupported channel count {}, must be 3 or 4", count)
            }
            ConfigurationError::NormalsWithoutAlbedo => {
                fmt.write_str("Cannot use normals without albedo")
            }
            ConfigurationError::BufferSizeMismatch { buffer, expected, actual } => write!(
                fmt,
                "{} buffer holds {} values, expected {}",
                buffer, actual, expected
            ),
            ConfigurationError::EmptyFrame => fmt.write_str("Frame has zero width or height"),
        }
    }
}

/// Host or device memory could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationFailure {
    pub what: &'static str,
    pub bytes: usize,
    pub detail: String,
}

impl Display for AllocationFailure {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "Failed allocating {} bytes for {}", self.bytes, self.what)?;
        if !self.detail.is_empty() {
            write!(fmt, ": {}", self.detail)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayError {
    Configuration(ConfigurationError),
    /// Fatal for the denoising path of a session only.
    AcceleratorUnavailable(ContextFailure),
    Allocation(AllocationFailure),
    AcceleratorCall(CallFailure),
    BadParams(String),
    Unsupported(&'static str),
    UnknownSurface,
}

impl DisplayError {
    /// Whether the failing operation may succeed on a later frame.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DisplayError::Allocation(_) | DisplayError::AcceleratorCall(_))
    }
}

impl Display for DisplayError {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DisplayError::Configuration(err) => Display::fmt(err, fmt),
            DisplayError::AcceleratorUnavailable(err) => Display::fmt(err, fmt),
            DisplayError::Allocation(err) => Display::fmt(err, fmt),
            DisplayError::AcceleratorCall(err) => Display::fmt(err, fmt),
            DisplayError::BadParams(message) => write!(fmt, "Bad parameters: {}", message),
            DisplayError::Unsupported(what) => write!(fmt, "Unsupported: {}", what),
            DisplayError::UnknownSurface => fmt.write_str("Unknown display surface"),
        }
    }
}

impl std::error::Error for DisplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DisplayError::AcceleratorUnavailable(err) => Some(err),
            DisplayError::AcceleratorCall(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigurationError> for DisplayError {
    fn from(err: ConfigurationError) -> Self {
        DisplayError::Configuration(err)
    }
}

impl From<AllocationFailure> for DisplayError {
    fn from(err: AllocationFailure) -> Self {
        DisplayError::Allocation(err)
    }
}

impl From<CallFailure> for DisplayError {
    fn from(err: CallFailure) -> Self {
        DisplayError::AcceleratorCall(err)
    }
}

impl From<ContextFailure> for DisplayError {
    fn from(err: ContextFailure) -> Self {
        DisplayError::AcceleratorUnavailable(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denoise::accelerator::AcceleratorCall;

    #[test]
    fn test_retry_policy_follows_taxonomy() {
        assert!(!DisplayError::from(ConfigurationError::NormalsWithoutAlbedo).is_retryable());
        assert!(!DisplayError::from(ContextFailure::NoDevice).is_retryable());
        assert!(DisplayError::from(CallFailure::new(AcceleratorCall::Invoke, "boom")).is_retryable());
        let failure = AllocationFailure { what: "scratch", bytes: 16, detail: String::new() };
        assert!(DisplayError::from(failure).is_retryable());
    }

    #[test]
    fn test_allocation_message_mentions_size() {
        let failure = AllocationFailure { what: "output image", bytes: 64, detail: String::from("oom") };
        assert_eq!(failure.to_string(), "Failed allocating 64 bytes for output image: oom");
    }
}
