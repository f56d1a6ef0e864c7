// Copyright @yucwang 2021

pub mod core;
pub mod denoise;
pub mod math;

#[cfg(feature = "python")]
pub mod python;

pub use crate::core::error::DisplayError;
pub use crate::core::surface_table::SurfaceTable;
