// Copyright @yucwang 2021

pub mod accumulation;
pub mod error;
pub mod frame_store;
pub mod params;
pub mod render_output;
pub mod resolver;
pub mod surface_table;
