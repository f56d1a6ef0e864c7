// Copyright @yucwang 2026

//! Presentation-side binding for a Python viewport.

use crate::core::error::DisplayError;
use crate::core::params::{ParamList, DENOISE_PARAM};
use crate::core::surface_table::{SurfaceHandle, SurfaceTable};
use crate::denoise::accelerator::Accelerator;
use crate::denoise::cpu::CpuAccelerator;
use crate::math::constants::{Float, Int};

use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;

fn to_py_err(err: DisplayError) -> PyErr {
    PyRuntimeError::new_err(err.to_string())
}

#[pyclass(name = "DisplayDriver")]
pub struct PyDisplayDriver {
    table: SurfaceTable,
}

#[pymethods]
impl PyDisplayDriver {
    /// `host_denoiser` backs denoising surfaces with the host-memory backend.
    #[new]
    fn new(host_denoiser: bool) -> Self {
        let table = if host_denoiser {
            SurfaceTable::with_accelerator(|| Box::new(CpuAccelerator::new()) as Box<dyn Accelerator>)
        } else {
            SurfaceTable::new()
        };
        Self { table }
    }

    /// `origin` and `original_size` place a crop window inside the full
    /// image; both default to the whole image.
    #[args(origin = "None", original_size = "None")]
    fn open(&mut self,
            width: usize,
            height: usize,
            channels: Vec<String>,
            format: &str,
            use_denoiser: bool,
            origin: Option<(Int, Int)>,
            original_size: Option<(Int, Int)>) -> PyResult<(usize, Vec<usize>)> {
        let params = ParamList::new()
            .with_string("format", format)
            .with_int(DENOISE_PARAM, use_denoiser as Int)
            .with_crop_window(origin, original_size);
        let opened = self.table.open(width, height, &channels, &params).map_err(to_py_err)?;
        Ok((opened.handle.raw(), opened.channel_order))
    }

    fn write_tile(&mut self,
                  handle: usize,
                  x_min: usize,
                  x_max_plus_one: usize,
                  y_min: usize,
                  y_max_plus_one: usize,
                  entry_size: usize,
                  data: &[u8]) -> PyResult<()> {
        self.table
            .write_tile(SurfaceHandle::from_raw(handle),
                        x_min..x_max_plus_one,
                        y_min..y_max_plus_one,
                        entry_size,
                        data)
            .map_err(to_py_err)
    }

    fn close(&mut self, handle: usize) -> PyResult<()> {
        self.table.close(SurfaceHandle::from_raw(handle)).map_err(to_py_err)
    }

    /// -1 when no surface lives at `index`.
    fn channel_count(&self, index: usize) -> i64 {
        self.table.channel_count(index).map(|count| count as i64).unwrap_or(-1)
    }

    fn float_framebuffer(&mut self, index: usize) -> Option<Vec<Float>> {
        self.table.float_framebuffer(index).map(|pixels| pixels.to_vec())
    }

    fn active_region(&self, index: usize) -> Option<(usize, usize, usize, usize)> {
        self.table
            .active_region(index)
            .map(|region| (region.x_min, region.x_max, region.y_min, region.y_max))
    }

    /// Pixels, width, height and channel count of the first surface.
    fn presentation_surface(&mut self) -> Option<(Vec<Float>, usize, usize, usize)> {
        self.table
            .presentation_surface()
            .map(|frame| (frame.pixels.to_vec(), frame.width, frame.height, frame.channels))
    }
}

#[pymodule]
fn dacquoise_display(_py: Python<'_>, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyDisplayDriver>()?;
    Ok(())
}
