// Copyright 2020 TwoCookingMice

use dacquoise_display::core::accumulation::AccumulationSource;
use dacquoise_display::core::error::DisplayError;
use dacquoise_display::core::params::{ParamList, DENOISE_PARAM};
use dacquoise_display::core::render_output::RenderOutput;
use dacquoise_display::core::surface_table::SurfaceTable;
use dacquoise_display::denoise::{Accelerator, CpuAccelerator};
use dacquoise_display::math::constants::{Float, Int, Vector3f};

use exr::prelude::write_rgb_file;
use indicatif::{ProgressBar, ProgressStyle};

use std::env;

struct LcgRng {
    state: u64,
}

impl LcgRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_f32(&mut self) -> Float {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        ((self.state >> 32) as u32 as Float) / (u32::MAX as Float)
    }
}

struct Options {
    out_prefix: String,
    width: usize,
    height: usize,
    iterations: usize,
    denoise: bool,
}

/// Noise-free radiance of the synthetic scene: a lit disc over a gradient.
fn radiance(u: Float, v: Float) -> Vector3f {
    let background = Vector3f::new(0.2 + 0.6 * u, 0.3, 0.2 + 0.6 * (1.0 - v));
    let (dx, dy) = (u - 0.5, v - 0.5);
    if dx * dx + dy * dy < 0.09 {
        Vector3f::new(1.5, 1.2, 0.4)
    } else {
        background
    }
}

/// One noisy sample per pixel per iteration, then a refresh of the
/// presented surface the way a viewport redraw would ask for it.
fn render(options: &Options) -> Result<(Vec<Float>, Vec<Float>), DisplayError> {
    let mut table = if options.denoise {
        SurfaceTable::with_accelerator(|| Box::new(CpuAccelerator::new()) as Box<dyn Accelerator>)
    } else {
        SurfaceTable::new()
    };
    let params = ParamList::new().with_int(DENOISE_PARAM, options.denoise as Int);
    let handle = table.register_display(&params)?;

    let (width, height) = (options.width, options.height);
    let outputs = vec![RenderOutput::float("Ci", 3), RenderOutput::float("a", 1)];
    let source = AccumulationSource::new(width, height, &outputs);
    table.rebind(handle, width, height, outputs, source.clone())?;

    let progress = ProgressBar::new(options.iterations as u64);
    progress.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} iterations")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut rng = LcgRng::new(0x5eed);
    for _ in 0..options.iterations {
        {
            let mut writer = source.write();
            for y in 0..height {
                for x in 0..width {
                    let u = (x as Float + rng.next_f32()) / width as Float;
                    let v = (y as Float + rng.next_f32()) / height as Float;
                    let noise = 2.0 * rng.next_f32();
                    let sample = radiance(u, v) * noise;
                    for c in 0..3 {
                        writer.add(x, y, 0, c, sample[c]);
                    }
                    writer.add(x, y, 1, 0, 1.0);
                    writer.add_weight(x, y, 1.0);
                }
            }
        }
        table.notify(handle)?;
        table.presentation_surface();
        progress.inc(1);
    }
    progress.finish();

    let presented = table.float_framebuffer(0).map(|pixels| pixels.to_vec()).unwrap_or_default();
    let resolved = table
        .surface(handle)
        .and_then(|store| store.raw().as_floats())
        .map(|pixels| pixels.to_vec())
        .unwrap_or_default();
    Ok((resolved, presented))
}

fn write_exr(pixels: &[Float], width: usize, height: usize, channels: usize, path: &str) {
    if pixels.len() < width * height * channels {
        log::error!("not writing {}: frame holds {} values", path, pixels.len());
        return;
    }
    log::info!("Writing {}.", path);
    let result = write_rgb_file(path, width, height, |x, y| {
        let base = (x + width * y) * channels;
        (pixels[base], pixels[base + 1], pixels[base + 2])
    });
    if let Err(err) = result {
        log::error!("EXR write failed for {}: {}", path, err);
    }
}

fn main() {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <out_prefix> [--size W H] [--iterations N] [--no-denoise]", args[0]);
        std::process::exit(1);
    }

    let mut options = Options {
        out_prefix: args[1].clone(),
        width: 256,
        height: 256,
        iterations: 16,
        denoise: true,
    };
    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--size" => {
                options.width = args.get(i + 1).and_then(|v| v.parse().ok()).unwrap_or(options.width);
                options.height = args.get(i + 2).and_then(|v| v.parse().ok()).unwrap_or(options.height);
                i += 2;
            }
            "--iterations" => {
                i += 1;
                options.iterations = args.get(i).and_then(|v| v.parse().ok()).unwrap_or(options.iterations);
            }
            "--no-denoise" => options.denoise = false,
            other => log::warn!("ignoring unknown argument {}", other),
        }
        i += 1;
    }

    let (resolved, presented) = match render(&options) {
        Ok(frames) => frames,
        Err(err) => {
            log::error!("{}", err);
            std::process::exit(1);
        }
    };

    let (width, height) = (options.width, options.height);
    write_exr(&resolved, width, height, 4, &format!("{}_resolved.exr", options.out_prefix));
    if options.denoise {
        write_exr(&presented, width, height, 4, &format!("{}_denoised.exr", options.out_prefix));
    }
}
