use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use glam::Vec3;
use image::RgbaImage;

use crate::config::BloomSettings;
use crate::cpu::CpuSubstrate;
use crate::gpu::{GpuContext, GpuSubstrate};
use crate::pipeline::BloomPipeline;
use crate::shaders::builtin_programs;
use crate::substrate::{DrawRect, RenderSubstrate};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Software rendering, no GPU required
    Cpu,
    /// Headless wgpu device
    Gpu,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply bloom and tone mapping to an image
    Render {
        /// Source image (any format the image crate reads)
        #[arg(long)]
        input: PathBuf,

        /// Output PNG
        #[arg(long)]
        output: PathBuf,

        /// Linear scale applied to the source to push it into HDR
        #[arg(long, default_value_t = 4.0)]
        brightness: f32,

        /// Luma cutoff for the bloom (overrides --config)
        #[arg(long)]
        threshold: Option<f32>,

        /// Bloom strength (overrides --config)
        #[arg(long)]
        strength: Option<f32>,

        /// JSON settings file
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = Backend::Cpu)]
        backend: Backend,
    },
    /// Compile every built-in shader and report failures
    CheckShaders {
        #[arg(long, value_enum, default_value_t = Backend::Cpu)]
        backend: Backend,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Render { input, output, brightness, threshold, strength, config, backend } => {
            let mut settings = match config {
                Some(path) => BloomSettings::from_json_file(path)?,
                None => BloomSettings::default(),
            };
            if let Some(threshold) = threshold {
                settings.luma_threshold = threshold;
            }
            if let Some(strength) = strength {
                settings.bloom_strength = strength;
            }

            let source = image::open(&input)
                .with_context(|| format!("failed to load {}", input.display()))?
                .to_rgba8();
            println!(
                "Rendering {}x{} image on {:?} backend...",
                source.width(),
                source.height(),
                backend
            );

            let frame = match backend {
                Backend::Cpu => render_image(&mut CpuSubstrate::new(), &source, settings, brightness)?,
                Backend::Gpu => {
                    let mut substrate = GpuSubstrate::new(GpuContext::new_headless_blocking()?);
                    render_image(&mut substrate, &source, settings, brightness)?
                }
            };

            image::save_buffer(
                &output,
                frame.as_raw(),
                frame.width(),
                frame.height(),
                image::ColorType::Rgba8,
            )?;
            println!("Saved {}", output.display());
        }
        Commands::CheckShaders { backend } => match backend {
            Backend::Cpu => check_shaders(&mut CpuSubstrate::new())?,
            Backend::Gpu => check_shaders(&mut GpuSubstrate::new(GpuContext::new_headless_blocking()?))?,
        },
    }
    Ok(())
}

/// Copy `source` into an HDR scene scaled by `brightness`, post-process it,
/// and read back the display-ready frame.
pub fn render_image<S: RenderSubstrate>(
    substrate: &mut S,
    source: &RgbaImage,
    settings: BloomSettings,
    brightness: f32,
) -> Result<RgbaImage> {
    let mut pipeline = BloomPipeline::new(substrate, settings)?;
    let (width, height) = source.dimensions();

    let upload = substrate.allocate_image(width, height)?;
    substrate.write_pixels(upload, source)?;
    let scene = substrate.allocate_image(width, height)?;
    pipeline.draw_image(
        substrate,
        scene,
        upload,
        DrawRect::full(width, height),
        Vec3::splat(brightness),
    )?;

    let output = pipeline.post_process(substrate, scene)?;
    let frame = substrate.read_pixels(output)?;

    pipeline.release(substrate);
    substrate.release_image(scene);
    substrate.release_image(upload);
    Ok(frame)
}

fn check_shaders<S: RenderSubstrate>(substrate: &mut S) -> Result<()> {
    for program in builtin_programs() {
        substrate.compile_shader(&program)?;
        println!("ok  {}", program.label);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_render_image_black_stays_black() {
        let source = RgbaImage::from_pixel(12, 10, Rgba([0, 0, 0, 255]));
        let mut substrate = CpuSubstrate::new();
        let frame = render_image(&mut substrate, &source, BloomSettings::default(), 4.0).unwrap();
        assert_eq!(frame.dimensions(), (12, 10));
        assert!(frame.pixels().all(|p| p.0 == [0, 0, 0, 255]));
        assert_eq!(substrate.live_images(), 0);
    }

    #[test]
    fn test_cli_parses_render_flags() {
        let cli = Cli::try_parse_from([
            "bloom-compositor",
            "render",
            "--input",
            "in.png",
            "--output",
            "out.png",
            "--threshold",
            "1.5",
            "--backend",
            "gpu",
        ])
        .unwrap();
        match cli.command {
            Commands::Render { brightness, threshold, strength, backend, .. } => {
                assert_eq!(brightness, 4.0);
                assert_eq!(threshold, Some(1.5));
                assert_eq!(strength, None);
                assert_eq!(backend, Backend::Gpu);
            }
            Commands::CheckShaders { .. } => panic!("parsed the wrong subcommand"),
        }
    }

    #[test]
    fn test_check_shaders_on_cpu() {
        check_shaders(&mut CpuSubstrate::new()).unwrap();
    }
}
