//! Command line cropper.
//!
//! Positions an image in a square (or given) window the way the crop dialog
//! does, then writes what the window shows.

use clap::Parser;
use kurbo::{Size, Vec2};
use peniko::Color;
use quire_crop::{CropError, CropResult, CropViewport, ExportFormat, RenderOptions};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "quire-crop")]
#[command(about = "Crop an image the way the avatar dialog does", long_about = None)]
struct Cli {
    /// Input PNG, JPEG or WebP file
    input: PathBuf,

    /// Output file; prints a data URL when omitted
    output: Option<PathBuf>,

    /// Window size in display pixels, WIDTHxHEIGHT
    #[arg(long, default_value = "300x300", value_parser = parse_size)]
    window: Size,

    /// Zoom slider, 0 to 100
    #[arg(long, default_value = "0")]
    zoom: f64,

    /// Horizontal pan in display pixels
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pan_x: f64,

    /// Vertical pan in display pixels
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pan_y: f64,

    /// Output size, WIDTHxHEIGHT (defaults to the window size)
    #[arg(long, value_parser = parse_size)]
    size: Option<Size>,

    /// Device pixel ratio of the working buffer
    #[arg(long, default_value = "1.0")]
    pixel_ratio: f64,

    /// Extra working resolution multiplier
    #[arg(long, default_value = "1.0")]
    supersample: f64,

    /// Clip to a circle
    #[arg(long)]
    circle: bool,

    /// png, jpeg or webp (defaults to the output extension, then png)
    #[arg(long)]
    format: Option<String>,

    /// JPEG quality, 0 to 1
    #[arg(long, default_value = "0.92")]
    quality: f32,

    /// Background behind transparent pixels for JPEG, #rrggbb
    #[arg(long, default_value = "#ffffff", value_parser = parse_color)]
    background: Color,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        log::error!("Crop failed: {}", e);
        eprintln!("quire-crop: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> CropResult<()> {
    let format = resolve_format(cli.format.as_deref(), cli.output.as_deref())?;
    log::info!("Cropping {}", cli.input.display());

    let source = quire_crop::decode(&std::fs::read(&cli.input)?)?;
    let natural = Size::new(f64::from(source.width()), f64::from(source.height()));

    let mut viewport = CropViewport::fit_width(cli.window, natural);
    viewport.set_slider(cli.zoom);
    viewport.set_pan(Vec2::new(cli.pan_x, cli.pan_y));
    log::debug!("Viewport: {:?}", viewport);

    let mut options = RenderOptions::for_viewport(&viewport);
    if let Some(size) = cli.size {
        options.output = size;
    }
    options.pixel_ratio = cli.pixel_ratio;
    options.supersample = cli.supersample;
    options.circular = cli.circle;
    options.format = format;
    options.quality = cli.quality;
    options.background = cli.background;

    let image = quire_crop::crop(&source, &viewport, &options).ok_or(CropError::NotReady)?;
    let bytes = quire_crop::export(&image, &options)?;

    match cli.output {
        Some(path) => {
            std::fs::write(&path, &bytes)?;
            log::info!(
                "Wrote {}x{} {} to {}",
                image.width(),
                image.height(),
                format.mime_type(),
                path.display()
            );
        }
        None => println!("{}", quire_crop::to_data_url(&bytes, format)),
    }
    Ok(())
}

fn resolve_format(flag: Option<&str>, output: Option<&Path>) -> CropResult<ExportFormat> {
    if let Some(name) = flag {
        return ExportFormat::from_extension(name)
            .ok_or_else(|| CropError::UnsupportedFormat(name.to_string()));
    }
    let ext = output
        .and_then(|path| path.extension())
        .and_then(|ext| ext.to_str());
    match ext {
        Some(ext) => {
            ExportFormat::from_extension(ext).ok_or_else(|| CropError::UnsupportedFormat(ext.to_string()))
        }
        None => Ok(ExportFormat::Png),
    }
}

fn parse_size(s: &str) -> Result<Size, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let w: f64 = w.trim().parse().map_err(|_| format!("bad width in {s:?}"))?;
    let h: f64 = h.trim().parse().map_err(|_| format!("bad height in {s:?}"))?;
    if w > 0.0 && h > 0.0 {
        Ok(Size::new(w, h))
    } else {
        Err(format!("size must be positive, got {s:?}"))
    }
}

/// Parse `#rrggbb`.
fn parse_color(s: &str) -> Result<Color, String> {
    let s = s.trim();
    let hex = s
        .strip_prefix('#')
        .filter(|hex| hex.len() == 6 && hex.is_ascii())
        .ok_or_else(|| format!("expected #rrggbb, got {s:?}"))?;
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| e.to_string());
    Ok(Color::from_rgba8(channel(0)?, channel(2)?, channel(4)?, 255))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("320x240"), Ok(Size::new(320.0, 240.0)));
        assert!(parse_size("320").is_err());
        assert!(parse_size("0x10").is_err());
    }

    #[test]
    fn test_parse_color() {
        let color = parse_color("#102030").unwrap();
        let rgba = color.to_rgba8();
        assert_eq!((rgba.r, rgba.g, rgba.b, rgba.a), (0x10, 0x20, 0x30, 255));
        assert!(parse_color("102030").is_err());
        assert!(parse_color("#12345").is_err());
    }

    #[test]
    fn test_format_from_flag_or_extension() {
        assert_eq!(resolve_format(Some("webp"), None).unwrap(), ExportFormat::WebP);
        assert_eq!(
            resolve_format(None, Some(Path::new("out/avatar.JPG"))).unwrap(),
            ExportFormat::Jpeg
        );
        assert_eq!(resolve_format(None, None).unwrap(), ExportFormat::Png);
        assert!(resolve_format(None, Some(Path::new("a.gif"))).is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "quire-crop",
            "in.png",
            "out.jpg",
            "--zoom",
            "40",
            "--pan-x",
            "-12",
            "--circle",
        ])
        .unwrap();
        assert_eq!(cli.window, Size::new(300.0, 300.0));
        assert_eq!(cli.pan_x, -12.0);
        assert!(cli.circle);
        assert!(cli.size.is_none());
    }
}
