//! Encoding crops to image files and data URLs.

use crate::compositor::{RenderOptions, crop};
use crate::viewport::CropViewport;
use crate::{CropError, CropResult};
use base64::{Engine, engine::general_purpose::STANDARD};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, RgbImage, RgbaImage};
use peniko::Color;

/// Output image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Png,
    Jpeg,
    /// Lossless; quality is ignored.
    WebP,
}

impl ExportFormat {
    /// Get MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Png => "image/png",
            ExportFormat::Jpeg => "image/jpeg",
            ExportFormat::WebP => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpg",
            ExportFormat::WebP => "webp",
        }
    }

    /// Detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(ExportFormat::Png),
            "jpg" | "jpeg" => Some(ExportFormat::Jpeg),
            "webp" => Some(ExportFormat::WebP),
            _ => None,
        }
    }

    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime {
            "image/png" => Some(ExportFormat::Png),
            "image/jpeg" => Some(ExportFormat::Jpeg),
            "image/webp" => Some(ExportFormat::WebP),
            _ => None,
        }
    }

    /// Whether transparent pixels survive encoding.
    pub fn has_alpha(&self) -> bool {
        !matches!(self, ExportFormat::Jpeg)
    }
}

/// Encode `image`. `quality` (`0..=1`) applies to JPEG only; JPEG has no
/// alpha, so the image is composited over `background` first.
pub fn encode(
    image: &RgbaImage,
    format: ExportFormat,
    quality: f32,
    background: Color,
) -> CropResult<Vec<u8>> {
    let (width, height) = image.dimensions();
    let mut data = Vec::new();
    match format {
        ExportFormat::Png => {
            let mut encoder = png::Encoder::new(&mut data, width, height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().map_err(|e| encode_error(format, e))?;
            writer
                .write_image_data(image.as_raw())
                .map_err(|e| encode_error(format, e))?;
            writer.finish().map_err(|e| encode_error(format, e))?;
        }
        ExportFormat::Jpeg => {
            let flat = flatten(image, background);
            JpegEncoder::new_with_quality(&mut data, jpeg_quality(quality))
                .encode(flat.as_raw(), width, height, ExtendedColorType::Rgb8)
                .map_err(|e| encode_error(format, e))?;
        }
        ExportFormat::WebP => {
            WebPEncoder::new_lossless(&mut data)
                .encode(image.as_raw(), width, height, ExtendedColorType::Rgba8)
                .map_err(|e| encode_error(format, e))?;
        }
    }
    log::debug!("Encoded {}x{} {} ({} bytes)", width, height, format.mime_type(), data.len());
    Ok(data)
}

fn encode_error(format: ExportFormat, e: impl std::fmt::Display) -> CropError {
    CropError::Encode {
        format: format.mime_type(),
        message: e.to_string(),
    }
}

/// Map `0..=1` to the encoder's `1..=100`.
fn jpeg_quality(quality: f32) -> u8 {
    let quality = if quality.is_finite() { quality } else { 0.92 };
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Composite over an opaque background.
fn flatten(image: &RgbaImage, background: Color) -> RgbImage {
    let bg = background.to_rgba8();
    let bg = [bg.r, bg.g, bg.b];
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let p = image.get_pixel(x, y);
        let a = u32::from(p[3]);
        let mix = |c: u8, b: u8| ((u32::from(c) * a + u32::from(b) * (255 - a) + 127) / 255) as u8;
        image::Rgb([mix(p[0], bg[0]), mix(p[1], bg[1]), mix(p[2], bg[2])])
    })
}

/// `data:<mime>;base64,<payload>`.
pub fn to_data_url(bytes: &[u8], format: ExportFormat) -> String {
    format!("data:{};base64,{}", format.mime_type(), STANDARD.encode(bytes))
}

/// Encode a rendered crop with the options' format, quality and background.
pub fn export(image: &RgbaImage, options: &RenderOptions) -> CropResult<Vec<u8>> {
    encode(image, options.format, options.quality, options.background)
}

/// Crop what `viewport` shows of `source` straight to a data URL. `None`
/// while the viewport is not ready.
pub fn crop_to_data_url(
    source: &RgbaImage,
    viewport: &CropViewport,
    options: &RenderOptions,
) -> CropResult<Option<String>> {
    let Some(image) = crop(source, viewport, options) else {
        return Ok(None);
    };
    let bytes = export(&image, options)?;
    Ok(Some(to_data_url(&bytes, options.format)))
}

/// Decode a PNG, JPEG or WebP file into RGBA.
pub fn decode(bytes: &[u8]) -> CropResult<RgbaImage> {
    image::load_from_memory(bytes)
        .map(|decoded| decoded.to_rgba8())
        .map_err(|e| CropError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn sample() -> RgbaImage {
        RgbaImage::from_fn(6, 4, |x, y| {
            Rgba([(x * 40) as u8, (y * 60) as u8, 90, if x == 0 { 0 } else { 255 }])
        })
    }

    #[test]
    fn test_png_keeps_pixels() {
        let image = sample();
        let bytes = encode(&image, ExportFormat::Png, 0.92, Color::WHITE).unwrap();
        assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
        assert_eq!(decode(&bytes).unwrap(), image);
    }

    #[test]
    fn test_webp_is_lossless() {
        let image = RgbaImage::from_fn(6, 4, |x, y| Rgba([(x * 40) as u8, (y * 60) as u8, 90, 255]));
        let bytes = encode(&image, ExportFormat::WebP, 0.1, Color::WHITE).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WEBP");
        assert_eq!(decode(&bytes).unwrap(), image);
    }

    #[test]
    fn test_jpeg_flattens_transparency() {
        let image = RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 0]));
        let background = Color::from_rgba8(255, 255, 255, 255);
        let bytes = encode(&image, ExportFormat::Jpeg, 0.92, background).unwrap();
        assert!(bytes.starts_with(&[0xFF, 0xD8, 0xFF]));

        let decoded = decode(&bytes).unwrap();
        let pixel = decoded.get_pixel(8, 8);
        assert!(pixel[0] > 245 && pixel[1] > 245 && pixel[2] > 245);
        assert_eq!(pixel[3], 255);
    }

    #[test]
    fn test_jpeg_quality_mapping() {
        assert_eq!(jpeg_quality(0.92), 92);
        assert_eq!(jpeg_quality(0.0), 1);
        assert_eq!(jpeg_quality(7.0), 100);
        assert_eq!(jpeg_quality(f32::NAN), 92);
    }

    #[test]
    fn test_data_url() {
        assert_eq!(to_data_url(b"abc", ExportFormat::Png), "data:image/png;base64,YWJj");
        assert!(to_data_url(&[1, 2], ExportFormat::Jpeg).starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_format_lookup() {
        assert_eq!(ExportFormat::from_extension("JPEG"), Some(ExportFormat::Jpeg));
        assert_eq!(ExportFormat::from_mime_type("image/webp"), Some(ExportFormat::WebP));
        assert_eq!(ExportFormat::from_extension("gif"), None);
        assert!(!ExportFormat::Jpeg.has_alpha());
    }

    #[test]
    fn test_crop_to_data_url() {
        use kurbo::Size;

        let source = RgbaImage::from_pixel(40, 40, Rgba([200, 10, 10, 255]));
        let viewport = CropViewport::new(
            Size::new(20.0, 20.0),
            Size::new(40.0, 40.0),
            Size::new(20.0, 20.0),
        );
        let mut options = RenderOptions::for_viewport(&viewport);
        options.circular = true;

        let url = crop_to_data_url(&source, &viewport, &options).unwrap().unwrap();
        let payload = url.strip_prefix("data:image/png;base64,").unwrap();
        let decoded = decode(&STANDARD.decode(payload).unwrap()).unwrap();
        assert_eq!(decoded.dimensions(), (20, 20));
        assert_eq!(decoded.get_pixel(0, 0)[3], 0);
        assert_eq!(*decoded.get_pixel(10, 10), Rgba([200, 10, 10, 255]));

        let unloaded = CropViewport::new(Size::new(20.0, 20.0), Size::ZERO, Size::ZERO);
        assert_eq!(crop_to_data_url(&source, &unloaded, &options).unwrap(), None);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(decode(b"not an image"), Err(CropError::Decode(_))));
    }
}
