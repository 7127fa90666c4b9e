//! Rendering a source rectangle to an output raster.
//!
//! Sampling works in premultiplied floats so averaging never bleeds
//! colour out of transparent pixels. Each axis is resampled independently:
//! an area average when shrinking, bilinear interpolation when enlarging.

use crate::export::ExportFormat;
use crate::mapper::compute_source_rect;
use crate::viewport::CropViewport;
use image::RgbaImage;
use kurbo::{Rect, Size};
use peniko::Color;

/// How to render a crop.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    /// Final size in pixels; each side is rounded and at least 1.
    pub output: Size,
    /// Device pixel ratio of the working buffer.
    pub pixel_ratio: f64,
    /// Extra working resolution multiplier; values below 1 count as 1.
    pub supersample: f64,
    /// Clip to the largest centred circle.
    pub circular: bool,
    pub format: ExportFormat,
    /// JPEG quality in `0..=1`.
    pub quality: f32,
    /// Fill behind transparent pixels for formats without alpha.
    pub background: Color,
}

impl RenderOptions {
    /// Defaults for a crop of `viewport`: output at container size.
    pub fn for_viewport(viewport: &CropViewport) -> Self {
        Self::with_output(viewport.container)
    }

    pub fn with_output(output: Size) -> Self {
        Self {
            output,
            pixel_ratio: 1.0,
            supersample: 1.0,
            circular: false,
            format: ExportFormat::Png,
            quality: 0.92,
            background: Color::WHITE,
        }
    }

    pub fn output_size(&self) -> (u32, u32) {
        (
            round_dimension(self.output.width),
            round_dimension(self.output.height),
        )
    }

    /// Working buffer size: output scaled by pixel ratio and supersampling.
    pub fn working_size(&self) -> (u32, u32) {
        let scale = self.render_scale();
        (
            round_dimension(self.output.width.round().max(1.0) * scale),
            round_dimension(self.output.height.round().max(1.0) * scale),
        )
    }

    fn render_scale(&self) -> f64 {
        let ratio = if self.pixel_ratio.is_finite() && self.pixel_ratio > 0.0 {
            self.pixel_ratio
        } else {
            1.0
        };
        ratio * self.supersample.max(1.0)
    }
}

fn round_dimension(value: f64) -> u32 {
    if value.is_finite() {
        value.round().clamp(1.0, u32::MAX as f64) as u32
    } else {
        1
    }
}

/// Crop what `viewport` shows of `source`. `None` while the viewport is not
/// ready. `source` must be the image whose natural size the viewport holds.
pub fn crop(source: &RgbaImage, viewport: &CropViewport, options: &RenderOptions) -> Option<RgbaImage> {
    let rect = compute_source_rect(viewport)?;
    render_crop(source, rect, options)
}

/// Render `rect` (in source pixels) of `source` at the options' output size.
pub fn render_crop(source: &RgbaImage, rect: Rect, options: &RenderOptions) -> Option<RgbaImage> {
    if source.width() == 0 || source.height() == 0 || rect.width() <= 0.0 || rect.height() <= 0.0
    {
        return None;
    }
    let (work_w, work_h) = options.working_size();
    let (out_w, out_h) = options.output_size();

    let src = Buffer::from_image(source);
    let mut working = src.resample(rect, work_w, work_h);
    if options.circular {
        working.apply_circle_mask();
    }
    let result = if (work_w, work_h) != (out_w, out_h) {
        let full = Rect::new(0.0, 0.0, f64::from(work_w), f64::from(work_h));
        working.resample(full, out_w, out_h)
    } else {
        working
    };
    Some(result.into_image())
}

/// Premultiplied RGBA in `0..=1`.
struct Buffer {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 4]>,
}

/// Source contributions to one destination pixel along an axis.
type Taps = Vec<(u32, f32)>;

impl Buffer {
    fn from_image(image: &RgbaImage) -> Self {
        let pixels = image
            .pixels()
            .map(|p| {
                let a = f32::from(p[3]) / 255.0;
                [
                    f32::from(p[0]) / 255.0 * a,
                    f32::from(p[1]) / 255.0 * a,
                    f32::from(p[2]) / 255.0 * a,
                    a,
                ]
            })
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            pixels,
        }
    }

    fn pixel(&self, x: u32, y: u32) -> [f32; 4] {
        self.pixels[(y as usize) * (self.width as usize) + x as usize]
    }

    fn resample(&self, rect: Rect, width: u32, height: u32) -> Buffer {
        let columns = axis_taps(rect.x0, rect.width(), self.width, width);
        let rows = axis_taps(rect.y0, rect.height(), self.height, height);

        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for row in &rows {
            for column in &columns {
                let mut acc = [0.0f32; 4];
                for &(y, wy) in row {
                    for &(x, wx) in column {
                        let p = self.pixel(x, y);
                        let w = wx * wy;
                        for (a, c) in acc.iter_mut().zip(p) {
                            *a += c * w;
                        }
                    }
                }
                pixels.push(acc);
            }
        }
        Buffer {
            width,
            height,
            pixels,
        }
    }

    /// Anti-aliased circle of diameter `min(width, height)`, centred.
    fn apply_circle_mask(&mut self) {
        let cx = f64::from(self.width) / 2.0;
        let cy = f64::from(self.height) / 2.0;
        let radius = cx.min(cy);
        let width = self.width as usize;
        for (i, pixel) in self.pixels.iter_mut().enumerate() {
            let x = (i % width) as f64 + 0.5;
            let y = (i / width) as f64 + 0.5;
            let distance = ((x - cx).powi(2) + (y - cy).powi(2)).sqrt();
            let coverage = (radius - distance + 0.5).clamp(0.0, 1.0) as f32;
            for channel in pixel.iter_mut() {
                *channel *= coverage;
            }
        }
    }

    fn into_image(self) -> RgbaImage {
        let mut raw = Vec::with_capacity(self.pixels.len() * 4);
        for [r, g, b, a] in self.pixels {
            let a = a.clamp(0.0, 1.0);
            let unpremultiply = |c: f32| {
                if a > 0.0 {
                    to_byte(c / a)
                } else {
                    0
                }
            };
            raw.extend([unpremultiply(r), unpremultiply(g), unpremultiply(b), to_byte(a)]);
        }
        RgbaImage::from_raw(self.width, self.height, raw)
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }
}

fn to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Per destination index, the weighted source indices covering
/// `[start, start + span)` split into `dst_len` equal parts.
///
/// Only `[0, src_len)` holds image data. Coverage outside it contributes
/// nothing, so parts of the window beyond the image come out transparent.
fn axis_taps(start: f64, span: f64, src_len: u32, dst_len: u32) -> Vec<Taps> {
    let step = span / f64::from(dst_len);
    let end = f64::from(src_len);
    let last = src_len.saturating_sub(1);

    (0..dst_len)
        .map(|i| {
            let a = start + f64::from(i) * step;
            if step >= 1.0 {
                let b = (a + step).min(end);
                let mut taps = Taps::new();
                let mut px = a.max(0.0).floor();
                while px < b {
                    let overlap = b.min(px + 1.0) - a.max(px);
                    if overlap > 0.0 {
                        taps.push((px as u32, (overlap / step) as f32));
                    }
                    px += 1.0;
                }
                taps
            } else {
                let center = a + step / 2.0;
                if !(0.0..end).contains(&center) {
                    return Taps::new();
                }
                // Between pixel centres; the outermost half pixel repeats its edge.
                let p = center - 0.5;
                let p0 = p.floor();
                let t = (p - p0) as f32;
                let index = |i: f64| (i.max(0.0) as u32).min(last);
                vec![(index(p0), 1.0 - t), (index(p0 + 1.0), t)]
            }
        })
        .collect()
}
