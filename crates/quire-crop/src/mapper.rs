//! Inverse of the display transform: which part of the source image is
//! under the viewport.

use crate::viewport::CropViewport;
use kurbo::{Point, Rect, Size};

/// The rectangle of the source image, in natural pixels, visible through
/// the container. `None` until the container and image have sizes.
///
/// The result always lies inside the image, even if the pan was not
/// clamped beforehand.
pub fn compute_source_rect(viewport: &CropViewport) -> Option<Rect> {
    if !viewport.is_ready() {
        return None;
    }
    let natural = viewport.natural;
    let sx = natural.width / viewport.base.width;
    let sy = natural.height / viewport.base.height;
    let s = viewport.zoom_scale();
    let pan = viewport.pan();

    let size = Size::new(
        viewport.container.width * sx / s,
        viewport.container.height * sy / s,
    );
    let center = Point::new(
        natural.width / 2.0 - pan.x * sx / s,
        natural.height / 2.0 - pan.y * sy / s,
    );

    let clamp = |start: f64, extent: f64, limit: f64| start.min(limit - extent).max(0.0);
    let origin = Point::new(
        clamp(center.x - size.width / 2.0, size.width, natural.width),
        clamp(center.y - size.height / 2.0, size.height, natural.height),
    );
    Some(Rect::from_origin_size(origin, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Vec2;

    fn scenario() -> CropViewport {
        CropViewport::new(
            Size::new(300.0, 300.0),
            Size::new(1200.0, 1200.0),
            Size::new(300.0, 300.0),
        )
    }

    #[test]
    fn test_full_image_at_slider_zero() {
        let rect = compute_source_rect(&scenario()).unwrap();
        assert_eq!(rect, Rect::new(0.0, 0.0, 1200.0, 1200.0));
    }

    #[test]
    fn test_centered_half_window_at_slider_hundred() {
        let mut viewport = scenario();
        viewport.set_slider(100.0);
        let rect = compute_source_rect(&viewport).unwrap();
        assert_eq!(rect, Rect::from_origin_size((300.0, 300.0), (600.0, 600.0)));
    }

    #[test]
    fn test_pan_moves_window_opposite() {
        let mut viewport = scenario();
        viewport.set_slider(100.0);
        viewport.set_pan(Vec2::new(150.0, -60.0));
        let rect = compute_source_rect(&viewport).unwrap();
        // 150 display px right at 2x zoom is 300 natural px left.
        assert_eq!(rect.origin(), Point::new(0.0, 420.0));
        assert_eq!(rect.size(), Size::new(600.0, 600.0));
    }

    #[test]
    fn test_not_ready() {
        let empty = CropViewport::new(Size::ZERO, Size::new(10.0, 10.0), Size::new(10.0, 10.0));
        assert!(compute_source_rect(&empty).is_none());

        let unloaded = CropViewport::new(Size::new(300.0, 300.0), Size::ZERO, Size::ZERO);
        assert!(compute_source_rect(&unloaded).is_none());
    }

    #[test]
    fn test_window_larger_than_image_stays_at_origin() {
        // A container wider than the displayed image maps past the edges.
        let viewport = CropViewport::new(
            Size::new(400.0, 300.0),
            Size::new(300.0, 300.0),
            Size::new(300.0, 300.0),
        );
        let rect = compute_source_rect(&viewport).unwrap();
        assert_eq!(rect.x0, 0.0);
        assert_eq!(rect.width(), 400.0);
    }
}
