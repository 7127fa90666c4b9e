//! Crop viewport state and the pan gesture that drives it.

use kurbo::{Point, Size, Vec2};

/// `buttons` bit of the primary pointer button.
pub const PRIMARY_BUTTON: u16 = 1;

/// What the user sees: an image displayed at `base` size, scaled by the
/// slider around the container centre and translated by `pan`.
///
/// All lengths except `natural` are display pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropViewport {
    pan: Vec2,
    slider: f64,
    /// Visible window.
    pub container: Size,
    /// Pixel size of the source image.
    pub natural: Size,
    /// Displayed size of the image before zoom.
    pub base: Size,
}

impl CropViewport {
    pub fn new(container: Size, natural: Size, base: Size) -> Self {
        Self {
            pan: Vec2::ZERO,
            slider: 0.0,
            container,
            natural,
            base,
        }
    }

    /// An image shown at the container's width, keeping its aspect ratio.
    pub fn fit_width(container: Size, natural: Size) -> Self {
        let base = if natural.width > 0.0 {
            Size::new(
                container.width,
                natural.height * container.width / natural.width,
            )
        } else {
            Size::ZERO
        };
        Self::new(container, natural, base)
    }

    pub fn pan(&self) -> Vec2 {
        self.pan
    }

    pub fn slider(&self) -> f64 {
        self.slider
    }

    /// `1 + slider / 100`, in `[1, 2]`.
    pub fn zoom_scale(&self) -> f64 {
        1.0 + self.slider / 100.0
    }

    /// Whether both the container and the image have a size.
    pub fn is_ready(&self) -> bool {
        [self.container, self.natural, self.base]
            .iter()
            .all(|size| size.width > 0.0 && size.height > 0.0)
    }

    /// Largest pan per axis that keeps the scaled image covering the
    /// container.
    pub fn pan_limits(&self) -> Vec2 {
        let s = self.zoom_scale();
        Vec2::new(
            ((self.base.width * s - self.container.width) / 2.0).max(0.0),
            ((self.base.height * s - self.container.height) / 2.0).max(0.0),
        )
    }

    /// Clamp `pan` into the limits; an axis without room locks to 0.
    pub fn clamp_pan(&self, pan: Vec2) -> Vec2 {
        let limits = self.pan_limits();
        let clamp = |value: f64, max: f64| {
            if max == 0.0 {
                0.0
            } else {
                value.clamp(-max, max)
            }
        };
        Vec2::new(clamp(pan.x, limits.x), clamp(pan.y, limits.y))
    }

    pub fn set_pan(&mut self, pan: Vec2) {
        self.pan = self.clamp_pan(pan);
    }

    /// Set the zoom slider (clamped to `0..=100`) and re-clamp the pan.
    pub fn set_slider(&mut self, slider: f64) {
        self.slider = if slider.is_finite() {
            slider.clamp(0.0, 100.0)
        } else {
            0.0
        };
        self.pan = self.clamp_pan(self.pan);
    }

    /// Back to the initial state, e.g. after choosing another image.
    pub fn reset(&mut self) {
        self.pan = Vec2::ZERO;
        self.slider = 0.0;
    }
}

/// Tracks a drag of the primary pointer button.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanGesture {
    /// Pointer position minus the pan at drag start.
    drag_start: Option<Vec2>,
}

impl PanGesture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dragging(&self) -> bool {
        self.drag_start.is_some()
    }

    pub fn pointer_down(&mut self, viewport: &CropViewport, position: Point) {
        self.drag_start = Some(position.to_vec2() - viewport.pan());
    }

    /// Pan to follow the pointer. Ignored unless a drag is active and only
    /// the primary button is held. Returns whether the pan changed.
    pub fn pointer_move(&mut self, viewport: &mut CropViewport, position: Point, buttons: u16) -> bool {
        let Some(start) = self.drag_start else {
            return false;
        };
        if buttons != PRIMARY_BUTTON {
            return false;
        }
        let before = viewport.pan();
        viewport.set_pan(position.to_vec2() - start);
        viewport.pan() != before
    }

    /// Pointer released or left the viewport.
    pub fn pointer_up(&mut self) {
        self.drag_start = None;
    }
}
