//! Quire Crop
//!
//! Maps a panned and zoomed image viewport back to a rectangle of the
//! source image, and renders that rectangle at an output size, optionally
//! masked to a circle.

pub mod compositor;
pub mod export;
pub mod mapper;
pub mod viewport;

pub use compositor::{RenderOptions, crop, render_crop};
pub use export::{ExportFormat, crop_to_data_url, decode, encode, export, to_data_url};
pub use mapper::compute_source_rect;
pub use viewport::{CropViewport, PRIMARY_BUTTON, PanGesture};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CropError {
    #[error("Image not ready: container or image has no size")]
    NotReady,
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Failed to encode {format}: {message}")]
    Encode {
        format: &'static str,
        message: String,
    },
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CropResult<T> = Result<T, CropError>;
