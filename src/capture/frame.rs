//! Immutable screen frames and pixel regions.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use image::{GrayImage, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, OcrError};

/// A rectangle in the frame's native pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// X position of top-left corner
    pub x: u32,
    /// Y position of top-left corner
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Right edge (exclusive).
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Bottom edge (exclusive).
    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True if the whole region lies inside a `width` x `height` image.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.right() <= width && self.bottom() <= height
    }

    /// Clamps the region to image bounds. May return an empty region.
    pub fn clamp_to(&self, width: u32, height: u32) -> Region {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Region {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        }
    }

    /// Center point, rounded down.
    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

struct FrameInner {
    rgba: RgbaImage,
    gray: OnceLock<GrayImage>,
}

/// A decoded screen capture.
///
/// Cloning is cheap and shares pixel data. Derived views (crops,
/// grayscale) never modify the frame they came from.
#[derive(Clone)]
pub struct Frame {
    inner: Arc<FrameInner>,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

impl Frame {
    pub fn from_rgba(rgba: RgbaImage) -> Self {
        Self {
            inner: Arc::new(FrameInner {
                rgba,
                gray: OnceLock::new(),
            }),
        }
    }

    /// Decodes an encoded screenshot (PNG from `screencap -p`, or any
    /// format the `image` crate recognizes).
    pub fn decode(bytes: &[u8]) -> Result<Self, CaptureError> {
        let img = image::load_from_memory(bytes).map_err(|e| CaptureError::Decode(e.to_string()))?;
        Ok(Self::from_rgba(img.to_rgba8()))
    }

    /// Loads a screenshot file from disk.
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let img = image::open(path)
            .map_err(|e| CaptureError::Decode(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_rgba(img.to_rgba8()))
    }

    pub fn width(&self) -> u32 {
        self.inner.rgba.width()
    }

    pub fn height(&self) -> u32 {
        self.inner.rgba.height()
    }

    pub fn rgba(&self) -> &RgbaImage {
        &self.inner.rgba
    }

    /// Grayscale view, computed once and shared by all clones.
    pub fn gray(&self) -> &GrayImage {
        self.inner
            .gray
            .get_or_init(|| image::imageops::grayscale(&self.inner.rgba))
    }

    /// Crops to `region`, failing if the region leaves the frame.
    pub fn crop(&self, region: &Region) -> Result<Frame, OcrError> {
        if region.is_empty() || !region.fits(self.width(), self.height()) {
            return Err(OcrError::RegionOutOfBounds {
                x: region.x,
                y: region.y,
                width: region.width,
                height: region.height,
                frame_width: self.width(),
                frame_height: self.height(),
            });
        }
        let cropped =
            image::imageops::crop_imm(self.rgba(), region.x, region.y, region.width, region.height)
                .to_image();
        Ok(Frame::from_rgba(cropped))
    }
}
