//! Frame snapshots and region sampling.
//!
//! - `Frame`: immutable RGB snapshot of the current source frame. Cheap to clone
//!   (shared buffer) so a detection or OCR request can carry it to a worker.
//! - `Rect`: axis-aligned box in frame pixel coordinates, clipped before use.
//!
//! Every box is clipped to frame bounds before it is drawn or sampled.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::ScannerError;

/// Axis-aligned bounding box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Detector-style `[x, y, width, height]` box.
    pub fn from_bbox(bbox: [f32; 4]) -> Self {
        Self::new(bbox[0], bbox[1], bbox[2], bbox[3])
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.area() <= 0.0
    }

    /// Clip to `[0, width] x [0, height]`. Boxes fully outside collapse to zero size.
    pub fn clip(&self, width: u32, height: u32) -> Rect {
        let (fw, fh) = (width as f32, height as f32);
        let x0 = finite_or_zero(self.x).clamp(0.0, fw);
        let y0 = finite_or_zero(self.y).clamp(0.0, fh);
        let x1 = finite_or_zero(self.x + self.w).clamp(0.0, fw);
        let y1 = finite_or_zero(self.y + self.h).clamp(0.0, fh);
        Rect {
            x: x0,
            y: y0,
            w: (x1 - x0).max(0.0),
            h: (y1 - y0).max(0.0),
        }
    }
}

fn finite_or_zero(v: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Immutable RGB frame snapshot.
#[derive(Clone, Debug)]
pub struct Frame {
    image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    /// Build a frame from packed RGB bytes.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("pixel buffer does not match {}x{}", width, height))?;
        Ok(Self::new(image))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Packed RGB bytes, row-major.
    pub fn as_rgb(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Fails with `InvalidInput` for zero-area frames.
    pub fn ensure_non_empty(&self) -> Result<()> {
        if self.area() == 0 {
            return Err(ScannerError::invalid_input(format!(
                "zero-area frame {}x{}",
                self.width(),
                self.height()
            ))
            .into());
        }
        Ok(())
    }

    /// Sample the region under `rect` into a small buffer.
    ///
    /// The clipped region is resized to `fraction` of its size on each axis,
    /// never below `min_side` pixels, which bounds the cost of per-pixel scans.
    pub fn sample_region(&self, rect: &Rect, fraction: f32, min_side: u32) -> Result<Frame> {
        self.ensure_non_empty()?;
        let clipped = rect.clip(self.width(), self.height());
        let sx = (clipped.x.floor() as u32).min(self.width() - 1);
        let sy = (clipped.y.floor() as u32).min(self.height() - 1);
        let sw = (clipped.w.floor() as u32).clamp(1, self.width() - sx);
        let sh = (clipped.h.floor() as u32).clamp(1, self.height() - sy);

        let out_w = ((sw as f32 * fraction).floor() as u32).max(min_side);
        let out_h = ((sh as f32 * fraction).floor() as u32).max(min_side);

        let roi = imageops::crop_imm(self.image.as_ref(), sx, sy, sw, sh).to_image();
        Ok(Frame::new(imageops::resize(
            &roi,
            out_w,
            out_h,
            FilterType::Triangle,
        )))
    }

    /// Linear downscale of the whole frame (e.g. 0.6 for OCR snapshots).
    pub fn downscale(&self, scale: f32) -> Result<Frame> {
        self.ensure_non_empty()?;
        if !(scale > 0.0 && scale <= 1.0) {
            return Err(anyhow!("downscale factor must be in (0, 1], got {}", scale));
        }
        let w = ((self.width() as f32 * scale).floor() as u32).max(1);
        let h = ((self.height() as f32 * scale).floor() as u32).max(1);
        if w == self.width() && h == self.height() {
            return Ok(self.clone());
        }
        Ok(Frame::new(imageops::resize(
            self.image.as_ref(),
            w,
            h,
            FilterType::Triangle,
        )))
    }
}
