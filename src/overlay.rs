//! Overlay description.
//!
//! The pipeline does not render anything. Each cycle it hands an overlay sink
//! the list of boxes to draw, clipped to the frame, with a label and style.

use anyhow::Result;

use crate::classify::{ClassifiedTarget, TargetKind};
use crate::frame::Rect;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlayStyle {
    Car,
    Bus,
    TrafficLight,
}

impl OverlayStyle {
    /// Stroke color as RGBA.
    pub fn stroke_rgba(&self) -> [u8; 4] {
        match self {
            OverlayStyle::Car => [255, 214, 102, 242],
            OverlayStyle::Bus => [255, 114, 114, 242],
            OverlayStyle::TrafficLight => [140, 130, 255, 242],
        }
    }
}

impl From<TargetKind> for OverlayStyle {
    fn from(kind: TargetKind) -> Self {
        match kind {
            TargetKind::Car => OverlayStyle::Car,
            TargetKind::Bus => OverlayStyle::Bus,
            TargetKind::TrafficLight => OverlayStyle::TrafficLight,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OverlayBox {
    /// Clipped to the frame.
    pub rect: Rect,
    pub label: String,
    pub style: OverlayStyle,
}

/// Receives one overlay description per completed cycle.
pub trait OverlaySink: Send {
    fn draw(&mut self, frame_width: u32, frame_height: u32, boxes: &[OverlayBox]) -> Result<()>;

    fn clear(&mut self) -> Result<()>;
}

/// Overlay boxes for the targets of a cycle. Boxes clipped away entirely are dropped.
pub fn describe(targets: &[ClassifiedTarget], frame_width: u32, frame_height: u32) -> Vec<OverlayBox> {
    targets
        .iter()
        .filter_map(|t| {
            let rect = t.detection.bbox.clip(frame_width, frame_height);
            if rect.is_empty() {
                return None;
            }
            Some(OverlayBox {
                rect,
                label: t.display_label.clone(),
                style: t.kind.into(),
            })
        })
        .collect()
}
