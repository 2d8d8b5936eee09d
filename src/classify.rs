//! Target classification.
//!
//! Filters a detection batch down to the objects of interest (cars, buses,
//! traffic lights), resolves the lamp color of traffic lights and builds the
//! display label. Output order follows the detector's order.

use crate::color::{self, ColorState, ColorThresholds};
use crate::detect::Detection;
use crate::frame::Frame;

pub const SAMPLE_FRACTION: f32 = 0.25;
pub const MIN_SAMPLE_SIDE: u32 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Car,
    Bus,
    TrafficLight,
}

impl TargetKind {
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "car" => Some(TargetKind::Car),
            "bus" => Some(TargetKind::Bus),
            "traffic light" => Some(TargetKind::TrafficLight),
            _ => None,
        }
    }
}

/// A detection of interest, annotated for display and speech.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassifiedTarget {
    pub detection: Detection,
    pub kind: TargetKind,
    pub display_label: String,
    /// Only set for traffic lights.
    pub color: Option<ColorState>,
}

impl ClassifiedTarget {
    /// Fixed utterance for this target, so the cooldown key space stays small.
    pub fn utterance(&self) -> &'static str {
        match (self.kind, self.color) {
            (TargetKind::Car, _) => "Car",
            (TargetKind::Bus, _) => "Bus",
            (TargetKind::TrafficLight, Some(ColorState::Red)) => "Traffic light red",
            (TargetKind::TrafficLight, Some(ColorState::Green)) => "Traffic light green",
            (TargetKind::TrafficLight, _) => "Traffic light",
        }
    }
}

#[derive(Clone, Debug)]
pub struct TargetClassifier {
    thresholds: ColorThresholds,
    sample_fraction: f32,
    min_sample_side: u32,
}

impl TargetClassifier {
    pub fn new(thresholds: ColorThresholds) -> Self {
        Self {
            thresholds,
            sample_fraction: SAMPLE_FRACTION,
            min_sample_side: MIN_SAMPLE_SIDE,
        }
    }

    pub fn classify(&self, frame: &Frame, detections: &[Detection]) -> Vec<ClassifiedTarget> {
        detections
            .iter()
            .filter_map(|d| self.classify_one(frame, d))
            .collect()
    }

    fn classify_one(&self, frame: &Frame, detection: &Detection) -> Option<ClassifiedTarget> {
        let kind = TargetKind::from_label(&detection.label)?;
        let (display_label, color) = match kind {
            TargetKind::Car | TargetKind::Bus => (
                format!("{} {}%", detection.label, detection.confidence_percent()),
                None,
            ),
            TargetKind::TrafficLight => {
                let color = self.lamp_color(frame, detection);
                let label = match color {
                    ColorState::Unknown => "traffic light".to_string(),
                    known => format!("traffic light: {}", known.as_str()),
                };
                (label, Some(color))
            }
        };
        Some(ClassifiedTarget {
            detection: detection.clone(),
            kind,
            display_label,
            color,
        })
    }

    fn lamp_color(&self, frame: &Frame, detection: &Detection) -> ColorState {
        match frame.sample_region(&detection.bbox, self.sample_fraction, self.min_sample_side) {
            Ok(sample) => color::classify_sample(&sample, &self.thresholds),
            Err(e) => {
                log::debug!("traffic light sample skipped: {}", e);
                ColorState::Unknown
            }
        }
    }
}

impl Default for TargetClassifier {
    fn default() -> Self {
        Self::new(ColorThresholds::default())
    }
}
