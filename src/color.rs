//! Traffic-light lamp color heuristic.
//!
//! Counts "red-like" and "green-like" pixels in a small sample and only makes a
//! color claim when one count clearly dominates. Close counts resolve to
//! `Unknown`, which is always the safe answer.

use serde::{Deserialize, Serialize};

use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorState {
    Red,
    Green,
    Unknown,
}

impl ColorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorState::Red => "red",
            ColorState::Green => "green",
            ColorState::Unknown => "unknown",
        }
    }
}

/// Tunable constants of the heuristic.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorThresholds {
    /// Minimum lead of the dominant channel over each other channel.
    pub channel_margin: u16,
    /// Minimum share of the dominant channel in `r + g + b + 1`.
    pub min_share: f32,
    /// One count must exceed the other times this ratio to win.
    pub ratio_margin: f32,
}

impl Default for ColorThresholds {
    fn default() -> Self {
        Self {
            channel_margin: 30,
            min_share: 0.4,
            ratio_margin: 1.2,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LampCounts {
    pub red: u32,
    pub green: u32,
}

/// Count red-like and green-like pixels of `sample`.
pub fn count_lamp_pixels(sample: &Frame, thresholds: &ColorThresholds) -> LampCounts {
    let margin = thresholds.channel_margin as u32;
    let mut counts = LampCounts::default();
    for px in sample.as_rgb().chunks_exact(3) {
        let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
        let total = (r + g + b + 1) as f32;
        if r > g + margin && r > b + margin && r as f32 / total > thresholds.min_share {
            counts.red += 1;
        }
        if g > r + margin && g > b + margin && g as f32 / total > thresholds.min_share {
            counts.green += 1;
        }
    }
    counts
}

/// Decide the lamp state from pixel counts.
pub fn decide(counts: LampCounts, thresholds: &ColorThresholds) -> ColorState {
    let red = counts.red as f32;
    let green = counts.green as f32;
    if red > green * thresholds.ratio_margin {
        ColorState::Red
    } else if green > red * thresholds.ratio_margin {
        ColorState::Green
    } else {
        ColorState::Unknown
    }
}

pub fn classify_sample(sample: &Frame, thresholds: &ColorThresholds) -> ColorState {
    decide(count_lamp_pixels(sample, thresholds), thresholds)
}
