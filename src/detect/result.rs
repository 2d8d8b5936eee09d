use serde::{Deserialize, Serialize};

use crate::frame::Rect;

/// One object reported by a detector for one frame.
///
/// Created fresh each cycle and dropped at the end of it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Open vocabulary label, e.g. `car`, `bus`, `traffic light`.
    #[serde(rename = "class")]
    pub label: String,
    /// Confidence in `0..=1`.
    #[serde(rename = "score")]
    pub confidence: f32,
    /// `[x, y, width, height]` in frame pixels.
    #[serde(with = "bbox_array")]
    pub bbox: Rect,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: Rect) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    /// Confidence as a whole percentage, rounded like the on-screen label.
    pub fn confidence_percent(&self) -> u32 {
        (self.confidence.clamp(0.0, 1.0) * 100.0).round() as u32
    }
}

mod bbox_array {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::frame::Rect;

    pub fn serialize<S: Serializer>(rect: &Rect, s: S) -> Result<S::Ok, S::Error> {
        [rect.x, rect.y, rect.w, rect.h].serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Rect, D::Error> {
        let bbox = <[f32; 4]>::deserialize(d)?;
        Ok(Rect::from_bbox(bbox))
    }
}
