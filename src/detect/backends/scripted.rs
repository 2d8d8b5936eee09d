use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::{Frame, Rect};

/// Replays a fixed script of detection batches, one batch per call.
///
/// Used by the `scanner` binary for synthetic runs and by tests. The script
/// wraps around when it runs out.
pub struct ScriptedBackend {
    batches: Vec<Vec<Detection>>,
    cursor: usize,
}

impl ScriptedBackend {
    pub fn new(batches: Vec<Vec<Detection>>) -> Self {
        Self { batches, cursor: 0 }
    }

    /// Backend that reports the same detections on every frame.
    pub fn repeating(batch: Vec<Detection>) -> Self {
        Self::new(vec![batch])
    }

    /// Load a JSON script: an array of batches, each an array of
    /// `{"class": .., "score": .., "bbox": [x, y, w, h]}` objects.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detection script {}", path.display()))?;
        let batches: Vec<Vec<Detection>> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid detection script {}: {}", path.display(), e))?;
        Ok(Self::new(batches))
    }

    /// Built-in script for synthetic runs: a bus approaching, a car passing, a
    /// traffic light in the upper corner.
    pub fn demo() -> Self {
        let mut batches = Vec::new();
        for step in 0..20u32 {
            let grow = step as f32 * 12.0;
            let mut batch = vec![
                Detection::new(
                    "traffic light",
                    0.72,
                    Rect::new(560.0, 20.0, 40.0, 90.0),
                ),
                Detection::new(
                    "bus",
                    0.64 + step as f32 * 0.01,
                    Rect::new(
                        200.0 - grow / 2.0,
                        180.0 - grow / 3.0,
                        120.0 + grow,
                        80.0 + grow / 2.0,
                    ),
                ),
            ];
            if step % 5 < 2 {
                batch.push(Detection::new(
                    "car",
                    0.81,
                    Rect::new(10.0 + step as f32 * 20.0, 300.0, 100.0, 50.0),
                ));
            }
            batches.push(batch);
        }
        Self::new(batches)
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        if self.batches.is_empty() {
            return Ok(Vec::new());
        }
        let batch = self.batches[self.cursor % self.batches.len()].clone();
        self.cursor = (self.cursor + 1) % self.batches.len();
        Ok(batch)
    }
}
