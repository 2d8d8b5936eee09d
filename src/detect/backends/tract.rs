#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::{Frame, Rect};

/// COCO label ids as emitted by SSD-MobileNet style exports (1-based, with gaps).
const COCO_LABELS: &[(u32, &str)] = &[
    (1, "person"),
    (2, "bicycle"),
    (3, "car"),
    (4, "motorcycle"),
    (6, "bus"),
    (7, "train"),
    (8, "truck"),
    (10, "traffic light"),
    (11, "fire hydrant"),
    (13, "stop sign"),
    (17, "cat"),
    (18, "dog"),
];

fn coco_label(id: u32) -> &'static str {
    COCO_LABELS
        .iter()
        .find(|(known, _)| *known == id)
        .map(|(_, label)| *label)
        .unwrap_or("object")
}

/// Tract-based SSD detector for ONNX exports.
///
/// Expects a `uint8[1, H, W, 3]` input and the four standard SSD outputs:
/// boxes `[1, N, 4]` as normalized `(ymin, xmin, ymax, xmax)`, classes `[1, N]`,
/// scores `[1, N]` and the detection count `[1]`. Loads a local model file and
/// does no network I/O.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    u8::datum_type(),
                    tvec!(1, height as usize, width as usize, 3),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            confidence_threshold: 0.5,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let resized = if frame.width() == self.width && frame.height() == self.height {
            frame.image().clone()
        } else {
            imageops::resize(frame.image(), self.width, self.height, FilterType::Triangle)
        };
        let width = self.width as usize;
        let pixels = resized.as_raw();
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, self.height as usize, width, 3),
            |(_, y, x, channel)| pixels[(y * width + x) * 3 + channel],
        );
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        if outputs.len() < 3 {
            return Err(anyhow!(
                "model produced {} outputs, expected boxes, classes and scores",
                outputs.len()
            ));
        }
        let boxes = outputs[0]
            .to_array_view::<f32>()
            .context("box tensor was not f32")?;
        let classes = outputs[1]
            .to_array_view::<f32>()
            .context("class tensor was not f32")?;
        let scores = outputs[2]
            .to_array_view::<f32>()
            .context("score tensor was not f32")?;
        let count = match outputs.get(3) {
            Some(count) => count
                .to_array_view::<f32>()
                .context("detection count tensor was not f32")?
                .iter()
                .next()
                .map(|n| n.max(0.0) as usize),
            None => None,
        };

        let boxes: Vec<f32> = boxes.iter().copied().collect();
        let classes: Vec<f32> = classes.iter().copied().collect();
        let scores: Vec<f32> = scores.iter().copied().collect();
        Ok(decode_ssd(
            &SsdOutputs {
                boxes: &boxes,
                classes: &classes,
                scores: &scores,
                count,
            },
            self.confidence_threshold,
            frame.width(),
            frame.height(),
        ))
    }
}

/// Flattened SSD output rows. `count` is the model's own detection count;
/// rows past it are padding.
struct SsdOutputs<'a> {
    boxes: &'a [f32],
    classes: &'a [f32],
    scores: &'a [f32],
    count: Option<usize>,
}

fn decode_ssd(out: &SsdOutputs<'_>, threshold: f32, width: u32, height: u32) -> Vec<Detection> {
    let rows = out
        .scores
        .len()
        .min(out.classes.len())
        .min(out.boxes.len() / 4);
    let rows = out.count.map_or(rows, |count| count.min(rows));
    let (fw, fh) = (width as f32, height as f32);
    (0..rows)
        .filter(|&i| out.scores[i] >= threshold)
        .map(|i| {
            let b = &out.boxes[i * 4..i * 4 + 4];
            let (ymin, xmin, ymax, xmax) = (b[0], b[1], b[2], b[3]);
            let rect = Rect::new(xmin * fw, ymin * fh, (xmax - xmin) * fw, (ymax - ymin) * fh)
                .clip(width, height);
            Detection::new(coco_label(out.classes[i] as u32), out.scores[i], rect)
        })
        .collect()
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        frame.ensure_non_empty()?;
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }
}
