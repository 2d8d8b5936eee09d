//! OCR cadence.
//!
//! OCR is much slower than detection, so it runs on its own coarse cadence
//! against a downscaled snapshot. At most one recognition request is in flight;
//! a cadence tick that would overlap it is dropped, not queued.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::error::{Adapter, ScannerError};
use crate::frame::Frame;
use crate::source::FrameSource;
use crate::speech::{self, Utterance};
use crate::worker::{CallState, ExecutionMode, PendingCall};

pub const DEFAULT_INTERVAL_MS: u64 = 1800;
pub const DEFAULT_SCALE: f32 = 0.6;

/// Incremental progress reported by an OCR engine.
#[derive(Clone, Debug, PartialEq)]
pub struct OcrProgress {
    pub status: String,
    /// `0.0..=1.0`
    pub fraction: f32,
}

/// OCR adapter.
pub trait OcrAdapter: Send {
    fn name(&self) -> &'static str;

    /// False when the engine could not be loaded.
    fn is_available(&self) -> bool {
        true
    }

    /// Recognize text in `image` for the configured `languages`
    /// (e.g. `["eng", "heb"]`). Progress reporting is optional.
    fn recognize(
        &mut self,
        image: &Frame,
        languages: &[String],
        progress: &mut dyn FnMut(OcrProgress),
    ) -> Result<String>;
}

pub type SharedOcr = Arc<Mutex<dyn OcrAdapter>>;

#[derive(Clone, Debug, PartialEq)]
pub struct OcrSettings {
    pub interval_ms: u64,
    /// Linear downscale applied to the snapshot before recognition.
    pub scale: f32,
    pub languages: Vec<String>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            scale: DEFAULT_SCALE,
            languages: vec!["eng".to_string(), "heb".to_string()],
        }
    }
}

/// Result of a `maybe_run` call.
#[derive(Debug, PartialEq)]
pub enum OcrTick {
    /// Interval not reached.
    Throttled,
    /// A request is still in flight.
    Busy,
    /// Snapshot not available; the cadence slot is consumed.
    Skipped(ScannerError),
    /// A request was issued.
    Started,
}

/// What a finished request produced.
#[derive(Debug, PartialEq)]
pub enum OcrOutcome {
    /// Non-empty text, phrased for speech.
    Text(Utterance),
    /// Engine returned nothing readable.
    Empty,
    Failed(ScannerError),
}

struct InFlight {
    call: PendingCall<Result<String>>,
    progress: Receiver<OcrProgress>,
}

pub struct OcrCadence {
    settings: OcrSettings,
    mode: ExecutionMode,
    last_ocr_ms: Option<u64>,
    in_flight: Option<InFlight>,
    last_progress: Option<OcrProgress>,
}

impl OcrCadence {
    pub fn new(settings: OcrSettings, mode: ExecutionMode) -> Self {
        Self {
            settings,
            mode,
            last_ocr_ms: None,
            in_flight: None,
            last_progress: None,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn last_progress(&self) -> Option<&OcrProgress> {
        self.last_progress.as_ref()
    }

    /// Issue one recognition request if the cadence allows it.
    pub fn maybe_run(
        &mut self,
        now_ms: u64,
        source: &mut dyn FrameSource,
        adapter: &SharedOcr,
    ) -> OcrTick {
        if self.in_flight.is_some() {
            return OcrTick::Busy;
        }
        if let Some(last) = self.last_ocr_ms {
            if now_ms.saturating_sub(last) < self.settings.interval_ms {
                return OcrTick::Throttled;
            }
        }
        self.last_ocr_ms = Some(now_ms);

        let snapshot = source
            .snapshot()
            .and_then(|frame| frame.downscale(self.settings.scale));
        let snapshot = match snapshot {
            Ok(frame) => frame,
            Err(e) => return OcrTick::Skipped(ScannerError::classify(Adapter::FrameSource, &e)),
        };

        let (progress_tx, progress_rx) = mpsc::channel();
        let languages = self.settings.languages.clone();
        let job_adapter = adapter.clone();
        let call = PendingCall::start(self.mode, "ocr", move || {
            run_recognition(&job_adapter, &snapshot, &languages, progress_tx)
        });
        match call {
            Ok(call) => {
                self.in_flight = Some(InFlight {
                    call,
                    progress: progress_rx,
                });
                OcrTick::Started
            }
            Err(e) => OcrTick::Skipped(ScannerError::classify(Adapter::Ocr, &e)),
        }
    }

    /// Drain progress and collect the outcome of a finished request.
    pub fn poll(&mut self) -> Option<OcrOutcome> {
        let flight = self.in_flight.as_mut()?;
        for progress in flight.progress.try_iter() {
            log::debug!("ocr {} ({:.0}%)", progress.status, progress.fraction * 100.0);
            self.last_progress = Some(progress);
        }
        let result = match flight.call.poll() {
            CallState::Pending => return None,
            CallState::Done(result) => result,
            CallState::Lost => Err(anyhow!("ocr worker exited without a result")),
        };
        self.in_flight = None;
        Some(match result {
            Ok(text) => match speech::ocr_utterance(&text) {
                Some(utterance) => OcrOutcome::Text(utterance),
                None => OcrOutcome::Empty,
            },
            Err(e) => {
                let err = ScannerError::classify(Adapter::Ocr, &e);
                log::warn!("ocr request failed: {}", err);
                OcrOutcome::Failed(err)
            }
        })
    }

    /// Forget the in-flight request. Its result is dropped on arrival.
    pub fn cancel(&mut self) {
        self.in_flight = None;
    }
}

fn run_recognition(
    adapter: &SharedOcr,
    image: &Frame,
    languages: &[String],
    progress_tx: Sender<OcrProgress>,
) -> Result<String> {
    let mut guard = adapter.lock().map_err(|_| anyhow!("ocr lock poisoned"))?;
    let mut report = |p: OcrProgress| {
        let _ = progress_tx.send(p);
    };
    let text = guard.recognize(image, languages, &mut report);
    text
}

/// Replays fixed OCR answers, one per request, wrapping around.
pub struct ScriptedOcr {
    answers: Vec<String>,
    cursor: usize,
}

impl ScriptedOcr {
    pub fn new(answers: Vec<String>) -> Self {
        Self { answers, cursor: 0 }
    }
}

impl OcrAdapter for ScriptedOcr {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn recognize(
        &mut self,
        _image: &Frame,
        _languages: &[String],
        progress: &mut dyn FnMut(OcrProgress),
    ) -> Result<String> {
        progress(OcrProgress {
            status: "recognizing text".to_string(),
            fraction: 0.0,
        });
        let text = if self.answers.is_empty() {
            String::new()
        } else {
            let text = self.answers[self.cursor % self.answers.len()].clone();
            self.cursor = (self.cursor + 1) % self.answers.len();
            text
        };
        progress(OcrProgress {
            status: "recognizing text".to_string(),
            fraction: 1.0,
        });
        Ok(text)
    }
}
