//! Scanning session.
//!
//! Owns the adapters and all mutable pipeline state. Transitions are explicit:
//! `Idle -> Starting -> Running -> Stopping -> Idle`. `start` and `stop` take
//! `&mut self`, so requests from different callers are serialized by whoever
//! owns the session (typically behind a `Mutex`).
//!
//! Each `tick` does, in order:
//! 1. collect a finished OCR request and speak it
//! 2. issue the next OCR request if its cadence allows
//! 3. advance the detection scheduler; on a completed cycle classify, describe
//!    the overlay, map proximity to audio and announce targets

use std::sync::{Mutex, TryLockError};

use anyhow::{anyhow, Result};

use crate::classify::{ClassifiedTarget, TargetClassifier};
use crate::config::ScannerConfig;
use crate::detect::SharedBackend;
use crate::error::{Adapter, ScannerError};
use crate::frame::Rect;
use crate::ocr::{OcrCadence, OcrOutcome, OcrTick, SharedOcr};
use crate::overlay::{self, OverlayBox, OverlaySink};
use crate::proximity::{AudioSink, ProximityMapper, ProximityScope, ProximitySignal};
use crate::scheduler::{CompletedCycle, DetectionScheduler, TickOutcome};
use crate::source::FrameSource;
use crate::speech::{Dispatch, SpeechAdapter, SpeechDispatcher, SpeechState, Utterance, ENGLISH};
use crate::status::{StatusBoard, StatusLevel};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// External collaborators handed to a session.
pub struct Adapters {
    pub source: Box<dyn FrameSource>,
    /// `None` when no detector could be loaded.
    pub detector: Option<SharedBackend>,
    /// `None` when no OCR engine could be loaded.
    pub ocr: Option<SharedOcr>,
    pub speech: Box<dyn SpeechAdapter>,
    pub audio: Box<dyn AudioSink>,
    pub overlay: Box<dyn OverlaySink>,
}

/// Everything one completed detection cycle produced.
#[derive(Clone, Debug)]
pub struct CycleReport {
    pub cycle: u64,
    pub targets: Vec<ClassifiedTarget>,
    pub overlay: Vec<OverlayBox>,
    pub proximity: Option<ProximitySignal>,
    pub spoken: Vec<Utterance>,
}

/// What one `tick` did.
#[derive(Clone, Debug, Default)]
pub struct TickReport {
    pub cycle: Option<CycleReport>,
    pub ocr_spoken: Option<Utterance>,
}

/// State that lives exactly as long as one start/stop run.
struct Run {
    scheduler: Option<DetectionScheduler>,
    /// False until warm-up has run. It waits while a call abandoned by the
    /// previous run still holds the detector.
    detector_warm: bool,
    ocr: Option<OcrCadence>,
    /// False while the OCR availability check waits for the same reason.
    ocr_checked: bool,
    mapper: ProximityMapper,
    audio_ok: bool,
}

/// Outcome of a non-blocking adapter check.
enum Attempt<T> {
    Done(T),
    /// A worker from an earlier run still holds the adapter.
    Busy,
    Poisoned,
}

/// Run `f` on the adapter unless another thread holds it. Never blocks.
fn try_with<A: ?Sized, T>(adapter: &Mutex<A>, f: impl FnOnce(&mut A) -> T) -> Attempt<T> {
    match adapter.try_lock() {
        Ok(mut guard) => Attempt::Done(f(&mut *guard)),
        Err(TryLockError::WouldBlock) => Attempt::Busy,
        Err(TryLockError::Poisoned(_)) => Attempt::Poisoned,
    }
}

pub struct ScannerSession {
    config: ScannerConfig,
    state: SessionState,
    source: Box<dyn FrameSource>,
    detector: Option<SharedBackend>,
    ocr_adapter: Option<SharedOcr>,
    speech: SpeechDispatcher,
    speech_state: SpeechState,
    audio: Box<dyn AudioSink>,
    overlay: Box<dyn OverlaySink>,
    classifier: TargetClassifier,
    status: StatusBoard,
    run: Option<Run>,
}

impl ScannerSession {
    pub fn new(config: ScannerConfig, adapters: Adapters) -> Self {
        let classifier = TargetClassifier::new(config.color);
        let speech = SpeechDispatcher::new(adapters.speech, config.speech_cooldown_ms);
        let mut status = StatusBoard::new();
        for adapter in [
            Adapter::FrameSource,
            Adapter::Detector,
            Adapter::Ocr,
            Adapter::Speech,
            Adapter::Audio,
        ] {
            status.set(adapter, StatusLevel::Idle, "Idle");
        }
        Self {
            config,
            state: SessionState::Idle,
            source: adapters.source,
            detector: adapters.detector,
            ocr_adapter: adapters.ocr,
            speech,
            speech_state: SpeechState::new(),
            audio: adapters.audio,
            overlay: adapters.overlay,
            classifier,
            status,
            run: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// True while a detection request is waiting on the detector.
    pub fn detection_in_flight(&self) -> bool {
        self.run
            .as_ref()
            .and_then(|run| run.scheduler.as_ref())
            .is_some_and(|s| s.in_flight())
    }

    /// Acquire the frame source and prepare adapters. Unavailable adapters
    /// degrade their feature; only a missing frame source aborts the start.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(anyhow!("cannot start a session that is {:?}", self.state));
        }
        self.state = SessionState::Starting;
        self.status
            .set(Adapter::FrameSource, StatusLevel::Pending, "Starting...");

        if let Err(e) = self.source.open() {
            let err = ScannerError::classify(Adapter::FrameSource, &e);
            self.status
                .set(Adapter::FrameSource, StatusLevel::Warn, err.to_string());
            self.source.release();
            self.state = SessionState::Idle;
            return Err(anyhow!(err));
        }
        self.status.set(
            Adapter::FrameSource,
            StatusLevel::Ready,
            format!("Camera ready: {}", self.source.describe()),
        );

        let (scheduler, detector_warm) = self.prepare_detector();
        let (ocr, ocr_checked) = self.prepare_ocr();

        if self.speech.is_available() {
            self.status.set(Adapter::Speech, StatusLevel::Ready, "Ready");
        } else {
            self.status
                .set(Adapter::Speech, StatusLevel::Warn, "speech synthesis unavailable");
        }

        let mut mapper = ProximityMapper::new(self.config.audio);
        let audio_ok = if !self.audio.is_available() {
            self.status
                .set(Adapter::Audio, StatusLevel::Warn, "audio output unavailable");
            false
        } else if let Err(e) = mapper.start(self.audio.as_mut()) {
            self.status
                .set(Adapter::Audio, StatusLevel::Warn, format!("audio failed: {:#}", e));
            false
        } else {
            self.status.set(Adapter::Audio, StatusLevel::Ready, "Ready");
            true
        };

        self.speech_state = SpeechState::new();
        self.run = Some(Run {
            scheduler,
            detector_warm,
            ocr,
            ocr_checked,
            mapper,
            audio_ok,
        });
        self.state = SessionState::Running;
        log::info!("scanning session started");
        Ok(())
    }

    /// Warm the detector up if it is free. A detector still busy with a call
    /// abandoned by the previous run is warmed up on a later tick instead.
    fn prepare_detector(&mut self) -> (Option<DetectionScheduler>, bool) {
        let Some(detector) = self.detector.clone() else {
            self.status
                .set(Adapter::Detector, StatusLevel::Warn, "no object model loaded");
            return (None, true);
        };
        let scheduler = DetectionScheduler::new(self.config.detect_interval_ms, self.config.execution);
        match self.warm_up_detector(&detector) {
            Some(true) => (Some(scheduler), true),
            Some(false) => (None, true),
            None => {
                self.status.set(
                    Adapter::Detector,
                    StatusLevel::Pending,
                    "Waiting for previous detection...",
                );
                (Some(scheduler), false)
            }
        }
    }

    /// `Some(ready)` once warm-up ran (or could not), `None` while busy.
    fn warm_up_detector(&mut self, detector: &SharedBackend) -> Option<bool> {
        let warm = match try_with(detector, |backend| backend.warm_up().map(|_| backend.name())) {
            Attempt::Busy => return None,
            Attempt::Done(result) => result,
            Attempt::Poisoned => Err(anyhow!("detector lock poisoned")),
        };
        match warm {
            Ok(name) => {
                self.status.set(
                    Adapter::Detector,
                    StatusLevel::Ready,
                    format!("Object model ready ({})", name),
                );
                Some(true)
            }
            Err(e) => {
                self.status.set(
                    Adapter::Detector,
                    StatusLevel::Warn,
                    ScannerError::unavailable(Adapter::Detector, format!("{:#}", e)).to_string(),
                );
                Some(false)
            }
        }
    }

    fn prepare_ocr(&mut self) -> (Option<OcrCadence>, bool) {
        if !self.config.ocr_enabled {
            self.status.set(Adapter::Ocr, StatusLevel::Idle, "OCR disabled");
            return (None, true);
        }
        let cadence = OcrCadence::new(self.config.ocr.clone(), self.config.execution);
        match self.check_ocr() {
            Some(true) => (Some(cadence), true),
            Some(false) => (None, true),
            None => {
                self.status
                    .set(Adapter::Ocr, StatusLevel::Pending, "Waiting for previous OCR...");
                (Some(cadence), false)
            }
        }
    }

    /// `Some(available)` once checked, `None` while the engine is busy.
    fn check_ocr(&mut self) -> Option<bool> {
        let available = match self.ocr_adapter.as_ref() {
            None => false,
            Some(ocr) => match try_with(ocr, |engine| engine.is_available()) {
                Attempt::Busy => return None,
                Attempt::Done(available) => available,
                Attempt::Poisoned => false,
            },
        };
        if available {
            self.status.set(
                Adapter::Ocr,
                StatusLevel::Ready,
                format!("OCR ready ({})", self.config.ocr.languages.join("+")),
            );
        } else {
            self.status
                .set(Adapter::Ocr, StatusLevel::Warn, "OCR engine unavailable");
        }
        Some(available)
    }

    /// Advance the pipeline. Call on every refresh opportunity.
    pub fn tick(&mut self, now_ms: u64) -> TickReport {
        let mut report = TickReport::default();
        if self.state != SessionState::Running {
            return report;
        }
        if !self.source.is_live() {
            log::warn!("frame source went away; stopping session");
            self.stop();
            return report;
        }
        report.ocr_spoken = self.tick_ocr(now_ms);
        report.cycle = self.tick_detection(now_ms);
        report
    }

    fn tick_ocr(&mut self, now_ms: u64) -> Option<Utterance> {
        let adapter = self.ocr_adapter.clone()?;
        if !self.run.as_ref()?.ocr_checked {
            let checked = self.check_ocr()?;
            let run = self.run.as_mut()?;
            run.ocr_checked = true;
            if !checked {
                run.ocr = None;
            }
            return None;
        }
        let run = self.run.as_mut()?;
        let cadence = run.ocr.as_mut()?;

        let mut spoken = None;
        match cadence.poll() {
            Some(OcrOutcome::Text(utterance)) => {
                self.status.set(Adapter::Ocr, StatusLevel::Ready, "Ready");
                match self.speech.announce(&mut self.speech_state, &utterance, now_ms) {
                    Ok(Dispatch::Spoken) => {
                        self.status.set_spoken(&utterance.text);
                        spoken = Some(utterance);
                    }
                    Ok(_) => {}
                    Err(e) => log::warn!("speech failed: {:#}", e),
                }
            }
            Some(OcrOutcome::Empty) | Some(OcrOutcome::Failed(_)) => {
                self.status.set(Adapter::Ocr, StatusLevel::Ready, "Ready");
            }
            None => {
                if let Some(progress) = cadence.last_progress() {
                    if cadence.in_flight() {
                        self.status.set(
                            Adapter::Ocr,
                            StatusLevel::Pending,
                            format!("{} {:.0}%", progress.status, progress.fraction * 100.0),
                        );
                    }
                }
            }
        }

        match cadence.maybe_run(now_ms, self.source.as_mut(), &adapter) {
            OcrTick::Started => {
                self.status.set(Adapter::Ocr, StatusLevel::Pending, "Reading...");
                // Inline requests are already done; collect on the next tick.
            }
            OcrTick::Skipped(e) => log::debug!("ocr skipped: {}", e),
            OcrTick::Throttled | OcrTick::Busy => {}
        }
        spoken
    }

    fn tick_detection(&mut self, now_ms: u64) -> Option<CycleReport> {
        let detector = self.detector.clone()?;
        if !self.run.as_ref()?.detector_warm {
            let ready = self.warm_up_detector(&detector)?;
            let run = self.run.as_mut()?;
            run.detector_warm = true;
            if !ready {
                run.scheduler = None;
            }
            return None;
        }
        let scheduler = self.run.as_mut()?.scheduler.as_mut()?;
        match scheduler.tick(now_ms, self.source.as_mut(), &detector) {
            TickOutcome::Completed(cycle) => Some(self.dispatch_cycle(cycle, now_ms)),
            TickOutcome::Skipped(e) => {
                log::debug!("detection skipped: {}", e);
                None
            }
            _ => None,
        }
    }

    /// Classify, draw, beep, speak. Runs to completion before the next tick.
    fn dispatch_cycle(&mut self, cycle: CompletedCycle, now_ms: u64) -> CycleReport {
        let (width, height) = (cycle.frame.width(), cycle.frame.height());
        let targets = self.classifier.classify(&cycle.frame, &cycle.detections);

        let boxes = overlay::describe(&targets, width, height);
        if let Err(e) = self
            .overlay
            .clear()
            .and_then(|_| self.overlay.draw(width, height, &boxes))
        {
            log::warn!("overlay update failed: {:#}", e);
        }

        let rects: Vec<Rect> = match self.config.proximity_scope {
            ProximityScope::Targets => targets.iter().map(|t| t.detection.bbox).collect(),
            ProximityScope::AllDetections => cycle.detections.iter().map(|d| d.bbox).collect(),
        };
        let mut proximity = None;
        if let Some(run) = self.run.as_mut().filter(|run| run.audio_ok) {
            match run
                .mapper
                .update(&rects, width, height, now_ms, self.audio.as_mut())
            {
                Ok(signal) => proximity = Some(signal),
                Err(e) => {
                    run.audio_ok = false;
                    self.status
                        .set(Adapter::Audio, StatusLevel::Warn, format!("audio failed: {:#}", e));
                }
            }
        }

        let mut spoken = Vec::new();
        for target in &targets {
            let utterance = Utterance::new(target.utterance(), ENGLISH);
            match self.speech.announce(&mut self.speech_state, &utterance, now_ms) {
                Ok(Dispatch::Spoken) => {
                    self.status.set_spoken(&utterance.text);
                    spoken.push(utterance);
                }
                Ok(_) => {}
                Err(e) => log::warn!("speech failed: {:#}", e),
            }
        }

        log::debug!(
            "cycle {}: {} detections, {} targets, {} spoken",
            cycle.cycle,
            cycle.detections.len(),
            targets.len(),
            spoken.len()
        );
        CycleReport {
            cycle: cycle.cycle,
            targets,
            overlay: boxes,
            proximity,
            spoken,
        }
    }

    /// "Speak last result": interrupts current speech and repeats the last utterance.
    pub fn speak_last_result(&mut self, now_ms: u64) -> Result<Option<Dispatch>> {
        self.speech.repeat_last(&mut self.speech_state, now_ms)
    }

    /// Stop scanning. No further cycles start, late results are dropped, audio
    /// is silenced and the frame source released. Idempotent.
    pub fn stop(&mut self) {
        if self.state != SessionState::Running {
            return;
        }
        self.state = SessionState::Stopping;
        if let Some(mut run) = self.run.take() {
            if let Some(scheduler) = run.scheduler.as_mut() {
                scheduler.stop();
            }
            if let Some(ocr) = run.ocr.as_mut() {
                ocr.cancel();
            }
            if run.audio_ok {
                if let Err(e) = run.mapper.stop(self.audio.as_mut()) {
                    log::warn!("failed to silence audio: {:#}", e);
                }
            }
        }
        if let Err(e) = self.overlay.clear() {
            log::warn!("overlay clear failed: {:#}", e);
        }
        self.source.release();
        self.status.set(Adapter::FrameSource, StatusLevel::Idle, "Stopped");
        self.status.set(Adapter::Audio, StatusLevel::Idle, "Idle");
        self.state = SessionState::Idle;
        log::info!("scanning session stopped");
    }
}

impl Drop for ScannerSession {
    fn drop(&mut self) {
        self.stop();
    }
}
