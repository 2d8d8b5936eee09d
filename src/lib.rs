//! Smart Scanner feedback pipeline
//!
//! Turns the output of a pretrained object detector and an OCR engine into
//! rate-limited feedback for someone pointing a camera at the street:
//! an overlay description, a proximity tone or beep, and spoken announcements.
//!
//! Inference, OCR, speech synthesis and audio output are external adapters
//! behind traits. This crate owns the orchestration:
//!
//! - `scheduler`: throttled, non-overlapping detection cycles
//! - `classify` / `color`: cars, buses and traffic lights (with lamp color)
//! - `proximity`: largest box area fraction to tone gain or pulses
//! - `speech`: per-(language, text) cooldown, Hebrew/English selection
//! - `ocr`: coarse OCR cadence on a downscaled snapshot
//! - `session`: `Idle -> Starting -> Running -> Stopping -> Idle`
//!
//! All pipeline state is owned by one `ScannerSession` and touched only from
//! the thread that drives it. Adapter calls may run on worker threads; their
//! results are collected by polling and dropped if the session stopped.

pub mod classify;
pub mod color;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ocr;
pub mod overlay;
pub mod proximity;
pub mod scheduler;
pub mod session;
pub mod source;
pub mod speech;
pub mod status;
pub mod ui;
pub mod worker;

pub use classify::{ClassifiedTarget, TargetClassifier, TargetKind};
pub use color::{ColorState, ColorThresholds};
pub use config::ScannerConfig;
pub use detect::{BackendRegistry, Detection, DetectorBackend, ScriptedBackend, SharedBackend};
pub use error::{Adapter, ScannerError};
pub use frame::{Frame, Rect};
pub use ocr::{OcrAdapter, OcrCadence, OcrOutcome, OcrProgress, OcrSettings, ScriptedOcr, SharedOcr};
pub use overlay::{OverlayBox, OverlaySink, OverlayStyle};
pub use proximity::{AudioPolicy, AudioSink, ProximityMapper, ProximityScope, ProximitySignal, Tone};
pub use scheduler::{DetectionScheduler, TickOutcome};
pub use session::{Adapters, CycleReport, ScannerSession, SessionState, TickReport};
pub use source::{open_source, FrameSource, SourceConfig, StillImageSource, SyntheticSource};
pub use speech::{Dispatch, SpeechAdapter, SpeechDispatcher, SpeechState, Utterance};
pub use status::{Status, StatusBoard, StatusLevel};
pub use worker::ExecutionMode;
