//! Error taxonomy for the feedback pipeline.
//!
//! None of these errors is fatal to the process. The session inspects them
//! (via `anyhow::Error::downcast_ref`) to decide whether a feature degrades,
//! a cycle is abandoned, or a cycle is skipped.

use std::fmt;

/// External collaborator names, used in status messages and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Adapter {
    FrameSource,
    Detector,
    Ocr,
    Speech,
    Audio,
}

impl Adapter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Adapter::FrameSource => "camera",
            Adapter::Detector => "detector",
            Adapter::Ocr => "ocr",
            Adapter::Speech => "speech",
            Adapter::Audio => "audio",
        }
    }
}

impl fmt::Display for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannerError {
    /// Adapter not ready or not supported by the host. Surfaced once; the
    /// dependent feature degrades.
    AdapterUnavailable { adapter: Adapter, reason: String },
    /// One call to an adapter failed. Logged, cycle abandoned, next tick retries.
    AdapterCallFailed { adapter: Adapter, reason: String },
    /// Precondition not met yet (zero-area frame, no dimensions). Cycle skipped.
    InvalidInput(String),
}

impl ScannerError {
    pub fn unavailable(adapter: Adapter, reason: impl Into<String>) -> Self {
        ScannerError::AdapterUnavailable {
            adapter,
            reason: reason.into(),
        }
    }

    pub fn call_failed(adapter: Adapter, reason: impl Into<String>) -> Self {
        ScannerError::AdapterCallFailed {
            adapter,
            reason: reason.into(),
        }
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        ScannerError::InvalidInput(reason.into())
    }

    /// Classify an arbitrary adapter error. Anything that is not already a
    /// `ScannerError` counts as a transient call failure.
    pub fn classify(adapter: Adapter, err: &anyhow::Error) -> ScannerError {
        match err.downcast_ref::<ScannerError>() {
            Some(known) => known.clone(),
            None => ScannerError::call_failed(adapter, format!("{:#}", err)),
        }
    }
}

impl fmt::Display for ScannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScannerError::AdapterUnavailable { adapter, reason } => {
                write!(f, "{} unavailable: {}", adapter, reason)
            }
            ScannerError::AdapterCallFailed { adapter, reason } => {
                write!(f, "{} call failed: {}", adapter, reason)
            }
            ScannerError::InvalidInput(reason) => write!(f, "invalid input: {}", reason),
        }
    }
}

impl std::error::Error for ScannerError {}
