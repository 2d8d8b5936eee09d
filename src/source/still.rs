use std::path::PathBuf;

use anyhow::{anyhow, Result};

use super::FrameSource;
use crate::error::{Adapter, ScannerError};
use crate::frame::Frame;

/// Still image source. Every snapshot is the same decoded image.
pub struct StillImageSource {
    path: PathBuf,
    frame: Option<Frame>,
}

impl StillImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frame: None,
        }
    }
}

impl FrameSource for StillImageSource {
    fn describe(&self) -> String {
        format!("{} (still)", self.path.display())
    }

    fn open(&mut self) -> Result<()> {
        let decoded = image::open(&self.path).map_err(|e| {
            anyhow!(ScannerError::unavailable(
                Adapter::FrameSource,
                format!("cannot decode {}: {}", self.path.display(), e),
            ))
        })?;
        let frame = Frame::new(decoded.to_rgb8());
        log::info!(
            "StillImageSource: loaded {} ({}x{})",
            self.path.display(),
            frame.width(),
            frame.height()
        );
        self.frame = Some(frame);
        Ok(())
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.frame.as_ref().map(|f| (f.width(), f.height()))
    }

    fn snapshot(&mut self) -> Result<Frame> {
        self.frame
            .clone()
            .ok_or_else(|| ScannerError::invalid_input("still image not loaded").into())
    }

    fn release(&mut self) {
        self.frame = None;
    }
}
