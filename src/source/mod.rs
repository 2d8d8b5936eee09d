//! Frame sources.
//!
//! A source supplies the frame the pipeline looks at: a live feed or a still
//! image. Sources are opened when a session starts and released when it stops.
//!
//! - `stub://<name>`: synthetic street scene (tests, demos)
//! - local image path: still image, same frame every time

use anyhow::{anyhow, Result};

use crate::frame::Frame;

pub mod still;
pub mod synthetic;

pub use still::StillImageSource;
pub use synthetic::SyntheticSource;

/// Frame source contract.
pub trait FrameSource: Send {
    /// Source identifier for logs and status.
    fn describe(&self) -> String;

    /// Acquire the underlying device or file.
    fn open(&mut self) -> Result<()>;

    /// Current frame size. `None` until the first frame is available.
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Snapshot of the current frame.
    ///
    /// Fails with `ScannerError::InvalidInput` before the first frame arrives.
    fn snapshot(&mut self) -> Result<Frame>;

    /// False once the source has gone away (device unplugged, stream ended).
    fn is_live(&self) -> bool {
        true
    }

    /// Release the device. Idempotent.
    fn release(&mut self);
}

/// Configuration for the session's frame source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceConfig {
    /// `stub://<name>` or a local image path.
    pub uri: String,
    /// Synthetic frame width.
    pub width: u32,
    /// Synthetic frame height.
    pub height: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: "stub://street".to_string(),
            width: 640,
            height: 480,
        }
    }
}

/// Build the source named by `config.uri`.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    if config.uri.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config.clone())));
    }
    if !is_local_file_path(&config.uri) {
        return Err(anyhow!(
            "source '{}' is not supported (expected stub:// or a local image path)",
            config.uri
        ));
    }
    Ok(Box::new(StillImageSource::new(&config.uri)))
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_uri_selects_synthetic_source() {
        let source = open_source(&SourceConfig::default()).unwrap();
        assert_eq!(source.describe(), "stub://street (synthetic)");
    }

    #[test]
    fn remote_uris_are_rejected() {
        let cfg = SourceConfig {
            uri: "rtsp://camera/stream".into(),
            ..SourceConfig::default()
        };
        assert!(open_source(&cfg).is_err());
    }

    #[test]
    fn blank_paths_are_rejected() {
        assert!(!is_local_file_path("   "));
        assert!(is_local_file_path("/tmp/sign.png"));
    }
}
