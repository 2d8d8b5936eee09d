use anyhow::Result;
use image::{Rgb, RgbImage};

use super::{FrameSource, SourceConfig};
use crate::error::ScannerError;
use crate::frame::Frame;

/// Frames per lamp phase.
const LAMP_PHASE_FRAMES: u64 = 60;

/// Synthetic street scene.
///
/// Draws a dark road, a traffic light in the upper right whose lamp toggles
/// between red and green every `LAMP_PHASE_FRAMES` frames, and a block that
/// grows as it "approaches" the camera.
pub struct SyntheticSource {
    config: SourceConfig,
    frame_count: u64,
    open: bool,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            open: false,
        }
    }

    fn render(&self) -> RgbImage {
        let (w, h) = (self.config.width, self.config.height);
        let mut img = RgbImage::from_pixel(w, h, Rgb([28, 30, 34]));

        let red_phase = (self.frame_count / LAMP_PHASE_FRAMES) % 2 == 0;
        let lamp = if red_phase {
            Rgb([235, 40, 32])
        } else {
            Rgb([30, 215, 70])
        };
        fill(&mut img, w.saturating_sub(80), 20, 40, 90, Rgb([10, 10, 10]));
        fill(&mut img, w.saturating_sub(72), 30, 24, 24, lamp);

        let grow = (self.frame_count % 120) as u32;
        fill(
            &mut img,
            (w / 3).saturating_sub(grow),
            (h / 3).saturating_sub(grow / 2),
            120 + grow * 2,
            80 + grow,
            Rgb([200, 190, 60]),
        );
        img
    }
}

fn fill(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x1 = x.saturating_add(w).min(img.width());
    let y1 = y.saturating_add(h).min(img.height());
    for py in y.min(y1)..y1 {
        for px in x.min(x1)..x1 {
            img.put_pixel(px, py, color);
        }
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("{} (synthetic)", self.config.uri)
    }

    /// Synthetic sources are always available.
    fn open(&mut self) -> Result<()> {
        log::info!("SyntheticSource: opened {}", self.config.uri);
        self.open = true;
        Ok(())
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.open.then_some((self.config.width, self.config.height))
    }

    fn snapshot(&mut self) -> Result<Frame> {
        if !self.open {
            return Err(ScannerError::invalid_input("synthetic source not opened").into());
        }
        self.frame_count += 1;
        Ok(Frame::new(self.render()))
    }

    fn release(&mut self) {
        if self.open {
            log::info!(
                "SyntheticSource: released {} after {} frames",
                self.config.uri,
                self.frame_count
            );
        }
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{classify_sample, ColorState, ColorThresholds};
    use crate::frame::Rect;

    #[test]
    fn snapshot_requires_open() {
        let mut source = SyntheticSource::new(SourceConfig::default());
        assert!(source.dimensions().is_none());
        assert!(source.snapshot().is_err());
        source.open().unwrap();
        assert_eq!(source.dimensions(), Some((640, 480)));
        let frame = source.snapshot().unwrap();
        assert_eq!((frame.width(), frame.height()), (640, 480));
        source.release();
        assert!(source.snapshot().is_err());
    }

    #[test]
    fn lamp_starts_red_and_turns_green() {
        let mut source = SyntheticSource::new(SourceConfig::default());
        source.open().unwrap();
        let lamp = Rect::new(568.0, 30.0, 24.0, 24.0);
        let first = source.snapshot().unwrap();
        let sample = first.sample_region(&lamp, 0.25, 8).unwrap();
        assert_eq!(classify_sample(&sample, &ColorThresholds::default()), ColorState::Red);

        for _ in 0..LAMP_PHASE_FRAMES {
            source.snapshot().unwrap();
        }
        let later = source.snapshot().unwrap();
        let sample = later.sample_region(&lamp, 0.25, 8).unwrap();
        assert_eq!(classify_sample(&sample, &ColorThresholds::default()), ColorState::Green);
    }
}
