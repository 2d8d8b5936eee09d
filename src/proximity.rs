//! Proximity-to-audio mapping.
//!
//! The largest bounding-box area fraction of the cycle stands in for "how close
//! is the nearest thing of interest". Two output policies exist: a continuous
//! tone whose gain follows the fraction, or short pulses rate-limited to one per
//! interval.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::frame::Rect;

pub const TONE_MIN_VOLUME: f32 = 0.02;
pub const TONE_MAX_VOLUME: f32 = 0.30;
pub const TONE_GAIN_PER_FRACTION: f32 = 2.5;

/// Which detections feed the proximity signal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityScope {
    /// Only cars, buses and traffic lights.
    #[default]
    Targets,
    /// Every detection the detector reports.
    AllDetections,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AudioPolicy {
    /// Persistent oscillator, gain ramped toward the mapped volume.
    ContinuousTone { frequency_hz: f32, ramp_ms: u64 },
    /// Short sine pulses, at most one per `interval_ms`.
    Pulses {
        interval_ms: u64,
        duration_ms: u64,
        frequency_hz: f32,
        /// Scale pulse volume with proximity instead of using `fixed_volume`.
        scale_volume: bool,
        fixed_volume: f32,
    },
}

impl AudioPolicy {
    pub fn continuous() -> Self {
        AudioPolicy::ContinuousTone {
            frequency_hz: 880.0,
            ramp_ms: 80,
        }
    }

    pub fn pulses() -> Self {
        AudioPolicy::Pulses {
            interval_ms: 600,
            duration_ms: 120,
            frequency_hz: 1000.0,
            scale_volume: false,
            fixed_volume: 0.12,
        }
    }
}

impl Default for AudioPolicy {
    fn default() -> Self {
        Self::continuous()
    }
}

/// One short sine tone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tone {
    pub frequency_hz: f32,
    pub duration: Duration,
    pub volume: f32,
}

/// Audio output.
pub trait AudioSink: Send {
    /// False when the host has no audio output.
    fn is_available(&self) -> bool {
        true
    }

    /// Set the persistent oscillator frequency and start it (silent).
    fn start_tone(&mut self, frequency_hz: f32) -> Result<()>;

    /// Cancel any ramp not yet reached and ramp the oscillator gain to `target`
    /// over `ramp`, measured from the audio clock's current time.
    fn ramp_gain(&mut self, target: f32, ramp: Duration) -> Result<()>;

    /// Play one pulse.
    fn pulse(&mut self, tone: Tone) -> Result<()>;

    /// Stop all output.
    fn silence(&mut self) -> Result<()>;
}

/// Clipped box area over frame area. Zero for an empty frame.
pub fn area_fraction(rect: &Rect, frame_width: u32, frame_height: u32) -> f32 {
    let frame_area = frame_width as f32 * frame_height as f32;
    if frame_area <= 0.0 {
        return 0.0;
    }
    rect.clip(frame_width, frame_height).area() / frame_area
}

/// Largest area fraction among `rects`, 0 when there are none.
pub fn max_area_fraction<'a>(
    rects: impl IntoIterator<Item = &'a Rect>,
    frame_width: u32,
    frame_height: u32,
) -> f32 {
    rects
        .into_iter()
        .map(|r| area_fraction(r, frame_width, frame_height))
        .fold(0.0, f32::max)
}

/// Continuous-tone gain for an area fraction, in `[0.02, 0.30]`.
pub fn tone_volume(fraction: f32) -> f32 {
    (fraction * TONE_GAIN_PER_FRACTION + TONE_MIN_VOLUME).clamp(TONE_MIN_VOLUME, TONE_MAX_VOLUME)
}

/// Pulse volume for an area fraction, in `[0.0625, 0.30]`.
pub fn pulse_volume(fraction: f32) -> f32 {
    0.05 + 0.25 * fraction.clamp(0.05, 1.0)
}

/// What the mapper did this cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProximitySignal {
    pub fraction: f32,
    pub volume: f32,
    pub pulsed: bool,
}

pub struct ProximityMapper {
    policy: AudioPolicy,
    last_pulse_ms: Option<u64>,
}

impl ProximityMapper {
    pub fn new(policy: AudioPolicy) -> Self {
        Self {
            policy,
            last_pulse_ms: None,
        }
    }

    pub fn policy(&self) -> AudioPolicy {
        self.policy
    }

    /// Prepare the sink for a session.
    pub fn start(&mut self, sink: &mut dyn AudioSink) -> Result<()> {
        self.last_pulse_ms = None;
        if let AudioPolicy::ContinuousTone { frequency_hz, .. } = self.policy {
            sink.start_tone(frequency_hz)?;
        }
        Ok(())
    }

    /// Map this cycle's boxes to audio. `rects` are the boxes in scope.
    pub fn update(
        &mut self,
        rects: &[Rect],
        frame_width: u32,
        frame_height: u32,
        now_ms: u64,
        sink: &mut dyn AudioSink,
    ) -> Result<ProximitySignal> {
        let fraction = max_area_fraction(rects, frame_width, frame_height);
        match self.policy {
            AudioPolicy::ContinuousTone { ramp_ms, .. } => {
                let volume = tone_volume(fraction);
                sink.ramp_gain(volume, Duration::from_millis(ramp_ms))?;
                Ok(ProximitySignal {
                    fraction,
                    volume,
                    pulsed: false,
                })
            }
            AudioPolicy::Pulses {
                interval_ms,
                duration_ms,
                frequency_hz,
                scale_volume,
                fixed_volume,
            } => {
                let volume = if scale_volume {
                    pulse_volume(fraction)
                } else {
                    fixed_volume
                };
                // A pulse never starts before the previous one has finished.
                let gap = interval_ms.max(duration_ms);
                let due = self
                    .last_pulse_ms
                    .map_or(true, |last| now_ms.saturating_sub(last) >= gap);
                let pulsed = !rects.is_empty() && due;
                if pulsed {
                    sink.pulse(Tone {
                        frequency_hz,
                        duration: Duration::from_millis(duration_ms),
                        volume,
                    })?;
                    self.last_pulse_ms = Some(now_ms);
                }
                Ok(ProximitySignal {
                    fraction,
                    volume,
                    pulsed,
                })
            }
        }
    }

    /// Silence output when a session stops.
    pub fn stop(&mut self, sink: &mut dyn AudioSink) -> Result<()> {
        if let AudioPolicy::ContinuousTone { ramp_ms, .. } = self.policy {
            sink.ramp_gain(0.0, Duration::from_millis(ramp_ms))?;
        }
        sink.silence()
    }
}
