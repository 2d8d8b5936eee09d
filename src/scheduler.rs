//! Detection scheduler.
//!
//! `tick` is called as often as the host offers (display refresh). A new cycle
//! starts only when the minimum interval has passed and no earlier cycle is
//! still waiting on the detector. After `stop`, no cycle starts and the result
//! of an in-flight cycle is dropped on arrival.

use std::time::Duration;

use anyhow::anyhow;

use crate::detect::{Detection, SharedBackend};
use crate::error::{Adapter, ScannerError};
use crate::frame::Frame;
use crate::source::FrameSource;
use crate::worker::{CallState, ExecutionMode, PendingCall};

pub const DEFAULT_MIN_INTERVAL_MS: u64 = 90;

/// A detection cycle whose detector call has returned.
#[derive(Clone, Debug)]
pub struct CompletedCycle {
    pub cycle: u64,
    pub started_ms: u64,
    /// The snapshot the detector ran on; boxes refer to it.
    pub frame: Frame,
    pub detections: Vec<Detection>,
}

#[derive(Debug)]
pub enum TickOutcome {
    /// Minimum interval not reached.
    Throttled,
    /// A cycle is in flight; nothing new was started.
    Waiting,
    /// Precondition not met (no frame yet, zero-area frame).
    Skipped(ScannerError),
    /// Detector call issued and still pending.
    Started { cycle: u64 },
    /// Detector returned; the caller classifies and dispatches.
    Completed(CompletedCycle),
    /// The cycle was abandoned. The next tick retries.
    Failed(ScannerError),
    /// Scheduler stopped.
    Stopped,
}

struct InFlight {
    cycle: u64,
    started_ms: u64,
    frame: Frame,
    call: PendingCall<anyhow::Result<Vec<Detection>>>,
}

pub struct DetectionScheduler {
    min_interval_ms: u64,
    mode: ExecutionMode,
    last_cycle_start: Option<u64>,
    next_cycle: u64,
    in_flight: Option<InFlight>,
    stopped: bool,
}

impl DetectionScheduler {
    pub fn new(min_interval_ms: u64, mode: ExecutionMode) -> Self {
        Self {
            min_interval_ms,
            mode,
            last_cycle_start: None,
            next_cycle: 0,
            in_flight: None,
            stopped: false,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// No further cycles start; a pending result is discarded.
    pub fn stop(&mut self) {
        self.stopped = true;
        if let Some(flight) = self.in_flight.take() {
            log::debug!("discarding in-flight detection cycle {}", flight.cycle);
        }
    }

    pub fn tick(
        &mut self,
        now_ms: u64,
        source: &mut dyn FrameSource,
        backend: &SharedBackend,
    ) -> TickOutcome {
        if self.stopped {
            return TickOutcome::Stopped;
        }
        if self.in_flight.is_some() {
            return self.poll_in_flight(None);
        }
        if let Some(last) = self.last_cycle_start {
            if now_ms.saturating_sub(last) < self.min_interval_ms {
                return TickOutcome::Throttled;
            }
        }
        self.last_cycle_start = Some(now_ms);

        let frame = match source.snapshot().and_then(|f| f.ensure_non_empty().map(|_| f)) {
            Ok(frame) => frame,
            Err(e) => {
                return match ScannerError::classify(Adapter::FrameSource, &e) {
                    skip @ ScannerError::InvalidInput(_) => TickOutcome::Skipped(skip),
                    other => {
                        log::warn!("frame snapshot failed: {}", other);
                        TickOutcome::Failed(other)
                    }
                };
            }
        };

        let cycle = self.next_cycle;
        self.next_cycle += 1;
        let job_backend = backend.clone();
        let job_frame = frame.clone();
        let call = PendingCall::start(self.mode, "detect", move || {
            let mut guard = job_backend
                .lock()
                .map_err(|_| anyhow!("detector lock poisoned"))?;
            let detections = guard.detect(&job_frame);
            detections
        });
        let call = match call {
            Ok(call) => call,
            Err(e) => {
                let err = ScannerError::classify(Adapter::Detector, &e);
                log::warn!("detection cycle {} not started: {}", cycle, err);
                return TickOutcome::Failed(err);
            }
        };
        self.in_flight = Some(InFlight {
            cycle,
            started_ms: now_ms,
            frame,
            call,
        });
        match self.poll_in_flight(None) {
            TickOutcome::Waiting => TickOutcome::Started { cycle },
            other => other,
        }
    }

    /// Block up to `timeout` for the in-flight cycle.
    pub fn wait(&mut self, timeout: Duration) -> TickOutcome {
        if self.stopped {
            return TickOutcome::Stopped;
        }
        if self.in_flight.is_none() {
            return TickOutcome::Throttled;
        }
        self.poll_in_flight(Some(timeout))
    }

    fn poll_in_flight(&mut self, timeout: Option<Duration>) -> TickOutcome {
        let Some(flight) = self.in_flight.as_mut() else {
            return TickOutcome::Throttled;
        };
        let state = match timeout {
            Some(t) => flight.call.wait(t),
            None => flight.call.poll(),
        };
        let result = match state {
            CallState::Pending => return TickOutcome::Waiting,
            CallState::Done(result) => result,
            CallState::Lost => Err(anyhow!("detector worker exited without a result")),
        };
        let Some(flight) = self.in_flight.take() else {
            return TickOutcome::Throttled;
        };
        match result {
            Ok(detections) => TickOutcome::Completed(CompletedCycle {
                cycle: flight.cycle,
                started_ms: flight.started_ms,
                frame: flight.frame,
                detections,
            }),
            Err(e) => {
                let err = ScannerError::classify(Adapter::Detector, &e);
                log::warn!("detection cycle {} abandoned: {}", flight.cycle, err);
                TickOutcome::Failed(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectorBackend, ScriptedBackend};
    use crate::frame::Rect;
    use crate::source::{SourceConfig, SyntheticSource};
    use anyhow::Result;
    use std::sync::{Arc, Mutex};

    fn source() -> SyntheticSource {
        let mut s = SyntheticSource::new(SourceConfig::default());
        s.open().unwrap();
        s
    }

    fn car_backend() -> SharedBackend {
        Arc::new(Mutex::new(ScriptedBackend::repeating(vec![Detection::new(
            "car",
            0.81,
            Rect::new(10.0, 10.0, 100.0, 50.0),
        )])))
    }

    struct Flaky {
        calls: u32,
    }

    impl DetectorBackend for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            self.calls += 1;
            if self.calls == 1 {
                Err(anyhow!("transient"))
            } else {
                Ok(Vec::new())
            }
        }
    }

    #[test]
    fn inline_cycles_complete_within_the_tick() {
        let mut sched = DetectionScheduler::new(90, ExecutionMode::Inline);
        let mut src = source();
        match sched.tick(0, &mut src, &car_backend()) {
            TickOutcome::Completed(c) => {
                assert_eq!(c.cycle, 0);
                assert_eq!(c.detections.len(), 1);
                assert_eq!(c.frame.width(), 640);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn ticks_inside_the_interval_are_noops() {
        let mut sched = DetectionScheduler::new(90, ExecutionMode::Inline);
        let mut src = source();
        let backend = car_backend();
        let mut completed = 0;
        for now in (0..=900).step_by(16) {
            if let TickOutcome::Completed(_) = sched.tick(now, &mut src, &backend) {
                completed += 1;
            }
        }
        // 0, 96, 192, ... every sixth 16 ms tick.
        assert_eq!(completed, 10);
    }

    #[test]
    fn failed_cycle_does_not_stop_the_scheduler() {
        let mut sched = DetectionScheduler::new(90, ExecutionMode::Inline);
        let mut src = source();
        let backend: SharedBackend = Arc::new(Mutex::new(Flaky { calls: 0 }));
        assert!(matches!(
            sched.tick(0, &mut src, &backend),
            TickOutcome::Failed(ScannerError::AdapterCallFailed { .. })
        ));
        assert!(matches!(sched.tick(50, &mut src, &backend), TickOutcome::Throttled));
        assert!(matches!(sched.tick(90, &mut src, &backend), TickOutcome::Completed(_)));
    }

    #[test]
    fn missing_frame_skips_the_cycle() {
        let mut sched = DetectionScheduler::new(90, ExecutionMode::Inline);
        let mut closed = SyntheticSource::new(SourceConfig::default());
        assert!(matches!(
            sched.tick(0, &mut closed, &car_backend()),
            TickOutcome::Skipped(ScannerError::InvalidInput(_))
        ));
    }

    #[test]
    fn threaded_cycle_blocks_new_cycles_until_it_returns() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        struct Gated(std::sync::mpsc::Receiver<()>);
        impl DetectorBackend for Gated {
            fn name(&self) -> &'static str {
                "gated"
            }
            fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
                self.0.recv().map_err(|_| anyhow!("gate closed"))?;
                Ok(Vec::new())
            }
        }
        let backend: SharedBackend = Arc::new(Mutex::new(Gated(release_rx)));
        let mut sched = DetectionScheduler::new(90, ExecutionMode::Threaded);
        let mut src = source();

        assert!(matches!(sched.tick(0, &mut src, &backend), TickOutcome::Started { cycle: 0 }));
        assert!(matches!(sched.tick(500, &mut src, &backend), TickOutcome::Waiting));
        release_tx.send(()).unwrap();
        assert!(matches!(
            sched.wait(Duration::from_secs(5)),
            TickOutcome::Completed(CompletedCycle { cycle: 0, .. })
        ));
        assert!(matches!(sched.tick(600, &mut src, &backend), TickOutcome::Started { cycle: 1 }));
        release_tx.send(()).unwrap();
    }

    #[test]
    fn stop_discards_in_flight_cycle() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        struct Gated(std::sync::mpsc::Receiver<()>);
        impl DetectorBackend for Gated {
            fn name(&self) -> &'static str {
                "gated"
            }
            fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
                self.0.recv().map_err(|_| anyhow!("gate closed"))?;
                Ok(vec![Detection::new("bus", 0.9, Rect::new(0.0, 0.0, 10.0, 10.0))])
            }
        }
        let backend: SharedBackend = Arc::new(Mutex::new(Gated(release_rx)));
        let mut sched = DetectionScheduler::new(90, ExecutionMode::Threaded);
        let mut src = source();

        assert!(matches!(sched.tick(0, &mut src, &backend), TickOutcome::Started { .. }));
        sched.stop();
        release_tx.send(()).unwrap();
        // Wait for the worker to finish with the backend.
        drop(backend.lock().unwrap());
        assert!(!sched.in_flight());
        assert!(matches!(sched.tick(1000, &mut src, &backend), TickOutcome::Stopped));
        assert!(matches!(sched.wait(Duration::from_millis(50)), TickOutcome::Stopped));
    }
}
