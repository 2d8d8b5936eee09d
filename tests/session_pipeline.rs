use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use image::{Rgb, RgbImage};

use smart_scanner::error::{Adapter, ScannerError};
use smart_scanner::status::StatusLevel;
use smart_scanner::{
    Adapters, AudioPolicy, AudioSink, ColorState, Detection, DetectorBackend, Dispatch,
    ExecutionMode, Frame, FrameSource, OverlayBox, OverlaySink, ProximityScope, Rect,
    ScannerConfig, ScannerSession, ScriptedBackend, ScriptedOcr, SessionState, SpeechAdapter,
    Tone,
};

const RED_LAMP: Rect = Rect {
    x: 560.0,
    y: 20.0,
    w: 40.0,
    h: 90.0,
};

#[derive(Clone, Default)]
struct SourceControl {
    fail_open: Arc<AtomicBool>,
    gone: Arc<AtomicBool>,
    releases: Arc<AtomicUsize>,
}

/// 640x480 gray street with a solid red lamp.
struct FixedSource {
    image: RgbImage,
    open: bool,
    control: SourceControl,
}

impl FixedSource {
    fn new(control: SourceControl) -> Self {
        let mut image = RgbImage::from_pixel(640, 480, Rgb([90, 90, 90]));
        for y in 20..110 {
            for x in 560..600 {
                image.put_pixel(x, y, Rgb([230, 30, 30]));
            }
        }
        Self {
            image,
            open: false,
            control,
        }
    }
}

impl FrameSource for FixedSource {
    fn describe(&self) -> String {
        "fixed".to_string()
    }

    fn open(&mut self) -> Result<()> {
        if self.control.fail_open.load(Ordering::SeqCst) {
            return Err(ScannerError::unavailable(Adapter::FrameSource, "permission denied").into());
        }
        self.open = true;
        Ok(())
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.open.then_some((640, 480))
    }

    fn snapshot(&mut self) -> Result<Frame> {
        if !self.open {
            return Err(ScannerError::invalid_input("not open").into());
        }
        Ok(Frame::new(self.image.clone()))
    }

    fn is_live(&self) -> bool {
        !self.control.gone.load(Ordering::SeqCst)
    }

    fn release(&mut self) {
        self.open = false;
        self.control.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct SpeechLog {
    spoken: Arc<Mutex<Vec<(String, String)>>>,
    cancels: Arc<AtomicUsize>,
    muted: Arc<AtomicBool>,
}

impl SpeechLog {
    fn texts(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _)| text.clone())
            .collect()
    }
}

impl SpeechAdapter for SpeechLog {
    fn is_available(&self) -> bool {
        !self.muted.load(Ordering::SeqCst)
    }

    fn speak(&mut self, text: &str, language: &str) -> Result<()> {
        self.spoken
            .lock()
            .unwrap()
            .push((text.to_string(), language.to_string()));
        Ok(())
    }

    fn cancel_all(&mut self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct AudioLog {
    ramps: Arc<Mutex<Vec<f32>>>,
    pulses: Arc<Mutex<Vec<Tone>>>,
    silenced: Arc<AtomicUsize>,
}

impl AudioSink for AudioLog {
    fn start_tone(&mut self, _frequency_hz: f32) -> Result<()> {
        Ok(())
    }

    fn ramp_gain(&mut self, target: f32, _ramp: Duration) -> Result<()> {
        self.ramps.lock().unwrap().push(target);
        Ok(())
    }

    fn pulse(&mut self, tone: Tone) -> Result<()> {
        self.pulses.lock().unwrap().push(tone);
        Ok(())
    }

    fn silence(&mut self) -> Result<()> {
        self.silenced.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct OverlayLog {
    draws: Arc<Mutex<Vec<Vec<OverlayBox>>>>,
}

impl OverlaySink for OverlayLog {
    fn draw(&mut self, _w: u32, _h: u32, boxes: &[OverlayBox]) -> Result<()> {
        self.draws.lock().unwrap().push(boxes.to_vec());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Blocks each detect call until the test releases it.
struct GatedBackend {
    gate: Receiver<()>,
    batch: Vec<Detection>,
}

impl DetectorBackend for GatedBackend {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        let _ = self.gate.recv();
        Ok(self.batch.clone())
    }
}

struct Harness {
    source: SourceControl,
    speech: SpeechLog,
    audio: AudioLog,
    overlay: OverlayLog,
}

impl Harness {
    fn new() -> Self {
        Self {
            source: SourceControl::default(),
            speech: SpeechLog::default(),
            audio: AudioLog::default(),
            overlay: OverlayLog::default(),
        }
    }

    fn session(
        &self,
        config: ScannerConfig,
        detector: Option<Box<dyn DetectorBackend>>,
        ocr_answers: Option<Vec<&str>>,
    ) -> ScannerSession {
        let detector = detector.map(|backend| {
            let shared: smart_scanner::SharedBackend = Arc::new(Mutex::new(BoxedBackend(backend)));
            shared
        });
        let ocr = ocr_answers.map(|answers| {
            let shared: smart_scanner::SharedOcr = Arc::new(Mutex::new(ScriptedOcr::new(
                answers.into_iter().map(String::from).collect(),
            )));
            shared
        });
        ScannerSession::new(
            config,
            Adapters {
                source: Box::new(FixedSource::new(self.source.clone())),
                detector,
                ocr,
                speech: Box::new(self.speech.clone()),
                audio: Box::new(self.audio.clone()),
                overlay: Box::new(self.overlay.clone()),
            },
        )
    }
}

struct BoxedBackend(Box<dyn DetectorBackend>);

impl DetectorBackend for BoxedBackend {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self.0.detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        self.0.warm_up()
    }
}

/// Model that never finishes loading.
struct BrokenModel;

impl DetectorBackend for BrokenModel {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(vec![car()])
    }

    fn warm_up(&mut self) -> Result<()> {
        Err(anyhow::anyhow!("model weights missing"))
    }
}

fn config() -> ScannerConfig {
    ScannerConfig {
        ocr_enabled: false,
        ..ScannerConfig::default()
    }
}

fn car() -> Detection {
    Detection::new("car", 0.81, Rect::new(10.0, 10.0, 100.0, 50.0))
}

fn repeating(batch: Vec<Detection>) -> Option<Box<dyn DetectorBackend>> {
    Some(Box::new(ScriptedBackend::repeating(batch)))
}

#[test]
fn car_cycle_labels_beeps_and_speaks() {
    let harness = Harness::new();
    let mut session = harness.session(config(), repeating(vec![car()]), None);
    session.start().unwrap();
    assert_eq!(session.state(), SessionState::Running);

    let cycle = session.tick(0).cycle.expect("inline cycle completes on first tick");
    assert_eq!(cycle.targets.len(), 1);
    assert_eq!(cycle.targets[0].display_label, "car 81%");
    assert_eq!(cycle.overlay.len(), 1);
    assert_eq!(cycle.overlay[0].label, "car 81%");

    let proximity = cycle.proximity.expect("audio available");
    assert!((proximity.fraction - 0.0163).abs() < 1e-3);
    assert!((proximity.volume - 0.0608).abs() < 1e-3);
    assert!((harness.audio.ramps.lock().unwrap()[0] - 0.0608).abs() < 1e-3);

    assert_eq!(
        harness.speech.spoken.lock().unwrap().clone(),
        vec![("Car".to_string(), "en-US".to_string())]
    );
    assert_eq!(session.status().spoken(), Some("Car"));
}

#[test]
fn red_traffic_light_is_announced_with_its_color() {
    let harness = Harness::new();
    let light = Detection::new("traffic light", 0.7, RED_LAMP);
    let mut session = harness.session(config(), repeating(vec![light]), None);
    session.start().unwrap();

    let cycle = session.tick(0).cycle.unwrap();
    assert_eq!(cycle.targets[0].color, Some(ColorState::Red));
    assert_eq!(cycle.targets[0].display_label, "traffic light: red");
    assert_eq!(harness.speech.texts(), vec!["Traffic light red"]);
}

#[test]
fn uninteresting_detections_are_ignored() {
    let harness = Harness::new();
    let person = Detection::new("person", 0.95, Rect::new(0.0, 0.0, 320.0, 480.0));
    let mut session = harness.session(config(), repeating(vec![person]), None);
    session.start().unwrap();

    let cycle = session.tick(0).cycle.unwrap();
    assert!(cycle.targets.is_empty());
    assert!(cycle.overlay.is_empty());
    assert!((cycle.proximity.unwrap().volume - 0.02).abs() < 1e-6);
    assert!(harness.speech.texts().is_empty());
}

#[test]
fn repeated_announcements_respect_the_cooldown() {
    let harness = Harness::new();
    let mut session = harness.session(config(), repeating(vec![car()]), None);
    session.start().unwrap();

    let mut cycles = 0;
    for now in (0..=3200).step_by(100) {
        if session.tick(now).cycle.is_some() {
            cycles += 1;
        }
    }
    assert!(cycles > 30);
    // Spoken at 0 and again once 3000 ms have passed.
    assert_eq!(harness.speech.texts(), vec!["Car", "Car"]);
}

#[test]
fn cycles_are_throttled_to_the_minimum_interval() {
    let harness = Harness::new();
    let mut session = harness.session(config(), repeating(vec![car()]), None);
    session.start().unwrap();

    let completed = (0..=900)
        .step_by(16)
        .filter(|now| session.tick(*now).cycle.is_some())
        .count();
    assert_eq!(completed, 10);
}

#[test]
fn stop_discards_an_in_flight_cycle() {
    let harness = Harness::new();
    let (release, gate): (Sender<()>, Receiver<()>) = mpsc::channel();
    let backend = GatedBackend {
        gate,
        batch: vec![car()],
    };
    let cfg = ScannerConfig {
        execution: ExecutionMode::Threaded,
        ..config()
    };
    let mut session = harness.session(cfg, Some(Box::new(backend)), None);
    session.start().unwrap();

    assert!(session.tick(0).cycle.is_none());
    assert!(session.detection_in_flight());

    session.stop();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!session.detection_in_flight());
    release.send(()).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    assert!(session.tick(200).cycle.is_none());
    assert!(harness.speech.texts().is_empty());
    assert!(harness.overlay.draws.lock().unwrap().is_empty());
    assert!(harness.audio.ramps.lock().unwrap().iter().all(|gain| *gain == 0.0));
    assert_eq!(harness.audio.silenced.load(Ordering::SeqCst), 1);
    assert_eq!(harness.source.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn threaded_cycles_complete_on_a_later_tick() {
    let harness = Harness::new();
    let cfg = ScannerConfig {
        execution: ExecutionMode::Threaded,
        ..config()
    };
    let mut session = harness.session(cfg, repeating(vec![car()]), None);
    session.start().unwrap();

    let mut now = 0;
    let cycle = loop {
        if let Some(cycle) = session.tick(now).cycle {
            break cycle;
        }
        assert!(now < 5_000, "threaded cycle never completed");
        std::thread::sleep(Duration::from_millis(2));
        now += 16;
    };
    assert_eq!(cycle.cycle, 0);
    assert_eq!(harness.speech.texts(), vec!["Car"]);
}

#[test]
fn hebrew_ocr_text_is_spoken_in_hebrew() {
    let harness = Harness::new();
    let cfg = ScannerConfig {
        ocr_enabled: true,
        ..ScannerConfig::default()
    };
    let mut session = harness.session(cfg, None, Some(vec!["  שלום  "]));
    session.start().unwrap();

    assert!(session.tick(0).ocr_spoken.is_none());
    let spoken = session.tick(16).ocr_spoken.expect("ocr result collected");
    assert_eq!(spoken.language, "he-IL");
    assert_eq!(spoken.text, "מילים: שלום");
    assert_eq!(
        harness.speech.spoken.lock().unwrap().clone(),
        vec![("מילים: שלום".to_string(), "he-IL".to_string())]
    );
}

#[test]
fn ocr_runs_on_its_own_cadence() {
    let harness = Harness::new();
    let cfg = ScannerConfig {
        ocr_enabled: true,
        ..ScannerConfig::default()
    };
    let mut session = harness.session(cfg, None, Some(vec!["BUS   STOP", "", "EXIT"]));
    session.start().unwrap();

    let spoken: Vec<String> = (0..=4000)
        .step_by(100)
        .filter_map(|now| session.tick(now).ocr_spoken)
        .map(|u| u.text)
        .collect();
    // Requests at 0, 1800 and 3600; the empty answer says nothing.
    assert_eq!(spoken, vec!["Words: BUS STOP", "Words: EXIT"]);
}

#[test]
fn missing_adapters_degrade_without_aborting() {
    let harness = Harness::new();
    harness.speech.muted.store(true, Ordering::SeqCst);
    let cfg = ScannerConfig {
        ocr_enabled: true,
        ..ScannerConfig::default()
    };
    let mut session = harness.session(cfg, None, None);
    session.start().unwrap();
    assert_eq!(session.state(), SessionState::Running);

    let status = session.status();
    assert_eq!(status.get(Adapter::FrameSource).unwrap().level, StatusLevel::Ready);
    assert_eq!(status.get(Adapter::Detector).unwrap().level, StatusLevel::Warn);
    assert_eq!(status.get(Adapter::Ocr).unwrap().level, StatusLevel::Warn);
    assert_eq!(status.get(Adapter::Speech).unwrap().level, StatusLevel::Warn);

    for now in (0..1000).step_by(16) {
        let report = session.tick(now);
        assert!(report.cycle.is_none());
        assert!(report.ocr_spoken.is_none());
    }
    session.stop();
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn muted_speech_still_draws_and_beeps() {
    let harness = Harness::new();
    harness.speech.muted.store(true, Ordering::SeqCst);
    let mut session = harness.session(config(), repeating(vec![car()]), None);
    session.start().unwrap();

    let cycle = session.tick(0).cycle.unwrap();
    assert!(cycle.spoken.is_empty());
    assert!(cycle.proximity.is_some());
    assert_eq!(harness.overlay.draws.lock().unwrap().len(), 1);
    assert!(harness.speech.texts().is_empty());
}

#[test]
fn restart_gets_a_fresh_cooldown() {
    let harness = Harness::new();
    let mut session = harness.session(config(), repeating(vec![car()]), None);
    session.start().unwrap();
    session.tick(0);
    session.stop();

    session.start().unwrap();
    session.tick(100);
    assert_eq!(harness.speech.texts(), vec!["Car", "Car"]);
}

#[test]
fn speak_last_result_interrupts_and_repeats() {
    let harness = Harness::new();
    let mut session = harness.session(config(), repeating(vec![car()]), None);
    session.start().unwrap();
    assert_eq!(session.speak_last_result(0).unwrap(), None);

    session.tick(0);
    assert_eq!(session.speak_last_result(500).unwrap(), Some(Dispatch::Spoken));
    assert_eq!(harness.speech.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(harness.speech.texts(), vec!["Car", "Car"]);

    // The explicit repeat refreshed the cooldown.
    for now in (600..3400).step_by(100) {
        session.tick(now);
    }
    assert_eq!(harness.speech.texts().len(), 2);
}

#[test]
fn proximity_scope_can_include_every_detection() {
    let person = Detection::new("person", 0.9, Rect::new(0.0, 0.0, 320.0, 240.0));

    let harness = Harness::new();
    let mut session = harness.session(config(), repeating(vec![car(), person.clone()]), None);
    session.start().unwrap();
    let targets_only = session.tick(0).cycle.unwrap().proximity.unwrap();
    assert!((targets_only.fraction - 0.0163).abs() < 1e-3);

    let harness = Harness::new();
    let cfg = ScannerConfig {
        proximity_scope: ProximityScope::AllDetections,
        ..config()
    };
    let mut session = harness.session(cfg, repeating(vec![car(), person]), None);
    session.start().unwrap();
    let all = session.tick(0).cycle.unwrap().proximity.unwrap();
    assert!((all.fraction - 0.25).abs() < 1e-4);
    assert!((all.volume - 0.30).abs() < 1e-6);
}

#[test]
fn pulses_are_rate_limited() {
    let harness = Harness::new();
    let cfg = ScannerConfig {
        audio: AudioPolicy::pulses(),
        ..config()
    };
    let mut session = harness.session(cfg, repeating(vec![car()]), None);
    session.start().unwrap();

    for now in (0..=1300).step_by(100) {
        session.tick(now);
    }
    let pulses = harness.audio.pulses.lock().unwrap().clone();
    // 0, 600 and 1200.
    assert_eq!(pulses.len(), 3);
    assert!(pulses.iter().all(|tone| tone.volume == 0.12));
}

#[test]
fn source_failure_fails_start() {
    let harness = Harness::new();
    harness.source.fail_open.store(true, Ordering::SeqCst);
    let mut session = harness.session(config(), repeating(vec![car()]), None);

    let err = session.start().unwrap_err();
    assert!(err.to_string().contains("camera unavailable"));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(
        session.status().get(Adapter::FrameSource).unwrap().level,
        StatusLevel::Warn
    );
    assert!(session.tick(0).cycle.is_none());
}

#[test]
fn lost_source_stops_the_session() {
    let harness = Harness::new();
    let mut session = harness.session(config(), repeating(vec![car()]), None);
    session.start().unwrap();
    assert!(session.tick(0).cycle.is_some());

    harness.source.gone.store(true, Ordering::SeqCst);
    assert!(session.tick(100).cycle.is_none());
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(harness.source.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_is_idempotent() {
    let harness = Harness::new();
    let mut session = harness.session(config(), repeating(vec![car()]), None);
    session.stop();
    session.start().unwrap();
    assert!(session.start().is_err());
    session.stop();
    session.stop();
    assert_eq!(harness.audio.silenced.load(Ordering::SeqCst), 1);
    drop(session);
    assert_eq!(harness.source.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn restart_does_not_wait_for_an_abandoned_detection() {
    let harness = Harness::new();
    let (release, gate) = mpsc::channel();
    let backend = GatedBackend {
        gate,
        batch: vec![car()],
    };
    let cfg = ScannerConfig {
        execution: ExecutionMode::Threaded,
        ..config()
    };
    let mut session = harness.session(cfg, Some(Box::new(backend)), None);
    session.start().unwrap();
    assert!(session.tick(0).cycle.is_none());
    assert!(session.detection_in_flight());
    session.stop();

    // The abandoned call still holds the detector; restart must not block on it.
    let (done_tx, done_rx) = mpsc::channel();
    std::thread::spawn(move || {
        let started = session.start();
        let _ = done_tx.send((started.is_ok(), session));
    });
    let (started, mut session) = done_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("start returned while the detector was busy");
    assert!(started);
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(
        session.status().get(Adapter::Detector).unwrap().level,
        StatusLevel::Pending
    );

    // Unblock every detect call from here on.
    drop(release);
    let mut now = 1_000;
    let cycle = loop {
        if let Some(cycle) = session.tick(now).cycle {
            break cycle;
        }
        assert!(now < 10_000, "detector never became ready after restart");
        std::thread::sleep(Duration::from_millis(2));
        now += 16;
    };
    assert_eq!(cycle.targets[0].display_label, "car 81%");
    assert_eq!(
        session.status().get(Adapter::Detector).unwrap().level,
        StatusLevel::Ready
    );
    // Only the new run's cycle reached the outputs.
    assert_eq!(harness.speech.texts(), vec!["Car"]);
}

#[test]
fn failed_warm_up_degrades_the_detector() {
    let harness = Harness::new();
    let cfg = ScannerConfig {
        ocr_enabled: true,
        ..ScannerConfig::default()
    };
    let mut session = harness.session(cfg, Some(Box::new(BrokenModel)), Some(vec!["EXIT"]));
    session.start().unwrap();
    assert_eq!(session.state(), SessionState::Running);

    let detector = session.status().get(Adapter::Detector).unwrap();
    assert_eq!(detector.level, StatusLevel::Warn);
    assert!(detector.message.contains("model weights missing"));

    let mut ocr_spoken = Vec::new();
    for now in (0..500).step_by(16) {
        let report = session.tick(now);
        assert!(report.cycle.is_none());
        ocr_spoken.extend(report.ocr_spoken.map(|u| u.text));
    }
    assert_eq!(ocr_spoken, vec!["Words: EXIT"]);
    assert!(harness.overlay.draws.lock().unwrap().is_empty());
}
