//! scanner - run a Smart Scanner session in the terminal
//!
//! Drives the feedback pipeline at display-refresh rate against a synthetic
//! street scene or a still image. Speech, audio and overlay output go to the
//! log instead of a device.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use smart_scanner::config::parse_audio_policy;
use smart_scanner::ui::Ui;
use smart_scanner::{
    open_source, Adapters, AudioSink, BackendRegistry, ExecutionMode, OverlayBox, OverlaySink,
    ScannerConfig, ScannerSession, ScriptedBackend, ScriptedOcr, SharedOcr, SpeechAdapter, Tone,
};

/// ~60 Hz, the cadence a display refresh callback would offer.
const REFRESH: Duration = Duration::from_millis(16);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Frame source: stub://<name> or a local image path.
    #[arg(long, env = "SCANNER_SOURCE")]
    source: Option<String>,
    /// Detector backend (scripted, or tract with the backend-tract feature).
    #[arg(long)]
    backend: Option<String>,
    /// JSON detection script for the scripted backend.
    #[arg(long)]
    script: Option<PathBuf>,
    /// ONNX model path for the tract backend.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Minimum detection score for the tract backend.
    #[arg(long)]
    threshold: Option<f32>,
    /// Text the scripted OCR engine "reads", repeatable.
    #[arg(long = "ocr-text")]
    ocr_text: Vec<String>,
    /// Disable OCR.
    #[arg(long)]
    no_ocr: bool,
    /// Audio policy: tone or pulses.
    #[arg(long)]
    audio: Option<String>,
    /// Run adapter calls on worker threads.
    #[arg(long)]
    threaded: bool,
    /// Stop after this many seconds (0 = until Ctrl-C).
    #[arg(long, default_value_t = 10)]
    seconds: u64,
    /// Output style: auto, plain or pretty.
    #[arg(long)]
    ui: Option<String>,
}

/// Speech adapter that logs utterances.
struct LogSpeech;

impl SpeechAdapter for LogSpeech {
    fn speak(&mut self, text: &str, language: &str) -> Result<()> {
        log::info!("🔊 [{}] {}", language, text);
        Ok(())
    }

    fn cancel_all(&mut self) {
        log::debug!("speech cancelled");
    }
}

/// Audio sink that tracks the tone gain and logs pulses.
#[derive(Default)]
struct LogAudio {
    gain: f32,
}

impl AudioSink for LogAudio {
    fn start_tone(&mut self, frequency_hz: f32) -> Result<()> {
        log::debug!("tone oscillator at {} Hz", frequency_hz);
        Ok(())
    }

    fn ramp_gain(&mut self, target: f32, ramp: Duration) -> Result<()> {
        if (target - self.gain).abs() > 0.01 {
            log::debug!("tone gain {:.3} -> {:.3} over {:?}", self.gain, target, ramp);
        }
        self.gain = target;
        Ok(())
    }

    fn pulse(&mut self, tone: Tone) -> Result<()> {
        log::info!(
            "beep {} Hz {:?} vol {:.2}",
            tone.frequency_hz,
            tone.duration,
            tone.volume
        );
        Ok(())
    }

    fn silence(&mut self) -> Result<()> {
        self.gain = 0.0;
        Ok(())
    }
}

struct LogOverlay;

impl OverlaySink for LogOverlay {
    fn draw(&mut self, frame_width: u32, frame_height: u32, boxes: &[OverlayBox]) -> Result<()> {
        for b in boxes {
            log::debug!(
                "overlay {}x{}: {} at ({:.0},{:.0} {:.0}x{:.0}) stroke {:?}",
                frame_width,
                frame_height,
                b.label,
                b.rect.x,
                b.rect.y,
                b.rect.w,
                b.rect.h,
                b.style.stroke_rgba()
            );
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::from_flag(args.ui.as_deref(), std::io::stderr().is_terminal());

    let mut config = {
        let _stage = ui.stage("load config");
        ScannerConfig::load()?
    };
    if let Some(source) = &args.source {
        config.source.uri = source.clone();
    }
    if let Some(audio) = &args.audio {
        config.audio = parse_audio_policy(audio)?;
    }
    if let Some(backend) = &args.backend {
        config.detector_backend = backend.clone();
    }
    if args.threaded {
        config.execution = ExecutionMode::Threaded;
    }
    if args.no_ocr {
        config.ocr_enabled = false;
    }
    config.validate()?;

    let registry = {
        let _stage = ui.stage("load object model");
        build_registry(&args, &config)?
    };
    let detector = registry.resolve(&config.detector_backend)?;

    let ocr: SharedOcr = {
        let _stage = ui.stage("load OCR engine");
        let answers = if args.ocr_text.is_empty() {
            vec![String::new(), "BUS STOP".to_string(), "שלום".to_string()]
        } else {
            args.ocr_text.clone()
        };
        Arc::new(Mutex::new(ScriptedOcr::new(answers)))
    };

    let adapters = Adapters {
        source: open_source(&config.source)?,
        detector: Some(detector),
        ocr: Some(ocr),
        speech: Box::new(LogSpeech),
        audio: Box::new(LogAudio::default()),
        overlay: Box::new(LogOverlay),
    };
    let mut session = ScannerSession::new(config, adapters);
    {
        let _stage = ui.stage("start camera");
        session.start()?;
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let started = Instant::now();
    let deadline = (args.seconds > 0).then(|| Duration::from_secs(args.seconds));
    let mut line = ui.scan_line();
    let mut cycles = 0u64;
    let mut spoken = 0u64;

    log::info!("scanning (Ctrl-C to stop)...");
    loop {
        if rx.try_recv().is_ok() {
            log::info!("shutdown signal received");
            break;
        }
        let elapsed = started.elapsed();
        if deadline.is_some_and(|d| elapsed >= d) {
            break;
        }
        let report = session.tick(elapsed.as_millis() as u64);
        if report.ocr_spoken.is_some() {
            spoken += 1;
        }
        if let Some(cycle) = report.cycle {
            cycles += 1;
            spoken += cycle.spoken.len() as u64;
            let labels: Vec<&str> = cycle.targets.iter().map(|t| t.display_label.as_str()).collect();
            let proximity = cycle
                .proximity
                .map(|p| format!("{:.1}% vol {:.2}", p.fraction * 100.0, p.volume))
                .unwrap_or_else(|| "-".to_string());
            line.update(format!("[{}] proximity {}", labels.join(", "), proximity));
        }
        if session.state() != smart_scanner::SessionState::Running {
            break;
        }
        std::thread::sleep(REFRESH);
    }

    session.stop();
    line.finish(&format!(
        "✔ scanned {} cycles, {} announcements, last spoken: {}",
        cycles,
        spoken,
        session.status().spoken().unwrap_or("-")
    ));
    Ok(())
}

fn build_registry(args: &Args, config: &ScannerConfig) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    let scripted = match &args.script {
        Some(path) => ScriptedBackend::from_json_file(path)?,
        None => ScriptedBackend::demo(),
    };
    registry.register(scripted);

    #[cfg(feature = "backend-tract")]
    {
        if let Some(model) = &args.model {
            let mut backend = smart_scanner::detect::TractBackend::new(
                model,
                config.source.width,
                config.source.height,
            )?;
            if let Some(threshold) = args.threshold {
                backend = backend.with_threshold(threshold);
            }
            registry.register(backend);
        }
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        let _ = config;
        if args.model.is_some() || args.threshold.is_some() {
            log::warn!("--model/--threshold ignored: built without the backend-tract feature");
        }
    }

    registry.set_default("scripted")?;
    Ok(registry)
}
