use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::color::ColorThresholds;
use crate::ocr::{self, OcrSettings};
use crate::proximity::{AudioPolicy, ProximityScope};
use crate::scheduler::DEFAULT_MIN_INTERVAL_MS;
use crate::source::SourceConfig;
use crate::speech::DEFAULT_COOLDOWN_MS;
use crate::worker::ExecutionMode;

const DEFAULT_SOURCE_URI: &str = "stub://street";
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_DETECTOR: &str = "scripted";
const DEFAULT_OCR_LANGUAGES: &str = "eng+heb";

#[derive(Debug, Deserialize, Default)]
struct ScannerConfigFile {
    source: Option<SourceConfigFile>,
    detection: Option<DetectionConfigFile>,
    ocr: Option<OcrConfigFile>,
    speech: Option<SpeechConfigFile>,
    audio: Option<AudioPolicy>,
    proximity: Option<ProximityConfigFile>,
    color: Option<ColorThresholds>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    interval_ms: Option<u64>,
    backend: Option<String>,
    execution: Option<ExecutionMode>,
}

#[derive(Debug, Deserialize, Default)]
struct OcrConfigFile {
    enabled: Option<bool>,
    interval_ms: Option<u64>,
    scale: Option<f32>,
    languages: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SpeechConfigFile {
    cooldown_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ProximityConfigFile {
    scope: Option<ProximityScope>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScannerConfig {
    pub source: SourceConfig,
    pub detect_interval_ms: u64,
    pub detector_backend: String,
    pub execution: ExecutionMode,
    pub ocr_enabled: bool,
    pub ocr: OcrSettings,
    pub speech_cooldown_ms: u64,
    pub audio: AudioPolicy,
    pub proximity_scope: ProximityScope,
    pub color: ColorThresholds,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self::from_file(ScannerConfigFile::default())
    }
}

impl ScannerConfig {
    /// File named by `SCANNER_CONFIG` (JSON, or TOML for `.toml`), then env
    /// overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SCANNER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ScannerConfigFile) -> Self {
        let source = SourceConfig {
            uri: file
                .source
                .as_ref()
                .and_then(|s| s.uri.clone())
                .unwrap_or_else(|| DEFAULT_SOURCE_URI.to_string()),
            width: file
                .source
                .as_ref()
                .and_then(|s| s.width)
                .unwrap_or(DEFAULT_SOURCE_WIDTH),
            height: file
                .source
                .as_ref()
                .and_then(|s| s.height)
                .unwrap_or(DEFAULT_SOURCE_HEIGHT),
        };
        let detection = file.detection.unwrap_or_default();
        let ocr_file = file.ocr.unwrap_or_default();
        let ocr = OcrSettings {
            interval_ms: ocr_file.interval_ms.unwrap_or(ocr::DEFAULT_INTERVAL_MS),
            scale: ocr_file.scale.unwrap_or(ocr::DEFAULT_SCALE),
            languages: split_languages(
                ocr_file
                    .languages
                    .as_deref()
                    .unwrap_or(DEFAULT_OCR_LANGUAGES),
            ),
        };
        Self {
            source,
            detect_interval_ms: detection.interval_ms.unwrap_or(DEFAULT_MIN_INTERVAL_MS),
            detector_backend: detection
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            execution: detection.execution.unwrap_or_default(),
            ocr_enabled: ocr_file.enabled.unwrap_or(true),
            ocr,
            speech_cooldown_ms: file
                .speech
                .and_then(|s| s.cooldown_ms)
                .unwrap_or(DEFAULT_COOLDOWN_MS),
            audio: file.audio.unwrap_or_default(),
            proximity_scope: file.proximity.and_then(|p| p.scope).unwrap_or_default(),
            color: file.color.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(uri) = std::env::var("SCANNER_SOURCE") {
            if !uri.trim().is_empty() {
                self.source.uri = uri;
            }
        }
        if let Some(ms) = env_millis("SCANNER_DETECT_INTERVAL_MS")? {
            self.detect_interval_ms = ms;
        }
        if let Some(ms) = env_millis("SCANNER_OCR_INTERVAL_MS")? {
            self.ocr.interval_ms = ms;
        }
        if let Some(ms) = env_millis("SCANNER_SPEECH_COOLDOWN_MS")? {
            self.speech_cooldown_ms = ms;
        }
        if let Ok(policy) = std::env::var("SCANNER_AUDIO_POLICY") {
            self.audio = parse_audio_policy(&policy)?;
        }
        if let Ok(scope) = std::env::var("SCANNER_PROXIMITY_SCOPE") {
            self.proximity_scope = parse_scope(&scope)?;
        }
        if let Ok(languages) = std::env::var("SCANNER_OCR_LANGUAGES") {
            let parsed = split_languages(&languages);
            if !parsed.is_empty() {
                self.ocr.languages = parsed;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.detect_interval_ms == 0 {
            return Err(anyhow!("detection interval must be greater than zero"));
        }
        if self.ocr.interval_ms == 0 {
            return Err(anyhow!("ocr interval must be greater than zero"));
        }
        if !(self.ocr.scale > 0.0 && self.ocr.scale <= 1.0) {
            return Err(anyhow!("ocr scale must be in (0, 1], got {}", self.ocr.scale));
        }
        if self.ocr_enabled && self.ocr.languages.is_empty() {
            return Err(anyhow!("ocr needs at least one language"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source dimensions must be non-zero"));
        }
        match self.audio {
            AudioPolicy::ContinuousTone { frequency_hz, .. } => {
                if frequency_hz <= 0.0 {
                    return Err(anyhow!("tone frequency must be positive"));
                }
            }
            AudioPolicy::Pulses {
                interval_ms,
                duration_ms,
                frequency_hz,
                fixed_volume,
                ..
            } => {
                if duration_ms == 0 || interval_ms < duration_ms {
                    return Err(anyhow!(
                        "pulse interval ({} ms) must cover the pulse duration ({} ms)",
                        interval_ms,
                        duration_ms
                    ));
                }
                if frequency_hz <= 0.0 {
                    return Err(anyhow!("pulse frequency must be positive"));
                }
                if !(0.0..=1.0).contains(&fixed_volume) {
                    return Err(anyhow!("pulse volume must be in [0, 1]"));
                }
            }
        }
        if self.color.ratio_margin < 1.0 {
            return Err(anyhow!("color ratio margin must be at least 1.0"));
        }
        if !(self.color.min_share > 0.0 && self.color.min_share < 1.0) {
            return Err(anyhow!("color channel share must be in (0, 1)"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ScannerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_millis(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be an integer number of milliseconds", key)),
        _ => Ok(None),
    }
}

pub fn parse_audio_policy(value: &str) -> Result<AudioPolicy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "tone" | "continuous" => Ok(AudioPolicy::continuous()),
        "pulses" | "pulse" | "beep" => Ok(AudioPolicy::pulses()),
        other => Err(anyhow!("unknown audio policy '{}' (expected tone or pulses)", other)),
    }
}

fn parse_scope(value: &str) -> Result<ProximityScope> {
    match value.trim().to_ascii_lowercase().as_str() {
        "targets" => Ok(ProximityScope::Targets),
        "all" | "all_detections" => Ok(ProximityScope::AllDetections),
        other => Err(anyhow!("unknown proximity scope '{}' (expected targets or all)", other)),
    }
}

/// `eng+heb` or `eng, heb` to `["eng", "heb"]`.
fn split_languages(value: &str) -> Vec<String> {
    value
        .split(['+', ','])
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
