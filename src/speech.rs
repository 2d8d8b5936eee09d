//! Speech dispatch.
//!
//! Every utterance passes a per-(language, text) cooldown so that an object
//! sitting in view does not get announced on every cycle. The cooldown state
//! belongs to the session and is handed to the dispatcher on each call; a new
//! session starts with an empty state.

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;

pub const DEFAULT_COOLDOWN_MS: u64 = 3000;
pub const ENGLISH: &str = "en-US";
pub const HEBREW: &str = "he-IL";

/// Text-to-speech output.
pub trait SpeechAdapter: Send {
    /// False when the host has no speech synthesis.
    fn is_available(&self) -> bool {
        true
    }

    /// Queue `text` for vocalization. Fire-and-forget.
    fn speak(&mut self, text: &str, language: &str) -> Result<()>;

    /// Stop the current utterance and drop anything queued.
    fn cancel_all(&mut self);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    pub language: String,
}

impl Utterance {
    pub fn new(text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: language.into(),
        }
    }

    pub fn cooldown_key(&self) -> String {
        format!("{}:{}", self.language, self.text)
    }
}

/// Per-session speech state: last-spoken times and the last utterance.
///
/// Entries are only ever inserted or moved forward in time.
#[derive(Debug, Default)]
pub struct SpeechState {
    last_spoken: HashMap<String, u64>,
    last: Option<Utterance>,
}

impl SpeechState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_spoken(&self, utterance: &Utterance) -> Option<u64> {
        self.last_spoken.get(&utterance.cooldown_key()).copied()
    }

    pub fn last_utterance(&self) -> Option<&Utterance> {
        self.last.as_ref()
    }

    fn mark(&mut self, utterance: &Utterance, now_ms: u64) {
        let entry = self.last_spoken.entry(utterance.cooldown_key()).or_insert(now_ms);
        *entry = (*entry).max(now_ms);
        self.last = Some(utterance.clone());
    }

    fn cooling_down(&self, utterance: &Utterance, now_ms: u64, cooldown_ms: u64) -> bool {
        self.last_spoken(utterance)
            .is_some_and(|last| now_ms.saturating_sub(last) < cooldown_ms)
    }
}

/// Result of one dispatch request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    Spoken,
    CoolingDown,
    Unavailable,
}

pub struct SpeechDispatcher {
    adapter: Box<dyn SpeechAdapter>,
    cooldown_ms: u64,
}

impl SpeechDispatcher {
    pub fn new(adapter: Box<dyn SpeechAdapter>, cooldown_ms: u64) -> Self {
        Self {
            adapter,
            cooldown_ms,
        }
    }

    pub fn is_available(&self) -> bool {
        self.adapter.is_available()
    }

    /// Passive, cooldown-gated announcement. Never interrupts speech in progress.
    pub fn announce(
        &mut self,
        state: &mut SpeechState,
        utterance: &Utterance,
        now_ms: u64,
    ) -> Result<Dispatch> {
        if !self.adapter.is_available() {
            return Ok(Dispatch::Unavailable);
        }
        if state.cooling_down(utterance, now_ms, self.cooldown_ms) {
            return Ok(Dispatch::CoolingDown);
        }
        state.mark(utterance, now_ms);
        log::debug!("speak [{}] {}", utterance.language, utterance.text);
        self.adapter.speak(&utterance.text, &utterance.language)?;
        Ok(Dispatch::Spoken)
    }

    /// Explicit user request: interrupt whatever is playing and speak now.
    /// Bypasses the cooldown but refreshes it.
    pub fn speak_now(
        &mut self,
        state: &mut SpeechState,
        utterance: &Utterance,
        now_ms: u64,
    ) -> Result<Dispatch> {
        if !self.adapter.is_available() {
            return Ok(Dispatch::Unavailable);
        }
        self.adapter.cancel_all();
        state.mark(utterance, now_ms);
        self.adapter.speak(&utterance.text, &utterance.language)?;
        Ok(Dispatch::Spoken)
    }

    /// "Speak last result" control. `None` when nothing has been said yet.
    pub fn repeat_last(&mut self, state: &mut SpeechState, now_ms: u64) -> Result<Option<Dispatch>> {
        let Some(last) = state.last_utterance().cloned() else {
            return Ok(None);
        };
        self.speak_now(state, &last, now_ms).map(Some)
    }

    pub fn cancel_all(&mut self) {
        self.adapter.cancel_all();
    }
}

/// True when `text` has any character in the Hebrew block (U+0590..=U+05FF).
pub fn contains_hebrew(text: &str) -> bool {
    static HEBREW_RE: OnceLock<Regex> = OnceLock::new();
    let re = HEBREW_RE.get_or_init(|| Regex::new(r"[\u{0590}-\u{05FF}]").expect("valid regex"));
    re.is_match(text)
}

/// Trim and collapse whitespace runs to a single space.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Phrase recognized text for speech, picking the language by script presence.
/// Returns `None` when nothing is left after normalization.
pub fn ocr_utterance(raw: &str) -> Option<Utterance> {
    let text = normalize_text(raw);
    if text.is_empty() {
        return None;
    }
    if contains_hebrew(&text) {
        Some(Utterance::new(format!("מילים: {}", text), HEBREW))
    } else {
        Some(Utterance::new(format!("Words: {}", text), ENGLISH))
    }
}
