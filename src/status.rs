use std::collections::HashMap;

use crate::error::Adapter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusLevel {
    Idle,
    Pending,
    Ready,
    Warn,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub level: StatusLevel,
    pub message: String,
}

/// Per-adapter status line plus the last spoken text.
///
/// Updates are logged only when they change something, so a degraded adapter
/// is reported once rather than on every cycle.
#[derive(Debug, Default)]
pub struct StatusBoard {
    entries: HashMap<Adapter, Status>,
    spoken: Option<String>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the entry changed.
    pub fn set(&mut self, adapter: Adapter, level: StatusLevel, message: impl Into<String>) -> bool {
        let status = Status {
            level,
            message: message.into(),
        };
        if self.entries.get(&adapter) == Some(&status) {
            return false;
        }
        match level {
            StatusLevel::Warn => log::warn!("[{}] {}", adapter, status.message),
            _ => log::info!("[{}] {}", adapter, status.message),
        }
        self.entries.insert(adapter, status);
        true
    }

    pub fn get(&self, adapter: Adapter) -> Option<&Status> {
        self.entries.get(&adapter)
    }

    pub fn set_spoken(&mut self, text: &str) {
        self.spoken = Some(text.to_string());
    }

    pub fn spoken(&self) -> Option<&str> {
        self.spoken.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_updates_are_reported_once() {
        let mut board = StatusBoard::new();
        assert!(board.set(Adapter::Ocr, StatusLevel::Warn, "ocr unavailable"));
        assert!(!board.set(Adapter::Ocr, StatusLevel::Warn, "ocr unavailable"));
        assert!(board.set(Adapter::Ocr, StatusLevel::Ready, "Ready"));
        assert_eq!(board.get(Adapter::Ocr).unwrap().level, StatusLevel::Ready);
        assert!(board.get(Adapter::Speech).is_none());
    }
}
