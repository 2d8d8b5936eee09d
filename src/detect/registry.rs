use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;

/// Backend handle shared between the session and its worker thread.
pub type SharedBackend = Arc<Mutex<dyn DetectorBackend>>;

/// Detector backends by name. The session runs one of them; the `scanner`
/// binary picks it from config.
///
/// `detect` takes `&mut self`, hence the `Mutex`.
#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<&'static str, SharedBackend>,
    default_name: Option<&'static str>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend under its own name, replacing one of the same name.
    /// The first backend added is the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name();
        self.default_name.get_or_insert(name);
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        let (key, _) = self
            .backends
            .get_key_value(name)
            .ok_or_else(|| anyhow!("detector backend '{}' not registered", name))?;
        self.default_name = Some(*key);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<SharedBackend> {
        self.backends.get(name).cloned()
    }

    pub fn default_backend(&self) -> Option<SharedBackend> {
        self.default_name.and_then(|name| self.get(name))
    }

    /// The backend called `name`, or the default when `name` is unknown.
    pub fn resolve(&self, name: &str) -> Result<SharedBackend> {
        if let Some(backend) = self.get(name) {
            return Ok(backend);
        }
        let fallback = self
            .default_backend()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        log::warn!(
            "detector backend '{}' not registered (have: {}); using default",
            name,
            self.list().join(", ")
        );
        Ok(fallback)
    }

    /// Registered names in order.
    pub fn list(&self) -> Vec<String> {
        self.backends.keys().map(|name| name.to_string()).collect()
    }
}
