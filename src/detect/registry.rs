use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;

pub type SharedBackend = Arc<Mutex<dyn DetectorBackend>>;

/// Detector backends available to this build, keyed by `name()`.
///
/// Each backend sits behind a `Mutex` since `detect` takes `&mut self`.
/// The capture thread only receives a backend after `activate` set it up.
#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<&'static str, SharedBackend>,
    fallback: Option<&'static str>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend; the first one added is used when no name is given.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name();
        self.fallback.get_or_insert(name);
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        let (&known, _) = self
            .backends
            .get_key_value(name)
            .ok_or_else(|| anyhow!("detector '{}' is not available in this build", name))?;
        self.fallback = Some(known);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<SharedBackend> {
        self.backends.get(name).cloned()
    }

    pub fn default_backend(&self) -> Option<SharedBackend> {
        self.get(self.fallback?)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.backends.keys().copied().collect()
    }

    /// Set up the named backend (or the default) for CPU or accelerated
    /// execution and return it.
    ///
    /// A backend without an accelerated target falls back to CPU execution.
    pub fn activate(&self, name: Option<&str>, accelerated: bool) -> Result<SharedBackend> {
        let backend = match name {
            Some(name) => self
                .get(name)
                .ok_or_else(|| anyhow!("detector '{}' is not available in this build", name))?,
            None => self
                .default_backend()
                .ok_or_else(|| anyhow!("no detector backend registered"))?,
        };
        {
            let mut guard = backend
                .lock()
                .map_err(|_| anyhow!("backend lock poisoned"))?;
            let use_accelerated = if accelerated && !guard.supports_acceleration() {
                log::warn!(
                    "backend '{}' has no accelerated target; using cpu execution",
                    guard.name()
                );
                false
            } else {
                accelerated
            };
            guard.setup(use_accelerated)?;
            log::info!(
                "detector backend '{}' ready (accelerated={})",
                guard.name(),
                use_accelerated
            );
        }
        Ok(backend)
    }

    /// Release every backend.
    pub fn close_all(&self) {
        for backend in self.backends.values() {
            if let Ok(mut guard) = backend.lock() {
                guard.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::{CpuBackend, StubBackend};

    #[test]
    fn first_registered_backend_is_default() {
        let mut registry = BackendRegistry::new();
        registry.register(CpuBackend::new());
        registry.register(StubBackend::new());
        assert_eq!(registry.names(), ["cpu", "stub"]);

        let backend = registry.activate(None, false).unwrap();
        assert_eq!(backend.lock().unwrap().name(), "cpu");
        assert!(registry.set_default("missing").is_err());
    }

    #[test]
    fn accelerated_request_falls_back_to_cpu() {
        let mut registry = BackendRegistry::new();
        registry.register(CpuBackend::new());
        let backend = registry.activate(Some("cpu"), true).unwrap();
        assert!(backend.lock().unwrap().is_ready());

        registry.close_all();
        assert!(!backend.lock().unwrap().is_ready());
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let registry = BackendRegistry::new();
        assert!(registry.activate(Some("tract"), false).is_err());
        assert!(registry.activate(None, false).is_err());
    }
}
