use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;
use crate::detect::result::Detection;
use crate::frame::Frame;

use super::backend::DetectorBackend;

/// Thread-safe registry of detector backends.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<Mutex<dyn DetectorBackend>>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry holding the built-in backends with `settings.backend` as default.
    ///
    /// The tract backend loads its model here, so it is only built when selected.
    pub fn from_settings(settings: &DetectorSettings) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(super::StubBackend::new());
        registry.register(super::ScriptedBackend::new(super::ScriptedConfig::default()));
        #[cfg(feature = "backend-tract")]
        {
            if settings.backend == "tract" {
                registry.register(super::TractBackend::new(super::TractConfig {
                    model_path: settings.model_path.clone(),
                    input_size: settings.input_size,
                    iou_threshold: settings.iou_threshold,
                    ..super::TractConfig::default()
                })?);
            }
        }
        registry.set_default(&settings.backend)?;
        Ok(registry)
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!(
                "detector backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            ));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Mutex<dyn DetectorBackend>>> {
        self.backends.get(name).cloned()
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    pub fn default_backend(&self) -> Option<Arc<Mutex<dyn DetectorBackend>>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run detection with the default backend.
    pub fn detect_default(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let backend = self
            .default_backend()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        let mut guard = backend
            .lock()
            .map_err(|_| anyhow!("detector backend lock poisoned"))?;
        guard.detect(frame)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The registry itself drives the monitor, always through the default backend.
impl DetectorBackend for BackendRegistry {
    fn name(&self) -> &'static str {
        "registry"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self.detect_default(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let backend = self
            .default_backend()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        let mut guard = backend
            .lock()
            .map_err(|_| anyhow!("detector backend lock poisoned"))?;
        guard.warm_up()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{ScriptedBackend, ScriptedConfig, StubBackend};

    #[test]
    fn first_registered_backend_is_default() -> Result<()> {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        registry.register(ScriptedBackend::new(ScriptedConfig::default()));
        assert_eq!(registry.default_name(), Some("stub"));
        assert_eq!(registry.list(), vec!["scripted", "stub"]);

        let frame = Frame::new(1, 4, 4, vec![0u8; 48])?;
        assert!(registry.detect_default(&frame)?.is_empty());

        registry.set_default("scripted")?;
        assert_eq!(registry.default_name(), Some("scripted"));
        assert!(registry.set_default("yolo").is_err());
        Ok(())
    }

    #[test]
    fn settings_select_the_default_backend() -> Result<()> {
        let settings = DetectorSettings {
            backend: "scripted".to_string(),
            model_path: "weights/missing.onnx".into(),
            input_size: 640,
            iou_threshold: 0.45,
        };
        let registry = BackendRegistry::from_settings(&settings)?;
        assert_eq!(registry.default_name(), Some("scripted"));

        let unknown = DetectorSettings {
            backend: "yolo".to_string(),
            ..settings
        };
        assert!(BackendRegistry::from_settings(&unknown).is_err());
        Ok(())
    }

    #[test]
    fn empty_registry_fails_detection() {
        let mut registry = BackendRegistry::new();
        let frame = Frame::new(1, 1, 1, vec![0u8; 3]).unwrap();
        assert!(registry.detect(&frame).is_err());
    }
}
