// src/signal.rs - Source value bus read by the engine scan loop
use crate::{
    error::{ConditionError, Result},
    value::{Quality, Sample, Value},
};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

/// Thread-safe bus holding the latest sample of every monitored source
///
/// Conditions reference their source by name; the engine resolves that name
/// here on every scan.
///
/// # Examples
///
/// ```rust
/// use petra_conditions::{SignalBus, Value};
///
/// let bus = SignalBus::new();
/// bus.set("reactor.temp", Value::Float(23.5))?;
/// assert_eq!(bus.get_float("reactor.temp")?, 23.5);
/// # Ok::<(), petra_conditions::ConditionError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct SignalBus {
    signals: Arc<DashMap<String, Sample>>,
}

impl SignalBus {
    /// Create a new signal bus
    pub fn new() -> Self {
        Self {
            signals: Arc::new(DashMap::new()),
        }
    }

    /// Set a good-quality value stamped with the current time
    pub fn set(&self, name: impl AsRef<str>, value: Value) -> Result<()> {
        self.set_sample(name, Sample::new(value))
    }

    /// Store a full sample, including quality and timestamp
    pub fn set_sample(&self, name: impl AsRef<str>, sample: Sample) -> Result<()> {
        let name = name.as_ref();
        trace!("Setting signal {} = {} ({:?})", name, sample.value, sample.quality);
        self.signals.insert(name.to_string(), sample);
        Ok(())
    }

    /// Change the quality of an existing signal, keeping its value
    pub fn set_quality(&self, name: &str, quality: Quality) -> Result<()> {
        let mut entry = self
            .signals
            .get_mut(name)
            .ok_or_else(|| ConditionError::SignalNotFound(name.to_string()))?;
        entry.quality = quality;
        entry.timestamp = chrono::Utc::now();
        Ok(())
    }

    /// Get a signal value
    pub fn get(&self, name: impl AsRef<str>) -> Option<Value> {
        self.signals.get(name.as_ref()).map(|entry| entry.value.clone())
    }

    /// Get the full sample for a signal
    pub fn get_sample(&self, name: impl AsRef<str>) -> Option<Sample> {
        self.signals.get(name.as_ref()).map(|entry| entry.value().clone())
    }

    pub fn get_float(&self, name: &str) -> Result<f64> {
        match self.get(name) {
            Some(v) => v.as_float().ok_or(ConditionError::TypeMismatch {
                expected: "float",
                actual: v.type_name(),
            }),
            None => Err(ConditionError::SignalNotFound(name.to_string())),
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        match self.get(name) {
            Some(v) => v.as_bool().ok_or(ConditionError::TypeMismatch {
                expected: "bool",
                actual: v.type_name(),
            }),
            None => Err(ConditionError::SignalNotFound(name.to_string())),
        }
    }

    /// Check if a signal exists
    pub fn exists(&self, name: &str) -> bool {
        self.signals.contains_key(name)
    }

    /// Remove a signal from the bus
    pub fn remove(&self, name: &str) -> Option<Sample> {
        self.signals.remove(name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}
