// src/config.rs - Engine and condition configuration

use crate::{
    condition::{
        BoundarySeverities, Capabilities, ConditionDefinition, ConditionKind, InputMode,
        MAX_TIME_SHELVED_SECS,
    },
    error::{ConditionError, Result},
    limits::LimitConfiguration,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Complete alarm engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Engine runtime settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Alarm metrics settings
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// State persistence; disabled when absent
    #[serde(default)]
    pub persistence: Option<PersistenceConfig>,

    /// Condition definitions
    #[serde(default)]
    pub conditions: Vec<ConditionConfig>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConditionError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.scan_time_ms == 0 {
            return Err(ConditionError::Config("scan_time_ms must be greater than 0".into()));
        }
        if self.metrics.rate_window_secs == 0 {
            return Err(ConditionError::Config("rate_window_secs must be greater than 0".into()));
        }
        let mut seen = HashSet::new();
        for condition in &self.conditions {
            if !seen.insert(condition.id.as_str()) {
                return Err(ConditionError::Config(format!(
                    "duplicate condition id '{}'",
                    condition.id
                )));
            }
            condition.definition(&self.engine)?;
        }
        Ok(())
    }

    /// Definitions of every configured condition
    pub fn definitions(&self) -> Result<Vec<ConditionDefinition>> {
        self.conditions
            .iter()
            .map(|c| c.definition(&self.engine))
            .collect()
    }
}

// ============================================================================
// ENGINE CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Source scan period in milliseconds
    #[serde(default = "default_scan_time")]
    pub scan_time_ms: u64,

    /// Capacity of each condition's command channel
    #[serde(default = "default_command_queue")]
    pub command_queue_capacity: usize,

    /// Default capacity of a subscriber queue
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue_capacity: usize,

    /// Upper bound for TimedShelve unless a condition overrides it
    #[serde(default = "default_max_shelve_time")]
    pub max_shelve_time_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_time_ms: default_scan_time(),
            command_queue_capacity: default_command_queue(),
            subscriber_queue_capacity: default_subscriber_queue(),
            max_shelve_time_secs: default_max_shelve_time(),
        }
    }
}

impl EngineConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_time_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Width of the sliding window for the current alarm rate
    #[serde(default = "default_rate_window")]
    pub rate_window_secs: u64,

    /// Prometheus endpoint (feature `metrics`)
    #[serde(default)]
    pub prometheus_address: Option<SocketAddr>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            rate_window_secs: default_rate_window(),
            prometheus_address: None,
        }
    }
}

impl MetricsConfig {
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub path: PathBuf,

    #[serde(default = "default_save_interval")]
    pub save_interval_secs: u64,
}

impl PersistenceConfig {
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs.max(1))
    }
}

// ============================================================================
// CONDITION CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionConfig {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Signal the condition observes
    pub source: String,

    #[serde(default)]
    pub area: Option<String>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub kind: ConditionKind,

    #[serde(default = "default_severity")]
    pub severity: u16,

    #[serde(default)]
    pub boundary_severities: BoundarySeverities,

    #[serde(default)]
    pub limits: Option<LimitConfiguration>,

    /// Deviation kinds
    #[serde(default)]
    pub setpoint: Option<f64>,

    /// Discrepancy kind
    #[serde(default)]
    pub target: Option<f64>,

    #[serde(default)]
    pub tolerance: f64,

    /// Off-normal kind
    #[serde(default)]
    pub normal_state: bool,

    #[serde(default = "default_true")]
    pub requires_ack: bool,

    #[serde(default)]
    pub requires_confirm: bool,

    #[serde(default)]
    pub latching: bool,

    #[serde(default = "default_true")]
    pub shelvable: bool,

    #[serde(default)]
    pub on_delay_ms: u64,

    #[serde(default)]
    pub off_delay_ms: u64,

    /// Repeat period while active and unacknowledged; 0 disables
    #[serde(default)]
    pub re_alarm_time_ms: u64,

    #[serde(default)]
    pub max_time_shelved_secs: Option<u64>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ConditionConfig {
    /// Validated definition for this entry
    pub fn definition(&self, engine: &EngineConfig) -> Result<ConditionDefinition> {
        let fail = |msg: &str| ConditionError::Config(format!("condition '{}': {}", self.id, msg));
        let caps = self.kind.capabilities();

        let mut def = ConditionDefinition::new(self.id.as_str(), self.source.as_str(), self.kind)
            .with_severity(self.severity)
            .with_boundary_severities(self.boundary_severities);
        def.name = self.name.clone().unwrap_or_else(|| self.id.clone());
        def.area = self.area.clone();
        def.message = self.message.clone();

        if caps.contains(Capabilities::DEVIATION) {
            let setpoint = self.setpoint.ok_or_else(|| fail("deviation alarm without setpoint"))?;
            def = def.with_input(InputMode::Deviation { setpoint });
        }
        if caps.contains(Capabilities::DISCREPANCY) {
            let target = self.target.ok_or_else(|| fail("discrepancy alarm without target"))?;
            def = def.with_input(InputMode::Discrepancy {
                target,
                tolerance: self.tolerance,
            });
        }
        if self.kind == ConditionKind::OffNormal {
            def = def.with_input(InputMode::OffNormal {
                normal_state: self.normal_state,
            });
        }
        if let Some(limits) = &self.limits {
            if !caps.is_limit() {
                return Err(fail("limits given for a kind without limits"));
            }
            def = def.with_limits(limits.clone());
        }

        if !self.requires_ack {
            def = def.without_capabilities(Capabilities::REQUIRES_ACK);
        }
        if self.requires_confirm {
            def = def.with_capabilities(Capabilities::CONFIRMABLE);
        }
        if self.latching {
            def = def.with_capabilities(Capabilities::LATCHING);
        }
        if !self.shelvable {
            def = def.without_capabilities(Capabilities::SHELVABLE);
        }

        let delay = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));
        def = def.with_delays(delay(self.on_delay_ms), delay(self.off_delay_ms));
        def = def.with_re_alarm_time(delay(self.re_alarm_time_ms));

        let max_shelved = self.max_time_shelved_secs.unwrap_or(engine.max_shelve_time_secs);
        let max_shelved = i64::try_from(max_shelved)
            .ok()
            .filter(|secs| *secs <= MAX_TIME_SHELVED_SECS)
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| fail("max_time_shelved_secs too large"))?;
        def = def.with_max_time_shelved(max_shelved);

        if !self.enabled {
            def = def.disabled();
        }
        def.validate()?;
        Ok(def)
    }
}

// ============================================================================
// DEFAULTS
// ============================================================================

fn default_scan_time() -> u64 { 100 }
fn default_command_queue() -> usize { 256 }
fn default_subscriber_queue() -> usize { 1024 }
fn default_max_shelve_time() -> u64 { 8 * 3600 }
fn default_rate_window() -> u64 { 600 }
fn default_save_interval() -> u64 { 30 }
fn default_severity() -> u16 { 500 }
fn default_true() -> bool { true }
