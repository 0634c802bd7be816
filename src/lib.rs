//! PETRA Conditions - alarm and condition lifecycle engine
//!
//! Tracks industrial alarm conditions through their full lifecycle:
//! limit evaluation with deadband, activation, acknowledgement and
//! confirmation, timed and one-shot shelving, suppression, and per-area
//! alarm metrics. Every condition is owned by a single worker task, so its
//! notifications are delivered in order with gap-free sequence numbers.
//!
//! # Feature Flags
//!
//! - `metrics`: Prometheus gauges for alarm metrics and an HTTP exporter
//!
//! # Examples
//!
//! ```no_run
//! use petra_conditions::{AlarmEngine, Config, SubscriptionFilter};
//!
//! # async fn run() -> petra_conditions::Result<()> {
//! petra_conditions::init()?;
//!
//! let config = Config::from_file("conditions.yaml")?;
//! let engine = AlarmEngine::new(config).await?;
//! let mut feed = engine.subscribe(SubscriptionFilter::all());
//! engine.refresh(&feed).await?;
//! while let Some(item) = feed.recv().await {
//!     println!("{:?}", item);
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// CORE MODULES
// ============================================================================

/// Error type and status codes
pub mod error;

/// Sample values and quality
pub mod value;

/// Shared store of source samples
pub mod signal;

/// Limit evaluation with deadband
pub mod limits;

/// Condition records and their sub-state machines
pub mod condition;

/// Notification feed and subscriptions
pub mod events;

/// Alarm metrics per server and area
pub mod metrics;

/// Boundary to the attribute storage of the node layer
pub mod attributes;

/// Restart persistence
pub mod snapshot;

/// YAML configuration
pub mod config;

/// Condition routing and lifecycle
pub mod registry;

/// Scan loop and method surface
pub mod engine;

mod dispatcher;

/// Prometheus exporter
#[cfg(feature = "metrics")]
#[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
pub mod metrics_server;

// ============================================================================
// PUBLIC API EXPORTS
// ============================================================================

pub use attributes::{Attribute, AttributeStore, MemoryAttributeStore};
pub use condition::{
    AckState, ActivationState, ActiveSubState, Capabilities, Condition, ConditionDefinition,
    ConditionId, ConditionKind, ConditionView, EventId, EventKind, MethodCall, ShelvingState,
    UnshelveCause,
};
pub use config::Config;
pub use engine::{AlarmEngine, EngineStats};
pub use error::{ConditionError, Result};
pub use events::{ConditionEvent, FeedItem, Subscription, SubscriptionFilter};
pub use limits::{Boundary, BoundaryDeadbands, BoundarySet, LimitConfiguration};
pub use metrics::{AlarmMetrics, Scope};
pub use signal::SignalBus;
pub use value::{Quality, Sample, Value};

#[cfg(feature = "metrics")]
pub use metrics_server::{MetricsServer, MetricsServerConfig};

// ============================================================================
// VERSION INFORMATION
// ============================================================================

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Install the tracing subscriber (`RUST_LOG`, default `petra_conditions=info`)
///
/// Safe to call more than once; later calls leave the existing subscriber in
/// place.
pub fn init() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("petra_conditions=info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();

    tracing::info!("PETRA Conditions {} initialized", VERSION);
    Ok(())
}
