// src/engine.rs - Alarm engine: scan loop, method surface and persistence
use crate::{
    attributes::AttributeStore,
    condition::{ConditionDefinition, ConditionId, ConditionView, EventId, MethodCall},
    config::{Config, PersistenceConfig},
    error::*,
    events::{EventHub, Subscription, SubscriptionFilter},
    limits::LimitConfiguration,
    metrics::{AlarmMetrics, AlarmMetricsAggregator, Scope},
    registry::ConditionRegistry,
    signal::SignalBus,
    snapshot,
    value::Sample,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

#[derive(Clone, Debug, Serialize)]
pub struct EngineStats {
    pub running: bool,
    pub scan_count: u64,
    pub error_count: u64,
    pub uptime_secs: u64,
    pub signal_count: usize,
    pub condition_count: usize,
    pub subscriber_count: usize,
}

/// Where a condition reads its samples from
#[derive(Debug)]
struct SourceBinding {
    source: String,
    last_seen: Option<DateTime<Utc>>,
    missing_reported: bool,
}

pub struct AlarmEngine {
    config: Config,
    bus: SignalBus,
    registry: Arc<ConditionRegistry>,
    hub: Arc<EventHub>,
    metrics: Arc<AlarmMetricsAggregator>,
    bindings: Mutex<HashMap<ConditionId, SourceBinding>>,
    running: AtomicBool,
    scan_count: AtomicU64,
    error_count: AtomicU64,
    start_time: Instant,
    stop_signal: Notify,
}

impl AlarmEngine {
    pub async fn new(config: Config) -> Result<Self> {
        Self::build(config, SignalBus::new(), None).await
    }

    /// Engine that reads samples from an existing bus
    pub async fn with_bus(config: Config, bus: SignalBus) -> Result<Self> {
        Self::build(config, bus, None).await
    }

    /// Engine that mirrors condition state into `store`
    pub async fn with_attribute_store(
        config: Config,
        bus: SignalBus,
        store: Arc<dyn AttributeStore>,
    ) -> Result<Self> {
        Self::build(config, bus, Some(store)).await
    }

    async fn build(config: Config, bus: SignalBus, store: Option<Arc<dyn AttributeStore>>) -> Result<Self> {
        config.validate()?;

        let hub = Arc::new(EventHub::new(config.engine.subscriber_queue_capacity));
        let metrics = Arc::new(AlarmMetricsAggregator::new(config.metrics.rate_window()));
        let registry = Arc::new(ConditionRegistry::new(
            hub.clone(),
            metrics.clone(),
            store,
            config.engine.command_queue_capacity,
        ));

        let mut restored: HashMap<ConditionId, snapshot::ConditionSnapshot> = HashMap::new();
        if let Some(persistence) = &config.persistence {
            if let Some(file) = snapshot::load(&persistence.path).await? {
                if file.version != snapshot::SNAPSHOT_VERSION {
                    warn!(
                        "Ignoring snapshot version {} (expected {})",
                        file.version,
                        snapshot::SNAPSHOT_VERSION
                    );
                } else {
                    restored = file.conditions.into_iter().map(|s| (s.id.clone(), s)).collect();
                }
            }
        }

        let engine = Self {
            bus,
            registry,
            hub,
            metrics,
            bindings: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            scan_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            start_time: Instant::now(),
            stop_signal: Notify::new(),
            config,
        };

        for definition in engine.config.definitions()? {
            match restored.remove(&definition.id) {
                Some(saved) => {
                    debug!("Restoring condition '{}' at sequence {}", definition.id, saved.sequence);
                    engine.bind(&definition);
                    engine.registry.restore(definition, saved)?;
                }
                None => {
                    engine.bind(&definition);
                    engine.registry.register(definition)?;
                }
            }
        }
        for id in restored.keys() {
            warn!("Snapshot of unknown condition '{}' discarded", id);
        }

        #[cfg(feature = "metrics")]
        gauge!("petra_conditions_configured").set(engine.registry.len() as f64);

        info!(
            "Alarm engine ready with {} conditions, scan time {}ms",
            engine.registry.len(),
            engine.config.engine.scan_time_ms
        );
        Ok(engine)
    }

    fn bind(&self, definition: &ConditionDefinition) {
        self.bindings.lock().insert(
            definition.id.clone(),
            SourceBinding {
                source: definition.source.clone(),
                last_seen: None,
                missing_reported: false,
            },
        );
    }

    // ------------------------------------------
    // Scan loop
    // ------------------------------------------

    /// Run the scan loop until `stop` is called
    pub async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ConditionError::InvalidState("engine is already running".into()));
        }
        info!("Starting alarm engine with scan time: {}ms", self.config.engine.scan_time_ms);

        #[cfg(feature = "metrics")]
        gauge!("petra_conditions_engine_running").set(1.0);

        let mut scan = interval(self.config.engine.scan_interval());
        scan.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let save_every = self
            .config
            .persistence
            .as_ref()
            .map(PersistenceConfig::save_interval)
            .unwrap_or(Duration::from_secs(3600));
        let mut save = interval(save_every);
        save.set_missed_tick_behavior(MissedTickBehavior::Delay);
        save.tick().await;

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = scan.tick() => {
                    self.scan_once().await;
                }
                _ = save.tick(), if self.config.persistence.is_some() => {
                    if let Err(e) = self.save_snapshot().await {
                        self.error_count.fetch_add(1, Ordering::Relaxed);
                        error!("Failed to save condition snapshot: {}", e);
                    }
                }
                _ = self.stop_signal.notified() => {}
            }
        }

        if self.config.persistence.is_some() {
            if let Err(e) = self.save_snapshot().await {
                error!("Failed to save condition snapshot on stop: {}", e);
            }
        }

        #[cfg(feature = "metrics")]
        gauge!("petra_conditions_engine_running").set(0.0);

        info!("Alarm engine stopped");
        Ok(())
    }

    /// Forward every source sample that changed since the previous scan
    pub async fn scan_once(&self) {
        let pending: Vec<(ConditionId, Sample)> = {
            let mut bindings = self.bindings.lock();
            bindings
                .iter_mut()
                .filter_map(|(id, binding)| match self.bus.get_sample(&binding.source) {
                    Some(sample) if binding.last_seen != Some(sample.timestamp) => {
                        binding.last_seen = Some(sample.timestamp);
                        binding.missing_reported = false;
                        Some((id.clone(), sample))
                    }
                    Some(_) => None,
                    None => {
                        if !binding.missing_reported {
                            warn!("Source '{}' of condition '{}' not found", binding.source, id);
                            binding.missing_reported = true;
                        }
                        None
                    }
                })
                .collect()
        };

        // A busy condition must not hold up the others
        for (id, sample) in pending {
            if let Err(e) = self.registry.offer(&id, sample) {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                counter!("petra_conditions_dropped_samples_total").increment(1);
                warn!("Dropped sample for '{}': {}", id, e);
            }
        }

        let scans = self.scan_count.fetch_add(1, Ordering::Relaxed) + 1;
        #[cfg(feature = "metrics")]
        counter!("petra_conditions_scans_total").increment(1);
        if scans % 1000 == 0 {
            debug!("Scan cycle {} completed", scans);
        }
    }

    /// Feed a sample directly to one condition, bypassing the bus
    pub async fn submit(&self, id: &ConditionId, sample: Sample) -> Result<()> {
        self.registry.submit(id, sample).await
    }

    /// Set whether a boolean condition currently holds
    pub async fn set_condition(&self, id: &ConditionId, holds: bool) -> Result<()> {
        self.registry.submit_holds(id, holds).await
    }

    // ------------------------------------------
    // Methods
    // ------------------------------------------

    pub async fn invoke(&self, id: &ConditionId, call: MethodCall) -> Result<()> {
        debug!("{} on '{}'", call.name(), id);
        self.registry.invoke(id, call).await
    }

    pub async fn enable(&self, id: &ConditionId) -> Result<()> {
        self.invoke(id, MethodCall::Enable).await
    }

    pub async fn disable(&self, id: &ConditionId) -> Result<()> {
        self.invoke(id, MethodCall::Disable).await
    }

    pub async fn acknowledge(&self, id: &ConditionId, event_id: EventId, comment: Option<String>) -> Result<()> {
        self.invoke(id, MethodCall::Acknowledge { event_id, comment }).await
    }

    pub async fn confirm(&self, id: &ConditionId, event_id: EventId, comment: Option<String>) -> Result<()> {
        self.invoke(id, MethodCall::Confirm { event_id, comment }).await
    }

    pub async fn add_comment(&self, id: &ConditionId, event_id: EventId, comment: impl Into<String>) -> Result<()> {
        self.invoke(id, MethodCall::AddComment { event_id, comment: comment.into() })
            .await
    }

    pub async fn timed_shelve(&self, id: &ConditionId, duration: chrono::Duration) -> Result<()> {
        self.invoke(id, MethodCall::TimedShelve { duration }).await
    }

    pub async fn unshelve(&self, id: &ConditionId) -> Result<()> {
        self.invoke(id, MethodCall::Unshelve).await
    }

    pub async fn one_shot_shelve(&self, id: &ConditionId) -> Result<()> {
        self.invoke(id, MethodCall::OneShotShelve).await
    }

    pub async fn suppress(&self, id: &ConditionId) -> Result<()> {
        self.invoke(id, MethodCall::Suppress).await
    }

    pub async fn unsuppress(&self, id: &ConditionId) -> Result<()> {
        self.invoke(id, MethodCall::Unsuppress).await
    }

    pub async fn remove_from_service(&self, id: &ConditionId) -> Result<()> {
        self.invoke(id, MethodCall::RemoveFromService).await
    }

    pub async fn place_in_service(&self, id: &ConditionId) -> Result<()> {
        self.invoke(id, MethodCall::PlaceInService).await
    }

    pub async fn silence(&self, id: &ConditionId) -> Result<()> {
        self.invoke(id, MethodCall::Silence).await
    }

    pub async fn reset(&self, id: &ConditionId) -> Result<()> {
        self.invoke(id, MethodCall::Reset).await
    }

    // ------------------------------------------
    // Conditions
    // ------------------------------------------

    pub async fn add_condition(&self, definition: ConditionDefinition) -> Result<()> {
        if self.registry.contains(&definition.id) {
            return Err(ConditionError::AlreadyExists(definition.id.to_string()));
        }
        self.bind(&definition);
        let id = definition.id.clone();
        if let Err(e) = self.registry.register(definition) {
            self.bindings.lock().remove(&id);
            return Err(e);
        }
        info!("Added condition '{}'", id);
        Ok(())
    }

    pub async fn remove_condition(&self, id: &ConditionId) -> Result<()> {
        self.registry.unregister(id).await?;
        self.bindings.lock().remove(id);
        Ok(())
    }

    pub async fn reconfigure_limits(&self, id: &ConditionId, limits: LimitConfiguration) -> Result<()> {
        self.registry.reconfigure(id, limits).await
    }

    pub async fn condition(&self, id: &ConditionId) -> Result<ConditionView> {
        self.registry.view(id).await
    }

    pub async fn conditions(&self) -> Vec<ConditionView> {
        self.registry.views().await
    }

    pub fn condition_ids(&self) -> Vec<ConditionId> {
        self.registry.ids()
    }

    // ------------------------------------------
    // Notifications
    // ------------------------------------------

    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        self.hub.subscribe(filter)
    }

    /// Replay retained conditions into `subscription`
    pub async fn refresh(&self, subscription: &Subscription) -> Result<u64> {
        self.registry.refresh(subscription.id()).await
    }

    // ------------------------------------------
    // Metrics
    // ------------------------------------------

    pub fn metrics(&self, scope: &Scope) -> Option<AlarmMetrics> {
        self.metrics.snapshot(scope)
    }

    pub fn all_metrics(&self) -> Vec<AlarmMetrics> {
        self.metrics.snapshots()
    }

    pub fn metrics_aggregator(&self) -> Arc<AlarmMetricsAggregator> {
        self.metrics.clone()
    }

    /// Reset one scope, or every scope when `None`
    pub fn reset_metrics(&self, scope: Option<&Scope>) -> Result<()> {
        if self.metrics.reset(scope) {
            info!("Alarm metrics reset for {}", scope.map_or("all scopes".to_string(), Scope::to_string));
            Ok(())
        } else {
            Err(ConditionError::NotFound(format!(
                "metrics scope {}",
                scope.map_or_else(String::new, Scope::to_string)
            )))
        }
    }

    // ------------------------------------------
    // Persistence and lifecycle
    // ------------------------------------------

    pub async fn save_snapshot(&self) -> Result<()> {
        let Some(persistence) = &self.config.persistence else {
            return Err(ConditionError::Config("persistence is not configured".into()));
        };
        let snapshots = self.registry.snapshots().await;
        snapshot::save(&persistence.path, snapshots).await
    }

    pub fn stop(&self) {
        info!("Stopping alarm engine");
        self.running.store(false, Ordering::SeqCst);
        self.stop_signal.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop all condition workers
    pub async fn shutdown(&self) {
        self.stop();
        self.registry.shutdown().await;
    }

    pub fn signal_bus(&self) -> &SignalBus {
        &self.bus
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            running: self.is_running(),
            scan_count: self.scan_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
            signal_count: self.bus.len(),
            condition_count: self.registry.len(),
            subscriber_count: self.hub.subscriber_count(),
        }
    }
}
