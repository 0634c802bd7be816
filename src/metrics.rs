// src/metrics.rs - Alarm metrics per scope (server-wide and per area)
//
// Gauges are maintained incrementally from the before/after view of each
// committed transition; nothing here re-scans the conditions.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// The part of a condition's state the aggregator counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsView {
    pub active: bool,
    pub unacknowledged: bool,
    pub realarm_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "scope", content = "name", rename_all = "snake_case")]
pub enum Scope {
    Server,
    Area(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Server => f.write_str("server"),
            Scope::Area(area) => write!(f, "area:{}", area),
        }
    }
}

/// Point-in-time copy of one scope's metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmMetrics {
    pub scope: Scope,
    /// Activations since start or the last reset
    pub alarm_count: u64,
    pub start_time: DateTime<Utc>,
    pub active_count: u64,
    pub maximum_active: u64,
    pub unacknowledged_count: u64,
    pub maximum_unacknowledged: u64,
    /// Activations per minute over the sliding window
    pub current_alarm_rate: f64,
    pub maximum_alarm_rate: f64,
    /// Activations per minute since start
    pub average_alarm_rate: f64,
    pub realarm_count: u64,
    pub maximum_realarm_count: u32,
}

#[derive(Debug)]
struct ScopeState {
    alarm_count: u64,
    start_time: DateTime<Utc>,
    started: Instant,
    active: u64,
    maximum_active: u64,
    unacknowledged: u64,
    maximum_unacknowledged: u64,
    window: VecDeque<Instant>,
    maximum_rate: f64,
    realarm_count: u64,
    maximum_realarm: u32,
}

impl ScopeState {
    fn new() -> Self {
        Self {
            alarm_count: 0,
            start_time: Utc::now(),
            started: Instant::now(),
            active: 0,
            maximum_active: 0,
            unacknowledged: 0,
            maximum_unacknowledged: 0,
            window: VecDeque::new(),
            maximum_rate: 0.0,
            realarm_count: 0,
            maximum_realarm: 0,
        }
    }

    fn prune(&mut self, now: Instant, width: Duration) {
        while let Some(front) = self.window.front() {
            if now.duration_since(*front) >= width {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn current_rate(&self, width: Duration) -> f64 {
        let minutes = width.as_secs_f64() / 60.0;
        if minutes <= 0.0 {
            return 0.0;
        }
        self.window.len() as f64 / minutes
    }

    fn average_rate(&self, now: Instant) -> f64 {
        let minutes = now.duration_since(self.started).as_secs_f64().max(60.0) / 60.0;
        self.alarm_count as f64 / minutes
    }

    fn apply(&mut self, before: MetricsView, after: MetricsView, activations: u32, now: Instant, width: Duration) {
        adjust(&mut self.active, before.active, after.active);
        adjust(&mut self.unacknowledged, before.unacknowledged, after.unacknowledged);
        self.maximum_active = self.maximum_active.max(self.active);
        self.maximum_unacknowledged = self.maximum_unacknowledged.max(self.unacknowledged);

        if after.realarm_count > before.realarm_count {
            self.realarm_count += u64::from(after.realarm_count - before.realarm_count);
        }
        self.maximum_realarm = self.maximum_realarm.max(after.realarm_count);

        for _ in 0..activations {
            self.alarm_count += 1;
            self.window.push_back(now);
        }
        self.prune(now, width);
        self.maximum_rate = self.maximum_rate.max(self.current_rate(width));
    }

    fn reset(&mut self) {
        self.alarm_count = 0;
        self.start_time = Utc::now();
        self.started = Instant::now();
        self.maximum_active = self.active;
        self.maximum_unacknowledged = self.unacknowledged;
        self.window.clear();
        self.maximum_rate = 0.0;
        self.realarm_count = 0;
        self.maximum_realarm = 0;
    }

    fn report(&mut self, scope: Scope, width: Duration) -> AlarmMetrics {
        let now = Instant::now();
        self.prune(now, width);
        AlarmMetrics {
            scope,
            alarm_count: self.alarm_count,
            start_time: self.start_time,
            active_count: self.active,
            maximum_active: self.maximum_active,
            unacknowledged_count: self.unacknowledged,
            maximum_unacknowledged: self.maximum_unacknowledged,
            current_alarm_rate: self.current_rate(width),
            maximum_alarm_rate: self.maximum_rate,
            average_alarm_rate: self.average_rate(now),
            realarm_count: self.realarm_count,
            maximum_realarm_count: self.maximum_realarm,
        }
    }
}

fn adjust(gauge: &mut u64, before: bool, after: bool) {
    match (before, after) {
        (false, true) => *gauge += 1,
        (true, false) => *gauge = gauge.saturating_sub(1),
        _ => {}
    }
}

/// Aggregates alarm metrics for the server and every area
#[derive(Debug)]
pub struct AlarmMetricsAggregator {
    window: Duration,
    scopes: Mutex<HashMap<Scope, ScopeState>>,
}

impl AlarmMetricsAggregator {
    pub fn new(window: Duration) -> Self {
        let mut scopes = HashMap::new();
        scopes.insert(Scope::Server, ScopeState::new());
        Self {
            window,
            scopes: Mutex::new(scopes),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Make sure an area scope exists before its first event
    pub fn ensure_area(&self, area: &str) {
        self.scopes
            .lock()
            .entry(Scope::Area(area.to_string()))
            .or_insert_with(ScopeState::new);
    }

    /// Record one committed transition of a condition in `area`
    pub fn record(&self, area: Option<&str>, before: MetricsView, after: MetricsView, activations: u32) {
        if before == after && activations == 0 {
            return;
        }
        let now = Instant::now();
        let mut scopes = self.scopes.lock();

        let mut targets = vec![Scope::Server];
        if let Some(area) = area {
            targets.push(Scope::Area(area.to_string()));
        }
        for scope in targets {
            let state = scopes.entry(scope.clone()).or_insert_with(ScopeState::new);
            state.apply(before, after, activations, now, self.window);

            #[cfg(feature = "metrics")]
            {
                let label = scope.to_string();
                gauge!("petra_conditions_active", "scope" => label.clone()).set(state.active as f64);
                gauge!("petra_conditions_unacknowledged", "scope" => label.clone())
                    .set(state.unacknowledged as f64);
                gauge!("petra_conditions_alarm_rate", "scope" => label.clone())
                    .set(state.current_rate(self.window));
                if activations > 0 {
                    counter!("petra_conditions_activations_total", "scope" => label)
                        .increment(u64::from(activations));
                }
            }
        }
    }

    pub fn snapshot(&self, scope: &Scope) -> Option<AlarmMetrics> {
        let mut scopes = self.scopes.lock();
        scopes
            .get_mut(scope)
            .map(|state| state.report(scope.clone(), self.window))
    }

    pub fn snapshots(&self) -> Vec<AlarmMetrics> {
        let mut scopes = self.scopes.lock();
        let mut reports: Vec<_> = scopes
            .iter_mut()
            .map(|(scope, state)| state.report(scope.clone(), self.window))
            .collect();
        reports.sort_by(|a, b| a.scope.cmp(&b.scope));
        reports
    }

    /// Clear cumulative counters of one scope, or of every scope
    ///
    /// Live gauges (active, unacknowledged) are kept; maxima restart from
    /// the current values.
    pub fn reset(&self, scope: Option<&Scope>) -> bool {
        let mut scopes = self.scopes.lock();
        match scope {
            Some(scope) => match scopes.get_mut(scope) {
                Some(state) => {
                    state.reset();
                    true
                }
                None => false,
            },
            None => {
                scopes.values_mut().for_each(ScopeState::reset);
                true
            }
        }
    }
}
