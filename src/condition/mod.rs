//! Condition record and its transition logic.
//!
//! A [`Condition`] composes the orthogonal sub-state machines (activation,
//! acknowledgement, shelving) by value. Every mutation goes through one of a
//! few entry points ([`Condition::observe`], [`Condition::apply`], timer
//! callbacks) that return an [`Outcome`]: the changes to publish and the
//! timers the owning worker must arm or cancel. The record itself never
//! touches channels or clocks, so the whole lifecycle is testable
//! synchronously.

pub mod ack;
pub mod activation;
pub mod delay;
pub mod input;
pub mod kind;
pub mod shelving;

pub use ack::AckState;
pub use activation::{ActivationMachine, ActivationState, ActiveSubState};
pub use input::{InputMode, Observation};
pub use kind::{Capabilities, ConditionKind};
pub use shelving::{ShelvingState, UnshelveCause};

use crate::{
    error::{ConditionError, Result},
    limits::{Boundary, LimitConfiguration},
    metrics::MetricsView,
    snapshot::ConditionSnapshot,
    value::{Quality, Sample},
};
use chrono::{DateTime, Utc};
use delay::{DelayFilter, PendingTransition};
use input::InputStage;
use serde::{Deserialize, Serialize};
use shelving::ShelvingMachine;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

// ==========================================
// SECTION 1: IDENTITY
// ==========================================

/// Stable identity of a condition instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionId(String);

impl ConditionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConditionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConditionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConditionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Opaque identifier of one occurrence, used to correlate Acknowledge and
/// Confirm with the activation they answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId([u8; 16]);

impl EventId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0).simple())
    }
}

// ==========================================
// SECTION 2: DEFINITION
// ==========================================

/// Severity override per boundary; unset boundaries use the base severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundarySeverities {
    #[serde(default)]
    pub high_high: Option<u16>,
    #[serde(default)]
    pub high: Option<u16>,
    #[serde(default)]
    pub low: Option<u16>,
    #[serde(default)]
    pub low_low: Option<u16>,
}

impl BoundarySeverities {
    pub fn get(&self, boundary: Boundary) -> Option<u16> {
        match boundary {
            Boundary::HighHigh => self.high_high,
            Boundary::High => self.high,
            Boundary::Low => self.low,
            Boundary::LowLow => self.low_low,
        }
    }
}

pub const MIN_SEVERITY: u16 = 1;
pub const MAX_SEVERITY: u16 = 1000;

/// Upper bound for any configured maximum shelving time (one year)
pub const MAX_TIME_SHELVED_SECS: i64 = 366 * 24 * 3600;

/// Static description of a condition, fixed at registration except for
/// copy-on-write limit reconfiguration
#[derive(Debug, Clone)]
pub struct ConditionDefinition {
    pub id: ConditionId,
    pub name: String,
    pub source: String,
    pub area: Option<String>,
    pub message: Option<String>,
    pub capabilities: Capabilities,
    pub severity: u16,
    pub boundary_severities: BoundarySeverities,
    pub limits: Option<Arc<LimitConfiguration>>,
    pub input: InputMode,
    pub on_delay: Option<std::time::Duration>,
    pub off_delay: Option<std::time::Duration>,
    /// Repeat the alarm while it stays active and unacknowledged
    pub re_alarm_time: Option<std::time::Duration>,
    pub max_time_shelved: chrono::Duration,
    pub enabled: bool,
}

impl ConditionDefinition {
    /// Definition with the preset's evaluation capabilities plus
    /// acknowledgement and shelving
    pub fn new(id: impl Into<ConditionId>, source: impl Into<String>, kind: ConditionKind) -> Self {
        let capabilities = kind.capabilities();
        let input = if capabilities.contains(Capabilities::DEVIATION) {
            InputMode::Deviation { setpoint: 0.0 }
        } else if capabilities.contains(Capabilities::RATE_OF_CHANGE) {
            InputMode::RateOfChange
        } else if capabilities.is_limit() {
            InputMode::Direct
        } else if capabilities.contains(Capabilities::DISCREPANCY) {
            InputMode::Discrepancy { target: 0.0, tolerance: 0.0 }
        } else {
            InputMode::OffNormal { normal_state: false }
        };
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            source: source.into(),
            area: None,
            message: None,
            capabilities: capabilities | Capabilities::REQUIRES_ACK | Capabilities::SHELVABLE,
            severity: 500,
            boundary_severities: BoundarySeverities::default(),
            limits: None,
            input,
            on_delay: None,
            off_delay: None,
            re_alarm_time: None,
            max_time_shelved: chrono::Duration::hours(8),
            enabled: true,
        }
    }

    pub fn with_limits(mut self, limits: LimitConfiguration) -> Self {
        self.limits = Some(Arc::new(limits));
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities |= capabilities;
        self
    }

    pub fn without_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities.remove(capabilities);
        self
    }

    pub fn with_area(mut self, area: impl Into<String>) -> Self {
        self.area = Some(area.into());
        self
    }

    pub fn with_severity(mut self, severity: u16) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_boundary_severities(mut self, severities: BoundarySeverities) -> Self {
        self.boundary_severities = severities;
        self
    }

    pub fn with_input(mut self, input: InputMode) -> Self {
        self.input = input;
        self
    }

    pub fn with_delays(
        mut self,
        on_delay: Option<std::time::Duration>,
        off_delay: Option<std::time::Duration>,
    ) -> Self {
        self.on_delay = on_delay;
        self.off_delay = off_delay;
        self
    }

    pub fn with_re_alarm_time(mut self, re_alarm_time: Option<std::time::Duration>) -> Self {
        self.re_alarm_time = re_alarm_time.filter(|d| !d.is_zero());
        self
    }

    pub fn with_max_time_shelved(mut self, max: chrono::Duration) -> Self {
        self.max_time_shelved = max;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let caps = self.capabilities;
        let fail = |msg: String| Err(ConditionError::Config(format!("condition '{}': {}", self.id, msg)));

        if self.id.as_str().is_empty() {
            return Err(ConditionError::Config("condition id must not be empty".to_string()));
        }
        if !(MIN_SEVERITY..=MAX_SEVERITY).contains(&self.severity) {
            return fail(format!("severity {} outside {}..={}", self.severity, MIN_SEVERITY, MAX_SEVERITY));
        }
        for boundary in Boundary::ALL {
            if let Some(severity) = self.boundary_severities.get(boundary) {
                if !(MIN_SEVERITY..=MAX_SEVERITY).contains(&severity) {
                    return fail(format!("{} severity {} out of range", boundary, severity));
                }
            }
        }
        if caps.confirmable() && !caps.requires_ack() {
            return fail("confirmation requires acknowledgement".to_string());
        }
        if self.re_alarm_time.is_some() && !caps.requires_ack() {
            return fail("re-alarming requires acknowledgement".to_string());
        }
        if self.max_time_shelved < chrono::Duration::zero() {
            return fail("max_time_shelved must not be negative".to_string());
        }
        if self.max_time_shelved.num_seconds() > MAX_TIME_SHELVED_SECS {
            return fail(format!("max_time_shelved exceeds {}s", MAX_TIME_SHELVED_SECS));
        }

        match (&self.input, caps.is_limit()) {
            (InputMode::Direct, true) => {}
            (InputMode::Deviation { setpoint }, true) if caps.contains(Capabilities::DEVIATION) => {
                if !setpoint.is_finite() {
                    return fail("setpoint must be finite".to_string());
                }
            }
            (InputMode::RateOfChange, true) if caps.contains(Capabilities::RATE_OF_CHANGE) => {}
            (InputMode::Discrepancy { target, tolerance }, false)
                if caps.contains(Capabilities::DISCREPANCY) =>
            {
                if !target.is_finite() || !tolerance.is_finite() || *tolerance < 0.0 {
                    return fail("discrepancy needs a finite target and non-negative tolerance".to_string());
                }
            }
            (InputMode::OffNormal { .. }, false) => {}
            (input, _) => return fail(format!("input {:?} does not match kind", input)),
        }

        if caps.is_limit() {
            match &self.limits {
                Some(limits) => limits
                    .validate()
                    .map_err(|e| ConditionError::Config(format!("condition '{}': {}", self.id, e)))?,
                None => return fail("limit alarm without limits".to_string()),
            }
        }
        Ok(())
    }
}

// ==========================================
// SECTION 3: METHODS, EVENTS AND OUTCOMES
// ==========================================

/// Client-invokable methods
#[derive(Debug, Clone, PartialEq)]
pub enum MethodCall {
    Enable,
    Disable,
    Acknowledge { event_id: EventId, comment: Option<String> },
    Confirm { event_id: EventId, comment: Option<String> },
    AddComment { event_id: EventId, comment: String },
    TimedShelve { duration: chrono::Duration },
    Unshelve,
    OneShotShelve,
    Suppress,
    Unsuppress,
    RemoveFromService,
    PlaceInService,
    Silence,
    /// Clears a latched alarm whose input has returned to normal
    Reset,
}

impl MethodCall {
    pub fn name(&self) -> &'static str {
        match self {
            MethodCall::Enable => "Enable",
            MethodCall::Disable => "Disable",
            MethodCall::Acknowledge { .. } => "Acknowledge",
            MethodCall::Confirm { .. } => "Confirm",
            MethodCall::AddComment { .. } => "AddComment",
            MethodCall::TimedShelve { .. } => "TimedShelve",
            MethodCall::Unshelve => "Unshelve",
            MethodCall::OneShotShelve => "OneShotShelve",
            MethodCall::Suppress => "Suppress",
            MethodCall::Unsuppress => "Unsuppress",
            MethodCall::RemoveFromService => "RemoveFromService",
            MethodCall::PlaceInService => "PlaceInService",
            MethodCall::Silence => "Silence",
            MethodCall::Reset => "Reset",
        }
    }
}

/// What a notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "cause", rename_all = "snake_case")]
pub enum EventKind {
    Activated,
    Deactivated,
    SubStateChanged,
    Acknowledged,
    Confirmed,
    CommentAdded,
    Shelved,
    Unshelved(UnshelveCause),
    Enabled,
    Disabled,
    Suppressed,
    Unsuppressed,
    RemovedFromService,
    PlacedInService,
    Silenced,
    Reset,
    /// Still active and unacknowledged after the re-alarm time
    ReAlarmed,
    QualityChanged,
    /// Copy of the current state sent during a condition refresh
    Refresh,
}

/// One committed change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub kind: EventKind,
    /// `false` when outward notification is suppressed (shelved,
    /// suppressed or out of service)
    pub publish: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerRequest {
    Shelving { generation: u64, after: std::time::Duration },
    CancelShelving,
    Delay { generation: u64, after: std::time::Duration },
    CancelDelay,
    ReAlarm { generation: u64, after: std::time::Duration },
    CancelReAlarm,
}

/// Result of one command against a condition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub changes: Vec<Change>,
    pub timers: Vec<TimerRequest>,
}

impl Outcome {
    fn push(&mut self, kind: EventKind, publish: bool) {
        self.changes.push(Change { kind, publish });
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.timers.is_empty()
    }

    /// Kinds that reach subscribers
    pub fn published(&self) -> impl Iterator<Item = EventKind> + '_ {
        self.changes.iter().filter(|c| c.publish).map(|c| c.kind)
    }

    /// Inactive -> Active transitions, published or not
    pub fn activations(&self) -> u32 {
        self.changes
            .iter()
            .filter(|c| c.kind == EventKind::Activated)
            .count() as u32
    }
}

// ==========================================
// SECTION 4: CONDITION RECORD
// ==========================================

/// Read-only copy of a condition's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionView {
    pub id: ConditionId,
    pub name: String,
    pub source: String,
    pub area: Option<String>,
    pub message: Option<String>,
    pub event_id: EventId,
    pub enabled: bool,
    pub retain: bool,
    pub activation: ActivationState,
    pub ack: AckState,
    pub shelving: ShelvingState,
    pub severity: u16,
    pub last_severity: u16,
    pub quality: Quality,
    pub comment: Option<String>,
    pub last_transition_time: DateTime<Utc>,
    pub latched: bool,
    pub suppressed: bool,
    pub out_of_service: bool,
    pub silenced: bool,
    pub realarm_count: u32,
    pub re_alarm_repeat_count: u32,
    pub requires_ack: bool,
}

impl ConditionView {
    pub fn is_active(&self) -> bool {
        self.activation.is_active()
    }

    pub fn suppressed_or_shelved(&self) -> bool {
        self.shelving.is_shelved() || self.suppressed || self.out_of_service
    }
}

#[derive(Debug, Clone)]
pub struct Condition {
    definition: ConditionDefinition,
    enabled: bool,
    retain: bool,
    quality: Quality,
    severity: u16,
    last_severity: u16,
    comment: Option<String>,
    event_id: EventId,
    last_transition_time: DateTime<Utc>,
    activation: ActivationMachine,
    ack: AckState,
    shelving: ShelvingMachine,
    delay: DelayFilter,
    input: InputStage,
    last_observation: Option<Observation>,
    suppressed: bool,
    out_of_service: bool,
    silenced: bool,
    re_alarm_generation: u64,
    re_alarm_armed: bool,
}

impl Condition {
    pub fn new(definition: ConditionDefinition, now: DateTime<Utc>) -> Self {
        Self {
            enabled: definition.enabled,
            retain: false,
            quality: Quality::Good,
            severity: definition.severity,
            last_severity: definition.severity,
            comment: None,
            event_id: EventId::generate(),
            last_transition_time: now,
            activation: ActivationMachine::default(),
            ack: AckState::initial(definition.capabilities.confirmable()),
            shelving: ShelvingMachine::default(),
            delay: DelayFilter::new(definition.on_delay, definition.off_delay),
            input: InputStage::new(definition.input.clone()),
            last_observation: None,
            suppressed: false,
            out_of_service: false,
            silenced: false,
            re_alarm_generation: 0,
            re_alarm_armed: false,
            definition,
        }
    }

    pub fn id(&self) -> &ConditionId {
        &self.definition.id
    }

    pub fn definition(&self) -> &ConditionDefinition {
        &self.definition
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_active(&self) -> bool {
        self.activation.is_active()
    }

    pub fn retain(&self) -> bool {
        self.retain
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn ack_state(&self) -> AckState {
        self.ack
    }

    pub fn shelving_state(&self) -> ShelvingState {
        self.shelving.state
    }

    pub fn activation_state(&self) -> ActivationState {
        self.activation.state
    }

    pub fn is_suppressed_or_shelved(&self) -> bool {
        self.shelving.state.is_shelved() || self.suppressed || self.out_of_service
    }

    pub fn view(&self) -> ConditionView {
        let def = &self.definition;
        ConditionView {
            id: def.id.clone(),
            name: def.name.clone(),
            source: def.source.clone(),
            area: def.area.clone(),
            message: def.message.clone(),
            event_id: self.event_id,
            enabled: self.enabled,
            retain: self.retain,
            activation: self.activation.state,
            ack: self.ack,
            shelving: self.shelving.state,
            severity: self.severity,
            last_severity: self.last_severity,
            quality: self.quality,
            comment: self.comment.clone(),
            last_transition_time: self.last_transition_time,
            latched: self.activation.latched,
            suppressed: self.suppressed,
            out_of_service: self.out_of_service,
            silenced: self.silenced,
            realarm_count: self.activation.realarm_count,
            re_alarm_repeat_count: self.activation.re_alarm_repeat_count,
            requires_ack: def.capabilities.requires_ack(),
        }
    }

    pub fn metrics_view(&self) -> MetricsView {
        MetricsView {
            active: self.enabled && self.is_active(),
            unacknowledged: self.enabled
                && self.definition.capabilities.requires_ack()
                && self.ack == AckState::Unacknowledged,
            realarm_count: self.activation.realarm_count,
        }
    }

    // ------------------------------------------
    // Inputs
    // ------------------------------------------

    /// Feed a source sample
    ///
    /// Bad samples only update quality and break rate history; disabled
    /// conditions remember the observation for re-evaluation on Enable.
    pub fn observe(&mut self, sample: &Sample, now: DateTime<Utc>) -> Outcome {
        let mut out = Outcome::default();
        if sample.quality != self.quality {
            self.quality = sample.quality;
            if self.enabled {
                out.push(EventKind::QualityChanged, true);
            }
        }
        if self.quality.is_bad() {
            self.input.reset();
            return out;
        }
        let Some(observation) = self.input.observe(sample) else {
            return out;
        };
        self.last_observation = Some(observation);
        if self.enabled {
            self.evaluate(observation, now, &mut out);
        }
        out
    }

    /// Feed an external "condition holds" signal to a boolean condition
    pub fn observe_holds(&mut self, holds: bool, now: DateTime<Utc>) -> Result<Outcome> {
        if self.definition.capabilities.is_limit() {
            return Err(ConditionError::InvalidArgument(format!(
                "condition {} is evaluated against limits",
                self.definition.id
            )));
        }
        let mut out = Outcome::default();
        let observation = Observation::Holds(holds);
        self.last_observation = Some(observation);
        if self.enabled {
            self.evaluate(observation, now, &mut out);
        }
        Ok(out)
    }

    /// Replace the limit configuration; the next evaluation uses it
    pub fn reconfigure(&mut self, limits: LimitConfiguration) -> Result<()> {
        if !self.definition.capabilities.is_limit() {
            return Err(ConditionError::InvalidArgument(format!(
                "condition {} has no limits",
                self.definition.id
            )));
        }
        limits.validate()?;
        self.definition.limits = Some(Arc::new(limits));
        Ok(())
    }

    // ------------------------------------------
    // Methods
    // ------------------------------------------

    pub fn apply(&mut self, call: MethodCall, now: DateTime<Utc>) -> Result<Outcome> {
        if !self.enabled && !matches!(call, MethodCall::Enable | MethodCall::Disable) {
            return Err(ConditionError::ConditionDisabled(self.definition.id.to_string()));
        }

        let caps = self.definition.capabilities;
        let mut out = Outcome::default();
        match call {
            MethodCall::Enable => self.enable(now, &mut out),
            MethodCall::Disable => self.disable(now, &mut out),
            MethodCall::Acknowledge { event_id, comment } => {
                self.check_event_id(&event_id)?;
                if let Some(next) = self.ack.acknowledge() {
                    self.ack = next;
                    self.activation.realarm_count = 0;
                    self.activation.unacked_at_last_deactivation = false;
                    self.cancel_re_alarm(&mut out);
                    self.stamp(comment, now);
                    self.refresh_retain();
                    out.push(EventKind::Acknowledged, true);
                }
            }
            MethodCall::Confirm { event_id, comment } => {
                if !caps.confirmable() {
                    return Err(ConditionError::InvalidState(format!(
                        "condition {} does not support confirmation",
                        self.definition.id
                    )));
                }
                self.check_event_id(&event_id)?;
                self.ack = self.ack.confirm()?;
                self.stamp(comment, now);
                self.refresh_retain();
                out.push(EventKind::Confirmed, true);
            }
            MethodCall::AddComment { event_id, comment } => {
                self.check_event_id(&event_id)?;
                self.comment = Some(comment);
                out.push(EventKind::CommentAdded, true);
            }
            MethodCall::TimedShelve { duration } => {
                self.require_shelvable()?;
                let generation =
                    self.shelving
                        .timed_shelve(duration, self.definition.max_time_shelved, now)?;
                out.timers.push(TimerRequest::Shelving {
                    generation,
                    after: duration.to_std().unwrap_or_default(),
                });
                out.push(EventKind::Shelved, true);
            }
            MethodCall::Unshelve => {
                self.shelving.unshelve()?;
                out.timers.push(TimerRequest::CancelShelving);
                out.push(EventKind::Unshelved(UnshelveCause::Manual), true);
            }
            MethodCall::OneShotShelve => {
                self.require_shelvable()?;
                let was_timed = self.shelving.state.unshelve_time().is_some();
                if self.shelving.one_shot_shelve(self.is_active()) {
                    if was_timed {
                        out.timers.push(TimerRequest::CancelShelving);
                    }
                    out.push(EventKind::Shelved, true);
                }
            }
            MethodCall::Suppress => {
                if !self.suppressed {
                    self.suppressed = true;
                    out.push(EventKind::Suppressed, true);
                }
            }
            MethodCall::Unsuppress => {
                if self.suppressed {
                    self.suppressed = false;
                    out.push(EventKind::Unsuppressed, true);
                }
            }
            MethodCall::RemoveFromService => {
                if !self.out_of_service {
                    self.out_of_service = true;
                    out.push(EventKind::RemovedFromService, true);
                }
            }
            MethodCall::PlaceInService => {
                if self.out_of_service {
                    self.out_of_service = false;
                    out.push(EventKind::PlacedInService, true);
                }
            }
            MethodCall::Silence => {
                if !self.is_active() {
                    return Err(ConditionError::InvalidState(
                        "only an active condition can be silenced".to_string(),
                    ));
                }
                if !self.silenced {
                    self.silenced = true;
                    out.push(EventKind::Silenced, true);
                }
            }
            MethodCall::Reset => {
                if !self.activation.latched {
                    return Err(ConditionError::InvalidState(format!(
                        "condition {} is not latched",
                        self.definition.id
                    )));
                }
                self.deactivate(EventKind::Reset, now, &mut out);
            }
        }
        Ok(out)
    }

    // ------------------------------------------
    // Timers
    // ------------------------------------------

    pub fn shelving_expired(&mut self, generation: u64) -> Outcome {
        let mut out = Outcome::default();
        if self.shelving.expire(generation) {
            out.push(EventKind::Unshelved(UnshelveCause::Expired), true);
        }
        out
    }

    /// Re-alarm timer fired; repeats the alarm if it is still unanswered
    pub fn re_alarm_elapsed(&mut self, generation: u64) -> Outcome {
        let mut out = Outcome::default();
        if !self.re_alarm_armed || generation != self.re_alarm_generation {
            return out;
        }
        self.re_alarm_armed = false;
        if !self.enabled || !self.is_active() || self.ack != AckState::Unacknowledged {
            return out;
        }
        self.activation.re_alarm_repeat_count = self.activation.re_alarm_repeat_count.saturating_add(1);
        out.push(EventKind::ReAlarmed, !self.is_suppressed_or_shelved());
        self.arm_re_alarm(&mut out);
        out
    }

    pub fn delay_elapsed(&mut self, generation: u64, now: DateTime<Utc>) -> Outcome {
        let mut out = Outcome::default();
        if !self.enabled {
            return out;
        }
        match self.delay.elapsed(generation) {
            Some(PendingTransition::Activate(sub)) => match self.activation.state {
                ActivationState::Inactive => self.activate(sub, now, &mut out),
                ActivationState::Active(current) if current != sub => {
                    self.change_sub_state(sub, now, &mut out)
                }
                ActivationState::Active(_) => {}
            },
            Some(PendingTransition::Deactivate) => {
                if self.is_active() {
                    self.deactivate(EventKind::Deactivated, now, &mut out);
                }
            }
            None => {}
        }
        out
    }

    // ------------------------------------------
    // Persistence
    // ------------------------------------------

    pub fn snapshot(&self, sequence: u64, now: DateTime<Utc>) -> ConditionSnapshot {
        ConditionSnapshot {
            id: self.definition.id.clone(),
            sequence,
            event_id: self.event_id,
            enabled: self.enabled,
            quality: self.quality,
            severity: self.severity,
            last_severity: self.last_severity,
            comment: self.comment.clone(),
            last_transition_time: self.last_transition_time,
            activation: self.activation.clone(),
            ack: self.ack,
            shelving: self.shelving.state,
            one_shot_armed: self.shelving.armed,
            suppressed: self.suppressed,
            out_of_service: self.out_of_service,
            silenced: self.silenced,
            last_observation: self.last_observation,
            saved_at: now,
        }
    }

    /// Rebuild a condition from a snapshot
    ///
    /// A timed shelve whose deadline has passed is released immediately;
    /// otherwise the returned outcome re-arms the timer for the remainder.
    pub fn restore(
        definition: ConditionDefinition,
        snapshot: ConditionSnapshot,
        now: DateTime<Utc>,
    ) -> (Self, Outcome) {
        let mut condition = Condition::new(definition, now);
        condition.event_id = snapshot.event_id;
        condition.enabled = snapshot.enabled;
        condition.quality = snapshot.quality;
        condition.severity = snapshot.severity;
        condition.last_severity = snapshot.last_severity;
        condition.comment = snapshot.comment;
        condition.last_transition_time = snapshot.last_transition_time;
        condition.activation = snapshot.activation;
        condition.ack = snapshot.ack;
        condition.shelving = ShelvingMachine::new(snapshot.shelving, snapshot.one_shot_armed);
        condition.suppressed = snapshot.suppressed;
        condition.out_of_service = snapshot.out_of_service;
        condition.silenced = snapshot.silenced;
        condition.last_observation = snapshot.last_observation;

        let mut out = Outcome::default();
        if let Some(deadline) = condition.shelving.state.unshelve_time() {
            if deadline <= now {
                if condition.shelving.unshelve().is_ok() {
                    out.push(EventKind::Unshelved(UnshelveCause::Expired), true);
                }
            } else {
                let generation = condition.shelving.rearm();
                out.timers.push(TimerRequest::Shelving {
                    generation,
                    after: (deadline - now).to_std().unwrap_or_default(),
                });
            }
        }
        if condition.enabled && condition.is_active() && condition.ack == AckState::Unacknowledged {
            condition.arm_re_alarm(&mut out);
        }
        condition.refresh_retain();
        (condition, out)
    }

    // ------------------------------------------
    // Internals
    // ------------------------------------------

    fn evaluate(&mut self, observation: Observation, now: DateTime<Utc>, out: &mut Outcome) {
        let limits = self.definition.limits.clone();
        let target = self
            .activation
            .target(observation, self.definition.capabilities, limits.as_deref());
        self.settle(target, now, out);
    }

    fn settle(&mut self, target: Option<ActiveSubState>, now: DateTime<Utc>, out: &mut Outcome) {
        match (self.activation.state, target) {
            (ActivationState::Inactive, Some(sub)) => {
                self.commit_or_delay(PendingTransition::Activate(sub), now, out)
            }
            (ActivationState::Active(current), Some(sub)) => {
                self.activation.latched = false;
                if self.delay.cancel() {
                    out.timers.push(TimerRequest::CancelDelay);
                }
                if current != sub {
                    self.change_sub_state(sub, now, out);
                }
            }
            (ActivationState::Active(_), None) => {
                if self.definition.capabilities.contains(Capabilities::LATCHING) {
                    self.activation.latched = true;
                    return;
                }
                self.commit_or_delay(PendingTransition::Deactivate, now, out)
            }
            (ActivationState::Inactive, None) => {
                if self.delay.cancel() {
                    out.timers.push(TimerRequest::CancelDelay);
                }
            }
        }
    }

    fn commit_or_delay(&mut self, transition: PendingTransition, now: DateTime<Utc>, out: &mut Outcome) {
        if self.delay.delay_for(&transition).is_some() {
            if let Some((generation, after)) = self.delay.schedule(transition) {
                out.timers.push(TimerRequest::Delay { generation, after });
            }
            return;
        }
        match transition {
            PendingTransition::Activate(sub) => self.activate(sub, now, out),
            PendingTransition::Deactivate => self.deactivate(EventKind::Deactivated, now, out),
        }
    }

    fn activate(&mut self, sub: ActiveSubState, now: DateTime<Utc>, out: &mut Outcome) {
        if self.shelving.on_activated() {
            out.push(EventKind::Unshelved(UnshelveCause::OneShotConsumed), true);
        }
        if self.activation.unacked_at_last_deactivation {
            self.activation.realarm_count = self.activation.realarm_count.saturating_add(1);
            self.activation.unacked_at_last_deactivation = false;
        }
        self.activation.state = ActivationState::Active(sub);
        self.activation.latched = false;
        self.activation.re_alarm_repeat_count = 0;
        self.ack = AckState::Unacknowledged;
        self.event_id = EventId::generate();
        self.comment = None;
        self.silenced = false;
        self.last_transition_time = now;
        self.update_severity();
        self.refresh_retain();
        out.push(EventKind::Activated, !self.is_suppressed_or_shelved());
        self.arm_re_alarm(out);
    }

    fn deactivate(&mut self, kind: EventKind, now: DateTime<Utc>, out: &mut Outcome) {
        self.activation.unacked_at_last_deactivation =
            self.definition.capabilities.requires_ack() && self.ack == AckState::Unacknowledged;
        self.activation.state = ActivationState::Inactive;
        self.activation.latched = false;
        self.shelving.on_deactivated();
        self.cancel_re_alarm(out);
        self.last_transition_time = now;
        self.update_severity();
        self.refresh_retain();
        let publish = kind != EventKind::Deactivated || !self.is_suppressed_or_shelved();
        out.push(kind, publish);
    }

    fn change_sub_state(&mut self, sub: ActiveSubState, now: DateTime<Utc>, out: &mut Outcome) {
        self.activation.state = ActivationState::Active(sub);
        self.last_transition_time = now;
        self.update_severity();
        out.push(EventKind::SubStateChanged, !self.is_suppressed_or_shelved());
    }

    fn enable(&mut self, now: DateTime<Utc>, out: &mut Outcome) {
        if self.enabled {
            return;
        }
        self.enabled = true;
        self.refresh_retain();
        out.push(EventKind::Enabled, true);
        if let Some(observation) = self.last_observation {
            if !self.quality.is_bad() {
                self.evaluate(observation, now, out);
            }
        }
    }

    fn disable(&mut self, now: DateTime<Utc>, out: &mut Outcome) {
        if !self.enabled {
            return;
        }
        if self.delay.cancel() {
            out.timers.push(TimerRequest::CancelDelay);
        }
        self.cancel_re_alarm(out);
        self.enabled = false;
        if self.is_active() {
            self.shelving.on_deactivated();
            self.last_transition_time = now;
        }
        self.activation.state = ActivationState::Inactive;
        self.activation.latched = false;
        self.activation.unacked_at_last_deactivation = false;
        self.activation.clear_raw();
        if self.ack != AckState::Confirmed {
            self.ack = AckState::initial(self.definition.capabilities.confirmable());
        }
        self.update_severity();
        self.refresh_retain();
        out.push(EventKind::Disabled, true);
    }

    fn arm_re_alarm(&mut self, out: &mut Outcome) {
        let Some(after) = self.definition.re_alarm_time else {
            return;
        };
        if !self.definition.capabilities.requires_ack() {
            return;
        }
        self.re_alarm_generation += 1;
        self.re_alarm_armed = true;
        out.timers.push(TimerRequest::ReAlarm {
            generation: self.re_alarm_generation,
            after,
        });
    }

    fn cancel_re_alarm(&mut self, out: &mut Outcome) {
        if self.re_alarm_armed {
            self.re_alarm_armed = false;
            self.re_alarm_generation += 1;
            out.timers.push(TimerRequest::CancelReAlarm);
        }
    }

    fn check_event_id(&self, event_id: &EventId) -> Result<()> {
        if *event_id != self.event_id {
            return Err(ConditionError::InvalidEventId(self.definition.id.to_string()));
        }
        Ok(())
    }

    fn require_shelvable(&self) -> Result<()> {
        if !self.definition.capabilities.contains(Capabilities::SHELVABLE) {
            return Err(ConditionError::InvalidState(format!(
                "condition {} cannot be shelved",
                self.definition.id
            )));
        }
        Ok(())
    }

    fn stamp(&mut self, comment: Option<String>, now: DateTime<Utc>) {
        if comment.is_some() {
            self.comment = comment;
        }
        self.last_transition_time = now;
    }

    fn effective_severity(&self) -> u16 {
        let base = self.definition.severity;
        self.activation
            .state
            .boundaries()
            .boundaries()
            .map(|b| self.definition.boundary_severities.get(b).unwrap_or(base))
            .max()
            .unwrap_or(base)
    }

    fn update_severity(&mut self) {
        let severity = self.effective_severity();
        if severity != self.severity {
            self.last_severity = self.severity;
            self.severity = severity;
        }
    }

    fn refresh_retain(&mut self) {
        self.retain = self.enabled
            && (self.is_active()
                || (self.definition.capabilities.requires_ack()
                    && self.ack == AckState::Unacknowledged));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::BoundarySet;
    use std::time::Duration as StdDuration;

    fn high_alarm() -> ConditionDefinition {
        ConditionDefinition::new("tank.level.high", "tank.level", ConditionKind::ExclusiveLimit)
            .with_limits(LimitConfiguration {
                high: Some(10.0),
                deadband: 1.0,
                ..Default::default()
            })
    }

    fn condition(def: ConditionDefinition) -> Condition {
        def.validate().unwrap();
        Condition::new(def, Utc::now())
    }

    fn feed(c: &mut Condition, value: f64) -> Outcome {
        c.observe(&Sample::new(value), Utc::now())
    }

    fn kinds(out: &Outcome) -> Vec<EventKind> {
        out.published().collect()
    }

    fn ack(c: &mut Condition) -> Result<Outcome> {
        let event_id = c.event_id();
        c.apply(MethodCall::Acknowledge { event_id, comment: None }, Utc::now())
    }

    #[test]
    fn test_activation_rearms_ack() {
        let mut c = condition(high_alarm().with_capabilities(Capabilities::CONFIRMABLE));
        let initial_event = c.event_id();
        assert_eq!(kinds(&feed(&mut c, 12.0)), vec![EventKind::Activated]);
        assert_ne!(c.event_id(), initial_event);
        assert_eq!(c.ack_state(), AckState::Unacknowledged);
        assert!(c.retain());

        ack(&mut c).unwrap();
        let event_id = c.event_id();
        c.apply(MethodCall::Confirm { event_id, comment: Some("ok".into()) }, Utc::now())
            .unwrap();
        assert_eq!(c.ack_state(), AckState::Confirmed);

        feed(&mut c, 5.0);
        feed(&mut c, 12.0);
        assert_eq!(c.ack_state(), AckState::Unacknowledged);
        assert!(c.view().comment.is_none());
    }

    #[test]
    fn test_acknowledge_idempotent() {
        let mut c = condition(high_alarm());
        feed(&mut c, 12.0);
        let first = ack(&mut c).unwrap();
        assert_eq!(kinds(&first), vec![EventKind::Acknowledged]);
        let before = c.view();
        let second = ack(&mut c).unwrap();
        assert!(second.is_empty());
        assert_eq!(c.view(), before);
    }

    #[test]
    fn test_stale_event_id_rejected() {
        let mut c = condition(high_alarm());
        feed(&mut c, 12.0);
        let stale = c.event_id();
        ack(&mut c).unwrap();
        feed(&mut c, 5.0);
        feed(&mut c, 12.0);
        let err = c
            .apply(MethodCall::Acknowledge { event_id: stale, comment: None }, Utc::now())
            .unwrap_err();
        assert!(matches!(err, ConditionError::InvalidEventId(_)));
    }

    #[test]
    fn test_retain_follows_ack_after_deactivation() {
        let mut c = condition(high_alarm());
        feed(&mut c, 12.0);
        feed(&mut c, 5.0);
        assert!(!c.is_active());
        assert!(c.retain(), "unacknowledged occurrence stays retained");
        ack(&mut c).unwrap();
        assert!(!c.retain());
    }

    #[test]
    fn test_retain_without_ack_requirement() {
        let mut c = condition(high_alarm().without_capabilities(Capabilities::REQUIRES_ACK));
        feed(&mut c, 12.0);
        assert!(c.retain());
        feed(&mut c, 5.0);
        assert!(!c.retain());
        assert_eq!(c.ack_state(), AckState::Unacknowledged);
    }

    #[test]
    fn test_confirm_rules() {
        let mut c = condition(high_alarm());
        feed(&mut c, 12.0);
        let event_id = c.event_id();
        let err = c
            .apply(MethodCall::Confirm { event_id, comment: None }, Utc::now())
            .unwrap_err();
        assert!(matches!(err, ConditionError::InvalidState(_)));

        let mut c = condition(high_alarm().with_capabilities(Capabilities::CONFIRMABLE));
        feed(&mut c, 12.0);
        let event_id = c.event_id();
        let err = c
            .apply(MethodCall::Confirm { event_id, comment: None }, Utc::now())
            .unwrap_err();
        assert!(matches!(err, ConditionError::InvalidState(_)));
    }

    #[test]
    fn test_disable_while_active_unacknowledged() {
        let mut c = condition(high_alarm());
        feed(&mut c, 12.0);
        let event_id = c.event_id();
        let out = c.apply(MethodCall::Disable, Utc::now()).unwrap();
        assert_eq!(kinds(&out), vec![EventKind::Disabled]);
        assert!(!c.is_active());
        assert!(!c.retain());

        let err = c
            .apply(MethodCall::Acknowledge { event_id, comment: None }, Utc::now())
            .unwrap_err();
        assert!(matches!(err, ConditionError::ConditionDisabled(_)));

        // Idempotent
        assert!(c.apply(MethodCall::Disable, Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_disabled_condition_ignores_samples_until_enabled() {
        let mut c = condition(high_alarm());
        c.apply(MethodCall::Disable, Utc::now()).unwrap();
        assert!(feed(&mut c, 12.0).is_empty());
        assert!(!c.is_active());

        let out = c.apply(MethodCall::Enable, Utc::now()).unwrap();
        assert_eq!(kinds(&out), vec![EventKind::Enabled, EventKind::Activated]);
        assert!(c.apply(MethodCall::Enable, Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_one_shot_consumes_single_activation() {
        let mut c = condition(high_alarm());
        c.apply(MethodCall::OneShotShelve, Utc::now()).unwrap();
        assert_eq!(c.shelving_state(), ShelvingState::OneShotShelved);

        let out = feed(&mut c, 12.0);
        assert_eq!(
            kinds(&out),
            vec![
                EventKind::Unshelved(UnshelveCause::OneShotConsumed),
                EventKind::Activated
            ]
        );
        assert_eq!(c.shelving_state(), ShelvingState::Unshelved);

        feed(&mut c, 5.0);
        let out = feed(&mut c, 12.0);
        assert_eq!(kinds(&out), vec![EventKind::Activated]);
    }

    #[test]
    fn test_one_shot_while_active_suppresses_until_next_occurrence() {
        let mut c = condition(high_alarm());
        feed(&mut c, 12.0);
        c.apply(MethodCall::OneShotShelve, Utc::now()).unwrap();

        let out = feed(&mut c, 5.0);
        assert!(kinds(&out).is_empty(), "deactivation is not published while shelved");
        assert_eq!(out.changes.len(), 1);
        assert_eq!(c.shelving_state(), ShelvingState::OneShotShelved);

        feed(&mut c, 12.0);
        assert_eq!(c.shelving_state(), ShelvingState::Unshelved);
    }

    #[test]
    fn test_shelved_condition_keeps_evaluating() {
        let mut c = condition(high_alarm());
        let out = c
            .apply(MethodCall::TimedShelve { duration: chrono::Duration::seconds(5) }, Utc::now())
            .unwrap();
        assert_eq!(kinds(&out), vec![EventKind::Shelved]);
        assert!(matches!(out.timers[0], TimerRequest::Shelving { after, .. } if after == StdDuration::from_secs(5)));

        let out = feed(&mut c, 12.0);
        assert!(kinds(&out).is_empty());
        assert_eq!(out.activations(), 1);
        assert!(c.is_active());
        assert_eq!(c.ack_state(), AckState::Unacknowledged);
    }

    #[test]
    fn test_timed_shelve_then_manual_unshelve() {
        let mut c = condition(high_alarm());
        let out = c
            .apply(MethodCall::TimedShelve { duration: chrono::Duration::seconds(5) }, Utc::now())
            .unwrap();
        let TimerRequest::Shelving { generation, .. } = out.timers[0] else {
            panic!("expected shelving timer");
        };
        let out = c.apply(MethodCall::Unshelve, Utc::now()).unwrap();
        assert_eq!(out.timers, vec![TimerRequest::CancelShelving]);
        assert_eq!(kinds(&out), vec![EventKind::Unshelved(UnshelveCause::Manual)]);
        assert!(c.shelving_expired(generation).is_empty());
    }

    #[test]
    fn test_shelving_requires_capability() {
        let mut c = condition(high_alarm().without_capabilities(Capabilities::SHELVABLE));
        assert!(matches!(
            c.apply(MethodCall::OneShotShelve, Utc::now()),
            Err(ConditionError::InvalidState(_))
        ));
    }

    #[test]
    fn test_realarm_counts_unacknowledged_reactivation() {
        let mut c = condition(high_alarm());
        feed(&mut c, 12.0);
        feed(&mut c, 5.0);
        feed(&mut c, 12.0);
        assert_eq!(c.view().realarm_count, 1);
        ack(&mut c).unwrap();
        assert_eq!(c.view().realarm_count, 0);
        feed(&mut c, 5.0);
        feed(&mut c, 12.0);
        assert_eq!(c.view().realarm_count, 0);
    }

    #[test]
    fn test_non_exclusive_severity_is_max_active_boundary() {
        let def = ConditionDefinition::new("p", "pressure", ConditionKind::NonExclusiveLimit)
            .with_limits(LimitConfiguration {
                high_high: Some(90.0),
                high: Some(80.0),
                low: Some(20.0),
                ..Default::default()
            })
            .with_boundary_severities(BoundarySeverities {
                high_high: Some(900),
                high: Some(700),
                ..Default::default()
            })
            .with_severity(300);
        let mut c = condition(def);
        feed(&mut c, 85.0);
        assert_eq!(c.view().severity, 700);
        let out = feed(&mut c, 95.0);
        assert_eq!(kinds(&out), vec![EventKind::SubStateChanged]);
        assert_eq!(
            c.activation_state(),
            ActivationState::Active(ActiveSubState::NonExclusive(
                BoundarySet::HIGH_HIGH | BoundarySet::HIGH
            ))
        );
        let view = c.view();
        assert_eq!((view.severity, view.last_severity), (900, 700));
        feed(&mut c, 50.0);
        assert_eq!(c.view().severity, 300);
    }

    #[test]
    fn test_bad_quality_keeps_state() {
        let mut c = condition(high_alarm());
        feed(&mut c, 12.0);
        let out = c.observe(
            &Sample::new(0.0).with_quality(Quality::Bad),
            Utc::now(),
        );
        assert_eq!(kinds(&out), vec![EventKind::QualityChanged]);
        assert!(c.is_active());
        assert_eq!(c.view().quality, Quality::Bad);
    }

    #[test]
    fn test_rate_history_restarts_after_bad_quality() {
        let def = ConditionDefinition::new("feed.rate", "feed.level", ConditionKind::ExclusiveRateOfChange)
            .with_limits(LimitConfiguration {
                high: Some(5.0),
                ..Default::default()
            });
        let mut c = condition(def);
        let t0 = Utc::now();
        let at = |secs: i64| t0 + chrono::Duration::seconds(secs);

        c.observe(&Sample::new(0.0).at(at(0)), at(0));
        c.observe(&Sample::new(1.0).at(at(1)), at(1));
        c.observe(&Sample::new(0.0).with_quality(Quality::Bad).at(at(2)), at(2));

        // Against the sample before the gap this would be 24.5/s
        let out = c.observe(&Sample::new(50.0).at(at(3)), at(3));
        assert_eq!(kinds(&out), vec![EventKind::QualityChanged]);
        assert!(!c.is_active());

        c.observe(&Sample::new(51.0).at(at(4)), at(4));
        assert!(!c.is_active());
        c.observe(&Sample::new(61.0).at(at(5)), at(5));
        assert!(c.is_active());
    }

    #[test]
    fn test_re_alarm_timer_lifecycle() {
        let def = high_alarm().with_re_alarm_time(Some(StdDuration::from_secs(60)));
        let mut c = condition(def);
        let out = feed(&mut c, 12.0);
        let TimerRequest::ReAlarm { generation, after } = out.timers[0] else {
            panic!("expected re-alarm timer");
        };
        assert_eq!(after, StdDuration::from_secs(60));

        let out = c.re_alarm_elapsed(generation);
        assert_eq!(kinds(&out), vec![EventKind::ReAlarmed]);
        assert_eq!(c.view().re_alarm_repeat_count, 1);
        let TimerRequest::ReAlarm { generation: next, .. } = out.timers[0] else {
            panic!("expected re-armed timer");
        };
        assert!(c.re_alarm_elapsed(generation).is_empty(), "stale generation");

        let out = ack(&mut c).unwrap();
        assert!(out.timers.contains(&TimerRequest::CancelReAlarm));
        assert!(c.re_alarm_elapsed(next).is_empty());

        assert!(high_alarm()
            .with_re_alarm_time(Some(StdDuration::from_secs(60)))
            .without_capabilities(Capabilities::REQUIRES_ACK)
            .validate()
            .is_err());
    }

    #[test]
    fn test_latching_requires_reset() {
        let mut c = condition(high_alarm().with_capabilities(Capabilities::LATCHING));
        assert!(matches!(
            c.apply(MethodCall::Reset, Utc::now()),
            Err(ConditionError::InvalidState(_))
        ));
        feed(&mut c, 12.0);
        assert!(feed(&mut c, 5.0).is_empty());
        assert!(c.is_active());
        assert!(c.view().latched);

        let out = c.apply(MethodCall::Reset, Utc::now()).unwrap();
        assert_eq!(kinds(&out), vec![EventKind::Reset]);
        assert!(!c.is_active());
    }

    #[test]
    fn test_on_delay_schedules_timer() {
        let def = high_alarm().with_delays(Some(StdDuration::from_secs(3)), None);
        let mut c = condition(def);
        let out = feed(&mut c, 12.0);
        assert!(out.changes.is_empty());
        let TimerRequest::Delay { generation, after } = out.timers[0] else {
            panic!("expected delay timer");
        };
        assert_eq!(after, StdDuration::from_secs(3));
        assert!(!c.is_active());

        let out = c.delay_elapsed(generation, Utc::now());
        assert_eq!(kinds(&out), vec![EventKind::Activated]);
    }

    #[test]
    fn test_on_delay_cancelled_by_return_to_normal() {
        let def = high_alarm().with_delays(Some(StdDuration::from_secs(3)), None);
        let mut c = condition(def);
        let out = feed(&mut c, 12.0);
        let TimerRequest::Delay { generation, .. } = out.timers[0] else {
            panic!("expected delay timer");
        };
        let out = feed(&mut c, 5.0);
        assert_eq!(out.timers, vec![TimerRequest::CancelDelay]);
        assert!(c.delay_elapsed(generation, Utc::now()).is_empty());
    }

    #[test]
    fn test_suppressed_condition_hides_activation() {
        let mut c = condition(high_alarm());
        c.apply(MethodCall::Suppress, Utc::now()).unwrap();
        assert!(c.apply(MethodCall::Suppress, Utc::now()).unwrap().is_empty());
        let out = feed(&mut c, 12.0);
        assert!(kinds(&out).is_empty());
        assert!(c.view().suppressed_or_shelved());
    }

    #[test]
    fn test_off_normal_holds_signal() {
        let mut c = condition(ConditionDefinition::new("door", "door.open", ConditionKind::OffNormal));
        let out = c.observe_holds(true, Utc::now()).unwrap();
        assert_eq!(kinds(&out), vec![EventKind::Activated]);
        assert_eq!(
            c.activation_state(),
            ActivationState::Active(ActiveSubState::Holds)
        );
        assert!(condition(high_alarm()).observe_holds(true, Utc::now()).is_err());
    }

    #[test]
    fn test_restore_expired_shelve_releases() {
        let mut c = condition(high_alarm());
        c.apply(MethodCall::TimedShelve { duration: chrono::Duration::seconds(5) }, Utc::now())
            .unwrap();
        let snapshot = c.snapshot(3, Utc::now());

        let later = Utc::now() + chrono::Duration::seconds(10);
        let (restored, out) = Condition::restore(high_alarm(), snapshot.clone(), later);
        assert_eq!(restored.shelving_state(), ShelvingState::Unshelved);
        assert_eq!(kinds(&out), vec![EventKind::Unshelved(UnshelveCause::Expired)]);

        let (restored, out) = Condition::restore(high_alarm(), snapshot, Utc::now());
        assert!(restored.shelving_state().is_shelved());
        assert!(matches!(out.timers[0], TimerRequest::Shelving { .. }));
    }

    #[test]
    fn test_definition_validation() {
        assert!(ConditionDefinition::new("x", "s", ConditionKind::ExclusiveLimit)
            .validate()
            .is_err());
        assert!(high_alarm().with_severity(0).validate().is_err());
        assert!(high_alarm()
            .with_capabilities(Capabilities::CONFIRMABLE)
            .without_capabilities(Capabilities::REQUIRES_ACK)
            .validate()
            .is_err());
        assert!(high_alarm()
            .with_input(InputMode::OffNormal { normal_state: true })
            .validate()
            .is_err());
    }

    #[test]
    fn test_event_id_bytes() {
        let id = EventId::generate();
        assert_eq!(EventId::from_bytes(id.as_bytes()), Some(id));
        assert_eq!(EventId::from_bytes(&[1, 2, 3]), None);
        assert_eq!(id.to_string().len(), 32);
    }
}
