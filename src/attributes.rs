// src/attributes.rs - Boundary to the node layer that stores condition attributes
//
// The engine owns condition state; the address space owns attribute storage.
// After every committed transition the dispatcher mirrors the changed state
// through an `AttributeStore`.

use crate::{
    condition::{ConditionId, ConditionView},
    error::Result,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

/// Condition attributes exposed to the node layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Attribute {
    EventId,
    Retain,
    EnabledState,
    Quality,
    Severity,
    LastSeverity,
    Comment,
    LastTransitionTime,
    ActiveState,
    AckedState,
    ConfirmedState,
    ShelvingState,
    UnshelveTime,
    SuppressedOrShelved,
    SuppressedState,
    OutOfServiceState,
    LatchedState,
    SilenceState,
    ReAlarmRepeatCount,
}

impl Attribute {
    pub const ALL: [Attribute; 19] = [
        Attribute::EventId,
        Attribute::Retain,
        Attribute::EnabledState,
        Attribute::Quality,
        Attribute::Severity,
        Attribute::LastSeverity,
        Attribute::Comment,
        Attribute::LastTransitionTime,
        Attribute::ActiveState,
        Attribute::AckedState,
        Attribute::ConfirmedState,
        Attribute::ShelvingState,
        Attribute::UnshelveTime,
        Attribute::SuppressedOrShelved,
        Attribute::SuppressedState,
        Attribute::OutOfServiceState,
        Attribute::LatchedState,
        Attribute::SilenceState,
        Attribute::ReAlarmRepeatCount,
    ];

    /// Value of this attribute in a condition view
    pub fn read(&self, view: &ConditionView) -> JsonValue {
        match self {
            Attribute::EventId => json!(view.event_id.to_string()),
            Attribute::Retain => json!(view.retain),
            Attribute::EnabledState => json!(view.enabled),
            Attribute::Quality => json!(view.quality),
            Attribute::Severity => json!(view.severity),
            Attribute::LastSeverity => json!(view.last_severity),
            Attribute::Comment => json!(view.comment),
            Attribute::LastTransitionTime => json!(view.last_transition_time),
            Attribute::ActiveState => json!(view.activation),
            Attribute::AckedState => json!(view.ack.is_acknowledged()),
            Attribute::ConfirmedState => json!(view.ack.is_confirmed()),
            Attribute::ShelvingState => json!(view.shelving),
            Attribute::UnshelveTime => json!(view.shelving.unshelve_time()),
            Attribute::SuppressedOrShelved => json!(view.suppressed_or_shelved()),
            Attribute::SuppressedState => json!(view.suppressed),
            Attribute::OutOfServiceState => json!(view.out_of_service),
            Attribute::LatchedState => json!(view.latched),
            Attribute::SilenceState => json!(view.silenced),
            Attribute::ReAlarmRepeatCount => json!(view.re_alarm_repeat_count),
        }
    }
}

/// Attribute storage owned by the node layer
#[cfg_attr(test, mockall::automock)]
pub trait AttributeStore: Send + Sync {
    fn get_attribute(&self, condition: &ConditionId, attribute: Attribute) -> Result<Option<JsonValue>>;

    fn set_attribute(&self, condition: &ConditionId, attribute: Attribute, value: JsonValue) -> Result<()>;

    fn remove_condition(&self, condition: &ConditionId) -> Result<()>;
}

/// Write every attribute whose value differs from `previous`
pub fn sync_view(
    store: &dyn AttributeStore,
    previous: Option<&ConditionView>,
    view: &ConditionView,
) -> Result<usize> {
    let mut written = 0;
    for attribute in Attribute::ALL {
        let value = attribute.read(view);
        if let Some(previous) = previous {
            if attribute.read(previous) == value {
                continue;
            }
        }
        store.set_attribute(&view.id, attribute, value)?;
        written += 1;
    }
    Ok(written)
}

/// In-process attribute store
#[derive(Debug, Default)]
pub struct MemoryAttributeStore {
    values: DashMap<(ConditionId, Attribute), JsonValue>,
}

impl MemoryAttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl AttributeStore for MemoryAttributeStore {
    fn get_attribute(&self, condition: &ConditionId, attribute: Attribute) -> Result<Option<JsonValue>> {
        Ok(self
            .values
            .get(&(condition.clone(), attribute))
            .map(|v| v.value().clone()))
    }

    fn set_attribute(&self, condition: &ConditionId, attribute: Attribute, value: JsonValue) -> Result<()> {
        self.values.insert((condition.clone(), attribute), value);
        Ok(())
    }

    fn remove_condition(&self, condition: &ConditionId) -> Result<()> {
        self.values.retain(|(id, _), _| id != condition);
        Ok(())
    }
}
