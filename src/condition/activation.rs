//! Active/Inactive state with limit sub-states.

use super::input::Observation;
use super::kind::Capabilities;
use crate::limits::{evaluate, Boundary, BoundarySet, LimitConfiguration};
use serde::{Deserialize, Serialize};

/// What an active condition is active for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ActiveSubState {
    /// Boolean conditions carry no sub-state
    Holds,
    /// Exclusive limit alarms: exactly one boundary
    Exclusive(Boundary),
    /// Non-exclusive limit alarms: one flag per exceeded boundary
    NonExclusive(BoundarySet),
}

impl ActiveSubState {
    pub fn boundaries(&self) -> BoundarySet {
        match self {
            ActiveSubState::Holds => BoundarySet::empty(),
            ActiveSubState::Exclusive(b) => b.flag(),
            ActiveSubState::NonExclusive(set) => *set,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "sub_state", rename_all = "snake_case")]
pub enum ActivationState {
    #[default]
    Inactive,
    Active(ActiveSubState),
}

impl ActivationState {
    pub fn is_active(&self) -> bool {
        matches!(self, ActivationState::Active(_))
    }

    pub fn sub_state(&self) -> Option<ActiveSubState> {
        match self {
            ActivationState::Active(sub) => Some(*sub),
            ActivationState::Inactive => None,
        }
    }

    pub fn boundaries(&self) -> BoundarySet {
        self.sub_state()
            .map(|sub| sub.boundaries())
            .unwrap_or_default()
    }
}

/// Committed activation plus the raw evaluator state behind it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivationMachine {
    pub state: ActivationState,
    /// Boundary flags from the last evaluation, before delays and latching
    pub raw: BoundarySet,
    /// Whether the last boolean observation held
    pub raw_holds: bool,
    /// Returned to normal while latching; stays Active until Reset
    pub latched: bool,
    /// Went Inactive while still unacknowledged
    pub unacked_at_last_deactivation: bool,
    /// Activations since the last acknowledgement that followed an
    /// unacknowledged deactivation
    pub realarm_count: u32,
    /// Re-alarms of the current occurrence
    #[serde(default)]
    pub re_alarm_repeat_count: u32,
}

impl ActivationMachine {
    /// Fold an observation into the raw state and return the target
    /// sub-state, or `None` when the condition should be inactive.
    pub fn target(
        &mut self,
        observation: Observation,
        capabilities: Capabilities,
        limits: Option<&LimitConfiguration>,
    ) -> Option<ActiveSubState> {
        match observation {
            Observation::Holds(holds) => {
                self.raw_holds = holds;
                holds.then_some(ActiveSubState::Holds)
            }
            Observation::Level(value) => {
                let limits = limits?;
                let eval = evaluate(value, limits, self.raw);
                self.raw = eval.active;
                if eval.active.is_empty() {
                    None
                } else if capabilities.is_exclusive() {
                    eval.state.boundary().map(ActiveSubState::Exclusive)
                } else {
                    Some(ActiveSubState::NonExclusive(eval.active))
                }
            }
        }
    }

    /// Drop the raw evaluator state, e.g. when the condition is disabled
    pub fn clear_raw(&mut self) {
        self.raw = BoundarySet::empty();
        self.raw_holds = false;
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}
