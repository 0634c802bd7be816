//! Acknowledge/confirm state for the current occurrence.

use crate::error::{ConditionError, Result};
use serde::{Deserialize, Serialize};

/// `Unacknowledged -> Acknowledged -> Confirmed`, cleared by the next
/// activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckState {
    Unacknowledged,
    Acknowledged,
    Confirmed,
}

impl AckState {
    /// State of a condition that has never activated
    pub fn initial(confirmable: bool) -> Self {
        if confirmable {
            AckState::Confirmed
        } else {
            AckState::Acknowledged
        }
    }

    /// Acknowledged or beyond
    pub fn is_acknowledged(self) -> bool {
        !matches!(self, AckState::Unacknowledged)
    }

    pub fn is_confirmed(self) -> bool {
        matches!(self, AckState::Confirmed)
    }

    /// Returns the new state, or `None` when already acknowledged
    pub fn acknowledge(self) -> Option<AckState> {
        match self {
            AckState::Unacknowledged => Some(AckState::Acknowledged),
            AckState::Acknowledged | AckState::Confirmed => None,
        }
    }

    pub fn confirm(self) -> Result<AckState> {
        match self {
            AckState::Acknowledged => Ok(AckState::Confirmed),
            AckState::Unacknowledged => Err(ConditionError::InvalidState(
                "confirm requires a prior acknowledge".to_string(),
            )),
            AckState::Confirmed => Err(ConditionError::InvalidState(
                "occurrence already confirmed".to_string(),
            )),
        }
    }
}
