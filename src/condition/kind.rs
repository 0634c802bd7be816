//! Alarm kinds expressed as capability flags.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// What a condition can do and how its input is evaluated
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Capabilities: u16 {
        /// Input is classified against a limit configuration
        const LIMIT          = 1 << 0;
        /// Each boundary is tracked as its own flag
        const NON_EXCLUSIVE  = 1 << 1;
        /// Limits apply to `value - setpoint`
        const DEVIATION      = 1 << 2;
        /// Limits apply to the per-second rate between samples
        const RATE_OF_CHANGE = 1 << 3;
        /// Active while `|value - target| > tolerance`
        const DISCREPANCY    = 1 << 4;
        /// Retains until acknowledged
        const REQUIRES_ACK   = 1 << 5;
        /// Supports Confirm after Acknowledge
        const CONFIRMABLE    = 1 << 6;
        /// Accepts shelving methods
        const SHELVABLE      = 1 << 7;
        /// Stays active after returning to normal until Reset
        const LATCHING       = 1 << 8;
    }
}

/// Configured alarm preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Boolean source differs from its normal state
    #[default]
    OffNormal,
    ExclusiveLimit,
    NonExclusiveLimit,
    ExclusiveDeviation,
    NonExclusiveDeviation,
    ExclusiveRateOfChange,
    NonExclusiveRateOfChange,
    Discrepancy,
}

impl ConditionKind {
    /// Evaluation capabilities of the preset; behavioural flags
    /// (ack, confirm, shelve, latch) are added from configuration.
    pub fn capabilities(self) -> Capabilities {
        match self {
            ConditionKind::OffNormal => Capabilities::empty(),
            ConditionKind::ExclusiveLimit => Capabilities::LIMIT,
            ConditionKind::NonExclusiveLimit => Capabilities::LIMIT | Capabilities::NON_EXCLUSIVE,
            ConditionKind::ExclusiveDeviation => Capabilities::LIMIT | Capabilities::DEVIATION,
            ConditionKind::NonExclusiveDeviation => {
                Capabilities::LIMIT | Capabilities::NON_EXCLUSIVE | Capabilities::DEVIATION
            }
            ConditionKind::ExclusiveRateOfChange => {
                Capabilities::LIMIT | Capabilities::RATE_OF_CHANGE
            }
            ConditionKind::NonExclusiveRateOfChange => {
                Capabilities::LIMIT | Capabilities::NON_EXCLUSIVE | Capabilities::RATE_OF_CHANGE
            }
            ConditionKind::Discrepancy => Capabilities::DISCREPANCY,
        }
    }
}

impl Capabilities {
    pub fn is_limit(self) -> bool {
        self.contains(Capabilities::LIMIT)
    }

    pub fn is_exclusive(self) -> bool {
        self.is_limit() && !self.contains(Capabilities::NON_EXCLUSIVE)
    }

    pub fn requires_ack(self) -> bool {
        self.contains(Capabilities::REQUIRES_ACK)
    }

    pub fn confirmable(self) -> bool {
        self.contains(Capabilities::CONFIRMABLE)
    }
}
