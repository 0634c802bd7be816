//! Shelving state machine.
//!
//! ```text
//!                TimedShelve(d)               expiry / Unshelve
//!   Unshelved ──────────────────▶ TimedShelved ─────────────────▶ Unshelved
//!       │                              │
//!       │ OneShotShelve                │ OneShotShelve
//!       ▼                              ▼
//!   OneShotShelved ── inactive, then active again ──▶ Unshelved
//! ```
//!
//! Every arming of a timer bumps a generation; an expiry carrying an older
//! generation is ignored, so a manual Unshelve that reaches the worker first
//! always wins over a timer that already fired.

use crate::error::{ConditionError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ShelvingState {
    #[default]
    Unshelved,
    TimedShelved { unshelve_time: DateTime<Utc> },
    OneShotShelved,
}

impl ShelvingState {
    pub fn is_shelved(&self) -> bool {
        !matches!(self, ShelvingState::Unshelved)
    }

    pub fn unshelve_time(&self) -> Option<DateTime<Utc>> {
        match self {
            ShelvingState::TimedShelved { unshelve_time } => Some(*unshelve_time),
            _ => None,
        }
    }
}

/// Why a condition left the shelved state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnshelveCause {
    Manual,
    Expired,
    OneShotConsumed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShelvingMachine {
    pub state: ShelvingState,
    /// One-shot shelving has seen the condition inactive
    pub armed: bool,
    #[serde(skip)]
    generation: u64,
}

impl ShelvingMachine {
    pub fn new(state: ShelvingState, armed: bool) -> Self {
        Self {
            state,
            armed,
            generation: 0,
        }
    }

    /// Shelve until `now + duration`; returns the timer generation
    pub fn timed_shelve(
        &mut self,
        duration: Duration,
        max: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        if duration < Duration::zero() {
            return Err(ConditionError::InvalidArgument(format!(
                "shelving duration must not be negative ({}ms)",
                duration.num_milliseconds()
            )));
        }
        if duration > max {
            return Err(ConditionError::InvalidArgument(format!(
                "shelving duration {}s exceeds maximum {}s",
                duration.num_seconds(),
                max.num_seconds()
            )));
        }
        let unshelve_time = now.checked_add_signed(duration).ok_or_else(|| {
            ConditionError::InvalidArgument("shelving deadline out of range".to_string())
        })?;
        self.generation += 1;
        self.armed = false;
        self.state = ShelvingState::TimedShelved { unshelve_time };
        Ok(self.generation)
    }

    /// Returns `false` when already one-shot shelved
    pub fn one_shot_shelve(&mut self, active: bool) -> bool {
        if self.state == ShelvingState::OneShotShelved {
            return false;
        }
        self.generation += 1;
        self.state = ShelvingState::OneShotShelved;
        self.armed = !active;
        true
    }

    pub fn unshelve(&mut self) -> Result<()> {
        if !self.state.is_shelved() {
            return Err(ConditionError::InvalidState(
                "condition is not shelved".to_string(),
            ));
        }
        self.clear();
        Ok(())
    }

    /// Timer expiry; `true` when it matched the current timed shelve
    pub fn expire(&mut self, generation: u64) -> bool {
        if generation != self.generation || !matches!(self.state, ShelvingState::TimedShelved { .. }) {
            return false;
        }
        self.clear();
        true
    }

    pub fn on_deactivated(&mut self) {
        if self.state == ShelvingState::OneShotShelved {
            self.armed = true;
        }
    }

    /// Consumes an armed one-shot shelve; `true` when it did
    pub fn on_activated(&mut self) -> bool {
        if self.state == ShelvingState::OneShotShelved && self.armed {
            self.clear();
            return true;
        }
        false
    }

    /// Re-arm the generation after a restore; returns it for the new timer
    pub fn rearm(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn clear(&mut self) {
        self.generation += 1;
        self.state = ShelvingState::Unshelved;
        self.armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn max() -> Duration {
        Duration::hours(8)
    }

    #[test]
    fn test_timed_shelve_validation() {
        let mut machine = ShelvingMachine::default();
        let now = Utc::now();
        assert!(matches!(
            machine.timed_shelve(Duration::seconds(-1), max(), now),
            Err(ConditionError::InvalidArgument(_))
        ));
        assert!(matches!(
            machine.timed_shelve(Duration::hours(9), max(), now),
            Err(ConditionError::InvalidArgument(_))
        ));
        assert_eq!(machine.state, ShelvingState::Unshelved);

        machine.timed_shelve(Duration::seconds(5), max(), now).unwrap();
        assert_eq!(machine.state.unshelve_time(), Some(now + Duration::seconds(5)));
    }

    #[test]
    fn test_deadline_overflow_rejected() {
        let mut machine = ShelvingMachine::default();
        let err = machine
            .timed_shelve(Duration::days(2), Duration::days(3), DateTime::<Utc>::MAX_UTC)
            .unwrap_err();
        assert!(matches!(err, ConditionError::InvalidArgument(_)));
        assert_eq!(machine.state, ShelvingState::Unshelved);
    }

    #[test]
    fn test_stale_expiry_ignored() {
        let mut machine = ShelvingMachine::default();
        let now = Utc::now();
        let first = machine.timed_shelve(Duration::seconds(5), max(), now).unwrap();
        let second = machine.timed_shelve(Duration::seconds(10), max(), now).unwrap();
        assert!(!machine.expire(first));
        assert!(machine.state.is_shelved());
        assert!(machine.expire(second));
        assert!(!machine.state.is_shelved());
    }

    #[test]
    fn test_unshelve_invalidates_timer() {
        let mut machine = ShelvingMachine::default();
        let generation = machine.timed_shelve(Duration::seconds(5), max(), Utc::now()).unwrap();
        machine.unshelve().unwrap();
        assert!(!machine.expire(generation));
        assert!(matches!(machine.unshelve(), Err(ConditionError::InvalidState(_))));
    }

    #[test]
    fn test_one_shot_while_active_needs_inactive_period() {
        let mut machine = ShelvingMachine::default();
        assert!(machine.one_shot_shelve(true));
        assert!(!machine.on_activated());
        machine.on_deactivated();
        assert!(machine.on_activated());
        assert_eq!(machine.state, ShelvingState::Unshelved);
        assert!(!machine.on_activated());
    }

    #[test]
    fn test_one_shot_idempotent() {
        let mut machine = ShelvingMachine::default();
        assert!(machine.one_shot_shelve(false));
        assert!(!machine.one_shot_shelve(false));
        assert!(machine.armed);
    }

    #[test]
    fn test_one_shot_replaces_timer() {
        let mut machine = ShelvingMachine::default();
        let generation = machine.timed_shelve(Duration::seconds(5), max(), Utc::now()).unwrap();
        machine.one_shot_shelve(false);
        assert!(!machine.expire(generation));
        assert_eq!(machine.state, ShelvingState::OneShotShelved);
    }
}
