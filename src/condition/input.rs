//! Turns raw samples into the quantity a condition evaluates.

use crate::value::Sample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a condition derives its evaluated quantity from the source value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InputMode {
    /// Source value is evaluated as-is
    Direct,
    Deviation { setpoint: f64 },
    RateOfChange,
    Discrepancy { target: f64, tolerance: f64 },
    OffNormal { normal_state: bool },
}

/// Quantity handed to the activation machine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Observation {
    /// Analog quantity classified against limits
    Level(f64),
    /// Whether a boolean condition currently holds
    Holds(bool),
}

#[derive(Debug, Clone)]
pub struct InputStage {
    mode: InputMode,
    last: Option<(f64, DateTime<Utc>)>,
}

impl InputStage {
    pub fn new(mode: InputMode) -> Self {
        Self { mode, last: None }
    }

    /// Derive an observation, or `None` when the sample cannot be evaluated
    /// (non-numeric, non-finite, or the first sample of a rate).
    pub fn observe(&mut self, sample: &Sample) -> Option<Observation> {
        match &self.mode {
            InputMode::OffNormal { normal_state } => sample
                .value
                .as_bool()
                .map(|v| Observation::Holds(v != *normal_state)),
            InputMode::Direct => sample.value.as_float().map(Observation::Level),
            InputMode::Deviation { setpoint } => {
                let setpoint = *setpoint;
                sample
                    .value
                    .as_float()
                    .map(|v| Observation::Level(v - setpoint))
            }
            InputMode::Discrepancy { target, tolerance } => {
                let (target, tolerance) = (*target, *tolerance);
                sample
                    .value
                    .as_float()
                    .map(|v| Observation::Holds((v - target).abs() > tolerance))
            }
            InputMode::RateOfChange => {
                let value = sample.value.as_float()?;
                let previous = self.last;
                match previous {
                    None => {
                        self.last = Some((value, sample.timestamp));
                        None
                    }
                    Some((last_value, last_time)) => {
                        let dt = (sample.timestamp - last_time).num_microseconds()? as f64 / 1e6;
                        if dt <= 0.0 {
                            return None;
                        }
                        self.last = Some((value, sample.timestamp));
                        Some(Observation::Level((value - last_value) / dt))
                    }
                }
            }
        }
    }

    /// Forget rate history after the source was unavailable
    pub fn reset(&mut self) {
        self.last = None;
    }
}
