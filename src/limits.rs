// File: src/limits.rs
// Limit evaluation with per-boundary deadband hysteresis
//
// A high-side boundary is entered when the value rises above it and is left
// only once the value falls below `limit - deadband`. Low-side boundaries are
// the mirror image. Each boundary may carry its own deadband; unset ones use
// the shared value. Evaluation is pure: callers keep the previous boundary
// flags and hand them back on the next sample.

use crate::error::{ConditionError, Result};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// SECTION 1: BOUNDARIES AND CLASSIFICATION
// ==========================================

/// One of the four limit boundaries of a multi-limit alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    HighHigh,
    High,
    Low,
    LowLow,
}

impl Boundary {
    /// All boundaries, most severe high first
    pub const ALL: [Boundary; 4] = [
        Boundary::HighHigh,
        Boundary::High,
        Boundary::Low,
        Boundary::LowLow,
    ];

    pub fn flag(self) -> BoundarySet {
        match self {
            Boundary::HighHigh => BoundarySet::HIGH_HIGH,
            Boundary::High => BoundarySet::HIGH,
            Boundary::Low => BoundarySet::LOW,
            Boundary::LowLow => BoundarySet::LOW_LOW,
        }
    }

    pub fn is_high_side(self) -> bool {
        matches!(self, Boundary::HighHigh | Boundary::High)
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Boundary::HighHigh => "HighHigh",
            Boundary::High => "High",
            Boundary::Low => "Low",
            Boundary::LowLow => "LowLow",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Boundaries currently exceeded
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct BoundarySet: u8 {
        const HIGH_HIGH = 0b0001;
        const HIGH      = 0b0010;
        const LOW       = 0b0100;
        const LOW_LOW   = 0b1000;
    }
}

impl BoundarySet {
    /// Iterate the contained boundaries in severity order
    pub fn boundaries(self) -> impl Iterator<Item = Boundary> {
        Boundary::ALL
            .into_iter()
            .filter(move |b| self.contains(b.flag()))
    }

    /// Most severe boundary, high side checked first
    pub fn most_severe(self) -> Option<Boundary> {
        self.boundaries().next().map(|first| {
            if first.is_high_side() {
                first
            } else if self.contains(BoundarySet::LOW_LOW) {
                Boundary::LowLow
            } else {
                first
            }
        })
    }
}

/// Classification of a value against a limit configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitState {
    LowLow,
    Low,
    #[default]
    Normal,
    High,
    HighHigh,
}

impl LimitState {
    pub fn boundary(self) -> Option<Boundary> {
        match self {
            LimitState::HighHigh => Some(Boundary::HighHigh),
            LimitState::High => Some(Boundary::High),
            LimitState::Low => Some(Boundary::Low),
            LimitState::LowLow => Some(Boundary::LowLow),
            LimitState::Normal => None,
        }
    }

    pub fn from_boundary(boundary: Option<Boundary>) -> Self {
        match boundary {
            Some(Boundary::HighHigh) => LimitState::HighHigh,
            Some(Boundary::High) => LimitState::High,
            Some(Boundary::Low) => LimitState::Low,
            Some(Boundary::LowLow) => LimitState::LowLow,
            None => LimitState::Normal,
        }
    }

    /// Boundaries implied by an exclusive classification
    ///
    /// Being in HighHigh means High was passed on the way, so High keeps its
    /// own hysteresis when the value drops back between the two limits.
    pub fn implied(self) -> BoundarySet {
        match self {
            LimitState::HighHigh => BoundarySet::HIGH_HIGH | BoundarySet::HIGH,
            LimitState::High => BoundarySet::HIGH,
            LimitState::Normal => BoundarySet::empty(),
            LimitState::Low => BoundarySet::LOW,
            LimitState::LowLow => BoundarySet::LOW_LOW | BoundarySet::LOW,
        }
    }

}

// ==========================================
// SECTION 2: LIMIT CONFIGURATION
// ==========================================

/// Deadband override per boundary
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundaryDeadbands {
    #[serde(default)]
    pub high_high: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub low_low: Option<f64>,
}

impl BoundaryDeadbands {
    pub fn get(&self, boundary: Boundary) -> Option<f64> {
        match boundary {
            Boundary::HighHigh => self.high_high,
            Boundary::High => self.high,
            Boundary::Low => self.low,
            Boundary::LowLow => self.low_low,
        }
    }
}

/// Ordered limits plus a shared deadband and optional per-boundary overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitConfiguration {
    #[serde(default)]
    pub high_high: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub low_low: Option<f64>,
    #[serde(default)]
    pub deadband: f64,
    #[serde(default)]
    pub deadbands: BoundaryDeadbands,
}

impl LimitConfiguration {
    pub fn limit(&self, boundary: Boundary) -> Option<f64> {
        match boundary {
            Boundary::HighHigh => self.high_high,
            Boundary::High => self.high,
            Boundary::Low => self.low,
            Boundary::LowLow => self.low_low,
        }
    }

    pub fn deadband_for(&self, boundary: Boundary) -> f64 {
        self.deadbands.get(boundary).unwrap_or(self.deadband)
    }

    /// Boundaries with a configured limit
    pub fn configured(&self) -> BoundarySet {
        Boundary::ALL
            .into_iter()
            .filter(|b| self.limit(*b).is_some())
            .fold(BoundarySet::empty(), |acc, b| acc | b.flag())
    }

    /// Check `lowLow <= low <= high <= highHigh` over the present limits
    pub fn validate(&self) -> Result<()> {
        if self.configured().is_empty() {
            return Err(ConditionError::Config(
                "limit configuration has no limits".to_string(),
            ));
        }
        if !self.deadband.is_finite() || self.deadband < 0.0 {
            return Err(ConditionError::Config(format!(
                "deadband must be a non-negative number, got {}",
                self.deadband
            )));
        }
        for boundary in Boundary::ALL {
            if let Some(deadband) = self.deadbands.get(boundary) {
                if !deadband.is_finite() || deadband < 0.0 {
                    return Err(ConditionError::Config(format!(
                        "{} deadband must be a non-negative number, got {}",
                        boundary, deadband
                    )));
                }
            }
        }

        let ordered = [
            ("low_low", self.low_low),
            ("low", self.low),
            ("high", self.high),
            ("high_high", self.high_high),
        ];
        let mut previous: Option<(&str, f64)> = None;
        for (name, limit) in ordered {
            let Some(limit) = limit else { continue };
            if !limit.is_finite() {
                return Err(ConditionError::Config(format!(
                    "{} limit must be finite",
                    name
                )));
            }
            if let Some((prev_name, prev)) = previous {
                if limit < prev {
                    return Err(ConditionError::Config(format!(
                        "{} ({}) must not be below {} ({})",
                        name, limit, prev_name, prev
                    )));
                }
            }
            previous = Some((name, limit));
        }
        Ok(())
    }
}

// ==========================================
// SECTION 3: EVALUATION
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Moved away from Normal past the boundary
    Entered,
    /// Moved back toward Normal past `boundary -/+ deadband`
    Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crossing {
    pub boundary: Boundary,
    pub direction: Direction,
}

/// Result of evaluating one value
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Most severe active boundary
    pub state: LimitState,
    /// Every boundary currently exceeded
    pub active: BoundarySet,
    /// Boundaries crossed by this value, in severity order
    pub crossings: Vec<Crossing>,
}

fn boundary_holds(boundary: Boundary, limit: f64, deadband: f64, value: f64, was_active: bool) -> bool {
    match (boundary.is_high_side(), was_active) {
        (true, false) => value > limit,
        (true, true) => value >= limit - deadband,
        (false, false) => value < limit,
        (false, true) => value <= limit + deadband,
    }
}

/// Evaluate a value against every configured boundary independently
///
/// `previous` is the active set returned by the last evaluation. A non-finite
/// value leaves the previous set untouched.
///
/// # Examples
///
/// ```rust
/// use petra_conditions::limits::{evaluate, BoundarySet, LimitConfiguration, LimitState};
///
/// let limits = LimitConfiguration { high: Some(10.0), deadband: 1.0, ..Default::default() };
/// let first = evaluate(10.5, &limits, BoundarySet::empty());
/// assert_eq!(first.state, LimitState::High);
///
/// // Within the deadband the boundary stays active
/// let second = evaluate(9.7, &limits, first.active);
/// assert_eq!(second.state, LimitState::High);
/// ```
pub fn evaluate(value: f64, config: &LimitConfiguration, previous: BoundarySet) -> Evaluation {
    if !value.is_finite() {
        return Evaluation {
            state: LimitState::from_boundary(previous.most_severe()),
            active: previous,
            crossings: Vec::new(),
        };
    }

    let mut active = BoundarySet::empty();
    let mut crossings = Vec::new();
    for boundary in Boundary::ALL {
        let was_active = previous.contains(boundary.flag());
        let holds = config
            .limit(boundary)
            .map(|limit| {
                boundary_holds(boundary, limit, config.deadband_for(boundary), value, was_active)
            })
            .unwrap_or(false);

        if holds {
            active |= boundary.flag();
        }
        match (was_active, holds) {
            (false, true) => crossings.push(Crossing {
                boundary,
                direction: Direction::Entered,
            }),
            (true, false) => crossings.push(Crossing {
                boundary,
                direction: Direction::Exited,
            }),
            _ => {}
        }
    }

    Evaluation {
        state: LimitState::from_boundary(active.most_severe()),
        active,
        crossings,
    }
}

/// Exclusive classification from the previous classification alone
pub fn classify(value: f64, config: &LimitConfiguration, previous: LimitState) -> Evaluation {
    evaluate(value, config, previous.implied())
}
