//! On-delay / off-delay filtering of activation changes.
//!
//! Works like a TON/TOF timer pair: an edge starts a pending transition that
//! commits only if nothing contradicts it before the timer command arrives.

use super::activation::ActiveSubState;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingTransition {
    Activate(ActiveSubState),
    Deactivate,
}

#[derive(Debug, Clone, Default)]
pub struct DelayFilter {
    on_delay: Option<Duration>,
    off_delay: Option<Duration>,
    pending: Option<PendingTransition>,
    generation: u64,
}

impl DelayFilter {
    pub fn new(on_delay: Option<Duration>, off_delay: Option<Duration>) -> Self {
        Self {
            on_delay: on_delay.filter(|d| !d.is_zero()),
            off_delay: off_delay.filter(|d| !d.is_zero()),
            pending: None,
            generation: 0,
        }
    }

    pub fn delay_for(&self, transition: &PendingTransition) -> Option<Duration> {
        match transition {
            PendingTransition::Activate(_) => self.on_delay,
            PendingTransition::Deactivate => self.off_delay,
        }
    }

    /// Start (or update) a pending transition.
    ///
    /// Returns the timer to arm when a new pending transition starts; an
    /// update to the sub-state of an already pending activation keeps the
    /// running timer.
    pub fn schedule(&mut self, transition: PendingTransition) -> Option<(u64, Duration)> {
        let delay = self.delay_for(&transition)?;
        let same_kind = matches!(
            (self.pending, transition),
            (Some(PendingTransition::Activate(_)), PendingTransition::Activate(_))
                | (Some(PendingTransition::Deactivate), PendingTransition::Deactivate)
        );
        self.pending = Some(transition);
        if same_kind {
            return None;
        }
        self.generation += 1;
        Some((self.generation, delay))
    }

    /// Drop any pending transition; `true` if one was pending
    pub fn cancel(&mut self) -> bool {
        if self.pending.take().is_some() {
            self.generation += 1;
            return true;
        }
        false
    }

    /// Timer fired; returns the transition to commit if still current
    pub fn elapsed(&mut self, generation: u64) -> Option<PendingTransition> {
        if generation != self.generation {
            return None;
        }
        self.pending.take()
    }
}
