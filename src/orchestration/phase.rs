//! Orchestration lifecycle with transition validation.
//!
//! Idle -> Running -> Draining -> Stopped, nothing else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle phase of one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Built and validated, nothing started.
    #[default]
    Idle,
    /// Cycles are executing and continuous workers are live.
    Running,
    /// Workers have been told to stop; waiting for them to exit.
    Draining,
    /// All done. Store and queues are cleared.
    Stopped,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Running => write!(f, "running"),
            Phase::Draining => write!(f, "draining"),
            Phase::Stopped => write!(f, "stopped"),
        }
    }
}

/// A record of a phase transition with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseHistoryEntry {
    pub phase: Phase,
    pub entered_at: DateTime<Utc>,
}

/// Tracks the current phase and rejects out-of-order transitions.
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    current: Phase,
    history: Vec<PhaseHistoryEntry>,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            current: Phase::Idle,
            history: vec![PhaseHistoryEntry {
                phase: Phase::Idle,
                entered_at: Utc::now(),
            }],
        }
    }

    pub fn can_transition(&self, target: Phase) -> bool {
        matches!(
            (self.current, target),
            (Phase::Idle, Phase::Running)
                | (Phase::Running, Phase::Draining)
                | (Phase::Draining, Phase::Stopped)
        )
    }

    /// Move to `target`, returning the phase that was left.
    pub fn transition(&mut self, target: Phase) -> Result<Phase> {
        if !self.can_transition(target) {
            return Err(Error::InvalidPhaseTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            });
        }
        let from = self.current;
        self.current = target;
        self.history.push(PhaseHistoryEntry {
            phase: target,
            entered_at: Utc::now(),
        });
        Ok(from)
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    pub fn history(&self) -> &[PhaseHistoryEntry] {
        &self.history
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}
