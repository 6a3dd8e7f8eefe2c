//! What a finished run hands back to the caller.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::channel::Value;
use crate::error::{Error, Result};

/// Unique identifier for one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters, for log lines.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why the cycle loop left Running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// The caller's stop condition returned true.
    Condition,
    /// `max_cycles` from the config was reached.
    MaxCycles { cycles: u64 },
    /// A [`StopHandle`](crate::orchestration::StopHandle) was triggered.
    Requested,
    /// A one-shot task failed under fail_fast.
    TaskFailed { task: String },
    /// A continuous worker failed under fail_fast.
    WorkerFailed { task: String },
    /// A task stayed starved past the starvation limit.
    Starved { task: String },
}

impl StopReason {
    /// Whether the run ended because something went wrong.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StopReason::TaskFailed { .. } | StopReason::WorkerFailed { .. } | StopReason::Starved { .. }
        )
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Condition => write!(f, "stop condition met"),
            StopReason::MaxCycles { cycles } => write!(f, "max cycles reached ({})", cycles),
            StopReason::Requested => write!(f, "stop requested"),
            StopReason::TaskFailed { task } => write!(f, "task '{}' failed", task),
            StopReason::WorkerFailed { task } => write!(f, "worker '{}' failed", task),
            StopReason::Starved { task } => write!(f, "task '{}' starved too long", task),
        }
    }
}

/// Per-task counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    /// Successful executions (iterations, for continuous tasks).
    pub runs: u64,
    pub failures: u64,
    /// Cycles reported as starved.
    pub starved: u64,
    /// Cycles skipped because inputs were absent, starved or not.
    pub skipped: u64,
    /// Current streak of starved cycles.
    #[serde(skip)]
    pub consecutive_starved: u32,
}

/// Summary of a finished run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    /// Cycles that were started.
    pub cycles: u64,
    pub stop_reason: StopReason,
    pub tasks: BTreeMap<String, TaskStats>,
    /// Every reported error, in the order it was observed.
    #[serde(serialize_with = "errors_as_strings")]
    pub errors: Vec<Error>,
    /// Workers that did not exit within the shutdown timeout.
    pub leaked: Vec<String>,
    /// Store contents just before teardown.
    pub final_state: BTreeMap<String, Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn stats(&self, task: &str) -> Option<&TaskStats> {
        self.tasks.get(task)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Error> {
        self.errors
            .iter()
            .filter(|e| matches!(e, Error::TaskExecution { .. }))
    }

    pub fn starvations(&self) -> impl Iterator<Item = &Error> {
        self.errors
            .iter()
            .filter(|e| matches!(e, Error::TaskStarved { .. }))
    }

    pub fn shutdown_timeouts(&self) -> impl Iterator<Item = &Error> {
        self.errors
            .iter()
            .filter(|e| matches!(e, Error::ShutdownTimeout { .. }))
    }

    /// No errors, no leaks, and a non-fatal stop.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.leaked.is_empty() && !self.stop_reason.is_fatal()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn errors_as_strings<S: Serializer>(errors: &[Error], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(errors.iter().map(|e| e.to_string()))
}
