//! Events emitted while an orchestration runs.

use tokio::sync::mpsc;

use crate::orchestration::phase::Phase;

/// Lifecycle and per-task events, for observers that do not want to poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    PhaseChanged {
        from: Phase,
        to: Phase,
    },
    CycleStarted {
        cycle: u64,
    },
    /// A one-shot task ran and published its outputs.
    TaskCompleted {
        task: String,
        cycle: u64,
    },
    /// A one-shot task was not ready and its readiness deadline has not passed.
    TaskSkipped {
        task: String,
        cycle: u64,
        missing: Vec<String>,
    },
    /// A one-shot task was not ready past its readiness deadline.
    TaskStarved {
        task: String,
        cycle: u64,
        missing: Vec<String>,
    },
    TaskFailed {
        task: String,
        cycle: u64,
        error: String,
    },
    /// One iteration of a continuous worker failed.
    WorkerFailed {
        task: String,
        error: String,
    },
    WorkerExited {
        task: String,
    },
    /// A worker outlived the shutdown timeout and was detached.
    WorkerLeaked {
        task: String,
    },
}

/// Optional event sink. Sends never block and a dropped receiver is ignored.
#[derive(Debug, Clone, Default)]
pub(crate) struct Events {
    tx: Option<mpsc::UnboundedSender<OrchestratorEvent>>,
}

impl Events {
    pub fn new(tx: Option<mpsc::UnboundedSender<OrchestratorEvent>>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: OrchestratorEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
