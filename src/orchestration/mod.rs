//! Orchestration layer: registration, the cycle loop and supervised workers.

mod binding;
mod builder;
mod events;
mod phase;
mod report;
mod scheduler;
mod stop;
mod worker;

pub use binding::{BoundTask, Channels, Readiness};
pub use builder::OrchestrationBuilder;
pub use events::OrchestratorEvent;
pub use phase::{Phase, PhaseHistoryEntry, PhaseMachine};
pub use report::{RunId, RunReport, StopReason, TaskStats};
pub use scheduler::Orchestrator;
pub use stop::{MaxCycles, Never, StopCondition, StopHandle};
pub use worker::{WorkerFailure, WorkerHandle};
