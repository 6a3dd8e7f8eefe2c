//! The cycle loop.
//!
//! An [`Orchestrator`] owns the validated graph, the bound tasks, the state
//! store and the queues. [`Orchestrator::run`] walks the lifecycle once:
//!
//! - **Idle -> Running**: external inputs are written and one worker per
//!   continuous task is spawned.
//! - **Running**: each cycle runs the one-shot tasks in topological order.
//!   A task whose inputs are not ready is skipped; past its readiness
//!   deadline the skip is reported as starvation. Failures are recorded and
//!   the loop carries on unless `fail_fast` is set.
//! - **Running -> Draining**: the stop condition, a [`StopHandle`], the
//!   `max_cycles` setting, or a fatal error.
//! - **Draining -> Stopped**: workers are cancelled and joined against one
//!   shared shutdown deadline, together with any tokens registered through
//!   `cancel_on_drain` so agents blocked in a call can give up. Stragglers
//!   are reported and detached.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::channel::{QueueRegistry, StateStore, Value};
use crate::config::Config;
use crate::core::dag::TaskGraph;
use crate::error::{Error, Result};
use crate::orchestration::binding::{BoundTask, Channels, Readiness};
use crate::orchestration::events::{Events, OrchestratorEvent};
use crate::orchestration::phase::{Phase, PhaseMachine};
use crate::orchestration::report::{RunId, RunReport, StopReason, TaskStats};
use crate::orchestration::stop::{StopCondition, StopHandle};
use crate::orchestration::worker::{WorkerContext, WorkerFailure, WorkerHandle};
use crate::{hlog, hlog_debug, hlog_error, hlog_trace, hlog_warn, util};

/// Mutable bookkeeping for one run.
struct RunState {
    cycles: u64,
    stats: BTreeMap<String, TaskStats>,
    errors: Vec<Error>,
    /// Per task index: when the task last executed, or when the run started.
    last_ready: Vec<Instant>,
}

impl RunState {
    fn stats(&mut self, task: &str) -> &mut TaskStats {
        self.stats.entry(task.to_string()).or_default()
    }
}

/// A built, validated orchestration. Create one with
/// [`OrchestrationBuilder`](crate::orchestration::OrchestrationBuilder).
pub struct Orchestrator {
    run_id: RunId,
    graph: TaskGraph,
    /// Indexed like `graph.tasks()`.
    bound: Vec<Arc<BoundTask>>,
    externals: BTreeMap<String, Value>,
    channels: Channels,
    config: Config,
    phase: PhaseMachine,
    stop: StopHandle,
    events: Events,
    /// Cancelled together with the workers when the run drains.
    drain_tokens: Vec<CancellationToken>,
}

impl Orchestrator {
    pub(crate) fn new(
        graph: TaskGraph,
        bound: Vec<Arc<BoundTask>>,
        externals: BTreeMap<String, Value>,
        queues: QueueRegistry,
        config: Config,
        events: Option<mpsc::UnboundedSender<OrchestratorEvent>>,
        drain_tokens: Vec<CancellationToken>,
    ) -> Self {
        Self {
            run_id: RunId::new(),
            graph,
            bound,
            externals,
            channels: Channels {
                store: Arc::new(StateStore::new()),
                queues: Arc::new(queues),
            },
            config,
            phase: PhaseMachine::new(),
            stop: StopHandle::new(),
            events: Events::new(events),
            drain_tokens,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase.current()
    }

    /// Handle for stopping the run from another task or a signal handler.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn store(&self) -> Arc<StateStore> {
        Arc::clone(&self.channels.store)
    }

    pub fn queues(&self) -> Arc<QueueRegistry> {
        Arc::clone(&self.channels.queues)
    }

    pub(crate) fn bound_task(&self, name: &str) -> Option<&BoundTask> {
        self.graph.find(name).map(|i| self.bound[i].as_ref())
    }

    fn enter(&mut self, phase: Phase) -> Result<()> {
        let from = self.phase.transition(phase)?;
        hlog_debug!("run {}: {} -> {}", self.run_id.short(), from, phase);
        self.events
            .emit(OrchestratorEvent::PhaseChanged { from, to: phase });
        Ok(())
    }

    /// Run until `condition` says stop, the stop handle fires, `max_cycles`
    /// is reached or a fatal error occurs.
    ///
    /// Task failures, starvation and shutdown leaks are collected in the
    /// returned report rather than returned as errors.
    ///
    /// # Errors
    /// [`Error::InvalidPhaseTransition`] if this orchestrator has already run.
    pub async fn run<C: StopCondition>(&mut self, mut condition: C) -> Result<RunReport> {
        self.enter(Phase::Running)?;
        let started_at = Utc::now();
        let run_start = Instant::now();
        hlog!(
            "run {}: starting with {} tasks, order {:?}",
            self.run_id.short(),
            self.graph.task_count(),
            self.graph.order_names()
        );

        for (channel, value) in &self.externals {
            self.channels.store.write(channel, value.clone());
        }

        let cancel = CancellationToken::new();
        let halt = CancellationToken::new();
        let (failures_tx, mut failures) = mpsc::unbounded_channel();
        let ctx = WorkerContext {
            channels: self.channels.clone(),
            cancel: cancel.clone(),
            halt: halt.clone(),
            fail_fast: self.config.fail_fast,
            failures: failures_tx,
            events: self.events.clone(),
        };
        let workers: Vec<WorkerHandle> = self
            .graph
            .continuous_tasks()
            .map(|i| WorkerHandle::spawn(Arc::clone(&self.bound[i]), ctx.clone()))
            .collect();
        drop(ctx);

        let mut state = RunState {
            cycles: 0,
            stats: self
                .graph
                .tasks()
                .iter()
                .map(|t| (t.name.clone(), TaskStats::default()))
                .collect(),
            errors: Vec::new(),
            last_ready: vec![run_start; self.graph.task_count()],
        };

        let stop_reason = loop {
            if let Some(reason) = self.collect_worker_failures(&mut failures, &mut state) {
                break reason;
            }
            if self.stop.is_stopped() {
                break StopReason::Requested;
            }
            if condition.should_stop(state.cycles) {
                break StopReason::Condition;
            }
            if let Some(max) = self.config.max_cycles {
                if state.cycles >= max {
                    break StopReason::MaxCycles { cycles: state.cycles };
                }
            }

            state.cycles += 1;
            self.events.emit(OrchestratorEvent::CycleStarted {
                cycle: state.cycles,
            });
            if let Some(reason) = self.run_cycle(&halt, &mut state).await {
                break reason;
            }

            match self.config.cycle_interval() {
                Some(pause) => {
                    tokio::select! {
                        _ = self.stop.stopped() => {}
                        _ = halt.cancelled() => {}
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
                None => tokio::task::yield_now().await,
            }
        };

        hlog!(
            "run {}: draining after {} cycles ({})",
            self.run_id.short(),
            state.cycles,
            stop_reason
        );
        self.enter(Phase::Draining)?;
        cancel.cancel();
        for token in &self.drain_tokens {
            token.cancel();
        }

        let timeout = self.config.shutdown_timeout();
        let deadline = util::deadline_after(timeout);
        let mut leaked = Vec::new();
        for worker in workers {
            let task = worker.task().to_string();
            match worker.join(deadline, timeout).await {
                Ok(()) => hlog_trace!("worker {} joined", task),
                Err(e @ Error::ShutdownTimeout { .. }) => {
                    hlog_warn!("{}; detaching", e);
                    self.events
                        .emit(OrchestratorEvent::WorkerLeaked { task: task.clone() });
                    leaked.push(task);
                    state.errors.push(e);
                }
                Err(e) => {
                    hlog_error!("{}", e);
                    state.errors.push(e);
                }
            }
        }
        // Failures raised while draining are recorded but change nothing.
        self.collect_worker_failures(&mut failures, &mut state);

        self.enter(Phase::Stopped)?;
        let final_state = self.channels.store.snapshot_all();
        self.channels.store.clear();
        let discarded = self.channels.queues.drain_all();
        if discarded > 0 {
            hlog_debug!("run {}: discarded {} queued values", self.run_id.short(), discarded);
        }

        let RunState {
            cycles,
            stats,
            errors,
            ..
        } = state;
        hlog!(
            "run {}: stopped after {} cycles, {} errors, {} leaked",
            self.run_id.short(),
            cycles,
            errors.len(),
            leaked.len()
        );

        Ok(RunReport {
            run_id: self.run_id,
            cycles,
            stop_reason,
            tasks: stats,
            errors,
            leaked,
            final_state,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// One pass over the one-shot tasks. Returns a reason when the run must drain.
    ///
    /// A stop observed between tasks ends the pass without starting the next
    /// task; the loop picks up the reason at the top of the next iteration.
    async fn run_cycle(&self, halt: &CancellationToken, state: &mut RunState) -> Option<StopReason> {
        let cycle = state.cycles;

        for &idx in self.graph.one_shot_order() {
            if self.stop.is_stopped() || halt.is_cancelled() {
                hlog_debug!("cycle {}: stop observed, ending pass early", cycle);
                break;
            }

            let bound = &self.bound[idx];
            let name = bound.name();
            let readiness = tokio::select! {
                biased;
                _ = self.stop.stopped() => break,
                _ = halt.cancelled() => break,
                r = bound.gather(&self.channels, bound.options().queue_wait) => r,
            };

            let inputs = match readiness {
                Ok(Readiness::Ready(inputs)) => inputs,
                Ok(Readiness::Missing(missing)) => {
                    if let Some(reason) = self.not_ready(idx, missing, state) {
                        return Some(reason);
                    }
                    continue;
                }
                Ok(Readiness::Unchanged) => {
                    // Inputs are present, so this is never starvation.
                    state.last_ready[idx] = Instant::now();
                    let stats = state.stats(name);
                    stats.skipped += 1;
                    stats.consecutive_starved = 0;
                    hlog_trace!("cycle {}: {} skipped, inputs unchanged", cycle, name);
                    self.events.emit(OrchestratorEvent::TaskSkipped {
                        task: name.to_string(),
                        cycle,
                        missing: Vec::new(),
                    });
                    continue;
                }
                Err(e) => {
                    if let Some(reason) = self.task_failed(name, e.to_string(), "{}".to_string(), state) {
                        return Some(reason);
                    }
                    continue;
                }
            };

            state.last_ready[idx] = Instant::now();
            state.stats(name).consecutive_starved = 0;

            let snapshot = bound.snapshot(&inputs);
            let outcome = match bound.invoke(inputs).await {
                Ok(outputs) => bound
                    .publish(&self.channels, outputs)
                    .map_err(|e| e.to_string()),
                Err(message) => Err(message),
            };

            match outcome {
                Ok(()) => {
                    state.stats(name).runs += 1;
                    hlog_trace!("cycle {}: {} done", cycle, name);
                    self.events.emit(OrchestratorEvent::TaskCompleted {
                        task: name.to_string(),
                        cycle,
                    });
                }
                Err(message) => {
                    if let Some(reason) = self.task_failed(name, message, snapshot, state) {
                        return Some(reason);
                    }
                }
            }
        }
        None
    }

    fn not_ready(&self, idx: usize, missing: Vec<String>, state: &mut RunState) -> Option<StopReason> {
        let bound = &self.bound[idx];
        let name = bound.name();
        let cycle = state.cycles;
        let waited = state.last_ready[idx].elapsed();

        let starved = matches!(bound.options().readiness_timeout, Some(limit) if waited > limit);
        let stats = state.stats(name);
        stats.skipped += 1;

        if !starved {
            hlog_trace!("cycle {}: {} skipped, missing {:?}", cycle, name, missing);
            self.events.emit(OrchestratorEvent::TaskSkipped {
                task: name.to_string(),
                cycle,
                missing,
            });
            return None;
        }

        stats.starved += 1;
        stats.consecutive_starved += 1;
        let streak = stats.consecutive_starved;

        let error = Error::TaskStarved {
            task: name.to_string(),
            cycle,
            waited,
            missing: missing.clone(),
        };
        hlog_warn!("{}", error);
        self.events.emit(OrchestratorEvent::TaskStarved {
            task: name.to_string(),
            cycle,
            missing,
        });
        state.errors.push(error);

        match self.config.starvation_limit {
            Some(limit) if streak > limit => {
                hlog_error!(
                    "task {} starved {} cycles in a row (limit {})",
                    name,
                    streak,
                    limit
                );
                Some(StopReason::Starved {
                    task: name.to_string(),
                })
            }
            _ => None,
        }
    }

    fn task_failed(
        &self,
        task: &str,
        message: String,
        inputs: String,
        state: &mut RunState,
    ) -> Option<StopReason> {
        let cycle = state.cycles;
        let error = Error::TaskExecution {
            task: task.to_string(),
            cycle,
            message,
            inputs,
        };
        hlog_error!("{}", error);
        self.events.emit(OrchestratorEvent::TaskFailed {
            task: task.to_string(),
            cycle,
            error: error.to_string(),
        });
        state.stats(task).failures += 1;
        state.errors.push(error);

        self.config.fail_fast.then(|| StopReason::TaskFailed {
            task: task.to_string(),
        })
    }

    fn collect_worker_failures(
        &self,
        failures: &mut mpsc::UnboundedReceiver<WorkerFailure>,
        state: &mut RunState,
    ) -> Option<StopReason> {
        let mut reason = None;
        while let Ok(WorkerFailure { task, error }) = failures.try_recv() {
            state.stats(&task).failures += 1;
            state.errors.push(error);
            if self.config.fail_fast && reason.is_none() {
                reason = Some(StopReason::WorkerFailed { task });
            }
        }
        reason
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("run_id", &self.run_id.short())
            .field("phase", &self.phase.current())
            .field("graph", &self.graph)
            .finish()
    }
}
