//! Supervised workers for continuous tasks.
//!
//! Each continuous task runs on its own tokio task with a start / cancel /
//! join contract. Cancellation is cooperative: a worker checks the shared
//! token between iterations and while it waits for inputs or pacing, but an
//! iteration that has started runs to completion. A worker that does not
//! exit before the shutdown deadline is detached, never aborted. A call that
//! fails after draining has begun is treated as interrupted, not as a task
//! failure.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::channel::Wait;
use crate::error::{Error, Result};
use crate::orchestration::binding::{BoundTask, Channels, Readiness};
use crate::orchestration::events::{Events, OrchestratorEvent};
use crate::{hlog, hlog_debug, hlog_error};

/// A failure reported by a worker, picked up by the cycle loop.
#[derive(Debug)]
pub struct WorkerFailure {
    pub task: String,
    pub error: Error,
}

/// Everything a worker shares with the scheduler.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub channels: Channels,
    /// Cancelled when the orchestration starts draining.
    pub cancel: CancellationToken,
    /// Cancelled by a worker to ask the cycle loop to drain (fail_fast).
    pub halt: CancellationToken,
    pub fail_fast: bool,
    pub failures: mpsc::UnboundedSender<WorkerFailure>,
    pub events: Events,
}

/// Handle to a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    task: String,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn spawn(bound: Arc<BoundTask>, ctx: WorkerContext) -> Self {
        let task = bound.name().to_string();
        hlog_debug!("worker {}: starting", task);
        let handle = tokio::spawn(run(bound, ctx));
        Self { task, handle }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker to exit, up to `deadline`.
    ///
    /// On timeout the join handle is dropped, which detaches the worker.
    pub async fn join(self, deadline: Instant, timeout: Duration) -> Result<()> {
        let Self { task, handle } = self;
        match tokio::time::timeout_at(deadline, handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::TaskJoin(format!("worker '{}': {}", task, e))),
            Err(_) => Err(Error::ShutdownTimeout { task, timeout }),
        }
    }
}

async fn run(bound: Arc<BoundTask>, ctx: WorkerContext) {
    let name = bound.name().to_string();
    let interval = bound.options().interval;
    let mut iteration: u64 = 0;

    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }

        let readiness = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            r = bound.gather(&ctx.channels, Wait::Forever) => r,
        };

        iteration += 1;
        let outcome = match readiness {
            Ok(Readiness::Ready(inputs)) => {
                let snapshot = bound.snapshot(&inputs);
                match bound.invoke(inputs).await {
                    Ok(outputs) => bound.publish(&ctx.channels, outputs),
                    Err(message) => Err(Error::TaskExecution {
                        task: name.clone(),
                        cycle: iteration,
                        message,
                        inputs: snapshot,
                    }),
                }
            }
            // Only queue-fed inputs reach a worker, so a forever wait that
            // comes back empty is just a spurious wakeup.
            Ok(Readiness::Missing(_)) | Ok(Readiness::Unchanged) => Ok(()),
            Err(e) => Err(e),
        };

        if outcome.is_err() && ctx.cancel.is_cancelled() {
            // The call gave up because the run is draining.
            hlog_debug!("worker {}: iteration {} interrupted by shutdown", name, iteration);
            break;
        }
        if let Err(error) = outcome {
            hlog_error!("worker {}: iteration {} failed: {}", name, iteration, error);
            ctx.events.emit(OrchestratorEvent::WorkerFailed {
                task: name.clone(),
                error: error.to_string(),
            });
            let _ = ctx.failures.send(WorkerFailure {
                task: name.clone(),
                error,
            });
            if ctx.fail_fast {
                ctx.halt.cancel();
                break;
            }
        }

        match interval {
            Some(pause) => {
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
            None => tokio::task::yield_now().await,
        }
    }

    hlog!("worker {}: exited after {} iterations", name, iteration);
    ctx.events.emit(OrchestratorEvent::WorkerExited { task: name });
}
