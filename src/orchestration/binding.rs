//! A task bound to its agent and channel routes.
//!
//! Binding happens once, when the orchestration is built. After that a task
//! knows, per input, whether it reads the state store or pops a queue, and
//! per output, whether the value must also be enqueued.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Map;
use tokio::time::Instant;

use crate::agent::AgentRef;
use crate::channel::{QueueRegistry, StateStore, Value, Wait};
use crate::core::dag::{InputSource, TaskGraph};
use crate::core::task::{Task, TaskOptions};
use crate::error::Result;
use crate::util;

/// The shared mutable resources of one orchestration.
#[derive(Debug, Clone)]
pub struct Channels {
    pub store: Arc<StateStore>,
    pub queues: Arc<QueueRegistry>,
}

#[derive(Debug, Clone)]
struct BoundInput {
    channel: String,
    source: InputSource,
}

#[derive(Debug, Clone)]
struct BoundOutput {
    channel: String,
    queued: bool,
}

/// Outcome of a readiness check.
#[derive(Debug, Clone, PartialEq)]
pub enum Readiness {
    /// Inputs gathered in declaration order. Queue-fed inputs have been popped.
    Ready(Vec<Value>),
    /// Channels that had no value within the wait policy. Nothing was consumed.
    Missing(Vec<String>),
    /// Every input is present, but none was written since the task last ran.
    /// Only reported for `only_fresh` tasks.
    Unchanged,
}

pub struct BoundTask {
    task: Task,
    agent: AgentRef,
    inputs: Vec<BoundInput>,
    outputs: Vec<BoundOutput>,
    /// Highest store sequence number among the inputs of the last run.
    seen_seq: AtomicU64,
}

impl BoundTask {
    pub fn new(task: Task, agent: AgentRef, graph: &TaskGraph) -> Self {
        let inputs = task
            .inputs
            .iter()
            .map(|channel| BoundInput {
                channel: channel.clone(),
                source: graph.input_source(&task.name, channel),
            })
            .collect();
        let outputs = task
            .outputs
            .iter()
            .map(|channel| BoundOutput {
                channel: channel.clone(),
                queued: graph.is_queued(channel),
            })
            .collect();
        Self {
            task,
            agent,
            inputs,
            outputs,
            seen_seq: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.task.name
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn options(&self) -> &TaskOptions {
        &self.task.options
    }

    pub fn input_channels(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|i| i.channel.as_str())
    }

    /// Check readiness and, when ready, collect the inputs.
    ///
    /// State-fed inputs must already be in the store. Queue-fed inputs wait
    /// per `wait`, sharing one deadline across all of them. Values are only
    /// popped once every input is known to be available, with no await in
    /// between, so dropping this future never loses a queued value.
    ///
    /// An `only_fresh` task fed only from the store is [`Readiness::Unchanged`]
    /// until one of its inputs is rewritten after its last run.
    pub async fn gather(&self, channels: &Channels, wait: Wait) -> Result<Readiness> {
        let mut missing: Vec<String> = self
            .inputs
            .iter()
            .filter(|i| i.source == InputSource::State && !channels.store.has(&i.channel))
            .map(|i| i.channel.clone())
            .collect();

        // No point waiting on queues when a state input is already missing.
        let wait = if missing.is_empty() { wait } else { Wait::Poll };
        let deadline = match wait {
            Wait::Poll => Some(Instant::now()),
            Wait::For(d) => Some(util::deadline_after(d)),
            Wait::Forever => None,
        };

        for input in self.inputs.iter().filter(|i| i.source == InputSource::Queue) {
            let remaining = match deadline {
                Some(deadline) => Wait::from_duration(deadline.saturating_duration_since(Instant::now())),
                None => Wait::Forever,
            };
            if !channels.queues.wait_available(&input.channel, remaining).await? {
                missing.push(input.channel.clone());
            }
        }

        if !missing.is_empty() {
            return Ok(Readiness::Missing(missing));
        }

        let mut values = Vec::with_capacity(self.inputs.len());
        let mut newest = 0;
        for input in &self.inputs {
            let value = match input.source {
                InputSource::State => channels.store.entry(&input.channel).map(|e| {
                    newest = newest.max(e.seq);
                    e.value
                }),
                InputSource::Queue => channels.queues.try_dequeue(&input.channel)?,
            };
            match value {
                Some(v) => values.push(v),
                None => return Ok(Readiness::Missing(vec![input.channel.clone()])),
            }
        }

        // A popped queue value is always new, so freshness only gates
        // tasks fed entirely from the store.
        if self.task.options.only_fresh && self.is_state_fed() {
            if newest <= self.seen_seq.load(Ordering::SeqCst) {
                return Ok(Readiness::Unchanged);
            }
            self.seen_seq.store(newest, Ordering::SeqCst);
        }
        Ok(Readiness::Ready(values))
    }

    fn is_state_fed(&self) -> bool {
        !self.inputs.is_empty() && self.inputs.iter().all(|i| i.source == InputSource::State)
    }

    /// Run the callable and split its result into one value per output.
    ///
    /// Errors and panics are both turned into a message; the caller decides
    /// how to report them.
    pub async fn invoke(&self, inputs: Vec<Value>) -> std::result::Result<Vec<Value>, String> {
        let callable = &self.task.callable;
        let agent = Arc::clone(&self.agent);

        let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| callable.call(agent, inputs))) {
            Ok(fut) => fut,
            Err(panic) => return Err(panic_message(panic)),
        };

        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(value)) => callable.split_outputs(value),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => Err(panic_message(panic)),
        }
    }

    /// Write outputs to the store, and enqueue those on queued channels.
    pub fn publish(&self, channels: &Channels, values: Vec<Value>) -> Result<()> {
        for (output, value) in self.outputs.iter().zip(values) {
            if output.queued {
                channels.queues.enqueue(&output.channel, value.clone())?;
            }
            channels.store.write(&output.channel, value);
        }
        Ok(())
    }

    /// JSON object of input channel -> value, for error reports.
    pub fn snapshot(&self, values: &[Value]) -> String {
        let map: Map<String, Value> = self
            .inputs
            .iter()
            .zip(values)
            .map(|(i, v)| (i.channel.clone(), v.clone()))
            .collect();
        Value::Object(map).to_string()
    }
}

impl std::fmt::Debug for BoundTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundTask")
            .field("task", &self.task.name)
            .field("agent", &self.agent.name())
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("panicked: {}", detail)
}
