//! Task declaration model.
//!
//! A task binds an agent, a callable, ordered input channels and ordered
//! output channels. One-shot tasks run at most once per scheduler cycle;
//! continuous tasks run on their own worker and feed queues.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::agent::AgentRef;
use crate::channel::{Value, Wait};
use crate::config::TaskOverrides;
use crate::error::Result;

/// Execution mode of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    /// Runs synchronously, at most once per cycle, when its inputs are ready.
    OneShot,
    /// Runs independently of the cycle loop and pushes outputs into queues.
    Continuous,
}

impl std::fmt::Display for TaskMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskMode::OneShot => write!(f, "one-shot"),
            TaskMode::Continuous => write!(f, "continuous"),
        }
    }
}

/// Future returned by a task callable.
pub type TaskFuture = BoxFuture<'static, Result<Value>>;

type CallFn = dyn Fn(AgentRef, Vec<Value>) -> TaskFuture + Send + Sync;

/// A named function value with a fixed call signature:
/// `(agent, inputs...) -> outputs`.
///
/// The declared `arity` must equal the number of input channels and
/// `returns` the number of output channels; both are checked when the task
/// graph is built. Return shape follows `returns`:
///
/// - `0`: the value is ignored
/// - `1`: the value is the single output
/// - `n`: the value must be a JSON array of exactly `n` elements
#[derive(Clone)]
pub struct Callable {
    name: String,
    arity: usize,
    returns: usize,
    func: Arc<CallFn>,
}

impl Callable {
    pub fn new<F, Fut>(name: &str, arity: usize, returns: usize, f: F) -> Self
    where
        F: Fn(AgentRef, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            arity,
            returns,
            func: Arc::new(move |agent, inputs| f(agent, inputs).boxed()),
        }
    }

    /// A callable that forwards its inputs to one agent capability.
    pub fn capability(capability: &str, arity: usize, returns: usize) -> Self {
        let cap = capability.to_string();
        Self::new(capability, arity, returns, move |agent, inputs| {
            let cap = cap.clone();
            async move { agent.invoke(&cap, inputs).await }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn returns(&self) -> usize {
        self.returns
    }

    pub fn call(&self, agent: AgentRef, inputs: Vec<Value>) -> TaskFuture {
        (self.func)(agent, inputs)
    }

    /// Split a returned value into one value per output channel.
    ///
    /// The error string describes the shape mismatch.
    pub fn split_outputs(&self, value: Value) -> std::result::Result<Vec<Value>, String> {
        match self.returns {
            0 => Ok(Vec::new()),
            1 => Ok(vec![value]),
            n => match value {
                Value::Array(items) if items.len() == n => Ok(items),
                Value::Array(items) => Err(format!(
                    "callable '{}' returned {} values, expected {}",
                    self.name,
                    items.len(),
                    n
                )),
                other => Err(format!(
                    "callable '{}' must return an array of {} values, got {}",
                    self.name, n, other
                )),
            },
        }
    }
}

impl std::fmt::Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callable")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("returns", &self.returns)
            .finish()
    }
}

/// Per-task scheduling options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskOptions {
    /// How long the task may stay unready before each skipped cycle is
    /// reported as starvation. `None` never reports.
    pub readiness_timeout: Option<Duration>,
    /// How long to wait on a queue-fed input during a readiness check.
    pub queue_wait: Wait,
    /// Pause between iterations of a continuous task.
    pub interval: Option<Duration>,
    /// Skip a cycle unless a state-fed input was written since the last run.
    pub only_fresh: bool,
}

impl TaskOptions {
    /// Apply config overrides on top of the options set in code.
    pub fn merged(mut self, overrides: Option<&TaskOverrides>) -> Self {
        if let Some(over) = overrides {
            if let Some(ms) = over.readiness_timeout_ms {
                self.readiness_timeout = Some(Duration::from_millis(ms));
            }
            if let Some(wait) = over.queue_wait() {
                self.queue_wait = wait;
            }
            if let Some(ms) = over.interval_ms {
                self.interval = (ms > 0).then(|| Duration::from_millis(ms));
            }
            if let Some(fresh) = over.only_fresh {
                self.only_fresh = fresh;
            }
        }
        self
    }
}

/// A declared unit of work.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique task name.
    pub name: String,
    /// Key of the agent in the registry.
    pub agent: String,
    /// Input channels, in callable argument order.
    pub inputs: Vec<String>,
    /// Output channels, in return order.
    pub outputs: Vec<String>,
    pub mode: TaskMode,
    pub callable: Callable,
    pub options: TaskOptions,
}

impl Task {
    pub fn new(name: &str, agent: &str, mode: TaskMode, callable: Callable) -> Self {
        Self {
            name: name.to_string(),
            agent: agent.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            mode,
            callable,
            options: TaskOptions::default(),
        }
    }

    pub fn one_shot(name: &str, agent: &str, callable: Callable) -> Self {
        Self::new(name, agent, TaskMode::OneShot, callable)
    }

    pub fn continuous(name: &str, agent: &str, callable: Callable) -> Self {
        Self::new(name, agent, TaskMode::Continuous, callable)
    }

    pub fn inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.options.readiness_timeout = Some(timeout);
        self
    }

    pub fn queue_wait(mut self, wait: Wait) -> Self {
        self.options.queue_wait = wait;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.options.interval = Some(interval);
        self
    }

    /// Run only on values the task has not seen yet. A one-shot arm that
    /// reads its command from the store uses this so a stale command is not
    /// executed twice.
    pub fn only_fresh(mut self) -> Self {
        self.options.only_fresh = true;
        self
    }

    pub fn is_continuous(&self) -> bool {
        self.mode == TaskMode::Continuous
    }
}
