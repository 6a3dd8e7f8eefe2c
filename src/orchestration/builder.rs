//! Registration: collect agents, tasks and external inputs, validate, bind.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, AgentRegistry};
use crate::channel::{QueueRegistry, Value};
use crate::config::Config;
use crate::core::dag::TaskGraph;
use crate::core::task::Task;
use crate::error::Result;
use crate::orchestration::binding::BoundTask;
use crate::orchestration::events::OrchestratorEvent;
use crate::orchestration::scheduler::Orchestrator;
use crate::{hlog_debug, hlog_warn};

/// Builds an [`Orchestrator`].
///
/// Nothing runs until [`Orchestrator::run`]; every configuration problem is
/// reported by [`build`](Self::build) before any agent is invoked.
///
/// # Example
///
/// ```ignore
/// let mut orch = OrchestrationBuilder::new()
///     .agent("robot", Arc::new(SimRobot::new("robot")))
///     .task(Task::one_shot("capture_image", "robot", Callable::capability("capture", 0, 1))
///         .outputs(["observation"]))
///     .build()?;
/// let report = orch.run(MaxCycles(10)).await?;
/// ```
#[derive(Default)]
pub struct OrchestrationBuilder {
    agents: AgentRegistry,
    tasks: Vec<Task>,
    externals: BTreeMap<String, Value>,
    config: Config,
    events: Option<mpsc::UnboundedSender<OrchestratorEvent>>,
    drain_tokens: Vec<CancellationToken>,
}

impl OrchestrationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent(mut self, key: &str, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(key, agent);
        self
    }

    pub fn agents(mut self, agents: AgentRegistry) -> Self {
        self.agents = agents;
        self
    }

    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn tasks<I: IntoIterator<Item = Task>>(mut self, tasks: I) -> Self {
        self.tasks.extend(tasks);
        self
    }

    /// Declare a channel with no producing task, written once when the run starts.
    pub fn external(mut self, channel: &str, value: Value) -> Self {
        self.externals.insert(channel.to_string(), value);
        self
    }

    /// Replace the whole config. Call before the finer-grained setters.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.config.fail_fast = fail_fast;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn starvation_limit(mut self, limit: u32) -> Self {
        self.config.starvation_limit = Some(limit);
        self
    }

    pub fn cycle_interval(mut self, interval: Duration) -> Self {
        self.config.cycle_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn max_cycles(mut self, cycles: u64) -> Self {
        self.config.max_cycles = Some(cycles);
        self
    }

    pub fn events(mut self, tx: mpsc::UnboundedSender<OrchestratorEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Cancel `token` when the run starts draining, alongside the workers.
    ///
    /// Agents that wait on outside input (see
    /// [`ConsoleAgent::with_shutdown`](crate::sim::ConsoleAgent::with_shutdown))
    /// watch such a token so a continuous task blocked in a call can exit.
    pub fn cancel_on_drain(mut self, token: CancellationToken) -> Self {
        self.drain_tokens.push(token);
        self
    }

    /// Validate the task list, resolve agents and create the queues.
    ///
    /// # Errors
    /// [`Error::Configuration`](crate::Error::Configuration) for any graph
    /// problem or unregistered agent.
    pub fn build(self) -> Result<Orchestrator> {
        let Self {
            agents,
            tasks,
            externals,
            config,
            events,
            drain_tokens,
        } = self;

        let external_names: BTreeSet<String> = externals.keys().cloned().collect();
        let graph = TaskGraph::build(tasks, &external_names)?;

        let mut bound = Vec::with_capacity(graph.task_count());
        for task in graph.tasks() {
            let agent = agents.resolve(&task.name, &task.agent)?;
            let mut task = task.clone();
            task.options = task.options.merged(config.task(&task.name));
            bound.push(Arc::new(BoundTask::new(task, agent, &graph)));
        }

        for name in config.tasks.keys() {
            if graph.find(name).is_none() {
                hlog_warn!("config has settings for unknown task '{}'", name);
            }
        }

        let mut queues = QueueRegistry::new();
        for channel in graph.queued_channels() {
            let queue = config.queue_for(channel);
            hlog_debug!(
                "queue {}: capacity={} overflow={}",
                channel,
                queue.capacity,
                queue.overflow
            );
            queues.register(channel, queue);
        }

        hlog_debug!("built {:?}", graph);
        Ok(Orchestrator::new(
            graph,
            bound,
            externals,
            queues,
            config,
            events,
            drain_tokens,
        ))
    }
}
