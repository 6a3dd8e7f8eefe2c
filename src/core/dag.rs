//! Task graph: validation, dependency order and channel routing.
//!
//! The graph is derived from the task list. An edge A -> B exists when an
//! output channel of one-shot task A is an input channel of one-shot task B.
//! Continuous tasks are not part of the ordering; they run on their own
//! workers and only meet the rest of the graph through queues.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;

use crate::channel;
use crate::core::task::{Task, TaskMode};
use crate::error::{Error, Result};

/// Where a task reads one of its inputs from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    /// Read the latest value from the state store without consuming it.
    State,
    /// Pop the oldest value from the channel's queue.
    Queue,
}

/// How a channel is produced and consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelRoute {
    pub name: String,
    /// Name of the producing task, if any.
    pub producer: Option<String>,
    /// Declared as an external input with an initial value.
    pub external: bool,
    /// Backed by a queue.
    pub queued: bool,
    /// Names of the consuming tasks, in declaration order.
    pub consumers: Vec<String>,
    /// The one task allowed to pop the queue, when queued.
    pub queue_reader: Option<String>,
}

/// A validated task graph.
pub struct TaskGraph {
    tasks: Vec<Task>,
    /// One-shot tasks only. Node weight is the task index, edge weight the channel.
    graph: DiGraph<usize, String>,
    nodes: HashMap<usize, NodeIndex>,
    index: HashMap<String, usize>,
    routes: BTreeMap<String, ChannelRoute>,
    order: Vec<usize>,
}

impl TaskGraph {
    /// Validate a task list and derive its graph.
    ///
    /// `externals` are channels that receive an initial value at start-up and
    /// have no producing task.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] naming the offending task (and channel
    /// where there is one) if:
    /// - a task name is empty or duplicated
    /// - a channel name is malformed or repeated within one task's list
    /// - the callable's arity does not match the channel lists
    /// - a channel has more than one producer
    /// - an input has no producer and is not external
    /// - a queued channel would have more than one reader
    /// - the one-shot tasks form a cycle
    pub fn build(tasks: Vec<Task>, externals: &BTreeSet<String>) -> Result<Self> {
        let mut index = HashMap::new();
        for (i, task) in tasks.iter().enumerate() {
            if task.name.trim().is_empty() {
                return Err(Error::config(&task.name, None, "task name is empty"));
            }
            if index.insert(task.name.clone(), i).is_some() {
                return Err(Error::config(&task.name, None, "duplicate task name"));
            }
            check_channel_list(task, &task.inputs, "input")?;
            check_channel_list(task, &task.outputs, "output")?;
            check_arity(task)?;
        }

        for ext in externals {
            if !channel::is_valid_name(ext) {
                return Err(Error::config(
                    "<external>",
                    Some(ext),
                    "invalid channel name",
                ));
            }
        }

        // Single writer per channel.
        let mut producer: HashMap<&str, usize> = HashMap::new();
        for (i, task) in tasks.iter().enumerate() {
            for out in &task.outputs {
                if let Some(&prev) = producer.get(out.as_str()) {
                    return Err(Error::config(
                        &task.name,
                        Some(out),
                        format!("channel is already produced by '{}'", tasks[prev].name),
                    ));
                }
                if externals.contains(out) {
                    return Err(Error::config(
                        &task.name,
                        Some(out),
                        "channel is declared as an external input and cannot also be produced",
                    ));
                }
                producer.insert(out, i);
            }
        }

        // Every input has a source.
        for task in &tasks {
            for input in &task.inputs {
                if producer.contains_key(input.as_str()) {
                    continue;
                }
                let reason = match task.mode {
                    TaskMode::OneShot if externals.contains(input) => continue,
                    TaskMode::OneShot => "no task produces this channel and it is not an external input",
                    TaskMode::Continuous => "continuous task inputs must be produced by another task",
                };
                return Err(Error::config(&task.name, Some(input), reason));
            }
            if task.mode == TaskMode::Continuous {
                if let Some(own) = task.inputs.iter().find(|c| task.outputs.contains(c)) {
                    return Err(Error::config(
                        &task.name,
                        Some(own),
                        "continuous task consumes its own output",
                    ));
                }
            }
        }

        let routes = build_routes(&tasks, externals, &producer)?;

        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();
        for (i, task) in tasks.iter().enumerate() {
            if task.mode == TaskMode::OneShot {
                nodes.insert(i, graph.add_node(i));
            }
        }
        for (to, task) in tasks.iter().enumerate() {
            let Some(&to_node) = nodes.get(&to) else {
                continue;
            };
            for input in &task.inputs {
                if let Some(&from_node) = producer.get(input.as_str()).and_then(|p| nodes.get(p)) {
                    graph.add_edge(from_node, to_node, input.clone());
                }
            }
        }

        check_acyclic(&tasks, &graph)?;
        let order = stable_topological_order(&graph);

        Ok(Self {
            tasks,
            graph,
            nodes,
            index,
            routes,
            order,
        })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, idx: usize) -> &Task {
        &self.tasks[idx]
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.find(name).map(|i| &self.tasks[i])
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Number of one-shot dependency edges (one per shared channel).
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// One-shot task indices in execution order. Independent tasks keep
    /// their declaration order.
    pub fn one_shot_order(&self) -> &[usize] {
        &self.order
    }

    /// One-shot task names in execution order.
    pub fn order_names(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.tasks[i].name.as_str()).collect()
    }

    pub fn continuous_tasks(&self) -> impl Iterator<Item = usize> + '_ {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.mode == TaskMode::Continuous)
            .map(|(i, _)| i)
    }

    pub fn route(&self, channel: &str) -> Option<&ChannelRoute> {
        self.routes.get(channel)
    }

    pub fn routes(&self) -> impl Iterator<Item = &ChannelRoute> {
        self.routes.values()
    }

    pub fn is_queued(&self, channel: &str) -> bool {
        self.routes.get(channel).map(|r| r.queued).unwrap_or(false)
    }

    pub fn queued_channels(&self) -> impl Iterator<Item = &str> {
        self.routes
            .values()
            .filter(|r| r.queued)
            .map(|r| r.name.as_str())
    }

    /// Where `task` reads `channel` from.
    pub fn input_source(&self, task: &str, channel: &str) -> InputSource {
        match self.routes.get(channel) {
            Some(r) if r.queue_reader.as_deref() == Some(task) => InputSource::Queue,
            _ => InputSource::State,
        }
    }

    /// One-shot tasks that must run before `name` in a cycle.
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    /// One-shot tasks that consume an output of `name`.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    fn neighbors(&self, name: &str, dir: Direction) -> Vec<&str> {
        let Some(node) = self.find(name).and_then(|i| self.nodes.get(&i)) else {
            return Vec::new();
        };
        let mut names: Vec<&str> = self
            .graph
            .neighbors_directed(*node, dir)
            .map(|n| self.tasks[self.graph[n]].name.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .field("order", &self.order_names())
            .finish()
    }
}

fn check_channel_list(task: &Task, channels: &[String], kind: &str) -> Result<()> {
    let mut seen = BTreeSet::new();
    for ch in channels {
        if !channel::is_valid_name(ch) {
            return Err(Error::config(&task.name, Some(ch), "invalid channel name"));
        }
        if !seen.insert(ch) {
            return Err(Error::config(
                &task.name,
                Some(ch),
                format!("{} channel listed twice", kind),
            ));
        }
    }
    Ok(())
}

fn check_arity(task: &Task) -> Result<()> {
    let callable = &task.callable;
    if callable.arity() != task.inputs.len() {
        return Err(Error::config(
            &task.name,
            None,
            format!(
                "callable '{}' takes {} inputs but the task declares {}",
                callable.name(),
                callable.arity(),
                task.inputs.len()
            ),
        ));
    }
    if callable.returns() != task.outputs.len() {
        return Err(Error::config(
            &task.name,
            None,
            format!(
                "callable '{}' returns {} outputs but the task declares {}",
                callable.name(),
                callable.returns(),
                task.outputs.len()
            ),
        ));
    }
    Ok(())
}

/// Decide which channels are queued and who reads each queue.
///
/// A channel is queued when a continuous task produces it, or when a
/// continuous task consumes it. A queue has exactly one reader: every
/// consumer of a continuous producer pops, while for a one-shot producer only
/// continuous consumers pop and one-shot consumers read the store.
fn build_routes(
    tasks: &[Task],
    externals: &BTreeSet<String>,
    producer: &HashMap<&str, usize>,
) -> Result<BTreeMap<String, ChannelRoute>> {
    let mut routes: BTreeMap<String, ChannelRoute> = BTreeMap::new();

    let route_for = |name: &str| -> ChannelRoute {
        ChannelRoute {
            name: name.to_string(),
            producer: producer.get(name).map(|&i| tasks[i].name.clone()),
            external: externals.contains(name),
            queued: false,
            consumers: Vec::new(),
            queue_reader: None,
        }
    };

    for task in tasks {
        for ch in task.outputs.iter().chain(task.inputs.iter()) {
            if !routes.contains_key(ch) {
                let route = route_for(ch);
                routes.insert(ch.clone(), route);
            }
        }
    }
    for ext in externals {
        if !routes.contains_key(ext) {
            let route = route_for(ext);
            routes.insert(ext.clone(), route);
        }
    }

    for task in tasks {
        for input in &task.inputs {
            let Some(route) = routes.get_mut(input) else {
                continue;
            };
            route.consumers.push(task.name.clone());

            let produced_continuously = producer
                .get(input.as_str())
                .map(|&p| tasks[p].mode == TaskMode::Continuous)
                .unwrap_or(false);
            let pops = produced_continuously || task.mode == TaskMode::Continuous;
            if !pops {
                continue;
            }
            if let Some(reader) = &route.queue_reader {
                return Err(Error::config(
                    &task.name,
                    Some(input),
                    format!(
                        "queued channel is already read by '{}'; a queue has a single reader",
                        reader
                    ),
                ));
            }
            route.queue_reader = Some(task.name.clone());
            route.queued = true;
        }
    }

    for task in tasks.iter().filter(|t| t.mode == TaskMode::Continuous) {
        for out in &task.outputs {
            if let Some(route) = routes.get_mut(out) {
                route.queued = true;
            }
        }
    }

    Ok(routes)
}

fn check_acyclic(tasks: &[Task], graph: &DiGraph<usize, String>) -> Result<()> {
    for component in tarjan_scc(graph) {
        let cyclic = component.len() > 1
            || component
                .first()
                .map(|&n| graph.find_edge(n, n).is_some())
                .unwrap_or(false);
        if !cyclic {
            continue;
        }

        // Report the earliest-declared task in the cycle and the channel that
        // closes it.
        let Some(&node) = component.iter().min_by_key(|&&n| graph[n]) else {
            continue;
        };
        let channel = graph
            .edges_directed(node, Direction::Incoming)
            .find(|e| component.contains(&e.source()))
            .map(|e| e.weight().clone());
        let mut members: Vec<&str> = component
            .iter()
            .map(|&n| tasks[graph[n]].name.as_str())
            .collect();
        members.sort_unstable();
        return Err(Error::config(
            &tasks[graph[node]].name,
            channel.as_deref(),
            format!("dependency cycle among one-shot tasks: {}", members.join(", ")),
        ));
    }
    Ok(())
}

/// Kahn's algorithm, breaking ties by declaration order.
fn stable_topological_order(graph: &DiGraph<usize, String>) -> Vec<usize> {
    let mut indegree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|n| (n, graph.neighbors_directed(n, Direction::Incoming).count()))
        .collect();

    let mut ready: BinaryHeap<Reverse<(usize, NodeIndex)>> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(&n, _)| Reverse((graph[n], n)))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse((task, node))) = ready.pop() {
        order.push(task);
        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            if let Some(d) = indegree.get_mut(&next) {
                *d -= 1;
                if *d == 0 {
                    ready.push(Reverse((graph[next], next)));
                }
            }
        }
    }
    order
}
