//! Queue registry: one FIFO per queued channel.
//!
//! A queue decouples a continuous producer's cadence from its consumer's.
//! Producers never block. When a bounded queue is full the overflow policy
//! decides what happens:
//!
//! - [`Overflow::DropOldest`] evicts the oldest entry and counts it as dropped.
//! - [`Overflow::Unbounded`] ignores the capacity and grows.
//!
//! Each queue has exactly one consumer, enforced when the task graph is
//! built, so a reader that has seen a value available can pop it without
//! racing anyone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::Value;
use crate::error::{Error, Result};
use crate::{hlog_trace, util};

/// Capacity used when the config leaves it unset.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// How often a waiting reader checks its queue again.
const QUEUE_POLL: Duration = Duration::from_micros(500);

/// What a bounded queue does when a producer pushes onto a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Overflow {
    /// Evict the oldest entry to make room.
    #[default]
    DropOldest,
    /// Grow without limit.
    Unbounded,
}

impl std::fmt::Display for Overflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Overflow::DropOldest => write!(f, "drop_oldest"),
            Overflow::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// Capacity and overflow policy of one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub overflow: Overflow,
}

fn default_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: Overflow::DropOldest,
        }
    }
}

impl QueueConfig {
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity,
            overflow: Overflow::DropOldest,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: Overflow::Unbounded,
        }
    }
}

/// How long a reader is willing to wait for a queued value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wait {
    /// Do not wait; take a value only if one is already there.
    #[default]
    Poll,
    /// Wait up to the given duration.
    For(Duration),
    /// Wait until a value arrives.
    Forever,
}

impl Wait {
    pub fn from_millis(ms: u64) -> Self {
        Self::from_duration(Duration::from_millis(ms))
    }

    pub fn from_duration(d: Duration) -> Self {
        if d.is_zero() {
            Wait::Poll
        } else {
            Wait::For(d)
        }
    }

    fn deadline(&self) -> Option<Instant> {
        match self {
            Wait::Poll => Some(Instant::now()),
            Wait::For(d) => Some(util::deadline_after(*d)),
            Wait::Forever => None,
        }
    }
}

/// A queued value and its per-queue sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub value: Value,
    pub seq: u64,
}

#[derive(Debug)]
struct ChannelQueue {
    config: QueueConfig,
    tx: Sender<QueueEntry>,
    /// The consumer's end. The producer also uses it to evict the oldest entry.
    rx: Receiver<QueueEntry>,
    next_seq: AtomicU64,
    dropped: AtomicU64,
}

impl ChannelQueue {
    fn new(mut config: QueueConfig) -> Self {
        config.capacity = config.capacity.max(1);
        let (tx, rx) = match config.overflow {
            Overflow::DropOldest => crossbeam_channel::bounded(config.capacity),
            Overflow::Unbounded => crossbeam_channel::unbounded(),
        };
        Self {
            config,
            tx,
            rx,
            next_seq: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, value: Value) -> Option<QueueEntry> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut entry = QueueEntry { value, seq };
        let mut evicted = None;
        loop {
            match self.tx.try_send(entry) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(back)) => {
                    entry = back;
                    // The consumer may have made room in between; only count real evictions.
                    if let Ok(oldest) = self.rx.try_recv() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        evicted.get_or_insert(oldest);
                    }
                }
                // Both ends live in this struct.
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }

    fn pop(&self) -> Option<QueueEntry> {
        self.rx.try_recv().ok()
    }

    fn len(&self) -> usize {
        self.rx.len()
    }

    /// Wait until the queue is non-empty or the deadline passes.
    async fn wait_available(&self, deadline: Option<Instant>) -> bool {
        loop {
            if !self.rx.is_empty() {
                return true;
            }
            let pause = match deadline {
                None => QUEUE_POLL,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    QUEUE_POLL.min(deadline - now)
                }
            };
            tokio::time::sleep(pause).await;
        }
    }

    fn drain(&self) -> Vec<Value> {
        self.rx.try_iter().map(|e| e.value).collect()
    }
}

/// All queues of one orchestration, keyed by channel name.
///
/// Queues are registered while the task graph is built; the set of channels
/// is fixed afterwards.
#[derive(Debug, Default)]
pub struct QueueRegistry {
    queues: HashMap<String, Arc<ChannelQueue>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the queue for a channel. Re-registering keeps the existing queue.
    pub fn register(&mut self, channel: &str, config: QueueConfig) {
        self.queues
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(ChannelQueue::new(config)));
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.queues.contains_key(channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(String::as_str)
    }

    pub fn config(&self, channel: &str) -> Option<&QueueConfig> {
        self.queues.get(channel).map(|q| &q.config)
    }

    fn queue(&self, channel: &str) -> Result<&Arc<ChannelQueue>> {
        self.queues
            .get(channel)
            .ok_or_else(|| Error::UnknownChannel(channel.to_string()))
    }

    /// Append a value. Never blocks. Returns the entry evicted by the
    /// overflow policy, if any.
    pub fn enqueue(&self, channel: &str, value: Value) -> Result<Option<QueueEntry>> {
        let queue = self.queue(channel)?;
        let evicted = queue.push(value);
        if let Some(ref e) = evicted {
            hlog_trace!("queue {} full, dropped #{}", channel, e.seq);
        }
        Ok(evicted)
    }

    /// Pop the oldest value, waiting per `wait`. `None` means nothing arrived in time.
    pub async fn dequeue(&self, channel: &str, wait: Wait) -> Result<Option<Value>> {
        let queue = self.queue(channel)?;
        let deadline = wait.deadline();
        loop {
            if let Some(entry) = queue.pop() {
                hlog_trace!("queue {} pop #{}", channel, entry.seq);
                return Ok(Some(entry.value));
            }
            if !queue.wait_available(deadline).await {
                return Ok(None);
            }
        }
    }

    /// Pop without waiting.
    pub fn try_dequeue(&self, channel: &str) -> Result<Option<Value>> {
        Ok(self.queue(channel)?.pop().map(|e| e.value))
    }

    /// Wait until the channel holds a value, without consuming it.
    pub async fn wait_available(&self, channel: &str, wait: Wait) -> Result<bool> {
        let queue = self.queue(channel)?;
        Ok(queue.wait_available(wait.deadline()).await)
    }

    pub fn len(&self, channel: &str) -> Result<usize> {
        Ok(self.queue(channel)?.len())
    }

    /// Number of entries the overflow policy has evicted from this channel.
    pub fn dropped(&self, channel: &str) -> Result<u64> {
        Ok(self.queue(channel)?.dropped.load(Ordering::Relaxed))
    }

    /// Remove and return everything queued on a channel.
    pub fn drain(&self, channel: &str) -> Result<Vec<Value>> {
        Ok(self.queue(channel)?.drain())
    }

    /// Empty every queue. Returns how many values were discarded.
    pub fn drain_all(&self) -> usize {
        self.queues.values().map(|q| q.drain().len()).sum()
    }
}
