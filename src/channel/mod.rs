//! Data channels between tasks.
//!
//! A channel is a named slot. Its latest value lives in the [`StateStore`];
//! channels fed by or feeding continuous tasks also own a queue in the
//! [`QueueRegistry`].

pub mod queue;
pub mod store;

use regex::Regex;
use std::sync::LazyLock;

pub use queue::{Overflow, QueueConfig, QueueEntry, QueueRegistry, Wait, DEFAULT_QUEUE_CAPACITY};
pub use store::{StateStore, StoreEntry};

/// Payload carried on every channel.
pub type Value = serde_json::Value;

/// Channel names: an identifier, optionally with dots and dashes.
static CHANNEL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").unwrap());

/// Whether `name` is usable as a channel name.
pub fn is_valid_name(name: &str) -> bool {
    CHANNEL_NAME_RE.is_match(name)
}
