//! Shared state store: the latest value written to each channel.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use super::Value;
use crate::hlog_trace;

/// The last value written to a channel, with its write order and time.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEntry {
    pub value: Value,
    /// Store-wide write sequence number, strictly increasing.
    pub seq: u64,
    pub written_at: DateTime<Utc>,
}

/// Channel name -> most recent value.
///
/// Writes overwrite unconditionally and no history is kept. Every channel has
/// a single writer, so one lock over the whole map is enough; reads never wait
/// on other readers.
#[derive(Debug, Default)]
pub struct StateStore {
    entries: RwLock<HashMap<String, StoreEntry>>,
    next_seq: AtomicU64,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a channel's value. Returns the sequence number of the write.
    pub fn write(&self, channel: &str, value: Value) -> u64 {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        // Taken under the lock so sequence order matches insertion order.
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        hlog_trace!("store write {}#{} = {}", channel, seq, value);
        entries.insert(
            channel.to_string(),
            StoreEntry {
                value,
                seq,
                written_at: Utc::now(),
            },
        );
        seq
    }

    /// The last written value, or `None` if the channel was never written.
    pub fn read(&self, channel: &str) -> Option<Value> {
        self.entry(channel).map(|e| e.value)
    }

    pub fn entry(&self, channel: &str) -> Option<StoreEntry> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(channel)
            .cloned()
    }

    pub fn has(&self, channel: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(channel)
    }

    /// Current values of the given channels; absent ones are omitted.
    pub fn snapshot<'a, I>(&self, channels: I) -> BTreeMap<String, Value>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        channels
            .into_iter()
            .filter_map(|c| entries.get(c).map(|e| (c.clone(), e.value.clone())))
            .collect()
    }

    /// Every channel currently holding a value.
    pub fn snapshot_all(&self) -> BTreeMap<String, Value> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
