//! In-process message bus with Redis-Streams-shaped semantics: an
//! append-only per-conversation stream, consumer groups with
//! acknowledgement and redelivery, and a live tail for subscribers.
//!
//! Each stream is keyed `chat:<conversation_id>` and bounded to
//! `maxlen` entries (oldest dropped first), mirroring the bounded
//! ring + index pattern used for run tracking elsewhere in this
//! workspace, generalised to multiple independent streams.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use choir_domain::error::{Error, Result};
use choir_domain::model::Message;
use futures_core::Stream;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::broadcast;

/// A message plus the bus-assigned id it was appended under.
#[derive(Debug, Clone)]
pub struct BusEntry {
    pub id: String,
    pub message: Message,
}

fn stream_key(conversation_id: &str) -> String {
    format!("chat:{conversation_id}")
}

struct StreamState {
    entries: VecDeque<BusEntry>,
    last_seq_this_ms: (i64, u32),
    tx: broadcast::Sender<BusEntry>,
    groups: HashMap<String, ConsumerGroup>,
}

impl StreamState {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            entries: VecDeque::new(),
            last_seq_this_ms: (0, 0),
            tx,
            groups: HashMap::new(),
        }
    }

    fn next_id(&mut self) -> String {
        let now_ms = Utc::now().timestamp_millis();
        let seq = if now_ms == self.last_seq_this_ms.0 {
            self.last_seq_this_ms.1 + 1
        } else {
            0
        };
        self.last_seq_this_ms = (now_ms, seq);
        format!("{now_ms}-{seq}")
    }

    fn last_entry_age_secs(&self) -> Option<i64> {
        self.entries.back().map(|e| {
            let ts_ms: i64 = e.id.split('-').next().and_then(|s| s.parse().ok()).unwrap_or(0);
            let now_ms = Utc::now().timestamp_millis();
            (now_ms - ts_ms).max(0) / 1000
        })
    }
}

/// Per-(group, consumer) delivery tracking. Pending entries are
/// redelivered to the same group until acknowledged.
struct ConsumerGroup {
    last_delivered_id: Option<String>,
    pending: HashMap<String, BusEntry>,
}

impl ConsumerGroup {
    fn new() -> Self {
        Self {
            last_delivered_id: None,
            pending: HashMap::new(),
        }
    }
}

/// Handler invoked per delivered message by [`MessageBus::subscribe`].
pub type Handler = Arc<dyn Fn(Message) -> BoxFuture<'static, Result<()>> + Send + Sync>;

const BATCH_SIZE: usize = 10;
const POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// In-process MessageBus. Cheap to clone (internally `Arc`-backed
/// per-stream state behind a single map lock).
pub struct MessageBus {
    streams: RwLock<HashMap<String, StreamState>>,
    maxlen: usize,
}

impl MessageBus {
    pub fn new(maxlen: usize) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            maxlen,
        }
    }

    /// Append `message` to the conversation's stream, returning the
    /// bus-assigned entry id. Truncates to `maxlen`, dropping the oldest.
    pub fn append(&self, conversation_id: &str, message: Message) -> String {
        let key = stream_key(conversation_id);
        let mut streams = self.streams.write();
        let state = streams.entry(key).or_insert_with(StreamState::new);
        let id = state.next_id();
        let entry = BusEntry {
            id: id.clone(),
            message,
        };
        state.entries.push_back(entry.clone());
        if state.entries.len() > self.maxlen {
            state.entries.pop_front();
        }
        let _ = state.tx.send(entry);
        id
    }

    /// The most recent `count` entries, in chronological order.
    pub fn history(&self, conversation_id: &str, count: usize) -> Vec<Message> {
        let key = stream_key(conversation_id);
        let streams = self.streams.read();
        match streams.get(&key) {
            Some(state) => state
                .entries
                .iter()
                .rev()
                .take(count)
                .rev()
                .map(|e| e.message.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// A live, unbounded stream of entries appended after `from_id`
    /// (`None` = start from whatever is appended next). Backed by a
    /// broadcast channel; a slow subscriber may miss entries if it
    /// falls far enough behind (at-least-once within the channel's
    /// lag tolerance, matching the bus's retryable-reconnect contract).
    pub fn tail(
        &self,
        conversation_id: &str,
        from_id: Option<String>,
    ) -> Pin<Box<dyn Stream<Item = BusEntry> + Send>> {
        let key = stream_key(conversation_id);
        let mut rx = {
            let mut streams = self.streams.write();
            let state = streams.entry(key).or_insert_with(StreamState::new);
            state.tx.subscribe()
        };
        Box::pin(async_stream::stream! {
            let mut cursor = from_id;
            loop {
                match rx.recv().await {
                    Ok(entry) => {
                        if let Some(c) = &cursor {
                            if entry.id.as_str() <= c.as_str() {
                                continue;
                            }
                        }
                        cursor = Some(entry.id.clone());
                        yield entry;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Register (or rejoin) a consumer group and spawn a cooperative
    /// reader task that delivers batches of at most [`BATCH_SIZE`],
    /// polling every ~1s, invoking `handler` per message, and
    /// acknowledging on success. On handler error the entry stays
    /// pending and is redelivered on the next poll (`BUSYGROUP` is not
    /// an error — rejoining an existing group is a no-op).
    pub fn subscribe(self: &Arc<Self>, conversation_id: &str, group: &str, handler: Handler) {
        let bus = Arc::clone(self);
        let conversation_id = conversation_id.to_string();
        let group = group.to_string();
        {
            let key = stream_key(&conversation_id);
            let mut streams = bus.streams.write();
            let state = streams.entry(key).or_insert_with(StreamState::new);
            state.groups.entry(group.clone()).or_insert_with(ConsumerGroup::new);
        }
        tokio::spawn(async move {
            loop {
                let batch = bus.poll_group(&conversation_id, &group);
                for entry in batch {
                    let message = entry.message.clone();
                    match handler(message).await {
                        Ok(()) => bus.ack(&conversation_id, &group, &entry.id),
                        Err(e) => {
                            tracing::warn!(conversation_id, group, error = %e, "bus handler failed, leaving pending");
                        }
                    }
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        });
    }

    fn poll_group(&self, conversation_id: &str, group: &str) -> Vec<BusEntry> {
        let key = stream_key(conversation_id);
        let mut streams = self.streams.write();
        let Some(state) = streams.get_mut(&key) else {
            return Vec::new();
        };
        let Some(cg) = state.groups.get_mut(group) else {
            return Vec::new();
        };
        let new_entries: Vec<BusEntry> = state
            .entries
            .iter()
            .filter(|e| cg.last_delivered_id.as_deref().map(|l| e.id.as_str() > l).unwrap_or(true))
            .take(BATCH_SIZE)
            .cloned()
            .collect();
        let redeliveries: Vec<BusEntry> = cg.pending.values().cloned().collect();

        let mut batch = redeliveries;
        for entry in new_entries {
            cg.last_delivered_id = Some(entry.id.clone());
            cg.pending.insert(entry.id.clone(), entry.clone());
            batch.push(entry);
        }
        batch.truncate(BATCH_SIZE);
        batch
    }

    fn ack(&self, conversation_id: &str, group: &str, id: &str) {
        let key = stream_key(conversation_id);
        let mut streams = self.streams.write();
        if let Some(state) = streams.get_mut(&key) {
            if let Some(cg) = state.groups.get_mut(group) {
                cg.pending.remove(id);
            }
        }
    }

    /// Conversation ids with at least one entry.
    pub fn active_conversations(&self) -> Vec<String> {
        let streams = self.streams.read();
        streams
            .iter()
            .filter(|(_, s)| !s.entries.is_empty())
            .map(|(k, _)| k.trim_start_matches("chat:").to_string())
            .collect()
    }

    /// Drop streams whose last entry is older than `max_age_secs`,
    /// measured against the wall clock. Returns the count dropped.
    pub fn cleanup(&self, max_age_secs: i64) -> usize {
        let mut streams = self.streams.write();
        let before = streams.len();
        streams.retain(|_, state| match state.last_entry_age_secs() {
            Some(age) => age < max_age_secs,
            None => true,
        });
        before - streams.len()
    }

    /// Total entries currently retained in a conversation's stream.
    pub fn len(&self, conversation_id: &str) -> usize {
        let key = stream_key(conversation_id);
        self.streams.read().get(&key).map(|s| s.entries.len()).unwrap_or(0)
    }
}

pub fn bus_error(dependency_op: impl Into<String>, message: impl Into<String>) -> Error {
    Error::dependency("bus", format!("{}: {}", dependency_op.into(), message.into()))
}
