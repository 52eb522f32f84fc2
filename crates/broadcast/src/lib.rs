//! Per-conversation real-time fan-out. Each subscriber is an `mpsc`
//! sink (the same shape used for per-connection outbound queues
//! elsewhere in this workspace); `publish` serialises an event once
//! and writes it to every attached subscriber, detaching any whose
//! channel has gone away.

use std::collections::HashMap;
use std::sync::Arc;

use choir_domain::model::{ConsensusMethod, Message};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// The WebSocket event envelope: every message is a JSON object tagged
/// by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "conversation_started")]
    ConversationStarted {
        conversation_id: String,
        prompt: String,
        total_turns: u32,
    },
    #[serde(rename = "message")]
    MessageEvent { message: Message },
    #[serde(rename = "turn_started")]
    TurnStarted { turn: u32, agent_count: usize },
    #[serde(rename = "agent_thinking")]
    AgentThinking { agent_id: String, turn: u32 },
    #[serde(rename = "agent_response")]
    AgentResponse { message: Message },
    #[serde(rename = "agent_error")]
    AgentError { agent_id: String, error: String, turn: u32 },
    #[serde(rename = "turn_completed")]
    TurnCompleted { turn: u32, responses_received: usize },
    #[serde(rename = "consensus_started")]
    ConsensusStarted { message: String },
    #[serde(rename = "consensus_reached")]
    ConsensusReached { consensus: ConsensusPayload },
    #[serde(rename = "conversation_completed")]
    ConversationCompleted {
        conversation_id: String,
        total_messages: usize,
        final_answer: String,
    },
    #[serde(rename = "error")]
    ErrorEvent {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
    },
}

/// The reduced outcome carried by a `consensus_reached` event.
#[derive(Debug, Clone, Serialize)]
pub struct ConsensusPayload {
    pub final_answer: String,
    pub winning_votes: usize,
    pub total_votes: usize,
    pub method: ConsensusMethod,
}

/// A live subscriber: an outbound channel the hub pushes serialized
/// JSON events into.
pub struct Subscriber {
    pub id: Uuid,
    pub sink: mpsc::Sender<Arc<str>>,
}

struct ConversationChannel {
    subscribers: Vec<Subscriber>,
}

/// Per-conversation subscriber registry. `publish` preserves
/// per-conversation order as observed by any single subscriber;
/// ordering across subscribers is not coordinated.
#[derive(Default)]
pub struct BroadcastHub {
    conversations: RwLock<HashMap<String, ConversationChannel>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a new subscriber, returning its id and receiver.
    pub fn attach(&self, conversation_id: &str) -> (Uuid, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(256);
        let id = Uuid::new_v4();
        let mut conversations = self.conversations.write();
        conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationChannel { subscribers: Vec::new() })
            .subscribers
            .push(Subscriber { id, sink: tx });
        (id, rx)
    }

    pub fn detach(&self, conversation_id: &str, subscriber_id: Uuid) {
        let mut conversations = self.conversations.write();
        if let Some(channel) = conversations.get_mut(conversation_id) {
            channel.subscribers.retain(|s| s.id != subscriber_id);
        }
    }

    /// Serialise `event` once and fan it out; subscribers whose send
    /// fails (channel closed or full) are detached after the pass.
    pub async fn publish(&self, conversation_id: &str, event: &Event) {
        let json: Arc<str> = match serde_json::to_string(event) {
            Ok(s) => s.into(),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize broadcast event");
                return;
            }
        };

        let subscribers: Vec<Subscriber> = {
            let conversations = self.conversations.read();
            match conversations.get(conversation_id) {
                Some(channel) => channel
                    .subscribers
                    .iter()
                    .map(|s| Subscriber { id: s.id, sink: s.sink.clone() })
                    .collect(),
                None => return,
            }
        };

        let mut failed = Vec::new();
        for sub in &subscribers {
            if sub.sink.send(Arc::clone(&json)).await.is_err() {
                failed.push(sub.id);
            }
        }

        if !failed.is_empty() {
            let mut conversations = self.conversations.write();
            if let Some(channel) = conversations.get_mut(conversation_id) {
                channel.subscribers.retain(|s| !failed.contains(&s.id));
            }
        }
    }

    pub fn subscriber_count(&self, conversation_id: &str) -> usize {
        self.conversations
            .read()
            .get(conversation_id)
            .map(|c| c.subscribers.len())
            .unwrap_or(0)
    }
}
