//! Core data model shared by every component: [`Message`], [`ConversationResult`],
//! [`ConsensusOutcome`], and [`ApiKey`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Turn number reserved for the initiating user message.
pub const USER_TURN: u32 = 0;

/// Sender prefix every agent message's `sender` field must start with.
pub const AGENT_SENDER_PREFIX: &str = "agent_";

/// Sender value used for the consensus message.
pub const CONSENSUS_SENDER: &str = "consensus";

/// Sender value used for the initiating user message.
pub const USER_SENDER: &str = "user";

/// An immutable conversation entry. Once constructed and written through
/// [`choir_domain::capability::AuditSink`] / the bus, a `Message` is never
/// mutated — corrections are new messages with a later `turn`/`timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender: String,
    pub content: String,
    pub turn: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

impl Message {
    pub fn new(conversation_id: impl Into<String>, sender: impl Into<String>, content: impl Into<String>, turn: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            sender: sender.into(),
            content: content.into(),
            turn,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn user(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(conversation_id, USER_SENDER, content, USER_TURN)
    }

    pub fn is_user(&self) -> bool {
        self.sender == USER_SENDER
    }

    pub fn is_agent(&self) -> bool {
        self.sender.starts_with(AGENT_SENDER_PREFIX)
    }

    pub fn is_consensus(&self) -> bool {
        self.sender == CONSENSUS_SENDER
    }
}

/// Written exactly once at conversation end, iff the consensus message exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationResult {
    pub conversation_id: String,
    pub prompt: String,
    pub final_answer: String,
    pub total_turns: u32,
    pub total_messages: usize,
    pub created_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

/// The consensus algorithm that produced a [`ConsensusOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMethod {
    SingleResponse,
    MajorityVoteWithTiebreak,
    SemanticClustering,
    Synthesis,
}

impl ConsensusMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleResponse => "single_response",
            Self::MajorityVoteWithTiebreak => "majority_vote_with_tiebreak",
            Self::SemanticClustering => "semantic_clustering",
            Self::Synthesis => "synthesis",
        }
    }
}

/// In-memory value returned by `ConsensusEngine::reach_consensus`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusOutcome {
    pub final_answer: String,
    pub winning_votes: usize,
    pub total_votes: usize,
    pub method: ConsensusMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// A permission string understood by the authorisation layer, e.g.
/// `"chat:write"` or the superuser `"admin:all"`.
pub type Permission = String;

/// An administratively-created API key. The clear key is never stored —
/// only its SHA-256 `key_hash`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiKey {
    pub key_id: String,
    pub key_hash: String,
    pub name: String,
    pub permissions: Vec<Permission>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub usage_count: u64,
}

fn default_true() -> bool {
    true
}

impl ApiKey {
    /// `admin:all` grants every permission; otherwise an exact match is required.
    pub fn has_permission(&self, required: &str) -> bool {
        self.is_active
            && (self.permissions.iter().any(|p| p == "admin:all") || self.permissions.iter().any(|p| p == required))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_sender_classification() {
        let user = Message::user("c1", "hello");
        assert!(user.is_user());
        assert!(!user.is_agent());

        let agent = Message::new("c1", "agent_0", "reply", 1);
        assert!(agent.is_agent());
        assert!(!agent.is_user());

        let consensus = Message::new("c1", CONSENSUS_SENDER, "final", 2);
        assert!(consensus.is_consensus());
    }

    #[test]
    fn api_key_admin_all_grants_everything() {
        let key = ApiKey {
            key_id: "k1".into(),
            key_hash: "hash".into(),
            name: "root".into(),
            permissions: vec!["admin:all".into()],
            created_at: Utc::now(),
            last_used: None,
            is_active: true,
            usage_count: 0,
        };
        assert!(key.has_permission("chat:write"));
        assert!(key.has_permission("anything"));
    }

    #[test]
    fn api_key_inactive_denies_everything() {
        let key = ApiKey {
            key_id: "k1".into(),
            key_hash: "hash".into(),
            name: "root".into(),
            permissions: vec!["admin:all".into()],
            created_at: Utc::now(),
            last_used: None,
            is_active: false,
            usage_count: 0,
        };
        assert!(!key.has_permission("chat:write"));
    }
}
