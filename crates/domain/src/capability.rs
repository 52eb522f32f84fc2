//! Capability traits: the seams at which an in-process reference
//! implementation can be swapped for a real backing service without
//! touching the orchestrator or consensus engine.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{ConversationResult, Message};

/// Durable record of everything that happened, independent of the bus's
/// bounded retention. Out-of-scope backends (a relational store, an
/// object-store export) implement this the same way the in-memory
/// reference does.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_message(&self, message: &Message) -> Result<()>;

    async fn log_result(&self, result: &ConversationResult) -> Result<()>;

    async fn messages_for(&self, conversation_id: &str, limit: usize, offset: usize) -> Result<Vec<Message>>;

    async fn result_for(&self, conversation_id: &str) -> Result<Option<ConversationResult>>;

    async fn recent_results(&self, limit: usize, offset: usize) -> Result<Vec<ConversationResult>>;

    /// Full-text search over stored message content.
    async fn search(&self, query: &str, limit: usize, offset: usize) -> Result<Vec<Message>>;

    async fn stats(&self) -> Result<AuditStats>;

    async fn agent_stats(&self, agent_id: &str) -> Result<AgentStats>;

    /// Drop audit entries older than `older_than_secs`, returning the count removed.
    async fn cleanup(&self, older_than_secs: i64) -> Result<usize>;
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct AuditStats {
    pub total_conversations: usize,
    pub total_messages: usize,
    pub total_results: usize,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct AgentStats {
    pub agent_id: String,
    pub messages_sent: usize,
    pub times_won_consensus: usize,
}

/// A dense embedding vector, the unit of exchange between [`Embedder`],
/// [`VectorStore`], and the semantic-clustering consensus algorithm.
pub type Embedding = Vec<f32>;

/// Nearest-neighbour search over conversation-summary embeddings. Out of
/// scope per the distillation this crate was built from: a real ANN index
/// is a separate concern, this trait just fixes the contract.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(
        &self,
        id: &str,
        embedding: Embedding,
        text: String,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<()>;

    /// Only hits scoring at or above `score_threshold` are returned.
    async fn search(&self, query: &Embedding, top_k: usize, score_threshold: f32) -> Result<Vec<VectorMatch>>;

    async fn remove(&self, id: &str) -> Result<()>;
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Turns text into embeddings for semantic-clustering consensus and for
/// [`VectorStore`] indexing.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>>;
}

/// Partitions a set of embeddings into clusters. Implementations decide
/// their own `k`; the semantic-clustering consensus algorithm only needs
/// cluster assignment and relative cluster sizes.
#[async_trait]
pub trait Clusterer: Send + Sync {
    /// Returns one cluster index per input embedding.
    async fn cluster(&self, embeddings: &[Embedding]) -> Result<Vec<usize>>;
}

/// Produces a short summary of a set of candidate answers, used by the
/// synthesis consensus algorithm as the first of its two LLM calls.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, prompt: &str, candidates: &[String]) -> Result<String>;
}

/// Fuses a summary plus the original candidates into one final answer,
/// the second of the synthesis consensus algorithm's two LLM calls.
#[async_trait]
pub trait Fuser: Send + Sync {
    async fn fuse(&self, prompt: &str, summary: &str, candidates: &[String]) -> Result<String>;
}

/// A single chat completion request to an underlying model provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// The seam every LLM backend adapter implements. Agents, the
/// summariser, and the fuser all ultimately go through one of these —
/// never directly to a vendor SDK — so retry/breaker wrapping and
/// testing doubles apply uniformly.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}
