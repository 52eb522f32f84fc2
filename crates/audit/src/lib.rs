//! `InMemoryAuditSink`: a bounded in-memory index backed by an
//! append-only JSONL file per process, the reference implementation of
//! [`choir_domain::capability::AuditSink`].
//!
//! Mirrors the run-log pattern used elsewhere in this workspace for
//! durability across restarts (bounded ring + `HashMap` index, JSONL
//! persisted on every write), generalised from single runs to full
//! conversations (messages + terminal result).

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use choir_domain::capability::{AgentStats, AuditSink, AuditStats};
use choir_domain::error::Result;
use choir_domain::model::{ConversationResult, Message};
use parking_lot::RwLock;

const DEFAULT_MAX_CONVERSATIONS: usize = 5000;

/// Applies `offset` then `limit` to an already-sorted vector.
fn page<T>(items: Vec<T>, limit: usize, offset: usize) -> Vec<T> {
    items.into_iter().skip(offset).take(limit).collect()
}

struct Inner {
    /// Bounded ring of conversation ids in write order, for eviction.
    order: VecDeque<String>,
    messages: HashMap<String, Vec<Message>>,
    results: HashMap<String, ConversationResult>,
    /// `recent_results` insertion order, newest last.
    result_order: Vec<String>,
}

impl Inner {
    fn new() -> Self {
        Self {
            order: VecDeque::new(),
            messages: HashMap::new(),
            results: HashMap::new(),
            result_order: Vec::new(),
        }
    }

    fn touch(&mut self, conversation_id: &str, max_conversations: usize) {
        if !self.messages.contains_key(conversation_id) {
            self.order.push_back(conversation_id.to_string());
            self.messages.insert(conversation_id.to_string(), Vec::new());
        }
        if self.order.len() > max_conversations {
            if let Some(oldest) = self.order.pop_front() {
                self.messages.remove(&oldest);
                self.results.remove(&oldest);
                self.result_order.retain(|id| id != &oldest);
            }
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind")]
enum JournalEntry {
    Message(Message),
    Result(ConversationResult),
}

/// In-process reference implementation of `AuditSink`. Behind the same
/// trait, a real RDBMS-backed sink would implement transactional writes
/// and durable pagination instead of this bounded ring.
pub struct InMemoryAuditSink {
    inner: RwLock<Inner>,
    log_path: Option<PathBuf>,
    max_conversations: usize,
}

impl InMemoryAuditSink {
    /// Purely in-memory, no on-disk journal (useful for tests).
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(Inner::new()),
            log_path: None,
            max_conversations: DEFAULT_MAX_CONVERSATIONS,
        }
    }

    /// Backed by a JSONL journal at `path`, replayed on construction.
    pub fn with_journal(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut inner = Inner::new();
        if let Ok(content) = std::fs::read_to_string(&path) {
            for line in content.lines() {
                match serde_json::from_str::<JournalEntry>(line) {
                    Ok(JournalEntry::Message(m)) => {
                        inner.touch(&m.conversation_id, DEFAULT_MAX_CONVERSATIONS);
                        inner.messages.entry(m.conversation_id.clone()).or_default().push(m);
                    }
                    Ok(JournalEntry::Result(r)) => {
                        inner.result_order.push(r.conversation_id.clone());
                        inner.results.insert(r.conversation_id.clone(), r);
                    }
                    Err(e) => tracing::warn!(error = %e, "skipping corrupt audit journal line"),
                }
            }
        }
        Self {
            inner: RwLock::new(inner),
            log_path: Some(path),
            max_conversations: DEFAULT_MAX_CONVERSATIONS,
        }
    }

    fn append_journal(&self, entry: &JournalEntry) {
        let Some(path) = &self.log_path else { return };
        if let Ok(json) = serde_json::to_string(entry) {
            if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
                let _ = writeln!(file, "{json}");
            }
        }
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn log_message(&self, message: &Message) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.touch(&message.conversation_id, self.max_conversations);
            inner
                .messages
                .entry(message.conversation_id.clone())
                .or_default()
                .push(message.clone());
        }
        self.append_journal(&JournalEntry::Message(message.clone()));
        Ok(())
    }

    async fn log_result(&self, result: &ConversationResult) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.results.insert(result.conversation_id.clone(), result.clone());
            inner.result_order.push(result.conversation_id.clone());
        }
        self.append_journal(&JournalEntry::Result(result.clone()));
        Ok(())
    }

    async fn messages_for(&self, conversation_id: &str, limit: usize, offset: usize) -> Result<Vec<Message>> {
        let inner = self.inner.read();
        let mut msgs = inner.messages.get(conversation_id).cloned().unwrap_or_default();
        msgs.sort_by(|a, b| (a.timestamp, a.turn).cmp(&(b.timestamp, b.turn)));
        Ok(page(msgs, limit, offset))
    }

    async fn result_for(&self, conversation_id: &str) -> Result<Option<ConversationResult>> {
        Ok(self.inner.read().results.get(conversation_id).cloned())
    }

    async fn recent_results(&self, limit: usize, offset: usize) -> Result<Vec<ConversationResult>> {
        let inner = self.inner.read();
        let mut results: Vec<ConversationResult> = inner.results.values().cloned().collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(results, limit, offset))
    }

    async fn search(&self, query: &str, limit: usize, offset: usize) -> Result<Vec<Message>> {
        let needle = query.to_lowercase();
        let inner = self.inner.read();
        let mut hits: Vec<Message> = inner
            .messages
            .values()
            .flatten()
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(page(hits, limit, offset))
    }

    async fn stats(&self) -> Result<AuditStats> {
        let inner = self.inner.read();
        Ok(AuditStats {
            total_conversations: inner.messages.len(),
            total_messages: inner.messages.values().map(|v| v.len()).sum(),
            total_results: inner.results.len(),
        })
    }

    async fn agent_stats(&self, agent_id: &str) -> Result<AgentStats> {
        let inner = self.inner.read();
        let mut messages_sent = 0usize;
        for msgs in inner.messages.values() {
            messages_sent += msgs.iter().filter(|m| m.sender == agent_id).count();
        }
        let times_won_consensus = inner
            .messages
            .values()
            .filter_map(|msgs| {
                let consensus = msgs.iter().find(|m| m.is_consensus())?;
                let winner = msgs
                    .iter()
                    .find(|m| m.sender == agent_id && m.content == consensus.content)?;
                Some(winner)
            })
            .count();
        Ok(AgentStats {
            agent_id: agent_id.to_string(),
            messages_sent,
            times_won_consensus,
        })
    }

    async fn cleanup(&self, older_than_secs: i64) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::seconds(older_than_secs);
        let mut inner = self.inner.write();
        let stale: Vec<String> = inner
            .results
            .values()
            .filter(|r| r.created_at < cutoff)
            .map(|r| r.conversation_id.clone())
            .collect();
        for id in &stale {
            inner.messages.remove(id);
            inner.results.remove(id);
            inner.result_order.retain(|x| x != id);
            inner.order.retain(|x| x != id);
        }
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use choir_domain::model::Message;

    fn result_for(conv: &str) -> ConversationResult {
        ConversationResult {
            conversation_id: conv.into(),
            prompt: "hi".into(),
            final_answer: "answer".into(),
            total_turns: 2,
            total_messages: 3,
            created_at: Utc::now(),
            duration_seconds: 1.5,
        }
    }

    #[tokio::test]
    async fn log_message_then_messages_for_contains_it() {
        let sink = InMemoryAuditSink::in_memory();
        let m = Message::user("c1", "hello");
        sink.log_message(&m).await.unwrap();
        let msgs = sink.messages_for("c1", usize::MAX, 0).await.unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id, m.id);
    }

    #[tokio::test]
    async fn messages_for_honours_limit_and_offset() {
        let sink = InMemoryAuditSink::in_memory();
        for turn in 0..5 {
            sink.log_message(&Message::new("c1", "agent_0", format!("msg {turn}"), turn)).await.unwrap();
        }
        let page1 = sink.messages_for("c1", 2, 0).await.unwrap();
        let page2 = sink.messages_for("c1", 2, 2).await.unwrap();
        assert_eq!(page1.iter().map(|m| m.turn).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(page2.iter().map(|m| m.turn).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[tokio::test]
    async fn result_exists_iff_logged() {
        let sink = InMemoryAuditSink::in_memory();
        assert!(sink.result_for("c1").await.unwrap().is_none());
        sink.log_result(&result_for("c1")).await.unwrap();
        assert!(sink.result_for("c1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn search_is_case_insensitive_substring() {
        let sink = InMemoryAuditSink::in_memory();
        sink.log_message(&Message::new("c1", "agent_0", "The Answer Is Forty-Two", 1))
            .await
            .unwrap();
        let hits = sink.search("answer is", 10, 0).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn agent_stats_counts_messages_and_wins() {
        let sink = InMemoryAuditSink::in_memory();
        sink.log_message(&Message::new("c1", "agent_0", "final answer", 1)).await.unwrap();
        sink.log_message(&Message::new("c1", "agent_1", "other answer", 1)).await.unwrap();
        sink.log_message(&Message::new("c1", "consensus", "final answer", 2)).await.unwrap();

        let stats = sink.agent_stats("agent_0").await.unwrap();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.times_won_consensus, 1);

        let stats1 = sink.agent_stats("agent_1").await.unwrap();
        assert_eq!(stats1.times_won_consensus, 0);
    }

    #[tokio::test]
    async fn cleanup_drops_only_stale_conversations() {
        let sink = InMemoryAuditSink::in_memory();
        let mut old = result_for("old");
        old.created_at = Utc::now() - chrono::Duration::days(40);
        sink.log_result(&old).await.unwrap();
        sink.log_result(&result_for("fresh")).await.unwrap();

        let removed = sink.cleanup(30 * 24 * 3600).await.unwrap();
        assert_eq!(removed, 1);
        assert!(sink.result_for("old").await.unwrap().is_none());
        assert!(sink.result_for("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn journal_replay_reconstructs_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let sink = InMemoryAuditSink::with_journal(&path);
            sink.log_message(&Message::user("c1", "hello")).await.unwrap();
            sink.log_result(&result_for("c1")).await.unwrap();
        }
        let reopened = InMemoryAuditSink::with_journal(&path);
        assert_eq!(reopened.messages_for("c1", usize::MAX, 0).await.unwrap().len(), 1);
        assert!(reopened.result_for("c1").await.unwrap().is_some());
    }
}
