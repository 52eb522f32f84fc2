//! The turn loop: fans a prompt out to every configured agent for
//! `turns` rounds, then reduces the final round's replies to one
//! answer via a [`ConsensusEngine`]. Every write and event this
//! module emits follows the ordering fixed here — callers never see
//! a `consensus_reached` before its `message`, nor a `turn_completed`
//! before every agent in that turn has reported.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use choir_agent::Agent;
use choir_audit::InMemoryAuditSink;
use choir_broadcast::{BroadcastHub, Event};
use choir_bus::MessageBus;
use choir_consensus::ConsensusEngine;
use choir_domain::capability::{AuditSink, Embedder, VectorStore};
use choir_domain::error::{Error, Result};
use choir_domain::model::{ConsensusMethod, ConsensusOutcome, ConversationResult, Message, AGENT_SENDER_PREFIX, CONSENSUS_SENDER};
use choir_fault::FaultCore;
use choir_llm::LlmGateway;
use futures_util::future::join_all;
use parking_lot::RwLock;

const HISTORY_WINDOW: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Running,
    AwaitingConsensus,
    Completed,
    Failed,
}

/// Everything the vector-store integration needs; absent
/// entirely when no vector store is configured.
pub struct VectorIntegration {
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
}

pub struct Orchestrator {
    bus: Arc<MessageBus>,
    audit: Arc<InMemoryAuditSink>,
    broadcast: Arc<BroadcastHub>,
    llm: Arc<LlmGateway>,
    agents: Vec<Agent>,
    consensus: ConsensusEngine,
    vector: Option<VectorIntegration>,
    states: RwLock<HashMap<String, ConversationState>>,
}

impl Orchestrator {
    /// `fault` is threaded through so the orchestrator can be extended
    /// with its own breaker-guarded calls later; today every retry and
    /// breaker decision lives inside `llm`'s own `FaultCore` usage.
    pub fn new(
        bus: Arc<MessageBus>,
        audit: Arc<InMemoryAuditSink>,
        broadcast: Arc<BroadcastHub>,
        _fault: Arc<FaultCore>,
        llm: Arc<LlmGateway>,
        agents: Vec<Agent>,
        consensus: ConsensusEngine,
        vector: Option<VectorIntegration>,
    ) -> Self {
        Self {
            bus,
            audit,
            broadcast,
            llm,
            agents,
            consensus,
            vector,
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn state_of(&self, conversation_id: &str) -> Option<ConversationState> {
        self.states.read().get(conversation_id).copied()
    }

    fn transition(&self, conversation_id: &str, to: ConversationState) -> Result<()> {
        let mut states = self.states.write();
        if matches!(to, ConversationState::Running) && states.contains_key(conversation_id) {
            return Err(Error::Validation(format!("conversation {conversation_id} has already started")));
        }
        states.insert(conversation_id.to_string(), to);
        Ok(())
    }

    pub async fn run(&self, prompt: &str, conversation_id: &str, turns: u32) -> Result<ConsensusOutcome> {
        let start = Instant::now();
        self.transition(conversation_id, ConversationState::Running)?;

        match self.run_inner(prompt, conversation_id, turns, start).await {
            Ok(outcome) => {
                let _ = self.transition(conversation_id, ConversationState::Completed);
                Ok(outcome)
            }
            Err(e) => {
                let _ = self.transition(conversation_id, ConversationState::Failed);
                self.broadcast
                    .publish(
                        conversation_id,
                        &Event::ErrorEvent {
                            message: e.to_string(),
                            conversation_id: Some(conversation_id.to_string()),
                        },
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn run_inner(&self, prompt: &str, conversation_id: &str, turns: u32, start: Instant) -> Result<ConsensusOutcome> {
        let user_message = Message::user(conversation_id, prompt);

        self.broadcast
            .publish(
                conversation_id,
                &Event::ConversationStarted {
                    conversation_id: conversation_id.to_string(),
                    prompt: prompt.to_string(),
                    total_turns: turns,
                },
            )
            .await;
        self.broadcast
            .publish(conversation_id, &Event::MessageEvent { message: user_message.clone() })
            .await;
        self.audit.log_message(&user_message).await?;
        self.bus.append(conversation_id, user_message.clone());

        let agent_count = self.agents.len();
        for turn in 1..=turns {
            self.broadcast
                .publish(conversation_id, &Event::TurnStarted { turn, agent_count })
                .await;

            let history = self.bus.history(conversation_id, HISTORY_WINDOW);

            for agent in &self.agents {
                self.broadcast
                    .publish(conversation_id, &Event::AgentThinking { agent_id: agent.agent_id.clone(), turn })
                    .await;
            }

            let futures = self.agents.iter().map(|agent| agent.respond(&history, &self.llm));
            let results = join_all(futures).await;

            let mut replies = Vec::new();
            for (agent, result) in self.agents.iter().zip(results.into_iter()) {
                match result {
                    Ok(content) => replies.push(Message::new(conversation_id, agent.agent_id.clone(), content, turn)),
                    Err(e) => {
                        tracing::warn!(agent_id = %agent.agent_id, turn, error = %e, "agent abstained this turn");
                        self.broadcast
                            .publish(conversation_id, &Event::AgentError { agent_id: agent.agent_id.clone(), error: e.to_string(), turn })
                            .await;
                    }
                }
            }

            if replies.is_empty() {
                self.broadcast
                    .publish(
                        conversation_id,
                        &Event::ErrorEvent { message: "no agent produced a response this turn".into(), conversation_id: Some(conversation_id.to_string()) },
                    )
                    .await;
                return Err(Error::NoAgentResponses);
            }

            for reply in &replies {
                self.audit.log_message(reply).await?;
                self.bus.append(conversation_id, reply.clone());
                self.broadcast.publish(conversation_id, &Event::AgentResponse { message: reply.clone() }).await;
            }

            self.broadcast
                .publish(conversation_id, &Event::TurnCompleted { turn, responses_received: replies.len() })
                .await;
        }

        self.transition(conversation_id, ConversationState::AwaitingConsensus)?;
        self.broadcast.publish(conversation_id, &Event::ConsensusStarted { message: "reducing final turn replies".into() }).await;

        let final_turn_replies: Vec<Message> = self
            .bus
            .history(conversation_id, usize::MAX)
            .into_iter()
            .filter(|m| m.turn == turns && m.sender.starts_with(AGENT_SENDER_PREFIX))
            .collect();

        let mut consensus_input = vec![user_message.clone()];
        consensus_input.extend(final_turn_replies.iter().cloned());

        let outcome = if let [reply] = final_turn_replies.as_slice() {
            ConsensusOutcome {
                final_answer: reply.content.clone(),
                winning_votes: 1,
                total_votes: consensus_input.len(),
                method: ConsensusMethod::SingleResponse,
                confidence: None,
            }
        } else {
            self.consensus.reach_consensus(&consensus_input).await?
        };

        let consensus_message = Message::new(conversation_id, CONSENSUS_SENDER, outcome.final_answer.clone(), turns + 1);
        self.audit.log_message(&consensus_message).await?;
        self.bus.append(conversation_id, consensus_message.clone());

        let total_messages = self.audit.messages_for(conversation_id, usize::MAX, 0).await?.len();
        let result = ConversationResult {
            conversation_id: conversation_id.to_string(),
            prompt: prompt.to_string(),
            final_answer: outcome.final_answer.clone(),
            total_turns: turns,
            total_messages,
            created_at: Utc::now(),
            duration_seconds: start.elapsed().as_secs_f64(),
        };
        self.audit.log_result(&result).await?;

        if let Some(vector) = &self.vector {
            let summary = format!("{prompt}\n{}", outcome.final_answer);
            let mut metadata = HashMap::new();
            metadata.insert("conversation_id".to_string(), serde_json::Value::String(conversation_id.to_string()));
            metadata.insert("total_turns".to_string(), serde_json::Value::from(turns));
            match vector.embedder.embed(&[summary.clone()]).await {
                Ok(mut embeddings) if !embeddings.is_empty() => {
                    if let Err(e) = vector.store.upsert(conversation_id, embeddings.remove(0), summary, metadata).await {
                        tracing::warn!(conversation_id, error = %e, "vector upsert failed");
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(conversation_id, error = %e, "embedding conversation summary failed"),
            }
        }

        self.broadcast
            .publish(
                conversation_id,
                &Event::ConsensusReached {
                    consensus: choir_broadcast::ConsensusPayload {
                        final_answer: outcome.final_answer.clone(),
                        winning_votes: outcome.winning_votes,
                        total_votes: outcome.total_votes,
                        method: outcome.method,
                    },
                },
            )
            .await;
        self.broadcast
            .publish(
                conversation_id,
                &Event::ConversationCompleted { conversation_id: conversation_id.to_string(), total_messages, final_answer: outcome.final_answer.clone() },
            )
            .await;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use choir_domain::config::{BreakerConfig, RetryConfig};
    use choir_llm::EchoLlmClient;

    fn build(num_agents: usize, turns: u32) -> (Orchestrator, u32) {
        let bus = Arc::new(MessageBus::new(1000));
        let audit = Arc::new(InMemoryAuditSink::in_memory());
        let broadcast = Arc::new(BroadcastHub::new());
        let fault = Arc::new(FaultCore::new(BreakerConfig::default()));
        let llm = Arc::new(LlmGateway::new(Arc::new(EchoLlmClient), Arc::clone(&fault), RetryConfig::default()));

        let agents: Vec<Agent> = (0..num_agents).map(|i| Agent::new(format!("agent_{i}"), "test-model", 0.7, None)).collect();
        let consensus = ConsensusEngine::majority(None);

        (Orchestrator::new(bus, audit, broadcast, fault, llm, agents, consensus, None), turns)
    }

    #[tokio::test]
    async fn full_conversation_reaches_consensus_and_completes() {
        let (orchestrator, turns) = build(3, 2);
        let outcome = orchestrator.run("should we ship it?", "c1", turns).await.unwrap();
        assert_eq!(outcome.total_votes, 3);
        assert_eq!(orchestrator.state_of("c1"), Some(ConversationState::Completed));
    }

    #[tokio::test]
    async fn single_agent_is_trivially_single_response() {
        let (orchestrator, turns) = build(1, 1);
        let outcome = orchestrator.run("quick question", "c2", turns).await.unwrap();
        assert_eq!(outcome.method, ConsensusMethod::SingleResponse);
        assert_eq!(outcome.winning_votes, 1);
    }

    #[tokio::test]
    async fn zero_turns_skips_agent_phase() {
        let (orchestrator, turns) = build(3, 0);
        let outcome = orchestrator.run("no turns needed", "c3", turns).await.unwrap();
        assert_eq!(outcome.method, ConsensusMethod::SingleResponse);
        assert_eq!(outcome.total_votes, 1);
    }

    #[tokio::test]
    async fn same_conversation_id_cannot_be_run_twice() {
        let (orchestrator, turns) = build(2, 1);
        orchestrator.run("first", "c4", turns).await.unwrap();
        let err = orchestrator.run("second", "c4", turns).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
