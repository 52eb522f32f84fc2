//! A single conversational participant: a personality preamble plus a
//! model/temperature pair, rendering the shared history into one
//! completion request per turn.

use choir_domain::capability::CompletionRequest;
use choir_domain::error::Result;
use choir_domain::model::Message;
use choir_llm::LlmGateway;

const HISTORY_WINDOW: usize = 10;

/// Default personalities carried over one per conventional agent slot,
/// with a generic fallback for any other `agent_id`.
pub fn default_personality(agent_id: &str) -> &'static str {
    match agent_id {
        "agent_0" => "You are a logical and analytical thinker who focuses on facts and evidence.",
        "agent_1" => "You are a creative and innovative thinker who looks for novel solutions.",
        "agent_2" => "You are a critical thinker who questions assumptions and finds potential issues.",
        "agent_3" => "You are a practical thinker who focuses on implementation and feasibility.",
        _ => "You are a helpful AI assistant.",
    }
}

pub struct Agent {
    pub agent_id: String,
    pub model: String,
    pub personality: String,
    pub temperature: f32,
}

impl Agent {
    pub fn new(agent_id: impl Into<String>, model: impl Into<String>, temperature: f32, personality: Option<String>) -> Self {
        let agent_id = agent_id.into();
        let personality = personality.unwrap_or_else(|| default_personality(&agent_id).to_string());
        Self {
            agent_id,
            model: model.into(),
            personality,
            temperature,
        }
    }

    fn role_instruction(&self) -> String {
        format!(
            "You are {}. Read the conversation above and give your perspective in 2-4 sentences, starting with your most important point.",
            self.agent_id
        )
    }

    fn render_prompt(&self, history: &[Message]) -> String {
        let window_start = history.len().saturating_sub(HISTORY_WINDOW);
        let window = &history[window_start..];

        let mut prompt = String::new();
        prompt.push_str(&self.personality);
        prompt.push_str("\n\n");
        for message in window {
            prompt.push_str(&message.sender);
            prompt.push_str(": ");
            prompt.push_str(&message.content);
            prompt.push('\n');
        }
        prompt.push('\n');
        prompt.push_str(&self.role_instruction());
        prompt
    }

    /// Renders the prompt and completes it through `gateway`. Failures
    /// propagate as retryable [`choir_domain::error::Error::Dependency`]
    /// values — the orchestrator decides whether to exclude this agent
    /// from the turn.
    pub async fn respond(&self, history: &[Message], gateway: &LlmGateway) -> Result<String> {
        let prompt = self.render_prompt(history);
        let output = gateway
            .complete(CompletionRequest {
                model: self.model.clone(),
                prompt,
                temperature: self.temperature,
                max_tokens: 4000,
            })
            .await?;
        Ok(output.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use choir_domain::config::{BreakerConfig, RetryConfig};
    use choir_fault::FaultCore;
    use choir_llm::EchoLlmClient;
    use std::sync::Arc;

    fn gateway() -> LlmGateway {
        LlmGateway::new(Arc::new(EchoLlmClient), Arc::new(FaultCore::new(BreakerConfig::default())), RetryConfig::default())
    }

    #[test]
    fn unrecognised_agent_id_falls_back_to_generic_personality() {
        let agent = Agent::new("agent_99", "test-model", 0.7, None);
        assert_eq!(agent.personality, "You are a helpful AI assistant.");
    }

    #[test]
    fn personality_override_wins_over_default() {
        let agent = Agent::new("agent_0", "test-model", 0.7, Some("custom preamble".into()));
        assert_eq!(agent.personality, "custom preamble");
    }

    #[test]
    fn render_prompt_truncates_to_last_ten_messages() {
        let agent = Agent::new("agent_0", "test-model", 0.7, None);
        let history: Vec<Message> = (0..15).map(|i| Message::new("c1", "user", format!("msg{i}"), i)).collect();
        let prompt = agent.render_prompt(&history);
        assert!(!prompt.contains("msg4"));
        assert!(prompt.contains("msg5"));
        assert!(prompt.contains("msg14"));
    }

    #[tokio::test]
    async fn respond_returns_trimmed_completion() {
        let agent = Agent::new("agent_0", "test-model", 0.7, None);
        let history = vec![Message::user("c1", "what should we build?")];
        let reply = agent.respond(&history, &gateway()).await.unwrap();
        assert!(reply.starts_with("echo:"));
    }
}
