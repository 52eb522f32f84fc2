//! LLM backend access: a thin Gemini adapter plus an `LLMGateway` that
//! wraps any [`LlmClient`] with retry and circuit-breaker protection.

mod gemini;

pub use gemini::GeminiClient;

use std::sync::Arc;

use async_trait::async_trait;
use choir_domain::capability::{CompletionRequest, Fuser, LlmClient, Summarizer};
use choir_domain::config::RetryConfig;
use choir_domain::error::Result;
use choir_fault::FaultCore;

/// Wraps an [`LlmClient`] so every call goes through [`FaultCore`] under
/// a breaker named `llm:<model>` — one breaker per model, since a
/// provider outage for one model shouldn't trip out another.
pub struct LlmGateway {
    client: Arc<dyn LlmClient>,
    fault: Arc<FaultCore>,
    retry: RetryConfig,
}

impl LlmGateway {
    pub fn new(client: Arc<dyn LlmClient>, fault: Arc<FaultCore>, retry: RetryConfig) -> Self {
        Self { client, fault, retry }
    }

    pub async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let breaker_name = format!("llm:{}", request.model);
        let client = Arc::clone(&self.client);
        self.fault
            .execute("llm_complete", Some(&breaker_name), &self.retry, move || {
                let client = Arc::clone(&client);
                let request = request.clone();
                async move { client.complete(request).await }
            })
            .await
    }
}

/// [`Summarizer`] backed by an [`LlmGateway`] completion call — the first
/// of the synthesis consensus algorithm's two LLM calls.
pub struct GatewaySummarizer {
    gateway: Arc<LlmGateway>,
    model: String,
    temperature: f32,
}

impl GatewaySummarizer {
    pub fn new(gateway: Arc<LlmGateway>, model: impl Into<String>, temperature: f32) -> Self {
        Self { gateway, model: model.into(), temperature }
    }
}

#[async_trait]
impl Summarizer for GatewaySummarizer {
    async fn summarize(&self, prompt: &str, candidates: &[String]) -> Result<String> {
        let joined = candidates.join("\n");
        let request_prompt = format!(
            "The original question was: {prompt}\n\nSummarize the following response in one or two sentences, preserving its key claim:\n\n{joined}"
        );
        self.gateway
            .complete(CompletionRequest {
                model: self.model.clone(),
                prompt: request_prompt,
                temperature: self.temperature,
                max_tokens: 500,
            })
            .await
    }
}

/// [`Fuser`] backed by an [`LlmGateway`] completion call — the second
/// of the synthesis consensus algorithm's two LLM calls.
pub struct GatewayFuser {
    gateway: Arc<LlmGateway>,
    model: String,
    temperature: f32,
}

impl GatewayFuser {
    pub fn new(gateway: Arc<LlmGateway>, model: impl Into<String>, temperature: f32) -> Self {
        Self { gateway, model: model.into(), temperature }
    }
}

#[async_trait]
impl Fuser for GatewayFuser {
    async fn fuse(&self, prompt: &str, summary: &str, candidates: &[String]) -> Result<String> {
        let request_prompt = format!(
            "The original question was: {prompt}\n\nHere are summaries of {} candidate responses:\n{summary}\n\nSynthesize one final answer that represents the best combined perspective.",
            candidates.len()
        );
        self.gateway
            .complete(CompletionRequest {
                model: self.model.clone(),
                prompt: request_prompt,
                temperature: self.temperature,
                max_tokens: 1000,
            })
            .await
    }
}

/// Deterministic test double: echoes a fixed prefix of the prompt back,
/// so agent/consensus tests never depend on network access.
pub struct EchoLlmClient;

#[async_trait]
impl LlmClient for EchoLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        Ok(format!("echo: {}", request.prompt.chars().take(120).collect::<String>()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use choir_domain::config::BreakerConfig;

    fn retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            base_delay_secs: 0.0,
            max_delay_secs: 0.0,
            exponential_base: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn gateway_delegates_to_underlying_client() {
        let fault = Arc::new(FaultCore::new(BreakerConfig::default()));
        let gateway = LlmGateway::new(Arc::new(EchoLlmClient), fault, retry());
        let result = gateway
            .complete(CompletionRequest {
                model: "test-model".into(),
                prompt: "hello there".into(),
                temperature: 0.5,
                max_tokens: 100,
            })
            .await
            .unwrap();
        assert_eq!(result, "echo: hello there");
    }

    #[tokio::test]
    async fn summarizer_delegates_through_gateway() {
        let fault = Arc::new(FaultCore::new(BreakerConfig::default()));
        let gateway = Arc::new(LlmGateway::new(Arc::new(EchoLlmClient), fault, retry()));
        let summarizer = GatewaySummarizer::new(gateway, "test-model", 0.3);
        let summary = summarizer.summarize("why?", &["because".into()]).await.unwrap();
        assert!(summary.starts_with("echo:"));
    }

    #[tokio::test]
    async fn fuser_delegates_through_gateway() {
        let fault = Arc::new(FaultCore::new(BreakerConfig::default()));
        let gateway = Arc::new(LlmGateway::new(Arc::new(EchoLlmClient), fault, retry()));
        let fuser = GatewayFuser::new(gateway, "test-model", 0.3);
        let fused = fuser.fuse("why?", "combined summary", &["a".into(), "b".into()]).await.unwrap();
        assert!(fused.starts_with("echo:"));
    }
}
