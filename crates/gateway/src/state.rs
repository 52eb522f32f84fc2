//! Wires every component crate together behind one `Clone`-able
//! handle that every handler receives through axum's `State` extractor.

use std::sync::Arc;

use anyhow::{Context, Result};
use choir_agent::Agent;
use choir_audit::InMemoryAuditSink;
use choir_broadcast::BroadcastHub;
use choir_bus::MessageBus;
use choir_consensus::{ConsensusCapabilities, ConsensusEngine, KMeansClusterer};
use choir_domain::config::{Config, ConsensusAlgorithm};
use choir_domain::model::ConsensusMethod;
use choir_fault::FaultCore;
use choir_llm::{GatewayFuser, GatewaySummarizer, GeminiClient, LlmGateway};
use choir_orchestrator::{Orchestrator, VectorIntegration};
use choir_security::{ApiKeyStore, Jwt, RateLimiter};
use choir_vector::InMemoryVectorStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub bus: Arc<MessageBus>,
    pub audit: Arc<InMemoryAuditSink>,
    pub broadcast: Arc<BroadcastHub>,
    pub fault: Arc<FaultCore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub api_keys: Arc<ApiKeyStore>,
    pub jwt: Option<Arc<Jwt>>,
    pub default_turns: u32,
}

impl AppState {
    /// Builds every component from `config`. The Gemini client falls
    /// back to the deterministic echo client when `CHOIR_GEMINI_API_KEY`
    /// is unset, so `serve` still starts for local exploration without
    /// a real provider key.
    pub fn bootstrap(config: Config) -> Result<Self> {
        let bus = Arc::new(MessageBus::new(config.bus.stream_maxlen));
        let audit = Arc::new(InMemoryAuditSink::in_memory());
        let broadcast = Arc::new(BroadcastHub::new());
        let fault = Arc::new(FaultCore::new(config.breaker.clone()));

        // One Gemini client backs both completion and embedding calls;
        // reused as `Arc<GeminiClient>` wherever a capability trait
        // object needs it, so only one reqwest::Client is ever built.
        let gemini = GeminiClient::from_env().ok().map(Arc::new);
        let llm_client: Arc<dyn choir_domain::capability::LlmClient> = match &gemini {
            Some(client) => Arc::clone(client) as Arc<dyn choir_domain::capability::LlmClient>,
            None => {
                tracing::warn!("CHOIR_GEMINI_API_KEY unset, falling back to the echo LLM client");
                Arc::new(choir_llm::EchoLlmClient)
            }
        };
        let llm = Arc::new(LlmGateway::new(llm_client, Arc::clone(&fault), config.retry.clone()));

        let agents: Vec<Agent> = (0..config.orchestrator.num_agents)
            .map(|i| {
                let agent_id = format!("agent_{i}");
                let overridden = config.agents.overrides.iter().find(|o| o.agent_id == agent_id);
                let model = overridden
                    .and_then(|o| o.model.clone())
                    .unwrap_or_else(|| config.llm.gemini_model.clone());
                let temperature = overridden.and_then(|o| o.temperature).unwrap_or(config.llm.gemini_temperature);
                let personality = overridden.and_then(|o| o.personality.clone());
                Agent::new(agent_id, model, temperature, personality)
            })
            .collect();

        let method = match config.orchestrator.consensus_algorithm {
            ConsensusAlgorithm::Majority => ConsensusMethod::MajorityVoteWithTiebreak,
            ConsensusAlgorithm::SemanticCluster => ConsensusMethod::SemanticClustering,
            ConsensusAlgorithm::Synthesis => ConsensusMethod::Synthesis,
        };
        let capabilities = match config.orchestrator.consensus_algorithm {
            ConsensusAlgorithm::Majority => ConsensusCapabilities::default(),
            ConsensusAlgorithm::SemanticCluster => ConsensusCapabilities {
                embedder: Some(
                    gemini
                        .clone()
                        .map(|c| c as Arc<dyn choir_domain::capability::Embedder>)
                        .context("semantic_cluster consensus requires CHOIR_GEMINI_API_KEY")?,
                ),
                clusterer: Some(Arc::new(KMeansClusterer)),
                ..Default::default()
            },
            ConsensusAlgorithm::Synthesis => ConsensusCapabilities {
                summarizer: Some(Arc::new(GatewaySummarizer::new(
                    Arc::clone(&llm),
                    config.llm.gemini_model.clone(),
                    config.llm.gemini_temperature,
                ))),
                fuser: Some(Arc::new(GatewayFuser::new(
                    Arc::clone(&llm),
                    config.llm.gemini_model.clone(),
                    config.llm.gemini_temperature,
                ))),
                ..Default::default()
            },
        };
        let consensus = ConsensusEngine::new(method, capabilities);

        let vector = gemini.clone().map(|embedder| VectorIntegration {
            store: Arc::new(InMemoryVectorStore::new()),
            embedder: embedder as Arc<dyn choir_domain::capability::Embedder>,
        });

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&bus),
            Arc::clone(&audit),
            Arc::clone(&broadcast),
            Arc::clone(&fault),
            llm,
            agents,
            consensus,
            vector,
        ));

        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let api_keys = Arc::new(ApiKeyStore::new());
        let jwt = match Jwt::from_env(config.jwt.clone()) {
            Ok(jwt) => Some(Arc::new(jwt)),
            Err(e) => {
                tracing::warn!(error = %e, "JWT issuance/verification disabled, only API keys will authenticate");
                None
            }
        };

        Ok(Self {
            default_turns: config.orchestrator.default_turns,
            config: Arc::new(config),
            orchestrator,
            bus,
            audit,
            broadcast,
            fault,
            rate_limiter,
            api_keys,
            jwt,
        })
    }
}
