use serde::{Deserialize, Serialize};

/// Per-agent overrides. Any field left `None` falls back to the
/// orchestrator/llm defaults or the built-in personality table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentOverride {
    pub agent_id: String,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub personality: Option<String>,
}

impl Default for AgentOverride {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            model: None,
            temperature: None,
            personality: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AgentsConfig {
    pub overrides: Vec<AgentOverride>,
}
