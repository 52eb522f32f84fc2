use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusAlgorithm {
    Majority,
    SemanticCluster,
    Synthesis,
}

impl Default for ConsensusAlgorithm {
    fn default() -> Self {
        Self::Synthesis
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub num_agents: u32,
    pub default_turns: u32,
    pub consensus_algorithm: ConsensusAlgorithm,
    /// How many recent bus messages an agent's prompt is built from.
    pub history_window: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            num_agents: d_num_agents(),
            default_turns: d_default_turns(),
            consensus_algorithm: ConsensusAlgorithm::default(),
            history_window: d_history_window(),
        }
    }
}

fn d_num_agents() -> u32 {
    3
}
fn d_default_turns() -> u32 {
    2
}
fn d_history_window() -> usize {
    50
}
