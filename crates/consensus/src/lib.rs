//! Turns a set of candidate replies into one [`ConsensusOutcome`],
//! via whichever of the three algorithms the orchestrator is
//! configured to use.

mod kmeans;

pub use kmeans::KMeansClusterer;

use std::cmp::Reverse;
use std::sync::Arc;

use choir_domain::capability::{Clusterer, Embedder, Fuser, Summarizer};
use choir_domain::error::{Error, Result};
use choir_domain::model::{ConsensusMethod, ConsensusOutcome, Message};

const SYNTHESIS_CONFIDENCE: f64 = 0.9;

/// The capabilities needed by the semantic-clustering and synthesis
/// algorithms. `Majority` needs none of these and the engine may be
/// constructed without them.
#[derive(Default)]
pub struct ConsensusCapabilities {
    pub embedder: Option<Arc<dyn Embedder>>,
    pub clusterer: Option<Arc<dyn Clusterer>>,
    pub summarizer: Option<Arc<dyn Summarizer>>,
    pub fuser: Option<Arc<dyn Fuser>>,
}

pub struct ConsensusEngine {
    method: ConsensusMethod,
    capabilities: ConsensusCapabilities,
}

impl ConsensusEngine {
    pub fn new(method: ConsensusMethod, capabilities: ConsensusCapabilities) -> Self {
        Self { method, capabilities }
    }

    pub fn majority(method_override: Option<ConsensusMethod>) -> Self {
        Self::new(method_override.unwrap_or(ConsensusMethod::MajorityVoteWithTiebreak), ConsensusCapabilities::default())
    }

    pub async fn reach_consensus(&self, messages: &[Message]) -> Result<ConsensusOutcome> {
        if messages.is_empty() {
            return Err(Error::Validation("consensus requires at least one message".into()));
        }
        if messages.len() == 1 {
            return Ok(ConsensusOutcome {
                final_answer: messages[0].content.clone(),
                winning_votes: 1,
                total_votes: 1,
                method: ConsensusMethod::SingleResponse,
                confidence: None,
            });
        }

        match self.method {
            ConsensusMethod::SingleResponse => Ok(ConsensusOutcome {
                final_answer: messages[0].content.clone(),
                winning_votes: 1,
                total_votes: messages.len(),
                method: ConsensusMethod::SingleResponse,
                confidence: None,
            }),
            ConsensusMethod::MajorityVoteWithTiebreak => Ok(majority_vote(messages)),
            ConsensusMethod::SemanticClustering => self.semantic_cluster(messages).await,
            ConsensusMethod::Synthesis => self.synthesis(messages).await,
        }
    }

    async fn semantic_cluster(&self, messages: &[Message]) -> Result<ConsensusOutcome> {
        let embedder = self
            .capabilities
            .embedder
            .as_ref()
            .ok_or_else(|| Error::Configuration("semantic_clustering requires an Embedder".into()))?;
        let clusterer = self
            .capabilities
            .clusterer
            .as_ref()
            .ok_or_else(|| Error::Configuration("semantic_clustering requires a Clusterer".into()))?;

        let contents: Vec<String> = messages.iter().map(|m| m.content.clone()).collect();
        let embeddings = embedder.embed(&contents).await?;
        let assignments = clusterer.cluster(&embeddings).await?;

        let k = assignments.iter().copied().max().map(|m| m + 1).unwrap_or(0);
        let mut cluster_sizes = vec![0usize; k];
        for &c in &assignments {
            cluster_sizes[c] += 1;
        }
        let largest = cluster_sizes
            .iter()
            .enumerate()
            .max_by_key(|(label, size)| (**size, Reverse(*label)))
            .map(|(label, _)| label)
            .unwrap_or(0);

        let members: Vec<usize> = assignments.iter().enumerate().filter(|(_, &c)| c == largest).map(|(i, _)| i).collect();
        let dims = embeddings[members[0]].len();
        let mut sum = vec![0.0f32; dims];
        for &i in &members {
            for (d, v) in embeddings[i].iter().enumerate() {
                sum[d] += v;
            }
        }
        let centroid: Vec<f32> = sum.iter().map(|v| v / members.len() as f32).collect();

        let winner = members
            .iter()
            .copied()
            .min_by(|&a, &b| {
                let da: f32 = embeddings[a].iter().zip(centroid.iter()).map(|(x, y)| (x - y).powi(2)).sum();
                let db: f32 = embeddings[b].iter().zip(centroid.iter()).map(|(x, y)| (x - y).powi(2)).sum();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("largest cluster is non-empty");

        Ok(ConsensusOutcome {
            final_answer: messages[winner].content.clone(),
            winning_votes: members.len(),
            total_votes: messages.len(),
            method: ConsensusMethod::SemanticClustering,
            confidence: None,
        })
    }

    async fn synthesis(&self, messages: &[Message]) -> Result<ConsensusOutcome> {
        let summarizer = self
            .capabilities
            .summarizer
            .as_ref()
            .ok_or_else(|| Error::Configuration("synthesis requires a Summarizer".into()))?;
        let fuser = self
            .capabilities
            .fuser
            .as_ref()
            .ok_or_else(|| Error::Configuration("synthesis requires a Fuser".into()))?;

        let user_prompt = messages
            .iter()
            .find(|m| m.turn == 0 && m.is_user())
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let agent_messages: Vec<&Message> = messages.iter().filter(|m| m.is_agent()).collect();
        if agent_messages.is_empty() {
            return Err(Error::Validation("synthesis requires at least one agent message".into()));
        }

        let mut summaries = Vec::with_capacity(agent_messages.len());
        for message in &agent_messages {
            let summary = summarizer.summarize(&user_prompt, std::slice::from_ref(&message.content)).await?;
            summaries.push(summary);
        }
        let combined_summary = summaries.join("\n");
        let candidates: Vec<String> = agent_messages.iter().map(|m| m.content.clone()).collect();
        let final_answer = fuser.fuse(&user_prompt, &combined_summary, &candidates).await?;

        Ok(ConsensusOutcome {
            final_answer,
            winning_votes: agent_messages.len(),
            total_votes: messages.len(),
            method: ConsensusMethod::Synthesis,
            confidence: Some(SYNTHESIS_CONFIDENCE),
        })
    }
}

fn first_ballot(content: &str) -> String {
    content.lines().map(str::trim).find(|line| !line.is_empty()).unwrap_or("").to_string()
}

fn majority_vote(messages: &[Message]) -> ConsensusOutcome {
    let ballots: Vec<String> = messages.iter().map(|m| first_ballot(&m.content)).collect();

    let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for ballot in &ballots {
        *counts.entry(ballot.as_str()).or_insert(0) += 1;
    }
    let max = *counts.values().max().unwrap_or(&0);
    let tied: std::collections::HashSet<&str> = counts.iter().filter(|(_, &count)| count == max).map(|(b, _)| *b).collect();

    let winner_index = if tied.len() == 1 {
        let winning_ballot = *tied.iter().next().unwrap();
        messages.iter().position(|m| first_ballot(&m.content) == winning_ballot).unwrap()
    } else {
        let mut candidates: Vec<usize> = ballots
            .iter()
            .enumerate()
            .filter(|(_, ballot)| tied.contains(ballot.as_str()))
            .map(|(i, _)| i)
            .collect();
        candidates.sort_by(|&a, &b| {
            let len_cmp = messages[b].content.len().cmp(&messages[a].content.len());
            if len_cmp != std::cmp::Ordering::Equal {
                len_cmp
            } else {
                messages[a].content.cmp(&messages[b].content)
            }
        });
        candidates[0]
    };

    ConsensusOutcome {
        final_answer: messages[winner_index].content.clone(),
        winning_votes: max,
        total_votes: messages.len(),
        method: ConsensusMethod::MajorityVoteWithTiebreak,
        confidence: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use choir_domain::capability::Embedding;

    fn msg(sender: &str, content: &str, turn: u32) -> Message {
        Message::new("c1", sender, content, turn)
    }

    #[tokio::test]
    async fn single_message_is_always_single_response() {
        let engine = ConsensusEngine::majority(None);
        let outcome = engine.reach_consensus(&[msg("agent_0", "the answer", 1)]).await.unwrap();
        assert_eq!(outcome.method, ConsensusMethod::SingleResponse);
        assert_eq!(outcome.winning_votes, 1);
        assert_eq!(outcome.total_votes, 1);
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let engine = ConsensusEngine::majority(None);
        assert!(engine.reach_consensus(&[]).await.is_err());
    }

    #[tokio::test]
    async fn majority_picks_the_clear_winner() {
        let engine = ConsensusEngine::majority(None);
        let messages = vec![
            msg("agent_0", "Yes, proceed.\nmore detail", 1),
            msg("agent_1", "Yes, proceed.\nother detail", 1),
            msg("agent_2", "No, wait.", 1),
        ];
        let outcome = engine.reach_consensus(&messages).await.unwrap();
        assert_eq!(outcome.method, ConsensusMethod::MajorityVoteWithTiebreak);
        assert_eq!(outcome.winning_votes, 2);
        assert_eq!(outcome.total_votes, 3);
        assert!(outcome.final_answer.starts_with("Yes, proceed."));
    }

    #[tokio::test]
    async fn majority_tie_break_prefers_longer_content_then_lexical_order() {
        let engine = ConsensusEngine::majority(None);
        let messages = vec![
            msg("agent_0", "A", 1),
            msg("agent_1", "B", 1),
            msg("agent_2", "CC", 1),
        ];
        // Every ballot distinct -> three-way tie at count 1, tie-break is
        // longest content first ("CC"), then lexical among equal lengths.
        let outcome = engine.reach_consensus(&messages).await.unwrap();
        assert_eq!(outcome.final_answer, "CC");
        assert_eq!(outcome.winning_votes, 1);
    }

    struct FakeEmbedder;
    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            Ok(texts
                .iter()
                .map(|t| if t.starts_with("close") { vec![0.0, 0.0] } else { vec![10.0, 10.0] })
                .collect())
        }
    }

    #[tokio::test]
    async fn semantic_clustering_picks_message_closest_to_largest_cluster_centroid() {
        let engine = ConsensusEngine::new(
            ConsensusMethod::SemanticClustering,
            ConsensusCapabilities {
                embedder: Some(Arc::new(FakeEmbedder)),
                clusterer: Some(Arc::new(KMeansClusterer)),
                summarizer: None,
                fuser: None,
            },
        );
        let messages = vec![
            msg("agent_0", "close one", 1),
            msg("agent_1", "close two", 1),
            msg("agent_2", "far one", 1),
        ];
        let outcome = engine.reach_consensus(&messages).await.unwrap();
        assert_eq!(outcome.method, ConsensusMethod::SemanticClustering);
        assert_eq!(outcome.winning_votes, 2);
        assert!(outcome.final_answer.starts_with("close"));
    }

    struct FakeSummarizer;
    #[async_trait]
    impl Summarizer for FakeSummarizer {
        async fn summarize(&self, _prompt: &str, candidates: &[String]) -> Result<String> {
            Ok(format!("summary({})", candidates[0]))
        }
    }

    struct FakeFuser;
    #[async_trait]
    impl Fuser for FakeFuser {
        async fn fuse(&self, prompt: &str, summary: &str, _candidates: &[String]) -> Result<String> {
            Ok(format!("fused[{prompt}]<-{summary}"))
        }
    }

    #[tokio::test]
    async fn synthesis_runs_one_summary_per_agent_then_one_fuse() {
        let engine = ConsensusEngine::new(
            ConsensusMethod::Synthesis,
            ConsensusCapabilities {
                embedder: None,
                clusterer: None,
                summarizer: Some(Arc::new(FakeSummarizer)),
                fuser: Some(Arc::new(FakeFuser)),
            },
        );
        let messages = vec![msg("user", "what now?", 0), msg("agent_0", "do x", 1), msg("agent_1", "do y", 1)];
        let outcome = engine.reach_consensus(&messages).await.unwrap();
        assert_eq!(outcome.method, ConsensusMethod::Synthesis);
        assert_eq!(outcome.confidence, Some(SYNTHESIS_CONFIDENCE));
        assert_eq!(outcome.winning_votes, 2);
        assert!(outcome.final_answer.contains("summary(do x)"));
        assert!(outcome.final_answer.contains("summary(do y)"));
        assert!(outcome.final_answer.starts_with("fused[what now?]"));
    }

    #[tokio::test]
    async fn synthesis_without_capabilities_is_a_configuration_error() {
        let engine = ConsensusEngine::new(ConsensusMethod::Synthesis, ConsensusCapabilities::default());
        let messages = vec![msg("user", "q", 0), msg("agent_0", "a", 1)];
        let err = engine.reach_consensus(&messages).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
