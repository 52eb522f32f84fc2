//! `InMemoryVectorStore`: a linear cosine-similarity scan, the
//! reference implementation of [`choir_domain::capability::VectorStore`].
//!
//! Adequate for the conversation volumes a single orchestrator instance
//! handles; a real ANN index is a drop-in replacement behind the same
//! trait.

use std::collections::HashMap;

use async_trait::async_trait;
use choir_domain::capability::{Embedding, VectorMatch, VectorStore};
use choir_domain::error::Result;
use parking_lot::RwLock;
use serde_json::Value;

struct Entry {
    embedding: Embedding,
    text: String,
    metadata: HashMap<String, Value>,
}

pub struct InMemoryVectorStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, id: &str, embedding: Embedding, text: String, metadata: HashMap<String, Value>) -> Result<()> {
        self.entries.write().insert(id.to_string(), Entry { embedding, text, metadata });
        Ok(())
    }

    async fn search(&self, query: &Embedding, top_k: usize, score_threshold: f32) -> Result<Vec<VectorMatch>> {
        let entries = self.entries.read();
        let mut scored: Vec<VectorMatch> = entries
            .iter()
            .map(|(id, e)| VectorMatch {
                id: id.clone(),
                text: e.text.clone(),
                score: cosine_similarity(query, &e.embedding),
                metadata: e.metadata.clone(),
            })
            .filter(|m| m.score >= score_threshold)
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.entries.write().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[tokio::test]
    async fn search_ranks_closest_first() {
        let store = InMemoryVectorStore::new();
        store.upsert("a", vec![1.0, 0.0], "a".into(), HashMap::new()).await.unwrap();
        store.upsert("b", vec![0.0, 1.0], "b".into(), HashMap::new()).await.unwrap();
        store.upsert("c", vec![0.9, 0.1], "c".into(), HashMap::new()).await.unwrap();

        let results = store.search(&vec![1.0, 0.0], 2, 0.0).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[1].id, "c");
    }

    #[tokio::test]
    async fn search_respects_score_threshold() {
        let store = InMemoryVectorStore::new();
        store.upsert("a", vec![1.0, 0.0], "a".into(), HashMap::new()).await.unwrap();
        store.upsert("b", vec![0.0, 1.0], "b".into(), HashMap::new()).await.unwrap();

        let results = store.search(&vec![1.0, 0.0], 5, 0.5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
    }

    #[tokio::test]
    async fn upsert_stores_metadata() {
        let store = InMemoryVectorStore::new();
        let mut metadata = HashMap::new();
        metadata.insert("summary".to_string(), Value::String("ships Tuesday".into()));
        store.upsert("a", vec![1.0, 0.0], "a".into(), metadata.clone()).await.unwrap();

        let results = store.search(&vec![1.0, 0.0], 1, 0.0).await.unwrap();
        assert_eq!(results[0].metadata, metadata);
    }

    #[tokio::test]
    async fn remove_drops_entry() {
        let store = InMemoryVectorStore::new();
        store.upsert("a", vec![1.0, 0.0], "a".into(), HashMap::new()).await.unwrap();
        store.remove("a").await.unwrap();
        let results = store.search(&vec![1.0, 0.0], 5, 0.0).await.unwrap();
        assert!(results.is_empty());
    }
}
