//! A small from-scratch k-means, fixed-seed so semantic-cluster
//! consensus is reproducible across runs. No clustering crate in this
//! workspace's dependency stack covers this, and the input sizes here
//! (one embedding per agent reply) are small enough that a hand-rolled
//! Lloyd's-algorithm pass is the right amount of machinery.

use async_trait::async_trait;
use choir_domain::capability::{Clusterer, Embedding};
use choir_domain::error::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

const SEED: u64 = 42;
const MAX_ITERS: usize = 50;
const RESTARTS: usize = 5;

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

fn centroid(points: &[&Embedding]) -> Embedding {
    let dims = points[0].len();
    let mut sum = vec![0.0f32; dims];
    for p in points {
        for (i, v) in p.iter().enumerate() {
            sum[i] += v;
        }
    }
    let n = points.len() as f32;
    sum.iter().map(|v| v / n).collect()
}

fn lloyd_pass(embeddings: &[Embedding], k: usize, rng: &mut StdRng) -> (Vec<usize>, f32) {
    let mut indices: Vec<usize> = (0..embeddings.len()).collect();
    indices.shuffle(rng);
    let mut centroids: Vec<Embedding> = indices[..k].iter().map(|&i| embeddings[i].clone()).collect();

    let mut assignments = vec![0usize; embeddings.len()];
    for _ in 0..MAX_ITERS {
        let mut changed = false;
        for (i, point) in embeddings.iter().enumerate() {
            let (best, _) = centroids
                .iter()
                .enumerate()
                .map(|(c, centroid)| (c, squared_distance(point, centroid)))
                .fold((0usize, f32::MAX), |acc, cur| if cur.1 < acc.1 { cur } else { acc });
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }

        for cluster in 0..k {
            let members: Vec<&Embedding> = embeddings.iter().zip(assignments.iter()).filter(|(_, &a)| a == cluster).map(|(e, _)| e).collect();
            if !members.is_empty() {
                centroids[cluster] = centroid(&members);
            }
        }

        if !changed {
            break;
        }
    }

    let inertia: f32 = embeddings.iter().zip(assignments.iter()).map(|(p, &c)| squared_distance(p, &centroids[c])).sum();
    (assignments, inertia)
}

/// k is derived from input size by the semantic-clustering consensus
/// algorithm's formula: `clamp(floor(n/2), 2, min(5, n))`. The formula
/// is only meaningful for `n >= 2`; single-message input is handled
/// upstream as `single_response` before clustering is ever invoked.
pub fn choose_k(n: usize) -> usize {
    if n < 2 {
        return n;
    }
    let half = n / 2;
    half.clamp(2, n.min(5))
}

pub struct KMeansClusterer;

#[async_trait]
impl Clusterer for KMeansClusterer {
    async fn cluster(&self, embeddings: &[Embedding]) -> Result<Vec<usize>> {
        if embeddings.is_empty() {
            return Err(Error::Validation("cannot cluster an empty embedding set".into()));
        }
        let k = choose_k(embeddings.len()).min(embeddings.len());
        if k >= embeddings.len() {
            return Ok((0..embeddings.len()).collect());
        }

        let mut rng = StdRng::seed_from_u64(SEED);
        let mut best: Option<(Vec<usize>, f32)> = None;
        for _ in 0..RESTARTS {
            let (assignments, inertia) = lloyd_pass(embeddings, k, &mut rng);
            if best.as_ref().map(|(_, best_inertia)| inertia < *best_inertia).unwrap_or(true) {
                best = Some((assignments, inertia));
            }
        }
        Ok(best.expect("at least one restart always runs").0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choose_k_matches_clamp_formula() {
        assert_eq!(choose_k(1), 1);
        assert_eq!(choose_k(2), 2);
        assert_eq!(choose_k(4), 2);
        assert_eq!(choose_k(6), 3);
        assert_eq!(choose_k(12), 5);
    }

    #[tokio::test]
    async fn clusters_separated_points_distinctly() {
        let clusterer = KMeansClusterer;
        let embeddings = vec![
            vec![0.0, 0.0],
            vec![0.1, 0.1],
            vec![10.0, 10.0],
            vec![10.1, 9.9],
        ];
        let assignments = clusterer.cluster(&embeddings).await.unwrap();
        assert_eq!(assignments[0], assignments[1]);
        assert_eq!(assignments[2], assignments[3]);
        assert_ne!(assignments[0], assignments[2]);
    }
}
