// Aggregates pairwise similarity records into a symmetric graph and reduces
// it to per-verse features. Asymmetry or a nonzero diagonal means a join or
// indexing bug upstream, so both are fatal, not warnings.

use anyhow::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Exact similarity between two documents of the same group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityRecord {
    pub a: String,
    pub b: String,
    pub score: f64,
    pub group: String,
}

/// Per-verse reduction of the similarity graph. Isolated verses carry 0/0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerseSimilarity {
    pub verse_id: String,
    pub sim_total: f64,
    pub sim_mean: f64,
}

/// Symmetric weighted graph over verses. Inserting a->b always inserts b->a
/// with the same weight; self-loops are rejected at insertion.
pub struct SimilarityGraph {
    adjacency: HashMap<String, HashMap<String, f64>>,
}

impl SimilarityGraph {
    /// Build the graph from similarity records, keeping only edges at or
    /// above `floor`. Scores below the floor are noise and contribute
    /// nothing to any aggregate.
    pub fn from_records(records: &[SimilarityRecord], floor: f64) -> Result<Self, Error> {
        let mut graph = SimilarityGraph {
            adjacency: HashMap::new(),
        };
        for record in records {
            if !(0.0..=1.0).contains(&record.score) {
                anyhow::bail!(
                    "Similarity score out of range for ({}, {}): {}",
                    record.a,
                    record.b,
                    record.score
                );
            }
            if record.a == record.b {
                anyhow::bail!("Self-pair in similarity records: {}", record.a);
            }
            if record.score < floor {
                continue;
            }
            graph.insert_edge(&record.a, &record.b, record.score)?;
        }
        graph.validate()?;
        Ok(graph)
    }

    fn insert_edge(&mut self, a: &str, b: &str, score: f64) -> Result<(), Error> {
        for (from, to) in [(a, b), (b, a)] {
            let prior = self
                .adjacency
                .entry(from.to_string())
                .or_default()
                .insert(to.to_string(), score);
            if prior.is_some() {
                anyhow::bail!("Duplicate unordered pair in similarity records: ({}, {})", a, b);
            }
        }
        Ok(())
    }

    /// Symmetry and zero-diagonal invariants, checked after construction.
    pub fn validate(&self) -> Result<(), Error> {
        for (from, neighbors) in &self.adjacency {
            for (to, weight) in neighbors {
                if from == to {
                    anyhow::bail!("Self-loop on {}", from);
                }
                match self.weight(to, from) {
                    Some(back) if back == *weight => {}
                    Some(back) => anyhow::bail!(
                        "Asymmetric edge ({}, {}): {} vs {}",
                        from,
                        to,
                        weight,
                        back
                    ),
                    None => anyhow::bail!("Missing reverse edge for ({}, {})", from, to),
                }
            }
        }
        Ok(())
    }

    pub fn weight(&self, a: &str, b: &str) -> Option<f64> {
        self.adjacency.get(a).and_then(|n| n.get(b)).copied()
    }

    pub fn degree(&self, verse_id: &str) -> usize {
        self.adjacency.get(verse_id).map_or(0, |n| n.len())
    }

    /// sim_total / sim_mean for every verse in `verse_ids`, in input order.
    /// Verses with no qualifying edges get 0/0.
    pub fn summaries(&self, verse_ids: &[String]) -> Vec<VerseSimilarity> {
        verse_ids
            .iter()
            .map(|verse_id| {
                let (sim_total, sim_mean) = match self.adjacency.get(verse_id) {
                    Some(neighbors) if !neighbors.is_empty() => {
                        let total: f64 = neighbors.values().sum();
                        (total, total / neighbors.len() as f64)
                    }
                    _ => (0.0, 0.0),
                };
                VerseSimilarity {
                    verse_id: verse_id.clone(),
                    sim_total,
                    sim_mean,
                }
            })
            .collect()
    }
}
