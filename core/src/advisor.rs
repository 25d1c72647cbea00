//! Similarity advisor, an optional personalization input to the gate.
//!
//! The advisor looks up historical states that resemble the current
//! one and returns the outcome metadata stored with them. It is a thin
//! retrieval collaborator: callers treat an error exactly like an
//! empty result.

use crate::{error::ExternalError, snapshot::StateSnapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarState {
    /// Opaque text blob the state was indexed under.
    pub key:        String,
    pub similarity: f32,
    pub metadata:   serde_json::Value,
}

#[async_trait]
pub trait SimilarityAdvisor: Send + Sync {
    /// Up to `k` states, most similar first.
    async fn find_similar(
        &self,
        query: &StateSnapshot,
        k: usize,
    ) -> Result<Vec<SimilarState>, ExternalError>;

    /// Remember `state` with its outcome metadata. Optional.
    async fn index(
        &self,
        _state: &StateSnapshot,
        _metadata: serde_json::Value,
    ) -> Result<(), ExternalError> {
        Ok(())
    }
}

/// Advisor used when personalization is switched off.
pub struct NoAdvisor;

#[async_trait]
impl SimilarityAdvisor for NoAdvisor {
    async fn find_similar(
        &self,
        _query: &StateSnapshot,
        _k: usize,
    ) -> Result<Vec<SimilarState>, ExternalError> {
        Ok(Vec::new())
    }
}

struct IndexedState {
    key:       String,
    embedding: Vec<f32>,
    metadata:  serde_json::Value,
}

/// In-process nearest-neighbour index over snapshot feature vectors.
#[derive(Default)]
pub struct MemoryAdvisor {
    entries: RwLock<Vec<IndexedState>>,
}

impl MemoryAdvisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Canonical text blob a state is keyed under.
    pub fn key_for(state: &StateSnapshot) -> String {
        let features: Vec<String> = state.features().iter().map(|f| format!("{f:.3}")).collect();
        format!("{}@{}:[{}]", state.agent_id, state.tick, features.join(","))
    }
}

#[async_trait]
impl SimilarityAdvisor for MemoryAdvisor {
    async fn find_similar(
        &self,
        query: &StateSnapshot,
        k: usize,
    ) -> Result<Vec<SimilarState>, ExternalError> {
        let entries = self.entries.read().map_err(|_| ExternalError::Unavailable {
            reason: "similarity index lock poisoned".into(),
        })?;
        let q = query.features();
        let mut scored: Vec<SimilarState> = entries
            .iter()
            .map(|e| SimilarState {
                key:        e.key.clone(),
                similarity: cosine(&q, &e.embedding),
                metadata:   e.metadata.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        scored.truncate(k);
        Ok(scored)
    }

    async fn index(
        &self,
        state: &StateSnapshot,
        metadata: serde_json::Value,
    ) -> Result<(), ExternalError> {
        let mut entries = self.entries.write().map_err(|_| ExternalError::Unavailable {
            reason: "similarity index lock poisoned".into(),
        })?;
        entries.push(IndexedState {
            key:       Self::key_for(state),
            embedding: state.features(),
            metadata,
        });
        Ok(())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Resources;

    fn state(ore: u32, map_control: f64) -> StateSnapshot {
        StateSnapshot {
            agent_id: "AUREN".into(),
            tick: 7,
            resources: Resources { ore, energy: 0 },
            units: vec![],
            visible_enemies: vec![],
            map_control,
            player_strength: 0.0,
            enemy_strength: 0.0,
        }
    }

    #[tokio::test]
    async fn nearest_state_comes_first() {
        let advisor = MemoryAdvisor::new();
        advisor.index(&state(900, 0.1), serde_json::json!({ "outcome": "far" })).await.unwrap();
        advisor.index(&state(500, 0.5), serde_json::json!({ "outcome": "near" })).await.unwrap();
        assert_eq!(advisor.len(), 2);

        let found = advisor.find_similar(&state(500, 0.5), 1).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata["outcome"], "near");
        assert!((found[0].similarity - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn empty_index_and_zero_vectors_are_harmless() {
        let advisor = MemoryAdvisor::new();
        assert!(advisor.find_similar(&state(0, 0.0), 3).await.unwrap().is_empty());
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert!(NoAdvisor.find_similar(&state(10, 0.2), 3).await.unwrap().is_empty());
    }
}
