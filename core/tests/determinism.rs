//! THE MOST IMPORTANT TEST IN THE PROJECT.
//!
//! Two services, same seed, same request.
//! They must produce byte-identical action logs, delta logs and hashes.
//! Any divergence is a blocker; do not merge until fixed.

use quaternion_core::{
    config::GameConfig,
    replay::ReplayData,
    service::{Collaborators, GenerateRequest, ReplayService},
    store::MemoryReplayStore,
};
use std::sync::Arc;

async fn generate(seed: u64) -> ReplayData {
    let service = ReplayService::initialize(
        GameConfig::default(),
        Collaborators::offline(Arc::new(MemoryReplayStore::new())),
    )
    .expect("service initializes");
    let request = GenerateRequest {
        seed: Some(seed),
        commander_id: Some("AUREN".into()),
        map_config: Some(serde_json::json!({ "type": "Crystalline Plains", "width": 40, "height": 30 })),
        runtime: None,
    };
    let envelope = service.generate(request).await.expect("generation succeeds");
    service.get(&envelope.replay_id).expect("stored")
}

fn lines<T: serde::Serialize>(entries: &[T]) -> Vec<String> {
    entries
        .iter()
        .map(|e| serde_json::to_string(e).expect("serializable"))
        .collect()
}

#[tokio::test]
async fn same_seed_produces_identical_logs() {
    const SEED: u64 = 0xDEAD_BEEF_CAFE_1234;

    let a = generate(SEED).await;
    let b = generate(SEED).await;

    let (log_a, log_b) = (lines(&a.action_log), lines(&b.action_log));
    assert_eq!(
        log_a.len(), log_b.len(),
        "Action log lengths differ: {} vs {}",
        log_a.len(), log_b.len()
    );
    for (i, (x, y)) in log_a.iter().zip(log_b.iter()).enumerate() {
        assert_eq!(x, y, "Action log diverged at entry {i}:\n  A: {x}\n  B: {y}");
    }

    assert_eq!(lines(&a.state_deltas), lines(&b.state_deltas), "Delta logs diverged");
    assert_eq!(a.generation.content_hash, b.generation.content_hash);
    assert_eq!(a.metadata.final_outcome, b.metadata.final_outcome);
    // Ids and wall-clock timestamps are per-run.
    assert_ne!(a.metadata.replay_id, b.metadata.replay_id);
}

#[tokio::test]
async fn different_seeds_produce_different_logs() {
    let a = generate(42).await;
    let b = generate(99).await;

    // The map layout and every RNG stream depend on the seed.
    assert_ne!(
        a.generation.content_hash, b.generation.content_hash,
        "Different seeds produced identical logs; seed is not being used"
    );
}
