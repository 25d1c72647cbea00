use async_trait::async_trait;
use chrono::Utc;
use quaternion_core::{
    config::RecorderConfig,
    error::ExternalError,
    reasoning::{Summarizer, SummaryRequest, TemplateSummarizer},
    recorder::{ReplayContext, ReplayRecorder, SessionEnd},
    replay::{content_hash, ActionLogEntry},
    scorer::ActionKind,
    simulation::{MapConfig, Outcome},
    types::Tick,
};
use std::time::Duration;

struct FailingSummarizer;

#[async_trait]
impl Summarizer for FailingSummarizer {
    async fn summarize(&self, _request: &SummaryRequest) -> Result<String, ExternalError> {
        Err(ExternalError::Status { code: 500 })
    }
}

struct SlowSummarizer;

#[async_trait]
impl Summarizer for SlowSummarizer {
    async fn summarize(&self, _request: &SummaryRequest) -> Result<String, ExternalError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("too late".into())
    }
}

fn recorder(config: RecorderConfig) -> ReplayRecorder {
    let context = ReplayContext {
        replay_id:    "rec-test".into(),
        seed:         99,
        map_config:   MapConfig::default(),
        commander_id: "AUREN".into(),
        participants: vec!["AUREN".into(), "OPPONENT".into()],
        start_time:   Utc::now(),
    };
    ReplayRecorder::new(context, config, 50)
}

fn action(tick: Tick, actor: &str, action: ActionKind) -> ActionLogEntry {
    ActionLogEntry {
        tick,
        actor: actor.into(),
        action,
        payload: serde_json::json!({ "source": "scorer" }),
        reason: format!("{action} at {tick}"),
    }
}

fn filled(config: RecorderConfig) -> ReplayRecorder {
    let mut r = recorder(config);
    let entries = [
        (1, ActionKind::Produce, 68.0),
        (2, ActionKind::Reassign, 55.0),
        (3, ActionKind::Attack, 70.0),
        (4, ActionKind::Hold, 5.0),
        (5, ActionKind::Defend, 70.0),
    ];
    for (tick, kind, impact) in entries {
        r.record_action(action(tick, "AUREN", kind), impact).unwrap();
    }
    r
}

fn natural_end(final_tick: Tick) -> SessionEnd {
    SessionEnd { outcome: Outcome::Victory, final_tick, truncated: false }
}

#[tokio::test]
async fn clean_natural_end_is_not_partial() {
    let replay = filled(RecorderConfig::default())
        .finalize(natural_end(5), &TemplateSummarizer)
        .await
        .unwrap();
    assert!(!replay.metadata.partial);
    assert!(replay.generation.non_determinism.is_none());
    assert!(replay.generation.truncation.is_none());
    assert_eq!(replay.metadata.duration_sec, 0.25);
    assert_eq!(replay.metadata.final_outcome, Outcome::Victory);
}

#[tokio::test]
async fn truncation_alone_makes_the_replay_partial() {
    let end = SessionEnd { truncated: true, ..natural_end(5) };
    let replay = filled(RecorderConfig::default()).finalize(end, &TemplateSummarizer).await.unwrap();
    assert!(replay.metadata.partial);
    assert!(replay.generation.non_determinism.is_none());
    assert!(replay.generation.truncation.is_some());
}

#[tokio::test]
async fn nondeterminism_record_makes_the_replay_partial() {
    let mut r = filled(RecorderConfig::default());
    r.note_nondeterminism(3, "pathing tie-break resolved by unseeded RNG");
    r.note_nondeterminism(4, "pathing tie-break resolved by unseeded RNG");
    let replay = r.finalize(natural_end(5), &TemplateSummarizer).await.unwrap();

    assert!(replay.metadata.partial);
    assert_eq!(replay.non_determinism_records.len(), 1);
    let reason = &replay.generation.non_determinism.expect("reason present").reason;
    assert!(reason.contains("between ticks 3-4"), "{reason}");
}

#[tokio::test]
async fn highlights_are_capped_and_ranked() {
    let replay = filled(RecorderConfig::default())
        .finalize(natural_end(5), &TemplateSummarizer)
        .await
        .unwrap();
    let picked: Vec<(Tick, ActionKind)> =
        replay.metadata.highlights.iter().map(|h| (h.tick, h.action)).collect();
    // Equal impact (70) resolves to the earlier tick first.
    assert_eq!(
        picked,
        vec![(3, ActionKind::Attack), (5, ActionKind::Defend), (1, ActionKind::Produce)]
    );

    let capped = RecorderConfig { highlight_cap: 1, ..RecorderConfig::default() };
    let replay = filled(capped).finalize(natural_end(5), &TemplateSummarizer).await.unwrap();
    assert_eq!(replay.metadata.highlights.len(), 1);
}

#[tokio::test]
async fn summarizer_failure_uses_the_static_text() {
    let config = RecorderConfig::default();
    let expected = config.static_summary.clone();
    let replay = filled(config).finalize(natural_end(5), &FailingSummarizer).await.unwrap();
    assert_eq!(replay.metadata.summary, expected);
}

#[tokio::test]
async fn slow_summarizer_times_out() {
    let config = RecorderConfig { summary_timeout_ms: 20, ..RecorderConfig::default() };
    let expected = config.static_summary.clone();
    let replay = filled(config).finalize(natural_end(5), &SlowSummarizer).await.unwrap();
    assert_eq!(replay.metadata.summary, expected);
}

#[tokio::test]
async fn content_hash_covers_both_logs() {
    let replay = filled(RecorderConfig::default())
        .finalize(natural_end(5), &TemplateSummarizer)
        .await
        .unwrap();
    assert_eq!(
        replay.generation.content_hash,
        content_hash(&replay.action_log, &replay.state_deltas).unwrap()
    );
    let ticks: Vec<Tick> = replay.action_log.iter().map(|a| a.tick).collect();
    assert!(ticks.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn earlier_tick_after_later_one_is_rejected() {
    let mut r = filled(RecorderConfig::default());
    assert!(r.record_action(action(2, "OPPONENT", ActionKind::Hold), 1.0).is_err());
    // Same tick as the last entry is fine.
    assert!(r.record_action(action(5, "OPPONENT", ActionKind::Hold), 1.0).is_ok());
}

#[test]
fn duration_limit_uses_simulated_time() {
    let config = RecorderConfig { max_duration_sec: 1.0, ..RecorderConfig::default() };
    let r = recorder(config);
    // 20 ticks of 50ms is one second.
    assert!(!r.limit_reached(19));
    assert!(r.limit_reached(20));
}
