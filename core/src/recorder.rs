//! Replay recorder.
//!
//! Appends the action log and state deltas as the match runs, tracks
//! nondeterministic spans with their resync checkpoints, and assembles
//! the final `ReplayData` once the session ends.
//!
//! RULE: entries are appended in non-decreasing tick order. An entry for
//! an earlier tick than the last one recorded is rejected.

use crate::{
    config::RecorderConfig,
    delta::DeltaTracker,
    error::{SimError, SimResult},
    reasoning::{Summarizer, SummaryRequest},
    replay::{
        content_hash, describe_nondeterminism, ActionLogEntry, Checkpoint, GenerationMeta,
        HighlightEvent, NonDeterminismRecord, ReplayData, ReplayMetadata, StateDeltaEntry,
    },
    simulation::{MapConfig, MatchState, Outcome},
    snapshot::StateSnapshot,
    types::{AgentId, ReplayId, Tick, TickRange},
};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Identity of the match being recorded.
#[derive(Debug, Clone)]
pub struct ReplayContext {
    pub replay_id:    ReplayId,
    pub seed:         u64,
    pub map_config:   MapConfig,
    pub commander_id: AgentId,
    pub participants: Vec<AgentId>,
    pub start_time:   DateTime<Utc>,
}

/// How and when the recorded session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEnd {
    pub outcome:    Outcome,
    pub final_tick: Tick,
    /// A tick or duration limit stopped the match before it ended.
    pub truncated:  bool,
}

pub struct ReplayRecorder {
    context:          ReplayContext,
    config:           RecorderConfig,
    tick_interval_ms: u64,
    actions:          Vec<ActionLogEntry>,
    /// Parallel to `actions`.
    impacts:          Vec<f64>,
    deltas:           Vec<StateDeltaEntry>,
    tracker:          DeltaTracker,
    records:          Vec<NonDeterminismRecord>,
    checkpoints:      Vec<Checkpoint>,
    last_tick:        Tick,
}

impl ReplayRecorder {
    pub fn new(context: ReplayContext, config: RecorderConfig, tick_interval_ms: u64) -> Self {
        Self {
            context,
            config,
            tick_interval_ms,
            actions: Vec::new(),
            impacts: Vec::new(),
            deltas: Vec::new(),
            tracker: DeltaTracker::new(),
            records: Vec::new(),
            checkpoints: Vec::new(),
            last_tick: 0,
        }
    }

    pub fn context(&self) -> &ReplayContext {
        &self.context
    }

    pub fn actions(&self) -> &[ActionLogEntry] {
        &self.actions
    }

    pub fn deltas(&self) -> &[StateDeltaEntry] {
        &self.deltas
    }

    pub fn non_determinism_records(&self) -> &[NonDeterminismRecord] {
        &self.records
    }

    fn check_order(&self, tick: Tick) -> SimResult<()> {
        if tick < self.last_tick {
            return Err(SimError::TickMismatch { expected: self.last_tick, actual: tick });
        }
        Ok(())
    }

    /// Baseline delta at tick 0: the full starting state of every faction.
    pub fn record_initial(&mut self, snapshots: &[StateSnapshot]) -> SimResult<()> {
        self.record_state(0, snapshots)
    }

    /// Append one agent action. `impact` ranks it for highlight selection.
    pub fn record_action(&mut self, entry: ActionLogEntry, impact: f64) -> SimResult<()> {
        self.check_order(entry.tick)?;
        self.last_tick = entry.tick;
        log::trace!("tick={} {} -> {}", entry.tick, entry.actor, entry.action);
        self.actions.push(entry);
        self.impacts.push(impact);
        Ok(())
    }

    /// Diff the post-tick snapshots against the previous tick and append
    /// a delta if anything observable changed.
    pub fn record_state(&mut self, tick: Tick, snapshots: &[StateSnapshot]) -> SimResult<()> {
        self.check_order(tick)?;
        self.last_tick = tick;
        if let Some((description, delta)) = self.tracker.observe(snapshots) {
            self.deltas.push(StateDeltaEntry { tick, description, delta });
        }
        Ok(())
    }

    /// Flag `tick` as not reproducible from the seed. Consecutive ticks
    /// with the same reason extend one record.
    pub fn note_nondeterminism(&mut self, tick: Tick, reason: &str) {
        if let Some(last) = self.records.last_mut() {
            if last.reason == reason && last.ticks.contains(tick) {
                return;
            }
            if last.reason == reason && tick == last.ticks.end + 1 {
                last.ticks.end = tick;
                return;
            }
        }
        log::warn!("tick={tick} nondeterministic operation: {reason}");
        self.records.push(NonDeterminismRecord {
            reason: reason.to_string(),
            ticks:  TickRange::new(tick, tick),
        });
    }

    /// Store the authoritative state after a nondeterministic tick.
    pub fn record_checkpoint(&mut self, tick: Tick, state: MatchState) {
        match self.checkpoints.last_mut() {
            Some(last) if last.tick == tick => last.state = state,
            _ => self.checkpoints.push(Checkpoint { tick, state }),
        }
    }

    fn elapsed_sec(&self, tick: Tick) -> f64 {
        tick as f64 * self.tick_interval_ms as f64 / 1_000.0
    }

    /// True once `tick` hits the recording tick or duration limit.
    pub fn limit_reached(&self, tick: Tick) -> bool {
        tick >= self.config.max_ticks || self.elapsed_sec(tick) >= self.config.max_duration_sec
    }

    /// Highest-impact actions, earliest first on equal impact.
    pub fn highlights(&self) -> Vec<HighlightEvent> {
        let mut ranked: Vec<usize> = (0..self.actions.len()).collect();
        ranked.sort_by(|&a, &b| {
            self.impacts[b]
                .total_cmp(&self.impacts[a])
                .then(self.actions[a].tick.cmp(&self.actions[b].tick))
                .then(a.cmp(&b))
        });
        ranked
            .into_iter()
            .take(self.config.highlight_cap)
            .map(|i| {
                let a = &self.actions[i];
                HighlightEvent {
                    tick:   a.tick,
                    actor:  a.actor.clone(),
                    action: a.action,
                    reason: a.reason.clone(),
                    impact: self.impacts[i],
                }
            })
            .collect()
    }

    /// Close the recording: pick highlights, ask for a summary, hash the
    /// logs and assemble the artifact.
    pub async fn finalize(self, end: SessionEnd, summarizer: &dyn Summarizer) -> SimResult<ReplayData> {
        let highlights = self.highlights();
        let duration_sec = self.elapsed_sec(end.final_tick);
        let summary = self.summarize(&end, duration_sec, &highlights, summarizer).await;
        let hash = content_hash(&self.actions, &self.deltas)?;
        let partial = !self.records.is_empty() || end.truncated;
        let truncation = end.truncated.then(|| {
            format!(
                "recording stopped at tick {} ({:.1}s) before the match ended",
                end.final_tick, duration_sec
            )
        });

        log::info!(
            "replay {} closed at tick {}: {} actions, {} deltas, partial={partial}",
            self.context.replay_id,
            end.final_tick,
            self.actions.len(),
            self.deltas.len()
        );

        let ctx = self.context;
        Ok(ReplayData {
            metadata: ReplayMetadata {
                replay_id: ctx.replay_id,
                seed: ctx.seed,
                map_config: ctx.map_config,
                commander_id: ctx.commander_id,
                start_time: ctx.start_time,
                end_time: ctx.start_time
                    + chrono::Duration::milliseconds((duration_sec * 1_000.0).round() as i64),
                duration_sec,
                final_outcome: end.outcome,
                summary,
                highlights,
                artifact_locator: None,
                partial,
            },
            participants: ctx.participants,
            action_log: self.actions,
            state_deltas: self.deltas,
            generation: GenerationMeta {
                format_version: self.config.format_version,
                engine_build: self.config.engine_commit.clone(),
                content_hash: hash,
                non_determinism: describe_nondeterminism(&self.records),
                truncation,
            },
            non_determinism_records: self.records,
            checkpoints: self.checkpoints,
        })
    }

    async fn summarize(
        &self,
        end: &SessionEnd,
        duration_sec: f64,
        highlights: &[HighlightEvent],
        summarizer: &dyn Summarizer,
    ) -> String {
        let request = SummaryRequest {
            commander_id: self.context.commander_id.clone(),
            outcome: end.outcome.as_str().to_string(),
            duration_sec,
            highlights: highlights
                .iter()
                .map(|h| format!("tick {} {} chose {} ({})", h.tick, h.actor, h.action, h.reason))
                .collect(),
        };
        let timeout = Duration::from_millis(self.config.summary_timeout_ms);
        match tokio::time::timeout(timeout, summarizer.summarize(&request)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => text,
            Ok(Ok(_)) => {
                log::warn!("summarizer returned empty text, using static summary");
                self.config.static_summary.clone()
            }
            Ok(Err(e)) => {
                log::warn!("summarizer failed, using static summary: {e}");
                self.config.static_summary.clone()
            }
            Err(_) => {
                log::warn!("summarizer timed out, using static summary");
                self.config.static_summary.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::ActionKind;

    fn recorder() -> ReplayRecorder {
        let context = ReplayContext {
            replay_id:    "r-1".into(),
            seed:         1,
            map_config:   MapConfig::default(),
            commander_id: "A".into(),
            participants: vec!["A".into(), "B".into()],
            start_time:   Utc::now(),
        };
        ReplayRecorder::new(context, RecorderConfig::default(), 50)
    }

    fn entry(tick: Tick, action: ActionKind) -> ActionLogEntry {
        ActionLogEntry {
            tick,
            actor: "A".into(),
            action,
            payload: serde_json::Value::Null,
            reason: "test".into(),
        }
    }

    #[test]
    fn rejects_out_of_order_actions() {
        let mut r = recorder();
        r.record_action(entry(5, ActionKind::Hold), 1.0).unwrap();
        let err = r.record_action(entry(4, ActionKind::Hold), 1.0);
        assert!(matches!(err, Err(SimError::TickMismatch { expected: 5, actual: 4 })));
        assert_eq!(r.actions().len(), 1);
    }

    #[test]
    fn consecutive_nondeterminism_extends_one_record() {
        let mut r = recorder();
        for tick in 10..=14 {
            r.note_nondeterminism(tick, "tie-break");
        }
        r.note_nondeterminism(20, "tie-break");
        let records = r.non_determinism_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ticks, TickRange::new(10, 14));
        assert_eq!(records[1].ticks, TickRange::new(20, 20));
    }

    #[test]
    fn highlights_rank_by_impact_then_tick() {
        let mut r = recorder();
        r.record_action(entry(1, ActionKind::Produce), 10.0).unwrap();
        r.record_action(entry(2, ActionKind::Attack), 90.0).unwrap();
        r.record_action(entry(3, ActionKind::Defend), 90.0).unwrap();
        r.record_action(entry(4, ActionKind::Expand), 50.0).unwrap();
        let h = r.highlights();
        let ticks: Vec<Tick> = h.iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![2, 3, 4]);
    }

    #[test]
    fn limits_follow_ticks_and_simulated_time() {
        let r = recorder();
        // 300s at 50ms per tick is tick 6000, so max_ticks (2400) binds first.
        assert!(!r.limit_reached(2399));
        assert!(r.limit_reached(2400));
    }
}
