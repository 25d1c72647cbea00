//! One recorded match: simulation, decision gate and recorder wired into
//! the scheduler's tick handler.
//!
//! FLOW (per tick N):
//!   1. `prepare_decisions()`: outside the tick, may await the gate's
//!      collaborators. Produces one decision per agent for tick N, no
//!      matter how many frames call it before the tick drains.
//!   2. `on_tick(N)`: never awaits. Applies the prepared decisions (or a
//!      scorer-only decision if none was prepared), steps the simulation,
//!      then appends actions, deltas and nondeterminism records.
//!
//! Once the session has finished, pending decisions are dropped and no
//! new ones are prepared.

use crate::{
    error::{SimError, SimResult},
    gate::{Decision, FallbackGate},
    reasoning::Summarizer,
    recorder::{ReplayRecorder, SessionEnd},
    replay::{ActionLogEntry, ReplayData},
    scheduler::{TickFlow, TickHandler},
    simulation::MatchSimulation,
    snapshot::StateSnapshot,
    types::{AgentId, Tick},
};
use std::{collections::HashMap, sync::Arc};

pub struct MatchSession {
    sim:       MatchSimulation,
    gate:      Arc<FallbackGate>,
    recorder:  ReplayRecorder,
    agents:    Vec<AgentId>,
    commander: AgentId,
    pending:   HashMap<AgentId, (Tick, Decision)>,
    finished:  Option<SessionEnd>,
}

impl MatchSession {
    /// Wrap a freshly started simulation. Records the tick-0 baseline.
    pub fn new(sim: MatchSimulation, gate: Arc<FallbackGate>, mut recorder: ReplayRecorder) -> SimResult<Self> {
        let agents = sim.agents();
        let commander = recorder.context().commander_id.clone();
        if !agents.contains(&commander) {
            return Err(SimError::UnknownAgent { agent: commander });
        }
        let snapshots = agents
            .iter()
            .map(|a| sim.snapshot_for(a))
            .collect::<SimResult<Vec<_>>>()?;
        recorder.record_initial(&snapshots)?;
        Ok(Self {
            sim,
            gate,
            recorder,
            agents,
            commander,
            pending: HashMap::new(),
            finished: None,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    pub fn simulation(&self) -> &MatchSimulation {
        &self.sim
    }

    pub fn recorder(&self) -> &ReplayRecorder {
        &self.recorder
    }

    pub fn snapshot_for(&self, agent: &str) -> SimResult<StateSnapshot> {
        self.sim.snapshot_for(agent)
    }

    /// Run the gate for every agent against the current state, for use
    /// by the next tick. Agents that already hold a decision for that tick
    /// are skipped, so frames between two ticks consult the gate once.
    pub async fn prepare_decisions(&mut self) -> SimResult<()> {
        if self.is_finished() {
            log::debug!("tick={} session ended, no decisions prepared", self.sim.tick());
            return Ok(());
        }
        let tick = self.sim.tick() + 1;
        let gate = Arc::clone(&self.gate);
        for agent in self.agents.clone() {
            if self.prepared_tick(&agent) == Some(tick) {
                continue;
            }
            let snapshot = self.sim.snapshot_for(&agent)?;
            let decision = gate.decide(&snapshot, &agent).await;
            self.pending.insert(agent, (tick, decision));
        }
        Ok(())
    }

    /// Tick the pending decision for `agent` was prepared for, if any.
    pub fn prepared_tick(&self, agent: &str) -> Option<Tick> {
        self.pending.get(agent).map(|(tick, _)| *tick)
    }

    fn decision_for(&mut self, agent: &str, tick: Tick, snapshot: &StateSnapshot) -> Decision {
        match self.pending.remove(agent) {
            Some((prepared, decision)) if prepared == tick => decision,
            _ => self.gate.decide_immediate(snapshot),
        }
    }

    /// Close the recording. A session stopped before its natural end or
    /// a recording limit counts as truncated.
    pub async fn finish(self, summarizer: &dyn Summarizer) -> SimResult<ReplayData> {
        let end = match self.finished {
            Some(end) => end,
            None => SessionEnd {
                outcome:    self.sim.outcome_for(&self.commander)?,
                final_tick: self.sim.tick(),
                truncated:  true,
            },
        };
        self.recorder.finalize(end, summarizer).await
    }
}

impl TickHandler for MatchSession {
    fn on_tick(&mut self, tick: Tick, _dt_secs: f64) -> SimResult<TickFlow> {
        if self.is_finished() {
            return Ok(TickFlow::Stop);
        }
        let expected = self.sim.tick() + 1;
        if tick != expected {
            return Err(SimError::TickMismatch { expected, actual: tick });
        }

        // Every agent decides on the same pre-tick state.
        let snapshots = self
            .agents
            .iter()
            .map(|a| self.sim.snapshot_for(a))
            .collect::<SimResult<Vec<_>>>()?;

        let agents = self.agents.clone();
        for (agent, snapshot) in agents.iter().zip(&snapshots) {
            let decision = self.decision_for(agent, tick, snapshot);
            let effect = self.sim.apply(agent, decision.chosen_action)?;
            let entry = ActionLogEntry {
                tick,
                actor: agent.clone(),
                action: decision.chosen_action,
                payload: serde_json::json!({
                    "source": decision.source,
                    "score":  decision.score,
                    "effect": effect,
                }),
                reason: decision.rationale.clone(),
            };
            self.recorder.record_action(entry, decision.score)?;
        }

        let report = self.sim.step(tick)?;
        if !report.nondeterminism.is_empty() {
            for reason in &report.nondeterminism {
                self.recorder.note_nondeterminism(tick, reason);
            }
            self.recorder.record_checkpoint(tick, self.sim.state().clone());
        }

        let after = self
            .agents
            .iter()
            .map(|a| self.sim.snapshot_for(a))
            .collect::<SimResult<Vec<_>>>()?;
        self.recorder.record_state(tick, &after)?;

        let end = if report.ended.is_some() {
            Some(SessionEnd { outcome: self.sim.outcome_for(&self.commander)?, final_tick: tick, truncated: false })
        } else if self.recorder.limit_reached(tick) {
            log::info!("tick={tick} recording limit reached before the match ended");
            Some(SessionEnd { outcome: self.sim.outcome_for(&self.commander)?, final_tick: tick, truncated: true })
        } else {
            None
        };

        match end {
            Some(end) => {
                self.finished = Some(end);
                self.pending.clear();
                Ok(TickFlow::Stop)
            }
            None => Ok(TickFlow::Continue),
        }
    }

    fn on_render(&self, alpha: f64) -> SimResult<()> {
        log::trace!("render tick={} alpha={alpha:.3}", self.sim.tick());
        Ok(())
    }
}
