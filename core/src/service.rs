//! Replay service boundary: generate, fetch and locate replays.
//!
//! `ReplayService::initialize` is the single construction point. It
//! validates configuration and wires every collaborator explicitly;
//! there is no fallback wiring if something is missing.

use crate::{
    advisor::{MemoryAdvisor, SimilarityAdvisor},
    cache::{MemoryCache, ResponseCache},
    config::GameConfig,
    error::{ServiceError, ServiceResult, SimError, SimResult},
    gate::FallbackGate,
    reasoning::{DisabledReasoner, ReasoningClient, Summarizer, TemplateSummarizer},
    recorder::{ReplayContext, ReplayRecorder},
    replay::{self, HighlightEvent, NonDeterminismNote, ReplayData, VerificationReport},
    scheduler::TickScheduler,
    scorer::UtilityScorer,
    session::MatchSession,
    simulation::{ActionCosts, MapConfig, MatchSimulation, Outcome},
    store::ReplayStore,
    types::{ReplayId, Tick},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// External collaborators the service depends on.
pub struct Collaborators {
    pub reasoner:   Arc<dyn ReasoningClient>,
    pub advisor:    Arc<dyn SimilarityAdvisor>,
    pub summarizer: Arc<dyn Summarizer>,
    pub cache:      Arc<dyn ResponseCache>,
    pub store:      Arc<dyn ReplayStore>,
}

impl Collaborators {
    /// Fully local wiring: no reasoning backend, in-process similarity
    /// index and cache, template summaries.
    pub fn offline(store: Arc<dyn ReplayStore>) -> Self {
        Self {
            reasoner:   Arc::new(DisabledReasoner),
            advisor:    Arc::new(MemoryAdvisor::new()),
            summarizer: Arc::new(TemplateSummarizer),
            cache:      Arc::new(MemoryCache::new()),
            store,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeOverride {
    #[serde(default)]
    pub max_ticks:        Option<Tick>,
    #[serde(default)]
    pub max_duration_sec: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub seed:         Option<u64>,
    #[serde(default)]
    pub map_config:   Option<serde_json::Value>,
    #[serde(default)]
    pub commander_id: Option<String>,
    #[serde(default)]
    pub runtime:      Option<RuntimeOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMeta {
    pub engine_commit:   String,
    pub partial:         bool,
    pub content_hash:    String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_determinism: Option<NonDeterminismNote>,
}

/// What clients receive for a generated replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplayEnvelope {
    pub replay_id:     ReplayId,
    pub url:           Option<String>,
    pub summary:       String,
    pub ai_highlights: Vec<HighlightEvent>,
    pub meta:          EnvelopeMeta,
    pub final_outcome: Outcome,
    pub duration_sec:  f64,
}

impl From<&ReplayData> for ReplayEnvelope {
    fn from(replay: &ReplayData) -> Self {
        let m = &replay.metadata;
        Self {
            replay_id:     m.replay_id.clone(),
            url:           m.artifact_locator.clone(),
            summary:       m.summary.clone(),
            ai_highlights: m.highlights.clone(),
            meta: EnvelopeMeta {
                engine_commit:   replay.generation.engine_build.clone(),
                partial:         m.partial,
                content_hash:    replay.generation.content_hash.clone(),
                non_determinism: replay.generation.non_determinism.clone(),
            },
            final_outcome: m.final_outcome,
            duration_sec:  m.duration_sec,
        }
    }
}

fn generation(reason: impl Into<String>) -> ServiceError {
    ServiceError::Generation { reason: reason.into() }
}

pub struct ReplayService {
    config:     GameConfig,
    gate:       Arc<FallbackGate>,
    advisor:    Arc<dyn SimilarityAdvisor>,
    summarizer: Arc<dyn Summarizer>,
    store:      Arc<dyn ReplayStore>,
}

impl ReplayService {
    pub fn initialize(config: GameConfig, collaborators: Collaborators) -> SimResult<Self> {
        config
            .validate()
            .map_err(|e| SimError::Initialization { reason: e.to_string() })?;
        if config.service.opponent_id.trim().is_empty() {
            return Err(SimError::Initialization { reason: "service.opponent_id is empty".into() });
        }

        let gate = FallbackGate::new(
            UtilityScorer::new(config.scorer.clone()),
            config.gate.clone(),
            collaborators.reasoner,
            Arc::clone(&collaborators.advisor),
            collaborators.cache,
        );
        log::info!(
            "replay service ready: tick {}ms, margin {:.2}, highlight cap {}",
            config.scheduler.tick_interval_ms,
            config.gate.uncertainty_margin_ratio,
            config.recorder.highlight_cap
        );
        Ok(Self {
            config,
            gate: Arc::new(gate),
            advisor: collaborators.advisor,
            summarizer: collaborators.summarizer,
            store: collaborators.store,
        })
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    fn artifact_url(&self, replay_id: &str) -> String {
        format!("{}/{replay_id}.json", self.config.service.artifact_base_url.trim_end_matches('/'))
    }

    /// Run a headless match to completion and store its replay.
    pub async fn generate(&self, request: GenerateRequest) -> ServiceResult<ReplayEnvelope> {
        let seed = request.seed.ok_or_else(|| generation("seed is required"))?;
        let commander_id = request
            .commander_id
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| generation("commanderId is required"))?;
        let map: MapConfig = match request.map_config {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| generation(format!("invalid mapConfig: {e}")))?,
            None => MapConfig::default(),
        };

        let mut recorder_config = self.config.recorder.clone();
        if let Some(runtime) = &request.runtime {
            if let Some(max_ticks) = runtime.max_ticks {
                recorder_config.max_ticks = max_ticks;
            }
            if let Some(max_duration_sec) = runtime.max_duration_sec {
                recorder_config.max_duration_sec = max_duration_sec;
            }
        }
        if recorder_config.max_ticks == 0 || !(recorder_config.max_duration_sec > 0.0) {
            return Err(generation("runtime limits must be positive"));
        }

        let agents = [commander_id.clone(), self.config.service.opponent_id.clone()];
        let sim = MatchSimulation::start(
            seed,
            map.clone(),
            agents.clone(),
            self.config.simulation.clone(),
            ActionCosts::from(&self.config.scorer),
        )
        .map_err(|e| generation(e.to_string()))?;

        let context = ReplayContext {
            replay_id:    replay::new_replay_id(),
            seed,
            map_config:   map,
            commander_id: commander_id.clone(),
            participants: agents.to_vec(),
            start_time:   chrono::Utc::now(),
        };
        log::info!("generating replay {} (seed {seed}, commander {commander_id})", context.replay_id);
        let interval = self.config.scheduler.tick_interval_ms;
        let recorder = ReplayRecorder::new(context, recorder_config, interval);
        let session = MatchSession::new(sim, Arc::clone(&self.gate), recorder)
            .map_err(|e| generation(e.to_string()))?;
        let mut scheduler = TickScheduler::new(&self.config.scheduler, session)
            .map_err(|e| generation(e.to_string()))?;

        // Headless: feed exactly one tick of time per iteration.
        while !scheduler.is_stopped() {
            scheduler
                .handler_mut()
                .prepare_decisions()
                .await
                .map_err(|e| generation(e.to_string()))?;
            let report = scheduler.advance(interval as f64);
            if report.tick_failures > 0 {
                return Err(generation(format!("simulation failed at tick {}", scheduler.clock().ticks())));
            }
        }

        let session = scheduler.into_handler();
        let final_state = session.snapshot_for(&commander_id).ok();
        let mut replay = session
            .finish(self.summarizer.as_ref())
            .await
            .map_err(|e| generation(e.to_string()))?;

        self.store.put(&replay)?;
        let url = self.artifact_url(&replay.metadata.replay_id);
        self.store.set_locator(&replay.metadata.replay_id, &url)?;
        replay.metadata.artifact_locator = Some(url);

        if let Some(state) = final_state {
            let metadata = serde_json::json!({
                "replay_id": replay.metadata.replay_id,
                "outcome":   replay.metadata.final_outcome,
            });
            if let Err(e) = self.advisor.index(&state, metadata).await {
                log::debug!("similarity indexing skipped: {e}");
            }
        }

        if replay.metadata.partial {
            log::warn!(
                "replay {} is partial: {}",
                replay.metadata.replay_id,
                replay
                    .generation
                    .non_determinism
                    .as_ref()
                    .map(|n| n.reason.as_str())
                    .or(replay.generation.truncation.as_deref())
                    .unwrap_or("truncated")
            );
        }
        Ok(ReplayEnvelope::from(&replay))
    }

    pub fn get(&self, replay_id: &str) -> ServiceResult<ReplayData> {
        self.store
            .get(replay_id)?
            .ok_or_else(|| ServiceError::NotFound { replay_id: replay_id.to_string() })
    }

    pub fn download_url(&self, replay_id: &str) -> ServiceResult<String> {
        match self.store.locator(replay_id)? {
            Some(Some(url)) => Ok(url),
            Some(None) => Ok(self.artifact_url(replay_id)),
            None => Err(ServiceError::NotFound { replay_id: replay_id.to_string() }),
        }
    }

    /// Re-simulate a stored replay and report any divergence.
    pub fn verify(&self, replay_id: &str) -> ServiceResult<VerificationReport> {
        let data = self.get(replay_id)?;
        Ok(replay::verify(&data, &self.config)?)
    }
}
