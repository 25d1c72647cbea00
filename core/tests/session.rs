//! Live session pipeline: prepared decisions, scorer-only ticks and the
//! end of a recorded match.

use async_trait::async_trait;
use chrono::Utc;
use quaternion_core::{
    advisor::NoAdvisor,
    cache::NoCache,
    config::{GameConfig, ScorerConfig},
    error::ExternalError,
    gate::FallbackGate,
    reasoning::{ReasoningClient, ReasoningRequest, ReasoningSuggestion, TemplateSummarizer},
    recorder::{ReplayContext, ReplayRecorder},
    scheduler::TickScheduler,
    scorer::{ActionKind, UtilityScorer},
    session::MatchSession,
    simulation::{ActionCosts, MapConfig, MatchSimulation},
    types::Tick,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

const AGENTS: usize = 2;
const MAX_TICKS: Tick = 30;

/// Always recommends holding, and counts how often it was asked.
struct HoldingReasoner {
    calls: AtomicUsize,
}

impl HoldingReasoner {
    fn new() -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0) })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningClient for HoldingReasoner {
    async fn suggest(&self, _request: &ReasoningRequest) -> Result<ReasoningSuggestion, ExternalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ReasoningSuggestion { action: "hold".into(), rationale: Some("wait for the enemy".into()) })
    }
}

/// Hold ties production in the opening, so every early tick is uncertain.
fn thin_margin_config() -> GameConfig {
    let mut config = GameConfig::default();
    config.scorer = ScorerConfig { hold_score: 68.0, ..ScorerConfig::default() };
    config.recorder.max_ticks = MAX_TICKS;
    config
}

fn scheduler(config: &GameConfig, reasoner: Arc<HoldingReasoner>) -> TickScheduler<MatchSession> {
    let agents: [String; 2] = ["AUREN".into(), "OPPONENT".into()];
    let sim = MatchSimulation::start(
        777,
        MapConfig::default(),
        agents.clone(),
        config.simulation.clone(),
        ActionCosts::from(&config.scorer),
    )
    .expect("match starts");
    let gate = Arc::new(FallbackGate::new(
        UtilityScorer::new(config.scorer.clone()),
        config.gate.clone(),
        reasoner,
        Arc::new(NoAdvisor),
        Arc::new(NoCache),
    ));
    let context = ReplayContext {
        replay_id:    "session-test".into(),
        seed:         777,
        map_config:   MapConfig::default(),
        commander_id: "AUREN".into(),
        participants: agents.to_vec(),
        start_time:   Utc::now(),
    };
    let recorder = ReplayRecorder::new(context, config.recorder.clone(), config.scheduler.tick_interval_ms);
    let session = MatchSession::new(sim, gate, recorder).expect("session starts");
    TickScheduler::new(&config.scheduler, session).expect("scheduler starts")
}

/// Drive the session the way the live loop does: prepare, then a 16ms frame.
async fn run_frames(scheduler: &mut TickScheduler<MatchSession>, reasoner: &HoldingReasoner) -> usize {
    let mut max_calls_per_tick = 0;
    let mut calls_at_tick = reasoner.calls();
    let mut last_tick = scheduler.clock().ticks();
    while !scheduler.is_stopped() {
        scheduler.handler_mut().prepare_decisions().await.expect("prepare");
        max_calls_per_tick = max_calls_per_tick.max(reasoner.calls() - calls_at_tick);

        let report = scheduler.advance(16.0);
        assert_eq!(report.tick_failures, 0);
        if scheduler.clock().ticks() != last_tick {
            last_tick = scheduler.clock().ticks();
            calls_at_tick = reasoner.calls();
        }
    }
    max_calls_per_tick
}

fn source_of(tick: Tick, actor: &str, scheduler: &TickScheduler<MatchSession>) -> (ActionKind, String) {
    let entry = scheduler
        .handler()
        .recorder()
        .actions()
        .iter()
        .find(|a| a.tick == tick && a.actor == actor)
        .unwrap_or_else(|| panic!("no action for {actor} at tick {tick}"));
    (entry.action, entry.payload["source"].as_str().unwrap_or_default().to_string())
}

#[tokio::test]
async fn frames_between_ticks_consult_reasoning_once() {
    let reasoner = HoldingReasoner::new();
    let mut scheduler = scheduler(&thin_margin_config(), reasoner.clone());

    let max_calls_per_tick = run_frames(&mut scheduler, &reasoner).await;

    assert_eq!(scheduler.clock().ticks(), MAX_TICKS);
    assert!(reasoner.calls() > 0, "no uncertain tick was reached");
    assert!(max_calls_per_tick <= AGENTS, "{max_calls_per_tick} calls for one tick");
    assert!(reasoner.calls() <= AGENTS * MAX_TICKS as usize);
}

#[tokio::test]
async fn repeated_preparation_reuses_the_pending_decision() {
    let reasoner = HoldingReasoner::new();
    let mut scheduler = scheduler(&thin_margin_config(), reasoner.clone());

    for _ in 0..4 {
        scheduler.handler_mut().prepare_decisions().await.unwrap();
    }
    assert_eq!(reasoner.calls(), AGENTS);
    assert_eq!(scheduler.handler().prepared_tick("AUREN"), Some(1));

    assert_eq!(scheduler.advance(50.0).ticks_run, 1);
    assert_eq!(scheduler.handler().prepared_tick("AUREN"), None);

    scheduler.handler_mut().prepare_decisions().await.unwrap();
    scheduler.handler_mut().prepare_decisions().await.unwrap();
    assert_eq!(reasoner.calls(), 2 * AGENTS);
    assert_eq!(scheduler.handler().prepared_tick("AUREN"), Some(2));
}

#[tokio::test]
async fn prepared_fallback_decision_is_recorded_on_its_tick() {
    let reasoner = HoldingReasoner::new();
    let mut scheduler = scheduler(&thin_margin_config(), reasoner.clone());
    run_frames(&mut scheduler, &reasoner).await;

    assert_eq!(source_of(1, "AUREN", &scheduler), (ActionKind::Hold, "fallback".into()));
    let reasons: Vec<&str> = scheduler
        .handler()
        .recorder()
        .actions()
        .iter()
        .filter(|a| a.tick == 1)
        .map(|a| a.reason.as_str())
        .collect();
    assert_eq!(reasons, vec!["reasoning: wait for the enemy"; AGENTS]);

    let replay = scheduler.into_handler().finish(&TemplateSummarizer).await.unwrap();
    assert!(replay.action_log.iter().any(|a| a.payload["source"] == "fallback"));
}

#[tokio::test]
async fn ticks_without_a_prepared_decision_use_the_scorer() {
    let reasoner = HoldingReasoner::new();
    let mut scheduler = scheduler(&thin_margin_config(), reasoner.clone());

    // One prepared tick, then a frame long enough to drain two.
    scheduler.handler_mut().prepare_decisions().await.unwrap();
    assert_eq!(scheduler.advance(100.0).ticks_run, 2);

    assert_eq!(source_of(1, "AUREN", &scheduler).1, "fallback");
    assert_eq!(source_of(2, "AUREN", &scheduler).1, "scorer");
    assert_eq!(source_of(2, "OPPONENT", &scheduler).1, "scorer");
    assert_eq!(reasoner.calls(), AGENTS);
}

#[tokio::test]
async fn finished_session_prepares_nothing() {
    let reasoner = HoldingReasoner::new();
    let mut scheduler = scheduler(&thin_margin_config(), reasoner.clone());
    run_frames(&mut scheduler, &reasoner).await;
    assert!(scheduler.handler().is_finished());

    let calls = reasoner.calls();
    scheduler.handler_mut().prepare_decisions().await.unwrap();
    assert_eq!(reasoner.calls(), calls);
    assert_eq!(scheduler.handler().prepared_tick("AUREN"), None);

    let replay = scheduler.into_handler().finish(&TemplateSummarizer).await.unwrap();
    assert_eq!(replay.action_log.last().map(|a| a.tick), Some(MAX_TICKS));
    assert!(replay.generation.truncation.is_some());
}
