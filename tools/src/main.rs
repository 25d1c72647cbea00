//! match-runner: headless replay generation and live match runner.
//!
//! Usage:
//!   match-runner generate --seed 12345 --commander AUREN --map-type "Crystalline Plains"
//!   match-runner get <replay-id>
//!   match-runner url <replay-id>
//!   match-runner verify <replay-id>
//!   match-runner play --seed 7 --commander AUREN --speed 4

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quaternion_core::{
    advisor::MemoryAdvisor,
    cache::MemoryCache,
    config::GameConfig,
    gate::FallbackGate,
    reasoning::{DisabledReasoner, TemplateSummarizer},
    recorder::{ReplayContext, ReplayRecorder},
    replay,
    scheduler::TickScheduler,
    scorer::UtilityScorer,
    service::{Collaborators, GenerateRequest, ReplayEnvelope, ReplayService, RuntimeOverride},
    session::MatchSession,
    simulation::{ActionCosts, MapConfig, MatchSimulation},
    store::{ReplayStore, SqliteReplayStore},
};
use std::{path::Path, sync::Arc, time::Instant};

#[derive(Debug, Parser)]
#[command(name = "match-runner", version)]
#[command(about = "Generate, inspect and verify deterministic match replays")]
struct Args {
    /// SQLite database holding replays
    #[arg(long, default_value = "replays.db", global = true)]
    db: String,

    /// Directory containing game_config.json
    #[arg(long, default_value = "./data", global = true)]
    data_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Args)]
struct MatchArgs {
    #[arg(long)]
    seed: u64,

    #[arg(long)]
    commander: String,

    #[arg(long, default_value = "Open Field")]
    map_type: String,

    #[arg(long, default_value_t = 40)]
    width: i32,

    #[arg(long, default_value_t = 30)]
    height: i32,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a headless match and store its replay
    Generate {
        #[command(flatten)]
        game: MatchArgs,

        /// Stop recording after this many ticks
        #[arg(long)]
        max_ticks: Option<u64>,

        /// Stop recording after this many simulated seconds
        #[arg(long)]
        max_duration_sec: Option<f64>,
    },
    /// Print a stored replay as JSON
    Get { replay_id: String },
    /// Print the artifact locator of a stored replay
    Url { replay_id: String },
    /// Re-simulate a stored replay and compare its deltas
    Verify { replay_id: String },
    /// Drive a match from the wall clock, Ctrl-C to stop early
    Play {
        #[command(flatten)]
        game: MatchArgs,

        /// Simulated time per unit of wall time
        #[arg(long, default_value_t = 1.0)]
        speed: f64,

        /// Render frame interval in milliseconds
        #[arg(long, default_value_t = 16)]
        frame_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = load_config(&args.data_dir)?;
    let store = Arc::new(SqliteReplayStore::open(&args.db)?);
    store.migrate()?;

    match args.command {
        Command::Play { game, speed, frame_ms } => play(config, store, game, speed, frame_ms).await,
        command => {
            let service = ReplayService::initialize(config, Collaborators::offline(store))?;
            run_service_command(&service, command).await
        }
    }
}

fn load_config(data_dir: &str) -> Result<GameConfig> {
    if Path::new(data_dir).join("game_config.json").exists() {
        GameConfig::load(data_dir)
    } else {
        log::warn!("no game_config.json in {data_dir}, using defaults");
        Ok(GameConfig::default())
    }
}

async fn run_service_command(service: &ReplayService, command: Command) -> Result<()> {
    match command {
        Command::Generate { game, max_ticks, max_duration_sec } => {
            let runtime = (max_ticks.is_some() || max_duration_sec.is_some())
                .then_some(RuntimeOverride { max_ticks, max_duration_sec });
            let request = GenerateRequest {
                seed: Some(game.seed),
                map_config: Some(serde_json::to_value(map_config(&game))?),
                commander_id: Some(game.commander),
                runtime,
            };
            let envelope = service.generate(request).await?;
            print_envelope(&envelope);
        }
        Command::Get { replay_id } => {
            let replay = service.get(&replay_id)?;
            println!("{}", serde_json::to_string_pretty(&replay)?);
        }
        Command::Url { replay_id } => {
            println!("{}", service.download_url(&replay_id)?);
        }
        Command::Verify { replay_id } => {
            let report = service.verify(&replay_id)?;
            println!("=== VERIFY {replay_id} ===");
            println!("  ticks replayed:  {}", report.ticks_replayed);
            println!("  skipped ticks:   {}", report.skipped_ticks);
            println!("  content hash:    {}", if report.hash_matches { "ok" } else { "MISMATCH" });
            println!("  mismatched:      {:?}", report.mismatched_ticks);
            if !report.is_exact() {
                anyhow::bail!("replay {replay_id} did not reproduce");
            }
        }
        Command::Play { .. } => anyhow::bail!("play drives the scheduler directly"),
    }
    Ok(())
}

fn map_config(game: &MatchArgs) -> MapConfig {
    MapConfig { map_type: game.map_type.clone(), width: game.width, height: game.height }
}

fn print_envelope(envelope: &ReplayEnvelope) {
    println!("=== REPLAY {} ===", envelope.replay_id);
    println!("  outcome:   {}", envelope.final_outcome.as_str());
    println!("  duration:  {:.1}s", envelope.duration_sec);
    println!("  url:       {}", envelope.url.as_deref().unwrap_or("(pending)"));
    println!("  hash:      {}", envelope.meta.content_hash);
    println!("  summary:   {}", envelope.summary);
    for h in &envelope.ai_highlights {
        println!("  * tick {:>5} {} {} ({})", h.tick, h.actor, h.action, h.reason);
    }
    if envelope.meta.partial {
        println!();
        println!("  WARNING: partial replay");
        if let Some(nd) = &envelope.meta.non_determinism {
            println!("  {}", nd.reason);
        }
    }
}

async fn play(
    config: GameConfig,
    store: Arc<SqliteReplayStore>,
    game: MatchArgs,
    speed: f64,
    frame_ms: u64,
) -> Result<()> {
    config.validate()?;
    let agents = [game.commander.clone(), config.service.opponent_id.clone()];
    let map = map_config(&game);
    let sim = MatchSimulation::start(
        game.seed,
        map.clone(),
        agents.clone(),
        config.simulation.clone(),
        ActionCosts::from(&config.scorer),
    )?;
    let gate = Arc::new(FallbackGate::new(
        UtilityScorer::new(config.scorer.clone()),
        config.gate.clone(),
        Arc::new(DisabledReasoner),
        Arc::new(MemoryAdvisor::new()),
        Arc::new(MemoryCache::new()),
    ));
    let context = ReplayContext {
        replay_id:    replay::new_replay_id(),
        seed:         game.seed,
        map_config:   map,
        commander_id: game.commander.clone(),
        participants: agents.to_vec(),
        start_time:   chrono::Utc::now(),
    };
    let recorder = ReplayRecorder::new(context, config.recorder.clone(), config.scheduler.tick_interval_ms);
    let session = MatchSession::new(sim, gate, recorder)?;
    let mut scheduler = TickScheduler::new(&config.scheduler, session)?;

    let stop = scheduler.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupted, stopping after the current tick");
            stop.stop();
        }
    });

    let mut frames = tokio::time::interval(std::time::Duration::from_millis(frame_ms.max(1)));
    let mut last = Instant::now();
    while !scheduler.is_stopped() {
        scheduler.handler_mut().prepare_decisions().await?;
        frames.tick().await;
        let now = Instant::now();
        let elapsed_ms = now.duration_since(last).as_secs_f64() * 1_000.0 * speed;
        last = now;
        let report = scheduler.advance(elapsed_ms);
        if report.tick_failures > 0 {
            anyhow::bail!("tick {} failed", scheduler.clock().ticks());
        }
    }

    let replay = scheduler
        .into_handler()
        .finish(&TemplateSummarizer)
        .await
        .context("finalizing live replay")?;
    store.put(&replay)?;
    println!("=== LIVE MATCH {} ===", replay.metadata.replay_id);
    println!("  outcome:  {}", replay.metadata.final_outcome.as_str());
    println!("  duration: {:.1}s simulated", replay.metadata.duration_sec);
    println!("  partial:  {}", replay.metadata.partial);
    println!("  summary:  {}", replay.metadata.summary);
    Ok(())
}
