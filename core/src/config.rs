//! Policy constants and tunables, loaded from `data/game_config.json`.
//!
//! Every section falls back to its `Default` when absent from the file,
//! so a partial document only overrides what it names.

use crate::{
    error::{SimError, SimResult},
    types::{Tick, TickRange},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Fixed simulation step. 50ms = 20 ticks per second.
    pub tick_interval_ms: u64,
    /// Upper bound on wall time consumed by a single `advance` call.
    pub max_accumulator_ms: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms:   50,
            max_accumulator_ms: 200.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScorerConfig {
    /// Below this many units, production is favoured.
    pub unit_floor: usize,
    /// Ore cost of one unit.
    pub unit_cost: u32,
    /// Own/enemy strength ratio above which aggression is favoured.
    pub attack_ratio: f64,
    /// Enemy/own strength ratio above which defense is favoured.
    pub defend_ratio: f64,
    /// Map control needed before expansion is considered.
    pub expand_map_control: f64,
    /// Ore cost of an outpost.
    pub expand_cost: u32,
    /// Ore total regarded as "abundant".
    pub abundant_resources: u32,
    /// Idle workers needed before reassignment is considered.
    pub idle_worker_floor: usize,
    /// Score of the low-priority row emitted when a rule does not fire.
    pub filler_score: f64,
    /// Score of the always-present hold row.
    pub hold_score: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            unit_floor:         10,
            unit_cost:          50,
            attack_ratio:       1.3,
            defend_ratio:       1.2,
            expand_map_control: 0.5,
            expand_cost:        150,
            abundant_resources: 300,
            idle_worker_floor:  2,
            filler_score:       1.0,
            hold_score:         5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    /// Margin below `ratio * top.score` counts as uncertain.
    pub uncertainty_margin_ratio: f64,
    /// Number of similar historical states requested for personalization.
    pub similar_k: usize,
    pub reasoning_timeout_ms: u64,
    pub similarity_timeout_ms: u64,
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// Lifetime of a cached reasoning suggestion.
    pub cache_ttl_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            uncertainty_margin_ratio: 0.05,
            similar_k:                3,
            reasoning_timeout_ms:     1_500,
            similarity_timeout_ms:    250,
            max_output_tokens:        64,
            temperature:              0.0,
            cache_ttl_secs:           600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecorderConfig {
    pub highlight_cap: usize,
    pub max_ticks: Tick,
    /// Measured in simulated seconds.
    pub max_duration_sec: f64,
    pub format_version: u32,
    pub engine_commit: String,
    /// Fallback used when the summarizer fails.
    pub static_summary: String,
    pub summary_timeout_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            highlight_cap:      3,
            max_ticks:          2_400,
            max_duration_sec:   300.0,
            format_version:     1,
            engine_commit:      env!("CARGO_PKG_VERSION").to_string(),
            static_summary:     "Match concluded. Summary unavailable.".to_string(),
            summary_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Hard match length; reaching it is a natural end decided on strength.
    pub match_length_ticks: Tick,
    /// Bases cannot be damaged before this tick.
    pub grace_ticks: Tick,
    pub starting_ore: u32,
    pub starting_workers: usize,
    pub starting_soldiers: usize,
    pub base_hp: i32,
    /// Maps larger than this on either axis refuse to start.
    pub max_map_dimension: i32,
    /// Ticks during which pathing tie-breaks use an unseeded RNG.
    pub unseeded_pathing: Option<TickRange>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            match_length_ticks: 600,
            grace_ticks:        300,
            starting_ore:       200,
            starting_workers:   5,
            starting_soldiers:  3,
            base_hp:            1_000,
            max_map_dimension:  512,
            unseeded_pathing:   None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Prefix of artifact locators handed back to clients.
    pub artifact_base_url: String,
    /// Identifier of the built-in opponent agent.
    pub opponent_id: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            artifact_base_url: "replay://artifacts".to_string(),
            opponent_id:       "OPPONENT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GameConfig {
    pub scheduler:  SchedulerConfig,
    pub scorer:     ScorerConfig,
    pub gate:       GateConfig,
    pub recorder:   RecorderConfig,
    pub simulation: SimulationConfig,
    pub service:    ServiceConfig,
}

impl GameConfig {
    /// Load from the data/ directory.
    /// In tests, use GameConfig::default().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/game_config.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: GameConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SimResult<()> {
        let fail = |reason: &str| Err(SimError::Config { reason: reason.to_string() });

        if self.scheduler.tick_interval_ms == 0 {
            return fail("scheduler.tick_interval_ms must be positive");
        }
        if !(self.scheduler.max_accumulator_ms >= self.scheduler.tick_interval_ms as f64) {
            return fail("scheduler.max_accumulator_ms must cover at least one tick");
        }
        let ratio = self.gate.uncertainty_margin_ratio;
        if !(0.0..1.0).contains(&ratio) {
            return fail("gate.uncertainty_margin_ratio must lie in [0, 1)");
        }
        if self.recorder.highlight_cap == 0 {
            return fail("recorder.highlight_cap must be positive");
        }
        if self.recorder.max_ticks == 0 || !(self.recorder.max_duration_sec > 0.0) {
            return fail("recorder limits must be positive");
        }
        if self.simulation.match_length_ticks == 0 {
            return fail("simulation.match_length_ticks must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(GameConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let json = r#"{ "gate": { "similar_k": 5 }, "recorder": { "highlight_cap": 4 } }"#;
        let config: GameConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.gate.similar_k, 5);
        assert_eq!(config.gate.uncertainty_margin_ratio, 0.05);
        assert_eq!(config.recorder.highlight_cap, 4);
        assert_eq!(config.scheduler.tick_interval_ms, 50);
    }

    #[test]
    fn rejects_accumulator_below_one_tick() {
        let mut config = GameConfig::default();
        config.scheduler.max_accumulator_ms = 10.0;
        assert!(matches!(config.validate(), Err(SimError::Config { .. })));
    }

    #[test]
    fn rejects_margin_ratio_of_one() {
        let mut config = GameConfig::default();
        config.gate.uncertainty_margin_ratio = 1.0;
        assert!(config.validate().is_err());
    }
}
