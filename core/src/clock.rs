//! Simulation clock: translates wall-clock time into fixed ticks.
//!
//! Invariants after every drain:
//!   - `accumulator_ms` lies in [0, tick_interval_ms).
//!   - `simulated_time_ms == ticks * tick_interval_ms`.

use crate::{config::SchedulerConfig, types::Tick};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationClock {
    pub simulated_time_ms:  u64,
    pub accumulator_ms:     f64,
    pub tick_interval_ms:   u64,
    pub max_accumulator_ms: f64,
    ticks:                  Tick,
}

impl SimulationClock {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            simulated_time_ms:  0,
            accumulator_ms:     0.0,
            tick_interval_ms:   config.tick_interval_ms,
            max_accumulator_ms: config.max_accumulator_ms,
            ticks:              0,
        }
    }

    pub fn ticks(&self) -> Tick {
        self.ticks
    }

    /// Fixed delta handed to the simulation, in seconds.
    pub fn tick_delta_secs(&self) -> f64 {
        self.tick_interval_ms as f64 / 1000.0
    }

    /// Most ticks a single drain may execute.
    pub fn safety_cap(&self) -> u64 {
        (self.max_accumulator_ms / self.tick_interval_ms as f64).ceil() as u64 + 1
    }

    /// Add elapsed wall time, clamped to `max_accumulator_ms`.
    /// Returns the amount discarded by the clamp.
    pub fn accumulate(&mut self, elapsed_wall_ms: f64) -> f64 {
        let elapsed = if elapsed_wall_ms.is_finite() && elapsed_wall_ms > 0.0 {
            elapsed_wall_ms
        } else {
            0.0
        };
        let kept = elapsed.min(self.max_accumulator_ms);
        self.accumulator_ms += kept;
        elapsed - kept
    }

    /// True when the accumulator holds at least one whole tick.
    pub fn has_pending_tick(&self) -> bool {
        self.accumulator_ms >= self.tick_interval_ms as f64
    }

    /// Consume one tick from the accumulator. Returns the new tick number.
    /// Panics if called without a pending tick; callers must check.
    pub fn consume_tick(&mut self) -> Tick {
        assert!(self.has_pending_tick(), "consume_tick() called without a pending tick");
        self.accumulator_ms -= self.tick_interval_ms as f64;
        self.ticks += 1;
        self.simulated_time_ms = self.ticks * self.tick_interval_ms;
        self.ticks
    }

    /// Drop whole ticks left over after the safety cap was hit.
    /// Returns how many ticks were discarded.
    pub fn discard_backlog(&mut self) -> u64 {
        let interval = self.tick_interval_ms as f64;
        let dropped = (self.accumulator_ms / interval).floor() as u64;
        self.accumulator_ms -= dropped as f64 * interval;
        dropped
    }

    /// Fraction of a tick elapsed since the last full tick, in [0, 1).
    pub fn interpolation_factor(&self) -> f64 {
        let alpha = self.accumulator_ms / self.tick_interval_ms as f64;
        alpha.clamp(0.0, 1.0 - f64::EPSILON)
    }
}
