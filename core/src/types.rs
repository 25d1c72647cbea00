//! Shared primitive types used across the entire engine.

/// A simulation tick. One tick = `tick_interval_ms` of simulated time.
pub type Tick = u64;

/// Identifier of a decision-making agent (a commander or the opponent AI).
pub type AgentId = String;

/// Stable identifier of a unit inside one match.
pub type UnitId = u32;

/// Opaque, globally unique replay identifier.
pub type ReplayId = String;

/// Inclusive tick range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TickRange {
    pub start: Tick,
    pub end:   Tick,
}

impl TickRange {
    pub fn new(start: Tick, end: Tick) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, tick: Tick) -> bool {
        (self.start..=self.end).contains(&tick)
    }
}
