//! Read-only per-agent view of the simulation at a tick boundary.
//!
//! Produced fresh every tick by the simulation. The scorer, the gate and
//! the recorder only ever read it.

use crate::types::{AgentId, Tick, UnitId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Resources {
    pub ore:    u32,
    pub energy: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance; units move along one axis per tick.
    pub fn distance(&self, other: &Position) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Worker,
    Soldier,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitView {
    pub id:       UnitId,
    pub kind:     UnitKind,
    pub position: Position,
    pub health:   i32,
    pub busy:     bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnemyView {
    pub id:     UnitId,
    /// Aggregate threat contributed by this enemy.
    pub threat: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateSnapshot {
    pub agent_id:       AgentId,
    pub tick:           Tick,
    pub resources:      Resources,
    pub units:          Vec<UnitView>,
    pub visible_enemies: Vec<EnemyView>,
    /// Share of the map this agent controls, in [0, 1].
    pub map_control:    f64,
    pub player_strength: f64,
    pub enemy_strength:  f64,
}

impl StateSnapshot {
    pub fn count_kind(&self, kind: UnitKind) -> usize {
        self.units.iter().filter(|u| u.kind == kind).count()
    }

    pub fn idle_workers(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.kind == UnitKind::Worker && !u.busy)
            .count()
    }

    pub fn visible_threat(&self) -> f64 {
        self.visible_enemies.iter().map(|e| e.threat).sum()
    }

    /// Compact numeric features used for similarity lookups.
    pub fn features(&self) -> Vec<f32> {
        vec![
            self.resources.ore as f32 / 1_000.0,
            self.resources.energy as f32 / 1_000.0,
            self.units.len() as f32 / 20.0,
            self.idle_workers() as f32 / 10.0,
            self.visible_enemies.len() as f32 / 20.0,
            self.map_control as f32,
            self.player_strength as f32 / 100.0,
            self.enemy_strength as f32 / 100.0,
        ]
    }
}
