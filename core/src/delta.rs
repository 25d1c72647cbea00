//! Incremental state-delta tracking.
//!
//! Each observation is diffed against the previous tick's snapshots only.
//! Changed fields carry their new value, so replaying a delta log is a
//! plain overwrite and two deltas compare bit-for-bit with `==`.

use crate::{
    snapshot::{EnemyView, Position, Resources, StateSnapshot, UnitView},
    types::{AgentId, UnitId},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitChange {
    pub id: UnitId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactionDelta {
    pub agent_id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spawned: Vec<UnitView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<UnitId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<UnitChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_enemies: Option<Vec<EnemyView>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_control: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_strength: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enemy_strength: Option<f64>,
}

impl FactionDelta {
    fn empty(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            resources: None,
            spawned: Vec::new(),
            removed: Vec::new(),
            changed: Vec::new(),
            visible_enemies: None,
            map_control: None,
            player_strength: None,
            enemy_strength: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.resources.is_none()
            && self.spawned.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && self.visible_enemies.is_none()
            && self.map_control.is_none()
            && self.player_strength.is_none()
            && self.enemy_strength.is_none()
    }

    fn describe(&self, previous: Option<&StateSnapshot>) -> String {
        let mut parts = Vec::new();
        if let Some(r) = &self.resources {
            match previous {
                Some(p) if p.resources.ore != r.ore => {
                    parts.push(format!("ore {}->{}", p.resources.ore, r.ore));
                }
                None => parts.push(format!("ore {}", r.ore)),
                _ => {}
            }
        }
        if !self.spawned.is_empty() {
            parts.push(format!("{} spawned", self.spawned.len()));
        }
        if !self.removed.is_empty() {
            parts.push(format!("{} lost", self.removed.len()));
        }
        let moved = self.changed.iter().filter(|c| c.position.is_some()).count();
        if moved > 0 {
            parts.push(format!("{moved} moved"));
        }
        let hurt = self.changed.iter().filter(|c| c.health.is_some()).count();
        if hurt > 0 {
            parts.push(format!("{hurt} damaged"));
        }
        if let Some(mc) = self.map_control {
            parts.push(format!("map control {mc:.2}"));
        }
        if parts.is_empty() {
            parts.push("minor changes".to_string());
        }
        format!("{}: {}", self.agent_id, parts.join(", "))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StateDelta {
    pub factions: Vec<FactionDelta>,
}

/// Remembers the last snapshot per agent and diffs new ones against it.
#[derive(Debug, Clone, Default)]
pub struct DeltaTracker {
    previous: BTreeMap<AgentId, StateSnapshot>,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget history and adopt `snapshots` as the new baseline.
    pub fn reset(&mut self, snapshots: &[StateSnapshot]) {
        self.previous = snapshots.iter().map(|s| (s.agent_id.clone(), s.clone())).collect();
    }

    /// Diff `snapshots` against the previous observation. Returns None
    /// when nothing observable changed. The first observation of an
    /// agent reports its whole state.
    pub fn observe(&mut self, snapshots: &[StateSnapshot]) -> Option<(String, StateDelta)> {
        let mut delta = StateDelta::default();
        let mut lines = Vec::new();

        for current in snapshots {
            let previous = self.previous.get(&current.agent_id);
            let faction = diff(previous, current);
            if !faction.is_empty() {
                lines.push(faction.describe(previous));
                delta.factions.push(faction);
            }
        }
        self.reset(snapshots);

        if delta.factions.is_empty() {
            None
        } else {
            Some((lines.join("; "), delta))
        }
    }
}

fn diff(previous: Option<&StateSnapshot>, current: &StateSnapshot) -> FactionDelta {
    let mut d = FactionDelta::empty(current.agent_id.clone());
    let Some(prev) = previous else {
        d.resources = Some(current.resources);
        d.spawned = current.units.clone();
        d.visible_enemies = Some(current.visible_enemies.clone());
        d.map_control = Some(current.map_control);
        d.player_strength = Some(current.player_strength);
        d.enemy_strength = Some(current.enemy_strength);
        return d;
    };

    if prev.resources != current.resources {
        d.resources = Some(current.resources);
    }

    let before: BTreeMap<UnitId, &UnitView> = prev.units.iter().map(|u| (u.id, u)).collect();
    let after: BTreeMap<UnitId, &UnitView> = current.units.iter().map(|u| (u.id, u)).collect();

    for (id, unit) in &after {
        match before.get(id) {
            None => d.spawned.push((*unit).clone()),
            Some(old) => {
                let change = UnitChange {
                    id: *id,
                    position: (old.position != unit.position).then_some(unit.position),
                    health: (old.health != unit.health).then_some(unit.health),
                    busy: (old.busy != unit.busy).then_some(unit.busy),
                };
                if change.position.is_some() || change.health.is_some() || change.busy.is_some() {
                    d.changed.push(change);
                }
            }
        }
    }
    d.removed = before.keys().filter(|id| !after.contains_key(id)).copied().collect();

    if prev.visible_enemies != current.visible_enemies {
        d.visible_enemies = Some(current.visible_enemies.clone());
    }
    if prev.map_control != current.map_control {
        d.map_control = Some(current.map_control);
    }
    if prev.player_strength != current.player_strength {
        d.player_strength = Some(current.player_strength);
    }
    if prev.enemy_strength != current.enemy_strength {
        d.enemy_strength = Some(current.enemy_strength);
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::UnitKind;

    fn snap(ore: u32, units: Vec<UnitView>) -> StateSnapshot {
        StateSnapshot {
            agent_id: "A".into(),
            tick: 0,
            resources: Resources { ore, energy: 0 },
            units,
            visible_enemies: vec![],
            map_control: 0.5,
            player_strength: 1.0,
            enemy_strength: 1.0,
        }
    }

    fn worker(id: u32, x: i32) -> UnitView {
        UnitView { id, kind: UnitKind::Worker, position: Position::new(x, 0), health: 40, busy: true }
    }

    #[test]
    fn first_observation_reports_everything() {
        let mut t = DeltaTracker::new();
        let (_, delta) = t.observe(&[snap(100, vec![worker(1, 0)])]).unwrap();
        assert_eq!(delta.factions[0].spawned.len(), 1);
        assert_eq!(delta.factions[0].resources.map(|r| r.ore), Some(100));
    }

    #[test]
    fn unchanged_state_yields_nothing() {
        let mut t = DeltaTracker::new();
        t.observe(&[snap(100, vec![worker(1, 0)])]);
        assert!(t.observe(&[snap(100, vec![worker(1, 0)])]).is_none());
    }

    #[test]
    fn moves_spawns_and_losses_are_tracked() {
        let mut t = DeltaTracker::new();
        t.observe(&[snap(100, vec![worker(1, 0), worker(2, 0)])]);
        let (description, delta) = t.observe(&[snap(108, vec![worker(1, 1), worker(3, 0)])]).unwrap();
        let f = &delta.factions[0];
        assert_eq!(f.removed, vec![2]);
        assert_eq!(f.spawned.len(), 1);
        assert_eq!(f.changed.len(), 1);
        assert_eq!(f.changed[0].position, Some(Position::new(1, 0)));
        assert!(description.contains("ore 100->108"), "{description}");
    }
}
