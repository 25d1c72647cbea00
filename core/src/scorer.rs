//! Utility decision scorer.
//!
//! Pure function of a snapshot: no I/O, no clock, no RNG. Each action
//! kind is scored by its own threshold rule; a kind whose rule does not
//! fire still gets a low-priority filler row, so every kind is always
//! represented. The list is sorted by score, highest first, with ties
//! kept in rule order.

use crate::{
    config::ScorerConfig,
    error::ValidationError,
    snapshot::{StateSnapshot, UnitKind},
};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Produce,
    Attack,
    Defend,
    Expand,
    Reassign,
    Hold,
}

impl ActionKind {
    /// Rule evaluation order; also the tie-break order.
    pub const ALL: [ActionKind; 6] = [
        ActionKind::Produce,
        ActionKind::Attack,
        ActionKind::Defend,
        ActionKind::Expand,
        ActionKind::Reassign,
        ActionKind::Hold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Produce  => "produce",
            Self::Attack   => "attack",
            Self::Defend   => "defend",
            Self::Expand   => "expand",
            Self::Reassign => "reassign",
            Self::Hold     => "hold",
        }
    }

    /// Words that identify this kind in free-form text.
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Produce  => &["produce", "train", "recruit", "build units", "build army"],
            Self::Attack   => &["attack", "assault", "raid", "push", "aggression"],
            Self::Defend   => &["defend", "defense", "defence", "fortify", "protect", "hold the line"],
            Self::Expand   => &["expand", "expansion", "outpost", "claim"],
            Self::Reassign => &["reassign", "idle worker", "gather", "harvest", "mine"],
            Self::Hold     => &["hold", "wait", "do nothing", "stand by"],
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub action:    ActionKind,
    pub score:     f64,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata:  Option<serde_json::Value>,
}

impl Candidate {
    fn new(action: ActionKind, score: f64, rationale: String) -> Self {
        Self { action, score, rationale, metadata: None }
    }

    fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone)]
pub struct UtilityScorer {
    config: ScorerConfig,
}

impl UtilityScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Rank every action kind for `snapshot`, best first.
    pub fn score(&self, snapshot: &StateSnapshot) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = ActionKind::ALL
            .iter()
            .map(|kind| {
                self.rule(*kind, snapshot).unwrap_or_else(|| {
                    Candidate::new(*kind, self.config.filler_score, format!("{kind}: conditions not met"))
                })
            })
            .collect();

        // sort_by is stable: equal scores keep rule order.
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        candidates
    }

    fn rule(&self, kind: ActionKind, s: &StateSnapshot) -> Option<Candidate> {
        let c = &self.config;
        match kind {
            ActionKind::Produce => {
                let units = s.units.len();
                if units >= c.unit_floor || s.resources.ore < c.unit_cost {
                    return None;
                }
                let deficit = c.unit_floor - units;
                Some(
                    Candidate::new(
                        kind,
                        60.0 + 4.0 * deficit.min(10) as f64,
                        format!("{units} units below floor {}, {} ore available", c.unit_floor, s.resources.ore),
                    )
                    .with_metadata(serde_json::json!({ "deficit": deficit })),
                )
            }
            ActionKind::Attack => {
                if s.count_kind(UnitKind::Soldier) == 0 || s.player_strength <= 0.0 {
                    return None;
                }
                let ratio = strength_ratio(s.player_strength, s.enemy_strength, c.attack_ratio);
                if ratio < c.attack_ratio {
                    return None;
                }
                Some(
                    Candidate::new(
                        kind,
                        50.0 + 20.0 * (ratio - c.attack_ratio).min(2.0),
                        format!("own strength {ratio:.2}x enemy"),
                    )
                    .with_metadata(serde_json::json!({ "ratio": ratio })),
                )
            }
            ActionKind::Defend => {
                let inverse = strength_ratio(s.enemy_strength, s.player_strength, c.defend_ratio);
                let threat = s.visible_threat();
                let outgunned = s.enemy_strength > 0.0 && inverse >= c.defend_ratio;
                let under_pressure = threat > 0.0 && threat > s.player_strength * 0.5;
                if !outgunned && !under_pressure {
                    return None;
                }
                let mut score = 55.0 + (threat / 10.0).min(10.0);
                if outgunned {
                    score += 15.0 * (inverse - c.defend_ratio).min(2.0);
                }
                Some(Candidate::new(
                    kind,
                    score,
                    format!("enemy strength {inverse:.2}x own, visible threat {threat:.1}"),
                ))
            }
            ActionKind::Expand => {
                if s.map_control < c.expand_map_control || s.resources.ore < c.abundant_resources {
                    return None;
                }
                let surplus = (s.resources.ore - c.abundant_resources) as f64 / 50.0;
                Some(Candidate::new(
                    kind,
                    45.0 + 30.0 * (s.map_control - c.expand_map_control) + surplus.min(15.0),
                    format!("map control {:.2} with {} ore banked", s.map_control, s.resources.ore),
                ))
            }
            ActionKind::Reassign => {
                let idle = s.idle_workers();
                if idle < c.idle_worker_floor {
                    return None;
                }
                Some(Candidate::new(
                    kind,
                    40.0 + 5.0 * idle as f64,
                    format!("{idle} idle workers"),
                ))
            }
            ActionKind::Hold => Some(Candidate::new(kind, c.hold_score, "nothing pressing".to_string())),
        }
    }

    /// Legality and resource checks applied to externally suggested actions.
    pub fn check_legal(&self, kind: ActionKind, s: &StateSnapshot) -> Result<(), ValidationError> {
        let illegal = |reason: String| -> Result<(), ValidationError> {
            Err(ValidationError::Illegal { action: kind.to_string(), reason })
        };
        match kind {
            ActionKind::Produce if s.resources.ore < self.config.unit_cost => {
                illegal(format!("needs {} ore, has {}", self.config.unit_cost, s.resources.ore))
            }
            ActionKind::Expand if s.resources.ore < self.config.expand_cost => {
                illegal(format!("needs {} ore, has {}", self.config.expand_cost, s.resources.ore))
            }
            ActionKind::Attack | ActionKind::Defend if s.count_kind(UnitKind::Soldier) == 0 => {
                illegal("no soldiers available".to_string())
            }
            ActionKind::Reassign if s.idle_workers() == 0 => illegal("no idle workers".to_string()),
            _ => Ok(()),
        }
    }
}

/// `ours / theirs`, saturating when `theirs` is zero.
fn strength_ratio(ours: f64, theirs: f64, threshold: f64) -> f64 {
    if theirs <= 0.0 {
        if ours > 0.0 { threshold + 2.0 } else { 0.0 }
    } else {
        ours / theirs
    }
}
