//! Reasoning fallback gate.
//!
//! FLOW (per agent, per tick):
//!   1. Score candidates.
//!   2. Margin between the top two is wide (or top <= 0, or fewer than
//!      two candidates): take the scorer's top choice. Common path.
//!   3. Otherwise ask the similarity advisor for personalization.
//!      Errors and timeouts there mean "no personalization".
//!   4. Ask the reasoning collaborator once, under a timeout, and map
//!      its free-form answer back onto a candidate.
//!   5. Any failure in 4 yields the scorer's top choice.
//!
//! RULE: `decide` never fails and never outlives its timeouts. The gate
//! keeps no state across ticks; the injected cache is the only memory.

use crate::{
    advisor::{SimilarState, SimilarityAdvisor},
    cache::ResponseCache,
    config::GateConfig,
    error::{ExternalError, ValidationError},
    reasoning::{ReasoningClient, ReasoningRequest, ReasoningSuggestion},
    scorer::{ActionKind, Candidate, UtilityScorer},
    snapshot::{StateSnapshot, UnitKind},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{sync::Arc, time::Duration};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Scorer,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub chosen_action: ActionKind,
    pub rationale:     String,
    pub source:        DecisionSource,
    /// Scorer score of the chosen action.
    pub score:         f64,
}

impl Decision {
    fn from_candidate(candidate: &Candidate, source: DecisionSource) -> Self {
        Self {
            chosen_action: candidate.action,
            rationale:     candidate.rationale.clone(),
            source,
            score:         candidate.score,
        }
    }
}

/// True when the top two candidates are too close to trust the scorer.
pub fn is_uncertain(candidates: &[Candidate], margin_ratio: f64) -> bool {
    let (Some(top), Some(second)) = (candidates.first(), candidates.get(1)) else {
        return false;
    };
    if top.score <= 0.0 {
        return false;
    }
    top.score - second.score < margin_ratio * top.score
}

/// Find the action kind named earliest in `text`, matching whole words
/// only (a trailing plural "s" is allowed). At equal positions the longer
/// keyword wins, so "hold the line" reads as defend.
pub fn match_action(text: &str) -> Option<ActionKind> {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let mut best: Option<(usize, usize, ActionKind)> = None;
    for kind in ActionKind::ALL {
        for keyword in kind.keywords() {
            let phrase: Vec<&str> = keyword.split(' ').collect();
            let Some(pos) = (0..words.len()).find(|&at| phrase_at(&words, at, &phrase)) else {
                continue;
            };
            let better = match best {
                None => true,
                Some((p, len, _)) => pos < p || (pos == p && phrase.len() > len),
            };
            if better {
                best = Some((pos, phrase.len(), kind));
            }
        }
    }
    best.map(|(_, _, kind)| kind)
}

fn phrase_at(words: &[&str], at: usize, phrase: &[&str]) -> bool {
    phrase.iter().enumerate().all(|(i, expected)| {
        words
            .get(at + i)
            .is_some_and(|w| w == expected || w.strip_suffix('s') == Some(*expected))
    })
}

pub struct FallbackGate {
    scorer:   UtilityScorer,
    config:   GateConfig,
    reasoner: Arc<dyn ReasoningClient>,
    advisor:  Arc<dyn SimilarityAdvisor>,
    cache:    Arc<dyn ResponseCache>,
}

impl FallbackGate {
    pub fn new(
        scorer: UtilityScorer,
        config: GateConfig,
        reasoner: Arc<dyn ReasoningClient>,
        advisor: Arc<dyn SimilarityAdvisor>,
        cache: Arc<dyn ResponseCache>,
    ) -> Self {
        Self { scorer, config, reasoner, advisor, cache }
    }

    pub fn scorer(&self) -> &UtilityScorer {
        &self.scorer
    }

    /// Scorer-only decision. Used inside a tick, where nothing may await.
    pub fn decide_immediate(&self, snapshot: &StateSnapshot) -> Decision {
        let candidates = self.scorer.score(snapshot);
        top_decision(&candidates)
    }

    pub async fn decide(&self, snapshot: &StateSnapshot, agent_id: &str) -> Decision {
        let tick = snapshot.tick;
        let candidates = self.scorer.score(snapshot);
        let fallback = top_decision(&candidates);

        if !is_uncertain(&candidates, self.config.uncertainty_margin_ratio) {
            return fallback;
        }
        log::debug!(
            "tick={tick} agent={agent_id} uncertain: {} {:.2} vs {} {:.2}",
            candidates[0].action, candidates[0].score, candidates[1].action, candidates[1].score
        );

        let context = self.personalize(snapshot, agent_id).await;
        let suggestion = match self.consult(snapshot, agent_id, &candidates, context).await {
            Ok(s) => s,
            Err(e) => {
                log::warn!("tick={tick} agent={agent_id} reasoning failed, using scorer: {e}");
                return fallback;
            }
        };

        match self.map_suggestion(&suggestion, &candidates, snapshot) {
            Ok(decision) => {
                log::debug!("tick={tick} agent={agent_id} fallback chose {}", decision.chosen_action);
                decision
            }
            Err(e) => {
                log::warn!("tick={tick} agent={agent_id} suggestion discarded: {e}");
                fallback
            }
        }
    }

    async fn personalize(&self, snapshot: &StateSnapshot, agent_id: &str) -> Vec<SimilarState> {
        let timeout = Duration::from_millis(self.config.similarity_timeout_ms);
        let lookup = self.advisor.find_similar(snapshot, self.config.similar_k);
        match tokio::time::timeout(timeout, lookup).await {
            Ok(Ok(similar)) => similar,
            Ok(Err(e)) => {
                log::debug!("agent={agent_id} similarity lookup failed: {e}");
                Vec::new()
            }
            Err(_) => {
                log::debug!("agent={agent_id} similarity lookup timed out");
                Vec::new()
            }
        }
    }

    async fn consult(
        &self,
        snapshot: &StateSnapshot,
        agent_id: &str,
        candidates: &[Candidate],
        context: Vec<SimilarState>,
    ) -> Result<ReasoningSuggestion, ExternalError> {
        let prompt = build_prompt(snapshot, agent_id, candidates, &context);
        let key = cache_key(&prompt);
        if let Some(action) = self.cache.get(&key) {
            return Ok(ReasoningSuggestion { action, rationale: Some("cached suggestion".into()) });
        }

        let request = ReasoningRequest {
            agent_id:          agent_id.to_string(),
            prompt,
            snapshot:          snapshot.clone(),
            context,
            max_output_tokens: self.config.max_output_tokens,
            temperature:       self.config.temperature,
        };
        let millis = self.config.reasoning_timeout_ms;
        let suggestion = tokio::time::timeout(Duration::from_millis(millis), self.reasoner.suggest(&request))
            .await
            .map_err(|_| ExternalError::Timeout { millis })??;

        if suggestion.action.trim().is_empty() {
            return Err(ExternalError::Malformed { reason: "empty action".into() });
        }
        self.cache.put(
            &key,
            suggestion.action.clone(),
            Duration::from_secs(self.config.cache_ttl_secs),
        );
        Ok(suggestion)
    }

    fn map_suggestion(
        &self,
        suggestion: &ReasoningSuggestion,
        candidates: &[Candidate],
        snapshot: &StateSnapshot,
    ) -> Result<Decision, ValidationError> {
        let matched = match_action(&suggestion.action)
            .and_then(|kind| candidates.iter().find(|c| c.action == kind));
        let Some(candidate) = matched else {
            // Reasoning answered but named nothing we know: top candidate.
            let mut decision = Decision::from_candidate(&candidates[0], DecisionSource::Fallback);
            decision.rationale = format!(
                "unrecognised suggestion '{}'; kept {}",
                suggestion.action.trim(),
                candidates[0].action
            );
            return Ok(decision);
        };
        let kind = candidate.action;
        self.scorer.check_legal(kind, snapshot)?;

        let mut decision = Decision::from_candidate(candidate, DecisionSource::Fallback);
        decision.rationale = match &suggestion.rationale {
            Some(r) if !r.trim().is_empty() => format!("reasoning: {}", r.trim()),
            _ => format!("reasoning: {}", suggestion.action.trim()),
        };
        Ok(decision)
    }
}

fn top_decision(candidates: &[Candidate]) -> Decision {
    match candidates.first() {
        Some(top) => Decision::from_candidate(top, DecisionSource::Scorer),
        None => Decision {
            chosen_action: ActionKind::Hold,
            rationale:     "no candidates".into(),
            source:        DecisionSource::Scorer,
            score:         0.0,
        },
    }
}

fn build_prompt(
    s: &StateSnapshot,
    agent_id: &str,
    candidates: &[Candidate],
    context: &[SimilarState],
) -> String {
    let mut prompt = format!(
        "You advise real-time strategy commander {agent_id}.\n\
         Resources: ore {}, energy {}.\n\
         Units: {} total, {} soldiers, {} idle workers.\n\
         Map control {:.2}. Strength {:.1} vs enemy {:.1}. Visible threat {:.1}.\n\
         Candidates:\n",
        s.resources.ore,
        s.resources.energy,
        s.units.len(),
        s.count_kind(UnitKind::Soldier),
        s.idle_workers(),
        s.map_control,
        s.player_strength,
        s.enemy_strength,
        s.visible_threat(),
    );
    for c in candidates {
        prompt.push_str(&format!("- {} ({:.1}): {}\n", c.action, c.score, c.rationale));
    }
    if !context.is_empty() {
        prompt.push_str("Similar past situations:\n");
        for similar in context {
            prompt.push_str(&format!("- {:.2}: {}\n", similar.similarity, similar.metadata));
        }
    }
    prompt.push_str("Reply with exactly one of: produce, attack, defend, expand, reassign, hold.");
    prompt
}

fn cache_key(prompt: &str) -> String {
    format!("reasoning:{:x}", Sha256::digest(prompt.as_bytes()))
}
