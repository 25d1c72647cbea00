//! Interfaces of the external text-generation collaborators.
//!
//! Vendor APIs live behind these traits. Implementations report every
//! failure as an `ExternalError`; the callers decide how to recover.

use crate::{advisor::SimilarState, error::ExternalError, snapshot::StateSnapshot, types::AgentId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub agent_id:          AgentId,
    pub prompt:            String,
    pub snapshot:          StateSnapshot,
    /// Similar historical states, empty when personalization failed.
    pub context:           Vec<SimilarState>,
    pub max_output_tokens: u32,
    pub temperature:       f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningSuggestion {
    /// Free-form recommended action, e.g. "push the attack on the east base".
    pub action:    String,
    #[serde(default)]
    pub rationale: Option<String>,
}

#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn suggest(&self, request: &ReasoningRequest) -> Result<ReasoningSuggestion, ExternalError>;
}

/// Client used when no reasoning backend is configured.
pub struct DisabledReasoner;

#[async_trait]
impl ReasoningClient for DisabledReasoner {
    async fn suggest(&self, _request: &ReasoningRequest) -> Result<ReasoningSuggestion, ExternalError> {
        Err(ExternalError::Unavailable { reason: "reasoning backend disabled".into() })
    }
}

/// Material handed to the summarizer at the end of a match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRequest {
    pub commander_id: AgentId,
    pub outcome:      String,
    pub duration_sec: f64,
    /// One line per highlight, in rank order.
    pub highlights:   Vec<String>,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String, ExternalError>;
}

/// Local summarizer that writes a plain sentence from the match facts.
pub struct TemplateSummarizer;

#[async_trait]
impl Summarizer for TemplateSummarizer {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String, ExternalError> {
        let mut text = format!(
            "Commander {} finished in {} after {:.1} seconds.",
            request.commander_id, request.outcome, request.duration_sec
        );
        if let Some(first) = request.highlights.first() {
            text.push_str(&format!(" Key moment: {first}."));
        }
        Ok(text)
    }
}
