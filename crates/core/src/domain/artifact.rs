use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::handoff::HandoffId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub String);

/// Operator-assist documents generated per handoff. Storage enforces one
/// artifact per `(handoff_id, type)`; regeneration overwrites in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactType {
    HandoffSummary,
    ReplyDraft,
    RiskAssessment,
    ResolutionSuggestion,
}

impl ArtifactType {
    /// Versioned storage encoding; bump the suffix when the payload shape
    /// changes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HandoffSummary => "handoff_summary.v1",
            Self::ReplyDraft => "reply_draft.v1",
            Self::RiskAssessment => "risk_assessment.v1",
            Self::ResolutionSuggestion => "resolution_suggestion.v1",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "handoff_summary.v1" => Some(Self::HandoffSummary),
            "reply_draft.v1" => Some(Self::ReplyDraft),
            "risk_assessment.v1" => Some(Self::RiskAssessment),
            "resolution_suggestion.v1" => Some(Self::ResolutionSuggestion),
            _ => None,
        }
    }

    /// Unversioned name used inside idempotency keys.
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::HandoffSummary => "handoff_summary",
            Self::ReplyDraft => "reply_draft",
            Self::RiskAssessment => "risk_assessment",
            Self::ResolutionSuggestion => "resolution_suggestion",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Ok,
    Failed,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ok" => Some(Self::Ok),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiArtifact {
    pub id: ArtifactId,
    pub handoff_id: HandoffId,
    pub artifact_type: ArtifactType,
    pub status: ArtifactStatus,
    pub input_json: String,
    pub output_json: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{ArtifactStatus, ArtifactType};

    #[test]
    fn artifact_type_round_trips_from_storage_encoding() {
        let cases = [
            ArtifactType::HandoffSummary,
            ArtifactType::ReplyDraft,
            ArtifactType::RiskAssessment,
            ArtifactType::ResolutionSuggestion,
        ];
        for artifact_type in cases {
            assert_eq!(ArtifactType::parse(artifact_type.as_str()), Some(artifact_type));
        }
    }

    #[test]
    fn artifact_status_round_trips_from_storage_encoding() {
        for status in [ArtifactStatus::Ok, ArtifactStatus::Failed] {
            assert_eq!(ArtifactStatus::parse(status.as_str()), Some(status));
        }
    }
}
