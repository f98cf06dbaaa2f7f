use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::artifact::ArtifactType;
use crate::domain::customer::CustomerId;
use crate::domain::handoff::HandoffId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutboxEventId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutboxEventType {
    EmailSend,
    SlaBreachNotify,
    HandoffSummaryGenerate,
    ReplyDraftGenerate,
    RiskAssessmentGenerate,
    ResolutionSuggestionGenerate,
}

impl OutboxEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmailSend => "email.send",
            Self::SlaBreachNotify => "notify.sla_breach",
            Self::HandoffSummaryGenerate => "ai.handoff_summary.generate",
            Self::ReplyDraftGenerate => "ai.reply_draft.generate",
            Self::RiskAssessmentGenerate => "ai.risk_assessment.generate",
            Self::ResolutionSuggestionGenerate => "ai.resolution_suggestion.generate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "email.send" => Some(Self::EmailSend),
            "notify.sla_breach" => Some(Self::SlaBreachNotify),
            "ai.handoff_summary.generate" => Some(Self::HandoffSummaryGenerate),
            "ai.reply_draft.generate" => Some(Self::ReplyDraftGenerate),
            "ai.risk_assessment.generate" => Some(Self::RiskAssessmentGenerate),
            "ai.resolution_suggestion.generate" => Some(Self::ResolutionSuggestionGenerate),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Dead,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Dead)
    }
}

/// Unique per logical side effect. Colliding enqueues collapse into the
/// already-queued event instead of duplicating delivery.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    pub fn email(customer_id: &CustomerId, request_id: &str) -> Self {
        Self(format!("email:{}:{}", customer_id.0, request_id))
    }

    pub fn sla_breach(handoff_id: &HandoffId) -> Self {
        Self(format!("sla:{}", handoff_id.0))
    }

    pub fn artifact(artifact_type: ArtifactType, handoff_id: &HandoffId) -> Self {
        Self(format!("ai:{}:{}", artifact_type.short_name(), handoff_id.0))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: OutboxEventId,
    pub event_type: OutboxEventType,
    pub payload_json: String,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub idempotency_key: IdempotencyKey,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Enqueue request; id, status, and clock fields are assigned at insert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOutboxEvent {
    pub event_type: OutboxEventType,
    pub payload_json: String,
    pub idempotency_key: IdempotencyKey,
}

#[cfg(test)]
mod tests {
    use super::{IdempotencyKey, OutboxEventType, OutboxStatus};
    use crate::domain::artifact::ArtifactType;
    use crate::domain::customer::CustomerId;
    use crate::domain::handoff::HandoffId;

    #[test]
    fn event_type_round_trips_from_storage_encoding() {
        let cases = [
            OutboxEventType::EmailSend,
            OutboxEventType::SlaBreachNotify,
            OutboxEventType::HandoffSummaryGenerate,
            OutboxEventType::ReplyDraftGenerate,
            OutboxEventType::RiskAssessmentGenerate,
            OutboxEventType::ResolutionSuggestionGenerate,
        ];
        for event_type in cases {
            assert_eq!(OutboxEventType::parse(event_type.as_str()), Some(event_type));
        }
    }

    #[test]
    fn outbox_status_round_trips_from_storage_encoding() {
        let cases = [
            OutboxStatus::Pending,
            OutboxStatus::Processing,
            OutboxStatus::Sent,
            OutboxStatus::Failed,
            OutboxStatus::Dead,
        ];
        for status in cases {
            assert_eq!(OutboxStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn sent_and_dead_are_terminal() {
        assert!(OutboxStatus::Sent.is_terminal());
        assert!(OutboxStatus::Dead.is_terminal());
        assert!(!OutboxStatus::Failed.is_terminal());
        assert!(!OutboxStatus::Processing.is_terminal());
    }

    #[test]
    fn idempotency_keys_are_scoped_per_side_effect() {
        let customer = CustomerId("cus_1".to_string());
        let handoff = HandoffId("hf_1".to_string());

        assert_eq!(IdempotencyKey::email(&customer, "req-1").0, "email:cus_1:req-1");
        assert_eq!(IdempotencyKey::sla_breach(&handoff).0, "sla:hf_1");
        assert_eq!(
            IdempotencyKey::artifact(ArtifactType::ReplyDraft, &handoff).0,
            "ai:reply_draft:hf_1"
        );
    }
}
