use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One step in the ordered trail an orchestrator run leaves behind.
///
/// The trail stays typed through the whole pipeline and is flattened to a
/// JSON array of tag strings only at the storage edge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionTag {
    Replay,
    ToolFetchFailed,
    TicketCreated(String),
    TicketCreateFailed,
    RefundDenied,
    RefundNeedsHuman,
    RefundAutoApproved,
    VerificationPassed,
    VerificationFailed,
    VerifyIssue(String),
    RecentEscalationMemory,
    EscalateToHuman,
    HandoffCreated(String),
    HandoffFailed(String),
    EmailQueued(String),
    EmailFailed(String),
    /// Tag written by an older or newer build that this one does not know.
    /// Preserved verbatim so audit exports never lose information.
    Other(String),
}

impl ActionTag {
    pub fn encode(&self) -> String {
        match self {
            Self::Replay => "idempotency_replay".to_string(),
            Self::ToolFetchFailed => "tool_fetch_failed".to_string(),
            Self::TicketCreated(id) => format!("ticket_created:{id}"),
            Self::TicketCreateFailed => "ticket_create_failed".to_string(),
            Self::RefundDenied => "refund_denied".to_string(),
            Self::RefundNeedsHuman => "refund_needs_human".to_string(),
            Self::RefundAutoApproved => "refund_auto_approved".to_string(),
            Self::VerificationPassed => "verification_passed".to_string(),
            Self::VerificationFailed => "verification_failed".to_string(),
            Self::VerifyIssue(issue) => format!("verify_issue:{issue}"),
            Self::RecentEscalationMemory => "memory_recent_escalation_escalate".to_string(),
            Self::EscalateToHuman => "escalate_to_human".to_string(),
            Self::HandoffCreated(id) => format!("handoff_created:{id}"),
            Self::HandoffFailed(error) => format!("handoff_failed:{error}"),
            Self::EmailQueued(id) => format!("email_queued:{id}"),
            Self::EmailFailed(error) => format!("email_failed:{error}"),
            Self::Other(raw) => raw.clone(),
        }
    }

    pub fn decode(value: &str) -> Self {
        if let Some(rest) = value.strip_prefix("ticket_created:") {
            return Self::TicketCreated(rest.to_string());
        }
        if let Some(rest) = value.strip_prefix("verify_issue:") {
            return Self::VerifyIssue(rest.to_string());
        }
        if let Some(rest) = value.strip_prefix("handoff_created:") {
            return Self::HandoffCreated(rest.to_string());
        }
        if let Some(rest) = value.strip_prefix("handoff_failed:") {
            return Self::HandoffFailed(rest.to_string());
        }
        if let Some(rest) = value.strip_prefix("email_queued:") {
            return Self::EmailQueued(rest.to_string());
        }
        if let Some(rest) = value.strip_prefix("email_failed:") {
            return Self::EmailFailed(rest.to_string());
        }

        match value {
            "idempotency_replay" => Self::Replay,
            "tool_fetch_failed" => Self::ToolFetchFailed,
            "ticket_create_failed" => Self::TicketCreateFailed,
            "refund_denied" => Self::RefundDenied,
            "refund_needs_human" => Self::RefundNeedsHuman,
            "refund_auto_approved" => Self::RefundAutoApproved,
            "verification_passed" => Self::VerificationPassed,
            "verification_failed" => Self::VerificationFailed,
            "memory_recent_escalation_escalate" => Self::RecentEscalationMemory,
            "escalate_to_human" => Self::EscalateToHuman,
            other => Self::Other(other.to_string()),
        }
    }
}

impl Serialize for ActionTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for ActionTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::decode(&raw))
    }
}

/// Flattens a trail to the JSON array stored in `actions_json` columns.
pub fn encode_trail(trail: &[ActionTag]) -> Result<String, serde_json::Error> {
    serde_json::to_string(trail)
}

/// Restores a trail from an `actions_json` column.
pub fn decode_trail(raw: &str) -> Result<Vec<ActionTag>, serde_json::Error> {
    let tags: Vec<String> = serde_json::from_str(raw)?;
    Ok(tags.iter().map(|tag| ActionTag::decode(tag)).collect())
}
