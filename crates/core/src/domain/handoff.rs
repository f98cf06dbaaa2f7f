use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::action::ActionTag;
use crate::domain::customer::CustomerId;
use crate::domain::interaction::Mode;
use crate::domain::ticket::TicketId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandoffId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    Pending,
    Claimed,
    Resolved,
}

impl HandoffStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "claimed" => Some(Self::Claimed),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    /// Legal transitions: pending -> claimed -> resolved. No skips, no
    /// reopening.
    pub fn can_transition_to(&self, next: HandoffStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, HandoffStatus::Claimed) | (Self::Claimed, HandoffStatus::Resolved)
        )
    }

    /// Fallible form of [`Self::can_transition_to`] carrying both ends of
    /// the rejected transition.
    pub fn ensure_transition(self, next: HandoffStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::InvalidHandoffTransition { from: self, to: next })
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffPriority {
    Low,
    Medium,
    High,
}

impl HandoffPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Why the pipeline escalated. When several causes apply at once, the
/// highest-signal one wins in this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffReason {
    VerificationFailed,
    RecentEscalation,
    LowConfidence,
    PolicyRequiresHuman,
}

impl HandoffReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VerificationFailed => "verification_failed",
            Self::RecentEscalation => "recent_escalation",
            Self::LowConfidence => "low_confidence",
            Self::PolicyRequiresHuman => "policy_requires_human",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "verification_failed" => Some(Self::VerificationFailed),
            "recent_escalation" => Some(Self::RecentEscalation),
            "low_confidence" => Some(Self::LowConfidence),
            "policy_requires_human" => Some(Self::PolicyRequiresHuman),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Handoff {
    pub id: HandoffId,
    pub customer_id: CustomerId,
    pub ticket_id: Option<TicketId>,
    pub reason: HandoffReason,
    pub priority: HandoffPriority,
    pub mode: Mode,
    pub confidence: Option<f64>,
    pub status: HandoffStatus,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    pub issues: Vec<String>,
    pub actions: Vec<ActionTag>,
    pub sla_due_at: DateTime<Utc>,
    pub sla_breached_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Handoff {
    pub fn is_breached(&self) -> bool {
        self.sla_breached_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::{HandoffPriority, HandoffReason, HandoffStatus};
    use crate::errors::DomainError;

    #[test]
    fn handoff_status_round_trips_from_storage_encoding() {
        for status in [HandoffStatus::Pending, HandoffStatus::Claimed, HandoffStatus::Resolved] {
            assert_eq!(HandoffStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn handoff_reason_round_trips_from_storage_encoding() {
        let cases = [
            HandoffReason::VerificationFailed,
            HandoffReason::RecentEscalation,
            HandoffReason::LowConfidence,
            HandoffReason::PolicyRequiresHuman,
        ];
        for reason in cases {
            assert_eq!(HandoffReason::parse(reason.as_str()), Some(reason));
        }
    }

    #[test]
    fn only_forward_transitions_are_legal() {
        assert!(HandoffStatus::Pending.can_transition_to(HandoffStatus::Claimed));
        assert!(HandoffStatus::Claimed.can_transition_to(HandoffStatus::Resolved));

        assert!(!HandoffStatus::Pending.can_transition_to(HandoffStatus::Resolved));
        assert!(!HandoffStatus::Claimed.can_transition_to(HandoffStatus::Pending));
        assert!(!HandoffStatus::Resolved.can_transition_to(HandoffStatus::Claimed));
        assert!(!HandoffStatus::Resolved.can_transition_to(HandoffStatus::Pending));
    }

    #[test]
    fn rejected_transition_reports_both_ends() {
        assert!(HandoffStatus::Claimed.ensure_transition(HandoffStatus::Resolved).is_ok());

        let error = HandoffStatus::Pending
            .ensure_transition(HandoffStatus::Resolved)
            .expect_err("skip over claimed must be rejected");
        assert_eq!(
            error,
            DomainError::InvalidHandoffTransition {
                from: HandoffStatus::Pending,
                to: HandoffStatus::Resolved,
            }
        );
    }

    #[test]
    fn priority_ordering_puts_high_last() {
        assert!(HandoffPriority::Low < HandoffPriority::Medium);
        assert!(HandoffPriority::Medium < HandoffPriority::High);
    }
}
