use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use flowops_core::auth::{Operator, OperatorRole};
use flowops_core::domain::artifact::ArtifactType;
use flowops_core::domain::handoff::{Handoff, HandoffId, HandoffStatus};
use flowops_core::domain::outbox::{IdempotencyKey, NewOutboxEvent, OutboxEventType};
use flowops_core::errors::DomainError;
use flowops_db::repositories::{
    ClaimOutcome, HandoffRepository, OutboxRepository, RepositoryError, TicketRepository,
};

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("handoff not found")]
    NotFound,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Receipt for an artifact generation request. The job itself runs
/// asynchronously off the outbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactRequest {
    pub handoff_id: HandoffId,
    pub event_type: OutboxEventType,
    pub idempotency_key: IdempotencyKey,
}

fn generate_event_type(artifact_type: ArtifactType) -> OutboxEventType {
    match artifact_type {
        ArtifactType::HandoffSummary => OutboxEventType::HandoffSummaryGenerate,
        ArtifactType::ReplyDraft => OutboxEventType::ReplyDraftGenerate,
        ArtifactType::RiskAssessment => OutboxEventType::RiskAssessmentGenerate,
        ArtifactType::ResolutionSuggestion => OutboxEventType::ResolutionSuggestionGenerate,
    }
}

/// Operator workflow over pending handoffs: claim, resolve, and on-demand
/// artifact generation.
pub struct HandoffService {
    handoffs: Arc<dyn HandoffRepository>,
    tickets: Arc<dyn TicketRepository>,
    outbox: Arc<dyn OutboxRepository>,
}

impl HandoffService {
    pub fn new(
        handoffs: Arc<dyn HandoffRepository>,
        tickets: Arc<dyn TicketRepository>,
        outbox: Arc<dyn OutboxRepository>,
    ) -> Self {
        Self { handoffs, tickets, outbox }
    }

    pub async fn claim(
        &self,
        id: &HandoffId,
        operator: &Operator,
        now: DateTime<Utc>,
    ) -> Result<Handoff, HandoffError> {
        require_working_role(operator)?;

        if self.handoffs.find_by_id(id).await?.is_none() {
            return Err(HandoffError::NotFound);
        }

        match self.handoffs.claim(id, &operator.id, now).await? {
            ClaimOutcome::Claimed(handoff) => {
                tracing::info!(
                    handoff_id = %handoff.id.0,
                    operator_id = %operator.id,
                    "handoff claimed"
                );
                Ok(handoff)
            }
            ClaimOutcome::Conflict => {
                Err(HandoffError::Conflict("Handoff already claimed or not pending".to_string()))
            }
        }
    }

    pub async fn resolve(
        &self,
        id: &HandoffId,
        operator: &Operator,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Handoff, HandoffError> {
        require_working_role(operator)?;

        let handoff = self.handoffs.find_by_id(id).await?.ok_or(HandoffError::NotFound)?;

        if let Err(DomainError::InvalidHandoffTransition { from, .. }) =
            handoff.status.ensure_transition(HandoffStatus::Resolved)
        {
            let message = match from {
                HandoffStatus::Resolved => "Handoff already resolved",
                _ => "Handoff must be claimed before resolving",
            };
            return Err(HandoffError::Conflict(message.to_string()));
        }

        let is_supervisor = operator.role == OperatorRole::Supervisor;
        if !is_supervisor && handoff.claimed_by.as_deref() != Some(operator.id.as_str()) {
            return Err(HandoffError::Conflict(
                "Only the claiming operator can resolve".to_string(),
            ));
        }

        let notes = notes.map(str::trim).filter(|trimmed| !trimmed.is_empty());
        if !self.handoffs.resolve(id, &operator.id, notes, now).await? {
            return Err(HandoffError::Conflict("Handoff already resolved".to_string()));
        }

        // Resolving the handoff closes out the ticket it was opened for.
        if let Some(ticket_id) = &handoff.ticket_id {
            self.tickets.mark_resolved(ticket_id, now).await?;
        }

        tracing::info!(
            handoff_id = %id.0,
            operator_id = %operator.id,
            "handoff resolved"
        );

        self.handoffs.find_by_id(id).await?.ok_or(HandoffError::NotFound)
    }

    /// Queues generation of one artifact for a handoff. Repeat requests
    /// collapse onto the already-queued job via the idempotency key.
    pub async fn request_artifact(
        &self,
        id: &HandoffId,
        artifact_type: ArtifactType,
        now: DateTime<Utc>,
    ) -> Result<ArtifactRequest, HandoffError> {
        if self.handoffs.find_by_id(id).await?.is_none() {
            return Err(HandoffError::NotFound);
        }

        let event_type = generate_event_type(artifact_type);
        let idempotency_key = IdempotencyKey::artifact(artifact_type, id);
        self.outbox
            .enqueue(
                NewOutboxEvent {
                    event_type,
                    payload_json: serde_json::json!({
                        "handoffId": id.0,
                        "version": "handoff_context.v1",
                    })
                    .to_string(),
                    idempotency_key: idempotency_key.clone(),
                },
                now,
            )
            .await?;

        Ok(ArtifactRequest { handoff_id: id.clone(), event_type, idempotency_key })
    }
}

fn require_working_role(operator: &Operator) -> Result<(), HandoffError> {
    if operator.role.can_work_handoffs() {
        Ok(())
    } else {
        Err(HandoffError::Forbidden(format!(
            "role `{}` cannot work handoffs",
            operator.role.as_str()
        )))
    }
}
