use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use flowops_core::domain::action::ActionTag;
use flowops_core::domain::handoff::HandoffId;
use flowops_db::repositories::{
    CustomerRepository, HandoffRepository, InteractionRepository, RepositoryError,
    TicketRepository,
};

/// Safety cap on how much history goes into a bundle.
const MAX_INTERACTIONS: usize = 10;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("handoff not found: {0}")]
    HandoffNotFound(String),
    #[error("customer not found: {0}")]
    CustomerNotFound(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Everything a generation job is allowed to know, snapshotted from
/// storage. The prompts treat this as the authoritative source of truth.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextBundle {
    pub version: &'static str,
    pub generated_at: DateTime<Utc>,
    pub handoff: HandoffContext,
    pub customer: CustomerContext,
    pub ticket: Option<TicketContext>,
    pub interactions: Vec<InteractionContext>,
    pub policy_outcome: PolicyOutcome,
    pub verification: VerificationContext,
    pub executed_actions: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffContext {
    pub id: String,
    pub reason: String,
    pub priority: String,
    pub status: String,
    pub confidence: Option<f64>,
    pub sla_due_at: DateTime<Utc>,
    pub sla_breached_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerContext {
    pub id: String,
    pub plan: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketContext {
    pub id: String,
    pub subject: String,
    pub priority: String,
    pub status: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionContext {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub request_text: String,
    pub reply_text: String,
    pub confidence: f64,
    pub escalated: bool,
    pub verified: bool,
    pub actions: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyOutcome {
    pub refund_approved: Option<bool>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationContext {
    pub issues: Vec<String>,
}

/// Assembles the `handoff_context.v1` bundle for one handoff.
pub struct ContextBuilder {
    handoffs: Arc<dyn HandoffRepository>,
    customers: Arc<dyn CustomerRepository>,
    tickets: Arc<dyn TicketRepository>,
    interactions: Arc<dyn InteractionRepository>,
}

impl ContextBuilder {
    pub fn new(
        handoffs: Arc<dyn HandoffRepository>,
        customers: Arc<dyn CustomerRepository>,
        tickets: Arc<dyn TicketRepository>,
        interactions: Arc<dyn InteractionRepository>,
    ) -> Self {
        Self { handoffs, customers, tickets, interactions }
    }

    pub async fn build(&self, handoff_id: &HandoffId) -> Result<ContextBundle, ContextError> {
        let handoff = self
            .handoffs
            .find_by_id(handoff_id)
            .await?
            .ok_or_else(|| ContextError::HandoffNotFound(handoff_id.0.clone()))?;

        let customer = self
            .customers
            .find_by_id(&handoff.customer_id)
            .await?
            .ok_or_else(|| ContextError::CustomerNotFound(handoff.customer_id.0.clone()))?;

        let ticket = match &handoff.ticket_id {
            Some(ticket_id) => self.tickets.find_by_id(ticket_id).await?,
            None => None,
        };

        let mut interactions = self
            .interactions
            .list_for_audit(&handoff.customer_id, handoff.ticket_id.as_ref())
            .await?;
        interactions.truncate(MAX_INTERACTIONS);

        let executed_actions: Vec<String> =
            handoff.actions.iter().map(|tag| tag.encode()).collect();

        // Policy facts come straight out of the recorded action trail.
        let refund_approved = if handoff.actions.contains(&ActionTag::RefundAutoApproved) {
            Some(true)
        } else {
            None
        };

        Ok(ContextBundle {
            version: "handoff_context.v1",
            generated_at: Utc::now(),
            handoff: HandoffContext {
                id: handoff.id.0.clone(),
                reason: handoff.reason.as_str().to_string(),
                priority: handoff.priority.as_str().to_string(),
                status: handoff.status.as_str().to_string(),
                confidence: handoff.confidence,
                sla_due_at: handoff.sla_due_at,
                sla_breached_at: handoff.sla_breached_at,
            },
            customer: CustomerContext {
                id: customer.id.0.clone(),
                plan: customer.plan.as_str().to_string(),
            },
            ticket: ticket.map(|ticket| TicketContext {
                id: ticket.id.0,
                subject: ticket.subject,
                priority: ticket.priority.as_str().to_string(),
                status: ticket.status.as_str().to_string(),
            }),
            interactions: interactions
                .into_iter()
                .map(|interaction| InteractionContext {
                    id: interaction.id.0,
                    created_at: interaction.created_at,
                    request_text: interaction.request_text,
                    reply_text: interaction.reply_text,
                    confidence: interaction.confidence,
                    escalated: interaction.escalated,
                    verified: interaction.verified,
                    actions: interaction.actions.iter().map(|tag| tag.encode()).collect(),
                })
                .collect(),
            policy_outcome: PolicyOutcome { refund_approved },
            verification: VerificationContext { issues: handoff.issues.clone() },
            executed_actions,
        })
    }
}
