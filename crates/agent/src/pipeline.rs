use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use flowops_core::domain::action::ActionTag;
use flowops_core::domain::artifact::ArtifactType;
use flowops_core::domain::customer::{Customer, CustomerId, Plan};
use flowops_core::domain::facts::{AccountFacts, BillingFacts};
use flowops_core::domain::handoff::{
    Handoff, HandoffId, HandoffPriority, HandoffReason, HandoffStatus,
};
use flowops_core::domain::interaction::{Channel, Interaction, InteractionId, Mode};
use flowops_core::domain::outbox::{IdempotencyKey, NewOutboxEvent, OutboxEventType};
use flowops_core::domain::prefixed_id;
use flowops_core::domain::ticket::{Ticket, TicketId, TicketPriority, TicketStatus};
use flowops_core::errors::ApplicationError;
use flowops_core::policy::{
    decide_refund, should_escalate, sla_minutes, ConfidenceEstimator, ConfidenceInput,
    PolicyConfig, RefundDecision,
};
use flowops_core::request_key::derive_request_id;
use flowops_core::verify::{verify_reply, VerificationInput};
use flowops_db::repositories::{
    CustomerRepository, HandoffRepository, InteractionRepository, OutboxRepository,
    RepositoryError, TicketRepository,
};

use crate::tools::{AccountTool, BillingTool};

/// How many past interactions the memory check looks at.
const MEMORY_WINDOW: u32 = 5;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub customer_id: String,
    pub message: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub reply: String,
    pub mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<TicketId>,
    pub escalated: bool,
    pub confidence: f64,
    pub actions: Vec<ActionTag>,
}

struct Intent {
    api_issue: bool,
    billing_issue: bool,
    asks_refund: bool,
}

fn summarize_intent(message: &str) -> Intent {
    let msg = message.to_lowercase();
    Intent {
        api_issue: msg.contains("api") || msg.contains("key"),
        billing_issue: msg.contains("bill") || msg.contains("invoice") || msg.contains("refund"),
        asks_refund: msg.contains("refund"),
    }
}

/// Runs one customer message end to end.
///
/// Every decision along the way is deterministic: facts come from the
/// tools, amounts and thresholds from the policy engine, and all side
/// effects go through the durable outbox. Shadow mode runs the full
/// decision path but persists nothing and enqueues nothing.
pub struct SupportPipeline {
    customers: Arc<dyn CustomerRepository>,
    tickets: Arc<dyn TicketRepository>,
    interactions: Arc<dyn InteractionRepository>,
    handoffs: Arc<dyn HandoffRepository>,
    outbox: Arc<dyn OutboxRepository>,
    account: Arc<dyn AccountTool>,
    billing: Arc<dyn BillingTool>,
    estimator: Arc<dyn ConfidenceEstimator>,
    policy: PolicyConfig,
}

impl SupportPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        customers: Arc<dyn CustomerRepository>,
        tickets: Arc<dyn TicketRepository>,
        interactions: Arc<dyn InteractionRepository>,
        handoffs: Arc<dyn HandoffRepository>,
        outbox: Arc<dyn OutboxRepository>,
        account: Arc<dyn AccountTool>,
        billing: Arc<dyn BillingTool>,
        estimator: Arc<dyn ConfidenceEstimator>,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            customers,
            tickets,
            interactions,
            handoffs,
            outbox,
            account,
            billing,
            estimator,
            policy,
        }
    }

    pub async fn handle(&self, request: ChatRequest) -> Result<ChatResponse, ApplicationError> {
        let mode = request.mode;
        let mut actions: Vec<ActionTag> = Vec::new();

        if request.customer_id.trim().is_empty() {
            return Ok(ChatResponse {
                reply: "Please provide a valid customerId so I can look up your account."
                    .to_string(),
                mode,
                ticket_id: None,
                escalated: true,
                confidence: 0.3,
                actions,
            });
        }

        let customer_id = CustomerId(request.customer_id.trim().to_string());
        let request_id = match request.request_id.as_deref().map(str::trim) {
            Some(provided) if !provided.is_empty() => provided.to_string(),
            _ => derive_request_id(&customer_id, &request.message, mode),
        };

        // Replay protection applies in live mode only: the stored reply is
        // returned verbatim and no side effects run again.
        if mode == Mode::Live {
            if let Some(existing) = self
                .interactions
                .find_by_request(&customer_id, &request_id)
                .await
                .map_err(persistence)?
            {
                let mut replayed = existing.actions;
                replayed.push(ActionTag::Replay);
                tracing::info!(
                    customer_id = %customer_id.0,
                    request_id = %request_id,
                    "request replayed from stored interaction"
                );
                return Ok(ChatResponse {
                    reply: existing.reply_text,
                    mode,
                    ticket_id: existing.ticket_id,
                    escalated: existing.escalated,
                    confidence: existing.confidence,
                    actions: replayed,
                });
            }
        }

        let recent = if mode == Mode::Live {
            self.interactions
                .list_recent(&customer_id, MEMORY_WINDOW)
                .await
                .map_err(persistence)?
        } else {
            Vec::new()
        };
        let had_recent_escalation = recent.iter().any(|interaction| interaction.escalated);

        let account_result = self.account.account_status(&customer_id).await;
        let billing_result = self.billing.billing_summary(&customer_id).await;
        let tool_ok = account_result.is_ok() && billing_result.is_ok();

        let confidence = self
            .estimator
            .estimate(&ConfidenceInput { tool_fetch_ok: tool_ok, message: &request.message });

        let (account, billing) = match (account_result, billing_result) {
            (Ok(account), Ok(billing)) => (account, billing),
            (account_result, billing_result) => {
                let reason = account_result
                    .err()
                    .or(billing_result.err())
                    .map(|error| error.to_string())
                    .unwrap_or_else(|| "Unknown tool error".to_string());
                actions.push(ActionTag::ToolFetchFailed);
                tracing::warn!(customer_id = %customer_id.0, %reason, "fact fetch failed");
                return Ok(ChatResponse {
                    reply: format!(
                        "I couldn't retrieve the necessary account/billing details ({reason}). \
                         I'm escalating this to a human agent."
                    ),
                    mode,
                    ticket_id: None,
                    escalated: true,
                    confidence,
                    actions,
                });
            }
        };

        let now = Utc::now();
        let plan = account.plan;

        // Handoff and ticket rows reference the customer, so the upsert has
        // to happen before either of them.
        if mode == Mode::Live {
            self.customers
                .upsert(Customer {
                    id: customer_id.clone(),
                    email: account.email.clone(),
                    plan,
                    created_at: now,
                    updated_at: now,
                })
                .await
                .map_err(persistence)?;
        }

        let intent = summarize_intent(&request.message);

        let ticket_id = match self
            .open_ticket(&customer_id, &request.message, &intent, &account, &billing, &recent, mode)
            .await
        {
            Ok(id) => id,
            Err(error) => {
                actions.push(ActionTag::TicketCreateFailed);
                tracing::warn!(customer_id = %customer_id.0, %error, "ticket create failed");
                return Ok(ChatResponse {
                    reply: format!(
                        "I found your account details but couldn't create a ticket ({error}). \
                         I'm escalating this to a human agent."
                    ),
                    mode,
                    ticket_id: None,
                    escalated: true,
                    confidence: confidence.min(0.6),
                    actions,
                });
            }
        };
        actions.push(ActionTag::TicketCreated(ticket_id.0.clone()));

        let (refund_line, refund_claim) = if intent.asks_refund {
            let decision = decide_refund(plan, billing.refundable_amount, &self.policy);
            let line = if !decision.allow {
                actions.push(ActionTag::RefundDenied);
                format!("Refund request: not eligible. Reason: {}", decision.reason)
            } else if decision.needs_human {
                actions.push(ActionTag::RefundNeedsHuman);
                format!(
                    "Refund request: eligible up to €{}, but requires human approval. ({})",
                    decision.max_amount, decision.reason
                )
            } else {
                actions.push(ActionTag::RefundAutoApproved);
                format!(
                    "Refund request: approved for €{}. ({})",
                    decision.max_amount, decision.reason
                )
            };
            (Some(line), Some(decision))
        } else {
            (None, None)
        };

        let reply_draft =
            compose_reply(&ticket_id, &account, &billing, refund_line.as_deref(), had_recent_escalation);

        let verification = verify_reply(&VerificationInput {
            reply_draft: &reply_draft,
            account: &account,
            billing: &billing,
            claimed_refund: refund_claim.as_ref(),
        });
        if verification.passed {
            actions.push(ActionTag::VerificationPassed);
        } else {
            actions.push(ActionTag::VerificationFailed);
            for issue in &verification.issues {
                actions.push(ActionTag::VerifyIssue(issue.clone()));
            }
        }

        let mut escalate =
            should_escalate(plan, confidence, verification.passed, &self.policy).escalate;
        if had_recent_escalation {
            escalate = true;
            actions.push(ActionTag::RecentEscalationMemory);
        }

        // A single consistent confidence value whenever we escalate.
        let final_confidence = if escalate { confidence.min(0.6) } else { confidence };

        if escalate {
            actions.push(ActionTag::EscalateToHuman);
            self.open_handoff(OpenHandoff {
                customer_id: &customer_id,
                ticket_id: &ticket_id,
                plan,
                mode,
                confidence: final_confidence,
                verification_passed: verification.passed,
                issues: &verification.issues,
                had_recent_escalation,
                raw_confidence: confidence,
                actions: &mut actions,
            })
            .await?;
        }

        self.queue_email(QueueEmail {
            customer_id: &customer_id,
            request_id: &request_id,
            ticket_id: &ticket_id,
            account: &account,
            billing: &billing,
            refund_line: refund_line.as_deref(),
            escalated: escalate,
            mode,
            actions: &mut actions,
        })
        .await?;

        let final_reply = if escalate {
            format!(
                "I opened ticket **{}** and pulled your account/billing details.\n\n\
                 To be safe, I'm escalating this to a human agent to double-check everything \
                 before confirming next steps.",
                ticket_id.0
            )
        } else {
            reply_draft
        };

        if mode == Mode::Live {
            let outcome = self
                .interactions
                .insert(Interaction {
                    id: InteractionId(prefixed_id("int_")),
                    customer_id: customer_id.clone(),
                    ticket_id: Some(ticket_id.clone()),
                    request_id: request_id.clone(),
                    channel: Channel::Chat,
                    request_text: request.message.clone(),
                    reply_text: final_reply.clone(),
                    mode,
                    confidence: final_confidence,
                    escalated: escalate,
                    verified: verification.passed,
                    actions: actions.clone(),
                    created_at: now,
                })
                .await
                .map_err(persistence)?;
            // A concurrent request with the same key already logged; its
            // stored row wins and this one is discarded.
            let _ = outcome;
        }

        Ok(ChatResponse {
            reply: final_reply,
            mode,
            ticket_id: Some(ticket_id),
            escalated: escalate,
            confidence: final_confidence,
            actions,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn open_ticket(
        &self,
        customer_id: &CustomerId,
        message: &str,
        intent: &Intent,
        account: &AccountFacts,
        billing: &BillingFacts,
        recent: &[Interaction],
        mode: Mode,
    ) -> Result<TicketId, RepositoryError> {
        if mode == Mode::Shadow {
            return Ok(TicketId("shadow_ticket".to_string()));
        }

        let subject = if intent.billing_issue {
            "Billing issue"
        } else if intent.api_issue {
            "API access issue"
        } else {
            "General support request"
        };

        let mut summary_lines = vec![
            format!("Customer message: {message}"),
            format!(
                "Plan: {}, API key: {}",
                account.plan.as_str(),
                account.api_key_status.as_str()
            ),
            format!(
                "Last invoice: {} ({}, amount {})",
                billing.last_invoice_id,
                billing.invoice_status.as_str(),
                billing.last_invoice_amount
            ),
        ];
        if !recent.is_empty() {
            summary_lines.push("Recent history (latest first):".to_string());
            for (index, interaction) in recent.iter().enumerate() {
                let req: String = interaction
                    .request_text
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .chars()
                    .take(120)
                    .collect();
                summary_lines.push(format!(
                    "#{} [{}] escalated={} conf={} req=\"{}\"",
                    index + 1,
                    interaction.created_at.to_rfc3339(),
                    interaction.escalated,
                    interaction.confidence,
                    req
                ));
            }
        }

        let now = Utc::now();
        let ticket_id = TicketId(prefixed_id("tkt_"));
        self.tickets
            .save(Ticket {
                id: ticket_id.clone(),
                customer_id: customer_id.clone(),
                subject: subject.to_string(),
                summary: summary_lines.join("\n"),
                priority: TicketPriority::Normal,
                status: TicketStatus::Open,
                created_at: now,
                updated_at: now,
            })
            .await?;
        Ok(ticket_id)
    }

    async fn open_handoff(&self, params: OpenHandoff<'_>) -> Result<(), ApplicationError> {
        if params.mode == Mode::Shadow {
            params.actions.push(ActionTag::HandoffCreated("shadow_handoff".to_string()));
            return Ok(());
        }

        let reason = if !params.verification_passed {
            HandoffReason::VerificationFailed
        } else if params.had_recent_escalation {
            HandoffReason::RecentEscalation
        } else if params.raw_confidence < 0.7 {
            HandoffReason::LowConfidence
        } else {
            HandoffReason::PolicyRequiresHuman
        };

        // Follow-ups after an escalation should not sit at low priority.
        let priority = if params.plan == Plan::Enterprise {
            HandoffPriority::High
        } else if params.had_recent_escalation || params.raw_confidence < 0.7 {
            HandoffPriority::Medium
        } else {
            HandoffPriority::Low
        };

        let now = Utc::now();
        let handoff_id = HandoffId(prefixed_id("hf_"));
        let due = now + Duration::minutes(sla_minutes(params.plan, &self.policy));

        let created = self
            .handoffs
            .create(Handoff {
                id: handoff_id.clone(),
                customer_id: params.customer_id.clone(),
                ticket_id: Some(params.ticket_id.clone()),
                reason,
                priority,
                mode: params.mode,
                confidence: Some(params.confidence),
                status: HandoffStatus::Pending,
                claimed_by: None,
                claimed_at: None,
                resolved_by: None,
                resolved_at: None,
                resolution_notes: None,
                issues: if params.verification_passed {
                    Vec::new()
                } else {
                    params.issues.to_vec()
                },
                actions: params.actions.clone(),
                sla_due_at: due,
                sla_breached_at: None,
                created_at: now,
                updated_at: now,
            })
            .await;

        match created {
            Ok(()) => {
                // One summary job per handoff, guaranteed by the outbox key.
                self.outbox
                    .enqueue(
                        NewOutboxEvent {
                            event_type: OutboxEventType::HandoffSummaryGenerate,
                            payload_json: serde_json::json!({
                                "handoffId": handoff_id.0,
                                "version": "handoff_context.v1",
                            })
                            .to_string(),
                            idempotency_key: IdempotencyKey::artifact(
                                ArtifactType::HandoffSummary,
                                &handoff_id,
                            ),
                        },
                        now,
                    )
                    .await
                    .map_err(persistence)?;
                tracing::info!(
                    handoff_id = %handoff_id.0,
                    reason = reason.as_str(),
                    priority = priority.as_str(),
                    "handoff created"
                );
                params.actions.push(ActionTag::HandoffCreated(handoff_id.0));
            }
            Err(error) => {
                tracing::warn!(%error, "handoff create failed");
                params.actions.push(ActionTag::HandoffFailed(error.to_string()));
            }
        }
        Ok(())
    }

    async fn queue_email(&self, params: QueueEmail<'_>) -> Result<(), ApplicationError> {
        if params.mode == Mode::Shadow {
            params.actions.push(ActionTag::EmailQueued("shadow_email".to_string()));
            return Ok(());
        }

        let subject = format!("FlowOps Support Ticket {}: Update", params.ticket_id.0);
        let mut body_lines = vec![
            "Hi there,".to_string(),
            format!(
                "Thanks for reaching out. I checked your account and opened ticket {}.",
                params.ticket_id.0
            ),
            format!("Plan: {}", params.account.plan.as_str()),
            format!("API key status: {}", params.account.api_key_status.as_str()),
            format!(
                "Last invoice: {} ({})",
                params.billing.last_invoice_id,
                params.billing.invoice_status.as_str()
            ),
        ];
        if let Some(line) = params.refund_line {
            body_lines.push(line.to_string());
        }
        body_lines.push(if params.escalated {
            "Because this case needs extra attention, I'm escalating it to a human specialist."
                .to_string()
        } else {
            "I'll keep you updated here as we proceed.".to_string()
        });
        body_lines.push("— FlowOps AI".to_string());

        let now = Utc::now();
        let enqueued = self
            .outbox
            .enqueue(
                NewOutboxEvent {
                    event_type: OutboxEventType::EmailSend,
                    payload_json: serde_json::json!({
                        "to": params.account.email,
                        "subject": subject,
                        "body": body_lines.join("\n"),
                        "customerId": params.customer_id.0,
                        "requestId": params.request_id,
                        "createdAt": now.to_rfc3339(),
                    })
                    .to_string(),
                    idempotency_key: IdempotencyKey::email(params.customer_id, params.request_id),
                },
                now,
            )
            .await;

        match enqueued {
            Ok(outcome) => {
                let message_id = format!("queued:{}", outcome.event().id.0);
                params.actions.push(ActionTag::EmailQueued(message_id));
            }
            Err(error) => {
                tracing::warn!(%error, "email enqueue failed");
                params.actions.push(ActionTag::EmailFailed(error.to_string()));
            }
        }
        Ok(())
    }
}

struct OpenHandoff<'a> {
    customer_id: &'a CustomerId,
    ticket_id: &'a TicketId,
    plan: Plan,
    mode: Mode,
    confidence: f64,
    verification_passed: bool,
    issues: &'a [String],
    had_recent_escalation: bool,
    raw_confidence: f64,
    actions: &'a mut Vec<ActionTag>,
}

struct QueueEmail<'a> {
    customer_id: &'a CustomerId,
    request_id: &'a str,
    ticket_id: &'a TicketId,
    account: &'a AccountFacts,
    billing: &'a BillingFacts,
    refund_line: Option<&'a str>,
    escalated: bool,
    mode: Mode,
    actions: &'a mut Vec<ActionTag>,
}

fn compose_reply(
    ticket_id: &TicketId,
    account: &AccountFacts,
    billing: &BillingFacts,
    refund_line: Option<&str>,
    had_recent_escalation: bool,
) -> String {
    let mut parts = vec![
        format!("✅ I opened ticket **{}** for you.", ticket_id.0),
        format!(
            "Plan: **{}** · API key: **{}** · Last invoice: **{}** ({})",
            account.plan.as_str(),
            account.api_key_status.as_str(),
            billing.last_invoice_id,
            billing.invoice_status.as_str()
        ),
    ];
    if let Some(line) = refund_line {
        parts.push(format!("\n{line}"));
    }
    parts.push(format!(
        "\nI'll continue helping you here — and I sent a follow-up email to **{}**.",
        account.email
    ));
    if had_recent_escalation {
        parts.push(
            "\n\nI see this is a follow-up to a recent escalated case — I'll be extra careful \
             and keep the context."
                .to_string(),
        );
    }
    parts.join("\n")
}

fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}
