use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;

use flowops_core::config::SlaConfig;
use flowops_core::domain::outbox::{IdempotencyKey, NewOutboxEvent, OutboxEventType};
use flowops_db::repositories::{HandoffRepository, OutboxRepository, RepositoryError};

/// Scans for pending handoffs past their SLA deadline, marks them
/// breached, and queues a notification. The conditional breach mark and
/// the idempotency key keep both sides single-shot per handoff.
pub struct SlaWatchdog {
    handoffs: Arc<dyn HandoffRepository>,
    outbox: Arc<dyn OutboxRepository>,
    config: SlaConfig,
}

impl SlaWatchdog {
    pub fn new(
        handoffs: Arc<dyn HandoffRepository>,
        outbox: Arc<dyn OutboxRepository>,
        config: SlaConfig,
    ) -> Self {
        Self { handoffs, outbox, config }
    }

    /// Run until the shutdown signal flips.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::info!(
            check_interval_secs = self.config.check_interval_secs,
            batch_size = self.config.batch_size,
            "SLA watchdog started"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(0) => {}
                Ok(breached) => tracing::warn!(breached, "SLA deadlines breached"),
                Err(err) => tracing::error!(error = %err, "SLA scan failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(
                    self.config.check_interval_secs,
                )) => {}
                _ = shutdown_rx.changed() => break,
            }
        }

        tracing::info!("SLA watchdog stopped");
    }

    /// One scan cycle. Returns how many handoffs were newly breached.
    pub async fn run_once(&self) -> Result<u32, RepositoryError> {
        let now = Utc::now();
        let due = self.handoffs.list_sla_due(now, self.config.batch_size).await?;

        let mut breached = 0;
        for handoff in due {
            // Lost race with a claim or another watchdog: skip quietly.
            if !self.handoffs.mark_sla_breached(&handoff.id, now).await? {
                continue;
            }
            breached += 1;

            let payload = json!({
                "handoffId": handoff.id.0,
                "customerId": handoff.customer_id.0,
                "ticketId": handoff.ticket_id.as_ref().map(|id| id.0.clone()),
                "slaDueAt": handoff.sla_due_at,
                "breachedAt": now,
                "message": "Handoff SLA breached (pending not claimed in time).",
            });
            self.outbox
                .enqueue(
                    NewOutboxEvent {
                        event_type: OutboxEventType::SlaBreachNotify,
                        payload_json: payload.to_string(),
                        idempotency_key: IdempotencyKey::sla_breach(&handoff.id),
                    },
                    now,
                )
                .await?;

            tracing::warn!(
                handoff_id = %handoff.id.0,
                customer_id = %handoff.customer_id.0,
                sla_due_at = %handoff.sla_due_at,
                "handoff SLA breached"
            );
        }

        Ok(breached)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use serde_json::Value;

    use flowops_core::config::SlaConfig;
    use flowops_core::domain::action::ActionTag;
    use flowops_core::domain::customer::CustomerId;
    use flowops_core::domain::handoff::{
        Handoff, HandoffId, HandoffPriority, HandoffReason, HandoffStatus,
    };
    use flowops_core::domain::interaction::Mode;
    use flowops_core::domain::outbox::OutboxEventType;
    use flowops_db::repositories::{
        HandoffRepository, InMemoryHandoffRepository, InMemoryOutboxRepository, OutboxRepository,
    };

    use super::SlaWatchdog;

    fn config() -> SlaConfig {
        SlaConfig { check_interval_secs: 10, batch_size: 25 }
    }

    fn pending_handoff(id: &str, minutes_until_due: i64) -> Handoff {
        let now = Utc::now();
        Handoff {
            id: HandoffId(id.to_string()),
            customer_id: CustomerId("cus_1".to_string()),
            ticket_id: None,
            reason: HandoffReason::LowConfidence,
            priority: HandoffPriority::Medium,
            mode: Mode::Live,
            confidence: Some(0.6),
            status: HandoffStatus::Pending,
            claimed_by: None,
            claimed_at: None,
            resolved_by: None,
            resolved_at: None,
            resolution_notes: None,
            issues: vec![],
            actions: vec![ActionTag::EscalateToHuman],
            sla_due_at: now + Duration::minutes(minutes_until_due),
            sla_breached_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn overdue_pending_handoffs_get_breached_and_notified() {
        let handoffs = Arc::new(InMemoryHandoffRepository::default());
        let outbox = Arc::new(InMemoryOutboxRepository::default());
        handoffs.create(pending_handoff("hf_1", -5)).await.expect("seed");
        handoffs.create(pending_handoff("hf_2", 30)).await.expect("seed");

        let watchdog = SlaWatchdog::new(handoffs.clone(), outbox.clone(), config());
        assert_eq!(watchdog.run_once().await.expect("scan"), 1);

        let breached = handoffs
            .find_by_id(&HandoffId("hf_1".to_string()))
            .await
            .expect("find")
            .expect("exists");
        assert!(breached.sla_breached_at.is_some());
        assert_eq!(breached.priority, HandoffPriority::High);

        let untouched = handoffs
            .find_by_id(&HandoffId("hf_2".to_string()))
            .await
            .expect("find")
            .expect("exists");
        assert!(untouched.sla_breached_at.is_none());

        let queued = outbox.list(None, 10).await.expect("list");
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].event_type, OutboxEventType::SlaBreachNotify);
        assert_eq!(queued[0].idempotency_key.0, "sla:hf_1");

        let payload: Value = serde_json::from_str(&queued[0].payload_json).expect("json");
        assert_eq!(payload["handoffId"], "hf_1");
        assert_eq!(payload["customerId"], "cus_1");
        assert_eq!(payload["ticketId"], Value::Null);
        assert_eq!(
            payload["message"],
            "Handoff SLA breached (pending not claimed in time)."
        );
    }

    #[tokio::test]
    async fn a_second_scan_is_a_no_op() {
        let handoffs = Arc::new(InMemoryHandoffRepository::default());
        let outbox = Arc::new(InMemoryOutboxRepository::default());
        handoffs.create(pending_handoff("hf_1", -5)).await.expect("seed");

        let watchdog = SlaWatchdog::new(handoffs.clone(), outbox.clone(), config());
        assert_eq!(watchdog.run_once().await.expect("scan"), 1);
        assert_eq!(watchdog.run_once().await.expect("scan"), 0);
        assert_eq!(outbox.list(None, 10).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn claimed_handoffs_are_exempt() {
        let handoffs = Arc::new(InMemoryHandoffRepository::default());
        let outbox = Arc::new(InMemoryOutboxRepository::default());
        handoffs.create(pending_handoff("hf_1", -5)).await.expect("seed");
        handoffs
            .claim(&HandoffId("hf_1".to_string()), "op_1", Utc::now())
            .await
            .expect("claim");

        let watchdog = SlaWatchdog::new(handoffs.clone(), outbox.clone(), config());
        assert_eq!(watchdog.run_once().await.expect("scan"), 0);
        assert!(outbox.list(None, 10).await.expect("list").is_empty());
    }
}
