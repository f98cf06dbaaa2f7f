use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use tokio::sync::watch;

use flowops_core::config::OutboxConfig;
use flowops_core::domain::outbox::{OutboxEvent, OutboxEventType};
use flowops_db::repositories::{OutboxRepository, RepositoryError};

/// Delivers one outbox event. Returning an error schedules a retry with
/// backoff; handlers must therefore be safe to run more than once.
#[async_trait]
pub trait OutboxHandler: Send + Sync {
    async fn deliver(&self, event: &OutboxEvent) -> anyhow::Result<()>;
}

/// Email delivery stub: logs the message instead of sending it. A real
/// provider integration would slot in here without touching the
/// dispatcher.
pub struct EmailSendHandler;

#[async_trait]
impl OutboxHandler for EmailSendHandler {
    async fn deliver(&self, event: &OutboxEvent) -> anyhow::Result<()> {
        let payload: Value = serde_json::from_str(&event.payload_json)?;
        tracing::info!(
            event_id = %event.id.0,
            to = payload.get("to").and_then(serde_json::Value::as_str).unwrap_or("<unknown>"),
            subject = payload.get("subject").and_then(serde_json::Value::as_str).unwrap_or(""),
            "email delivered (logged only; no provider configured)"
        );
        Ok(())
    }
}

/// SLA breach notification stub: surfaces the breach in the logs.
pub struct SlaBreachNotifyHandler;

#[async_trait]
impl OutboxHandler for SlaBreachNotifyHandler {
    async fn deliver(&self, event: &OutboxEvent) -> anyhow::Result<()> {
        let payload: Value = serde_json::from_str(&event.payload_json)?;
        tracing::warn!(
            event_id = %event.id.0,
            handoff_id = payload.get("handoffId").and_then(serde_json::Value::as_str).unwrap_or("<unknown>"),
            customer_id = payload.get("customerId").and_then(serde_json::Value::as_str).unwrap_or("<unknown>"),
            "SLA breach notification"
        );
        Ok(())
    }
}

/// Polls the outbox and pushes eligible events through registered
/// handlers. Safe to run in several processes at once: the conditional
/// `processing` claim makes sure each event has a single winner per
/// attempt.
pub struct OutboxDispatcher {
    outbox: Arc<dyn OutboxRepository>,
    handlers: HashMap<OutboxEventType, Arc<dyn OutboxHandler>>,
    config: OutboxConfig,
}

impl OutboxDispatcher {
    pub fn new(outbox: Arc<dyn OutboxRepository>, config: OutboxConfig) -> Self {
        Self { outbox, handlers: HashMap::new(), config }
    }

    pub fn register(&mut self, event_type: OutboxEventType, handler: Arc<dyn OutboxHandler>) {
        self.handlers.insert(event_type, handler);
    }

    /// Run until the shutdown signal flips.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_attempts = self.config.max_attempts,
            "outbox dispatcher started"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // Drain everything currently eligible before going back to
            // sleep so bursts clear at delivery speed, not poll speed.
            loop {
                match self.run_once().await {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(err) => {
                        tracing::error!(error = %err, "outbox poll failed");
                        break;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(
                    self.config.poll_interval_ms,
                )) => {}
                _ = shutdown_rx.changed() => break,
            }
        }

        tracing::info!("outbox dispatcher stopped");
    }

    /// One dispatch cycle: release stale claims, then pick up and deliver
    /// at most one event. Returns whether an event was picked up.
    pub async fn run_once(&self) -> Result<bool, RepositoryError> {
        let now = Utc::now();

        let cutoff = now - Duration::seconds(self.config.stale_claim_secs as i64);
        let released = self.outbox.release_stale(cutoff, now).await?;
        if released > 0 {
            tracing::warn!(released, "released stale outbox claims");
        }

        let Some(event) = self.outbox.next_eligible(now).await? else {
            return Ok(false);
        };

        if !self.outbox.mark_processing(&event.id, now).await? {
            // Another dispatcher won the claim.
            return Ok(true);
        }

        let outcome = match self.handlers.get(&event.event_type) {
            Some(handler) => handler.deliver(&event).await,
            None => Err(anyhow::anyhow!(
                "unhandled event type: {}",
                event.event_type.as_str()
            )),
        };

        match outcome {
            Ok(()) => {
                self.outbox.mark_sent(&event.id, Utc::now()).await?;
                tracing::info!(
                    event_id = %event.id.0,
                    event_type = event.event_type.as_str(),
                    "outbox event delivered"
                );
            }
            Err(err) => {
                let attempts = event.attempts + 1;
                let error = err.to_string();
                if attempts >= self.config.max_attempts {
                    self.outbox.mark_dead(&event.id, attempts, &error, Utc::now()).await?;
                    tracing::error!(
                        event_id = %event.id.0,
                        event_type = event.event_type.as_str(),
                        attempts,
                        error = %error,
                        "outbox event dead after max attempts"
                    );
                } else {
                    let delay = Duration::milliseconds(self.backoff_ms(event.attempts) as i64);
                    self.outbox
                        .mark_failed(&event.id, attempts, Utc::now() + delay, &error, Utc::now())
                        .await?;
                    tracing::warn!(
                        event_id = %event.id.0,
                        event_type = event.event_type.as_str(),
                        attempts,
                        error = %error,
                        "outbox event failed; retry scheduled"
                    );
                }
            }
        }

        Ok(true)
    }

    /// Exponential backoff from the attempt count, capped.
    fn backoff_ms(&self, attempts: u32) -> u64 {
        let factor = 2u64.saturating_pow(attempts);
        self.config
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.config.backoff_cap_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};

    use flowops_core::config::OutboxConfig;
    use flowops_core::domain::customer::CustomerId;
    use flowops_core::domain::outbox::{
        IdempotencyKey, NewOutboxEvent, OutboxEvent, OutboxEventType, OutboxStatus,
    };
    use flowops_db::repositories::{InMemoryOutboxRepository, OutboxRepository};

    use super::{OutboxDispatcher, OutboxHandler};

    struct CountingHandler {
        delivered: AtomicUsize,
        failures_left: AtomicUsize,
    }

    impl CountingHandler {
        fn ok() -> Arc<Self> {
            Arc::new(Self { delivered: AtomicUsize::new(0), failures_left: AtomicUsize::new(0) })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                delivered: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(usize::MAX),
            })
        }

        fn recovering_after(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                delivered: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(failures),
            })
        }
    }

    #[async_trait]
    impl OutboxHandler for CountingHandler {
        async fn deliver(&self, _event: &OutboxEvent) -> anyhow::Result<()> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                if left != usize::MAX {
                    self.failures_left.store(left - 1, Ordering::SeqCst);
                }
                anyhow::bail!("downstream unavailable");
            }
            Ok(())
        }
    }

    fn config(max_attempts: u32) -> OutboxConfig {
        OutboxConfig {
            poll_interval_ms: 1_000,
            max_attempts,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 60_000,
            stale_claim_secs: 300,
        }
    }

    async fn enqueue_email(outbox: &InMemoryOutboxRepository, key: &str) -> OutboxEvent {
        outbox
            .enqueue(
                NewOutboxEvent {
                    event_type: OutboxEventType::EmailSend,
                    payload_json: r#"{"to":"customer@example.com","subject":"Update"}"#.to_string(),
                    idempotency_key: IdempotencyKey::email(
                        &CustomerId("cus_1".to_string()),
                        key,
                    ),
                },
                Utc::now(),
            )
            .await
            .expect("enqueue")
            .event()
            .clone()
    }

    #[tokio::test]
    async fn successful_delivery_marks_the_event_sent() {
        let outbox = Arc::new(InMemoryOutboxRepository::default());
        let handler = CountingHandler::ok();
        let mut dispatcher = OutboxDispatcher::new(outbox.clone(), config(8));
        dispatcher.register(OutboxEventType::EmailSend, handler.clone());

        let event = enqueue_email(&outbox, "req-1").await;
        assert!(dispatcher.run_once().await.expect("cycle"));

        let stored = outbox.find_by_id(&event.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, OutboxStatus::Sent);
        assert_eq!(stored.last_error, None);
        assert_eq!(handler.delivered.load(Ordering::SeqCst), 1);

        // Nothing left to pick up.
        assert!(!dispatcher.run_once().await.expect("cycle"));
    }

    #[tokio::test]
    async fn failure_schedules_a_backoff_retry() {
        let outbox = Arc::new(InMemoryOutboxRepository::default());
        let mut dispatcher = OutboxDispatcher::new(outbox.clone(), config(8));
        dispatcher.register(OutboxEventType::EmailSend, CountingHandler::failing());

        let event = enqueue_email(&outbox, "req-1").await;
        let before = Utc::now();
        assert!(dispatcher.run_once().await.expect("cycle"));

        let stored = outbox.find_by_id(&event.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, OutboxStatus::Failed);
        assert_eq!(stored.attempts, 1);
        assert!(stored.last_error.as_deref() == Some("downstream unavailable"));
        assert!(stored.next_attempt_at > before, "retry pushed into the future");

        // Not yet eligible again this cycle.
        assert!(!dispatcher.run_once().await.expect("cycle"));
    }

    #[tokio::test]
    async fn retries_that_eventually_succeed_end_sent() {
        let outbox = Arc::new(InMemoryOutboxRepository::default());
        let handler = CountingHandler::recovering_after(2);
        let mut dispatcher = OutboxDispatcher::new(outbox.clone(), config(3));
        dispatcher.register(OutboxEventType::EmailSend, handler.clone());

        let event = enqueue_email(&outbox, "req-1").await;

        for expected_attempts in 1..=2u32 {
            assert!(dispatcher.run_once().await.expect("cycle"));
            let stored = outbox.find_by_id(&event.id).await.expect("find").expect("exists");
            assert_eq!(stored.status, OutboxStatus::Failed);
            assert_eq!(stored.attempts, expected_attempts);
            assert!(stored.last_error.is_some());

            // Make the scheduled retry due now instead of waiting out the
            // backoff.
            assert!(outbox.mark_processing(&event.id, Utc::now()).await.expect("claim"));
            assert!(outbox
                .mark_failed(
                    &event.id,
                    stored.attempts,
                    Utc::now() - Duration::seconds(1),
                    "downstream unavailable",
                    Utc::now(),
                )
                .await
                .expect("rearm"));
        }

        // Third attempt is the last one before dead-lettering; it succeeds.
        assert!(dispatcher.run_once().await.expect("cycle"));
        let stored = outbox.find_by_id(&event.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, OutboxStatus::Sent);
        assert_eq!(stored.attempts, 2, "attempt count is untouched by the final success");
        assert_eq!(stored.last_error, None, "delivery clears the recorded error");
        assert_eq!(handler.delivered.load(Ordering::SeqCst), 3);

        // Nothing left to pick up.
        assert!(!dispatcher.run_once().await.expect("cycle"));
    }

    #[tokio::test]
    async fn exhausted_retries_park_the_event_dead() {
        let outbox = Arc::new(InMemoryOutboxRepository::default());
        let mut dispatcher = OutboxDispatcher::new(outbox.clone(), config(1));
        dispatcher.register(OutboxEventType::EmailSend, CountingHandler::failing());

        let event = enqueue_email(&outbox, "req-1").await;
        assert!(dispatcher.run_once().await.expect("cycle"));

        let stored = outbox.find_by_id(&event.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, OutboxStatus::Dead);
        assert_eq!(stored.attempts, 1);

        // Dead events leave the eligible pool for good.
        assert!(!dispatcher.run_once().await.expect("cycle"));
    }

    #[tokio::test]
    async fn events_without_a_handler_fail_instead_of_wedging() {
        let outbox = Arc::new(InMemoryOutboxRepository::default());
        let dispatcher = OutboxDispatcher::new(outbox.clone(), config(8));

        let event = enqueue_email(&outbox, "req-1").await;
        assert!(dispatcher.run_once().await.expect("cycle"));

        let stored = outbox.find_by_id(&event.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, OutboxStatus::Failed);
        assert_eq!(
            stored.last_error.as_deref(),
            Some("unhandled event type: email.send")
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let dispatcher = OutboxDispatcher::new(
            Arc::new(InMemoryOutboxRepository::default()),
            config(8),
        );
        assert_eq!(dispatcher.backoff_ms(0), 1_000);
        assert_eq!(dispatcher.backoff_ms(1), 2_000);
        assert_eq!(dispatcher.backoff_ms(5), 32_000);
        assert_eq!(dispatcher.backoff_ms(6), 60_000);
        assert_eq!(dispatcher.backoff_ms(63), 60_000);
    }
}
