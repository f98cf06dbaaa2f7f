use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use flowops_core::domain::customer::CustomerId;
use flowops_core::domain::outbox::{
    IdempotencyKey, NewOutboxEvent, OutboxEvent, OutboxEventId, OutboxEventType, OutboxStatus,
};
use flowops_core::domain::prefixed_id;

use super::{EnqueueOutcome, OutboxRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOutboxRepository {
    pool: DbPool,
}

impl SqlOutboxRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "id, type, payload_json, status, attempts, next_attempt_at,
    last_error, idempotency_key, created_at, updated_at";

#[async_trait::async_trait]
impl OutboxRepository for SqlOutboxRepository {
    async fn enqueue(
        &self,
        event: NewOutboxEvent,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, RepositoryError> {
        let id = OutboxEventId(prefixed_id("evt_"));
        let result = sqlx::query(
            "INSERT INTO outbox_event (
                id, type, payload_json, status, attempts, next_attempt_at,
                last_error, idempotency_key, created_at, updated_at
             ) VALUES (?, ?, ?, 'pending', 0, ?, NULL, ?, ?, ?)",
        )
        .bind(&id.0)
        .bind(event.event_type.as_str())
        .bind(&event.payload_json)
        .bind(now.to_rfc3339())
        .bind(&event.idempotency_key.0)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => match self.find_by_id(&id).await? {
                Some(inserted) => Ok(EnqueueOutcome::Created(inserted)),
                None => Err(RepositoryError::Decode(format!(
                    "outbox event `{}` missing right after insert",
                    id.0
                ))),
            },
            Err(sqlx::Error::Database(db_error)) if db_error.is_unique_violation() => {
                match self.find_by_key(&event.idempotency_key).await? {
                    Some(existing) => Ok(EnqueueOutcome::AlreadyQueued(existing)),
                    None => Err(RepositoryError::Decode(format!(
                        "idempotency key `{}` collided but no event found",
                        event.idempotency_key.0
                    ))),
                }
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn find_by_id(
        &self,
        id: &OutboxEventId,
    ) -> Result<Option<OutboxEvent>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS}
             FROM outbox_event
             WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(event_from_row).transpose()
    }

    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<OutboxEvent>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS}
             FROM outbox_event
             WHERE idempotency_key = ?"
        ))
        .bind(&key.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(event_from_row).transpose()
    }

    async fn next_eligible(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxEvent>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS}
             FROM outbox_event
             WHERE status IN ('pending', 'failed') AND next_attempt_at <= ?
             ORDER BY next_attempt_at ASC, created_at ASC
             LIMIT 1"
        ))
        .bind(now.to_rfc3339())
        .fetch_optional(&self.pool)
        .await?;

        row.map(event_from_row).transpose()
    }

    async fn mark_processing(
        &self,
        id: &OutboxEventId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE outbox_event
             SET status = 'processing', updated_at = ?
             WHERE id = ? AND status IN ('pending', 'failed')",
        )
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_sent(
        &self,
        id: &OutboxEventId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE outbox_event
             SET status = 'sent', last_error = NULL, updated_at = ?
             WHERE id = ? AND status = 'processing'",
        )
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(
        &self,
        id: &OutboxEventId,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE outbox_event
             SET status = 'failed', attempts = ?, next_attempt_at = ?,
                 last_error = ?, updated_at = ?
             WHERE id = ? AND status = 'processing'",
        )
        .bind(i64::from(attempts))
        .bind(next_attempt_at.to_rfc3339())
        .bind(error)
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_dead(
        &self,
        id: &OutboxEventId,
        attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE outbox_event
             SET status = 'dead', attempts = ?, last_error = ?, updated_at = ?
             WHERE id = ? AND status = 'processing'",
        )
        .bind(i64::from(attempts))
        .bind(error)
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE outbox_event
             SET status = 'failed', last_error = 'released after stale processing claim',
                 next_attempt_at = ?, updated_at = ?
             WHERE status = 'processing' AND updated_at < ?",
        )
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list(
        &self,
        status: Option<OutboxStatus>,
        limit: u32,
    ) -> Result<Vec<OutboxEvent>, RepositoryError> {
        let rows = if let Some(status) = status {
            sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS}
                 FROM outbox_event
                 WHERE status = ?
                 ORDER BY created_at DESC
                 LIMIT ?"
            ))
            .bind(status.as_str())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS}
                 FROM outbox_event
                 ORDER BY created_at DESC
                 LIMIT ?"
            ))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(event_from_row).collect()
    }

    async fn list_customer_emails(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<OutboxEvent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS}
             FROM outbox_event
             WHERE type = 'email.send' AND idempotency_key LIKE ?
             ORDER BY created_at ASC"
        ))
        .bind(format!("email:{}:%", customer_id.0))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }
}

fn event_from_row(row: SqliteRow) -> Result<OutboxEvent, RepositoryError> {
    let type_raw = row.try_get::<String, _>("type")?;
    let event_type = OutboxEventType::parse(&type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown outbox type `{type_raw}`")))?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = OutboxStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown outbox status `{status_raw}`")))?;

    let attempts_raw = row.try_get::<i64, _>("attempts")?;
    let attempts = u32::try_from(attempts_raw)
        .map_err(|_| RepositoryError::Decode(format!("negative attempts `{attempts_raw}`")))?;

    Ok(OutboxEvent {
        id: OutboxEventId(row.try_get("id")?),
        event_type,
        payload_json: row.try_get("payload_json")?,
        status,
        attempts,
        next_attempt_at: parse_timestamp("next_attempt_at", row.try_get("next_attempt_at")?)?,
        last_error: row.try_get("last_error")?,
        idempotency_key: IdempotencyKey(row.try_get("idempotency_key")?),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| RepositoryError::Decode(format!("invalid timestamp for `{column}`: {value}")))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use flowops_core::domain::customer::CustomerId;
    use flowops_core::domain::handoff::HandoffId;
    use flowops_core::domain::outbox::{
        IdempotencyKey, NewOutboxEvent, OutboxEventType, OutboxStatus,
    };

    use super::SqlOutboxRepository;
    use crate::connect_with_settings;
    use crate::migrations::run_pending;
    use crate::repositories::{EnqueueOutcome, OutboxRepository};

    async fn repo() -> SqlOutboxRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");
        SqlOutboxRepository::new(pool)
    }

    fn email_event(customer: &str, request_id: &str) -> NewOutboxEvent {
        NewOutboxEvent {
            event_type: OutboxEventType::EmailSend,
            payload_json: r#"{"to":"customer@example.com"}"#.to_string(),
            idempotency_key: IdempotencyKey::email(
                &CustomerId(customer.to_string()),
                request_id,
            ),
        }
    }

    #[tokio::test]
    async fn duplicate_key_collapses_into_existing_event() {
        let repo = repo().await;
        let now = Utc::now();

        let first = repo.enqueue(email_event("cus_1", "req-1"), now).await.expect("first");
        let created = match first {
            EnqueueOutcome::Created(event) => event,
            EnqueueOutcome::AlreadyQueued(_) => panic!("first enqueue should create"),
        };

        let second = repo.enqueue(email_event("cus_1", "req-1"), now).await.expect("second");
        match second {
            EnqueueOutcome::AlreadyQueued(existing) => assert_eq!(existing.id, created.id),
            EnqueueOutcome::Created(_) => panic!("second enqueue should collapse"),
        }
    }

    #[tokio::test]
    async fn next_eligible_skips_future_attempts() {
        let repo = repo().await;
        let now = Utc::now();

        let event = repo
            .enqueue(email_event("cus_1", "req-1"), now)
            .await
            .expect("enqueue")
            .event()
            .clone();

        let eligible = repo.next_eligible(now).await.expect("eligible now");
        assert_eq!(eligible.map(|found| found.id), Some(event.id.clone()));

        repo.mark_processing(&event.id, now).await.expect("claim");
        let retry_at = now + Duration::seconds(60);
        repo.mark_failed(&event.id, 1, retry_at, "smtp timeout", now).await.expect("fail");

        assert!(
            repo.next_eligible(now).await.expect("eligible before retry").is_none(),
            "backed-off event should wait for its retry time",
        );
        let after = repo.next_eligible(retry_at).await.expect("eligible after retry");
        assert_eq!(after.map(|found| found.id), Some(event.id));
    }

    #[tokio::test]
    async fn processing_claim_is_single_winner() {
        let repo = repo().await;
        let now = Utc::now();
        let event = repo
            .enqueue(email_event("cus_1", "req-1"), now)
            .await
            .expect("enqueue")
            .event()
            .clone();

        assert!(repo.mark_processing(&event.id, now).await.expect("first claim"));
        assert!(
            !repo.mark_processing(&event.id, now).await.expect("second claim"),
            "a claimed event should refuse a second claim",
        );

        assert!(repo.mark_sent(&event.id, now).await.expect("sent"));
        let sent = repo.find_by_id(&event.id).await.expect("find").expect("event");
        assert_eq!(sent.status, OutboxStatus::Sent);
        assert!(
            !repo.mark_sent(&event.id, now).await.expect("sent again"),
            "a sent event stays sent",
        );
    }

    #[tokio::test]
    async fn dead_events_leave_the_eligible_pool() {
        let repo = repo().await;
        let now = Utc::now();
        let event = repo
            .enqueue(email_event("cus_1", "req-1"), now)
            .await
            .expect("enqueue")
            .event()
            .clone();

        repo.mark_processing(&event.id, now).await.expect("claim");
        assert!(repo.mark_dead(&event.id, 8, "exhausted retries", now).await.expect("dead"));

        let dead = repo.find_by_id(&event.id).await.expect("find").expect("event");
        assert_eq!(dead.status, OutboxStatus::Dead);
        assert_eq!(dead.attempts, 8);
        assert_eq!(dead.last_error.as_deref(), Some("exhausted retries"));

        let far_future = now + Duration::days(30);
        assert!(repo.next_eligible(far_future).await.expect("eligible").is_none());
    }

    #[tokio::test]
    async fn stale_processing_claims_are_released() {
        let repo = repo().await;
        let now = Utc::now();
        let event = repo
            .enqueue(email_event("cus_1", "req-1"), now)
            .await
            .expect("enqueue")
            .event()
            .clone();

        repo.mark_processing(&event.id, now).await.expect("claim");

        let before_cutoff = now - Duration::seconds(1);
        assert_eq!(
            repo.release_stale(before_cutoff, now).await.expect("release fresh"),
            0,
            "a fresh claim should survive",
        );

        let after_cutoff = now + Duration::seconds(600);
        assert_eq!(repo.release_stale(after_cutoff, after_cutoff).await.expect("release"), 1);

        let released = repo.find_by_id(&event.id).await.expect("find").expect("event");
        assert_eq!(released.status, OutboxStatus::Failed);
        assert!(repo.next_eligible(after_cutoff).await.expect("eligible").is_some());
    }

    #[tokio::test]
    async fn customer_email_listing_is_scoped_by_key_prefix() {
        let repo = repo().await;
        let now = Utc::now();

        repo.enqueue(email_event("cus_1", "req-1"), now).await.expect("enqueue");
        repo.enqueue(email_event("cus_2", "req-1"), now).await.expect("enqueue other");
        repo.enqueue(
            NewOutboxEvent {
                event_type: OutboxEventType::SlaBreachNotify,
                payload_json: "{}".to_string(),
                idempotency_key: IdempotencyKey::sla_breach(&HandoffId("hf_1".to_string())),
            },
            now,
        )
        .await
        .expect("enqueue breach");

        let emails = repo
            .list_customer_emails(&CustomerId("cus_1".to_string()))
            .await
            .expect("list emails");
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].idempotency_key.0, "email:cus_1:req-1");
    }
}
