use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use flowops_core::domain::action::{decode_trail, encode_trail};
use flowops_core::domain::customer::CustomerId;
use flowops_core::domain::handoff::{
    Handoff, HandoffId, HandoffPriority, HandoffReason, HandoffStatus,
};
use flowops_core::domain::interaction::Mode;
use flowops_core::domain::ticket::TicketId;

use super::{ClaimOutcome, HandoffRepository, RepositoryError};
use crate::DbPool;

pub struct SqlHandoffRepository {
    pool: DbPool,
}

impl SqlHandoffRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "id, customer_id, ticket_id, reason, priority, mode, confidence,
    status, claimed_by, claimed_at, resolved_by, resolved_at, resolution_notes, issues_json,
    actions_json, sla_due_at, sla_breached_at, created_at, updated_at";

#[async_trait::async_trait]
impl HandoffRepository for SqlHandoffRepository {
    async fn create(&self, handoff: Handoff) -> Result<(), RepositoryError> {
        let issues_json = serde_json::to_string(&handoff.issues)
            .map_err(|error| RepositoryError::Decode(format!("encode issues: {error}")))?;
        let actions_json = encode_trail(&handoff.actions)
            .map_err(|error| RepositoryError::Decode(format!("encode actions: {error}")))?;

        sqlx::query(
            "INSERT INTO handoff (
                id, customer_id, ticket_id, reason, priority, mode, confidence, status,
                claimed_by, claimed_at, resolved_by, resolved_at, resolution_notes,
                issues_json, actions_json, sla_due_at, sla_breached_at, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&handoff.id.0)
        .bind(&handoff.customer_id.0)
        .bind(handoff.ticket_id.as_ref().map(|id| id.0.as_str()))
        .bind(handoff.reason.as_str())
        .bind(handoff.priority.as_str())
        .bind(handoff.mode.as_str())
        .bind(handoff.confidence)
        .bind(handoff.status.as_str())
        .bind(handoff.claimed_by.as_deref())
        .bind(handoff.claimed_at.map(|value| value.to_rfc3339()))
        .bind(handoff.resolved_by.as_deref())
        .bind(handoff.resolved_at.map(|value| value.to_rfc3339()))
        .bind(handoff.resolution_notes.as_deref())
        .bind(&issues_json)
        .bind(&actions_json)
        .bind(handoff.sla_due_at.to_rfc3339())
        .bind(handoff.sla_breached_at.map(|value| value.to_rfc3339()))
        .bind(handoff.created_at.to_rfc3339())
        .bind(handoff.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &HandoffId) -> Result<Option<Handoff>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS}
             FROM handoff
             WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(handoff_from_row).transpose()
    }

    async fn list(
        &self,
        status: Option<HandoffStatus>,
        limit: u32,
    ) -> Result<Vec<Handoff>, RepositoryError> {
        let rows = if let Some(status) = status {
            sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS}
                 FROM handoff
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
                 FROM handoff
                 ORDER BY created_at DESC
                 LIMIT ?"
            ))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(handoff_from_row).collect()
    }

    async fn list_for_audit(
        &self,
        customer_id: &CustomerId,
        ticket_id: Option<&TicketId>,
    ) -> Result<Vec<Handoff>, RepositoryError> {
        let rows = if let Some(ticket_id) = ticket_id {
            sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS}
                 FROM handoff
                 WHERE customer_id = ? AND ticket_id = ?
                 ORDER BY created_at ASC"
            ))
            .bind(&customer_id.0)
            .bind(&ticket_id.0)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS}
                 FROM handoff
                 WHERE customer_id = ?
                 ORDER BY created_at ASC"
            ))
            .bind(&customer_id.0)
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(handoff_from_row).collect()
    }

    async fn claim(
        &self,
        id: &HandoffId,
        operator_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, RepositoryError> {
        let result = sqlx::query(
            "UPDATE handoff
             SET status = 'claimed', claimed_by = ?, claimed_at = ?, updated_at = ?
             WHERE id = ? AND status = 'pending' AND claimed_by IS NULL",
        )
        .bind(operator_id)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Ok(ClaimOutcome::Conflict);
        }

        match self.find_by_id(id).await? {
            Some(handoff) => Ok(ClaimOutcome::Claimed(handoff)),
            None => Ok(ClaimOutcome::Conflict),
        }
    }

    async fn resolve(
        &self,
        id: &HandoffId,
        operator_id: &str,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE handoff
             SET status = 'resolved', resolved_by = ?, resolved_at = ?,
                 resolution_notes = ?, updated_at = ?
             WHERE id = ? AND status = 'claimed'",
        )
        .bind(operator_id)
        .bind(now.to_rfc3339())
        .bind(notes)
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_sla_due(
        &self,
        now: DateTime<Utc>,
        batch: u32,
    ) -> Result<Vec<Handoff>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS}
             FROM handoff
             WHERE status = 'pending' AND sla_breached_at IS NULL AND sla_due_at <= ?
             ORDER BY sla_due_at ASC
             LIMIT ?"
        ))
        .bind(now.to_rfc3339())
        .bind(i64::from(batch))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(handoff_from_row).collect()
    }

    async fn mark_sla_breached(
        &self,
        id: &HandoffId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE handoff
             SET sla_breached_at = ?, priority = 'high', updated_at = ?
             WHERE id = ? AND status = 'pending' AND sla_breached_at IS NULL",
        )
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_by_status(&self, status: HandoffStatus) -> Result<i64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM handoff WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    async fn recent_resolutions(
        &self,
        limit: u32,
    ) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT created_at, resolved_at
             FROM handoff
             WHERE status = 'resolved' AND resolved_at IS NOT NULL
             ORDER BY resolved_at DESC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let created = parse_timestamp("created_at", row.try_get("created_at")?)?;
                let resolved = parse_timestamp("resolved_at", row.try_get("resolved_at")?)?;
                Ok((created, resolved))
            })
            .collect()
    }
}

fn handoff_from_row(row: SqliteRow) -> Result<Handoff, RepositoryError> {
    let reason_raw = row.try_get::<String, _>("reason")?;
    let reason = HandoffReason::parse(&reason_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown handoff reason `{reason_raw}`")))?;

    let priority_raw = row.try_get::<String, _>("priority")?;
    let priority = HandoffPriority::parse(&priority_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown handoff priority `{priority_raw}`"))
    })?;

    let mode_raw = row.try_get::<String, _>("mode")?;
    let mode = Mode::parse(&mode_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown mode `{mode_raw}`")))?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = HandoffStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown handoff status `{status_raw}`")))?;

    let issues = match row.try_get::<Option<String>, _>("issues_json")? {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|error| RepositoryError::Decode(format!("decode issues: {error}")))?,
        None => Vec::new(),
    };

    let actions_json = row.try_get::<String, _>("actions_json")?;
    let actions = decode_trail(&actions_json)
        .map_err(|error| RepositoryError::Decode(format!("decode actions: {error}")))?;

    Ok(Handoff {
        id: HandoffId(row.try_get("id")?),
        customer_id: CustomerId(row.try_get("customer_id")?),
        ticket_id: row.try_get::<Option<String>, _>("ticket_id")?.map(TicketId),
        reason,
        priority,
        mode,
        confidence: row.try_get("confidence")?,
        status,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: parse_optional_timestamp("claimed_at", row.try_get("claimed_at")?)?,
        resolved_by: row.try_get("resolved_by")?,
        resolved_at: parse_optional_timestamp("resolved_at", row.try_get("resolved_at")?)?,
        resolution_notes: row.try_get("resolution_notes")?,
        issues,
        actions,
        sla_due_at: parse_timestamp("sla_due_at", row.try_get("sla_due_at")?)?,
        sla_breached_at: parse_optional_timestamp(
            "sla_breached_at",
            row.try_get("sla_breached_at")?,
        )?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| RepositoryError::Decode(format!("invalid timestamp for `{column}`: {value}")))
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|raw| parse_timestamp(column, raw)).transpose()
}
