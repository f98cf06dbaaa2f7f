use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use flowops_core::domain::action::{decode_trail, encode_trail};
use flowops_core::domain::customer::CustomerId;
use flowops_core::domain::interaction::{Channel, Interaction, InteractionId, Mode};
use flowops_core::domain::ticket::TicketId;

use super::{InsertOutcome, InteractionRepository, RepositoryError};
use crate::DbPool;

pub struct SqlInteractionRepository {
    pool: DbPool,
}

impl SqlInteractionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "id, customer_id, ticket_id, request_id, channel, request_text,
    reply_text, mode, confidence, escalated, verified, actions_json, created_at";

#[async_trait::async_trait]
impl InteractionRepository for SqlInteractionRepository {
    async fn insert(&self, interaction: Interaction) -> Result<InsertOutcome, RepositoryError> {
        let actions_json = encode_trail(&interaction.actions)
            .map_err(|error| RepositoryError::Decode(format!("encode actions: {error}")))?;

        let result = sqlx::query(
            "INSERT INTO interaction (
                id, customer_id, ticket_id, request_id, channel, request_text,
                reply_text, mode, confidence, escalated, verified, actions_json, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&interaction.id.0)
        .bind(&interaction.customer_id.0)
        .bind(interaction.ticket_id.as_ref().map(|id| id.0.as_str()))
        .bind(&interaction.request_id)
        .bind(interaction.channel.as_str())
        .bind(&interaction.request_text)
        .bind(&interaction.reply_text)
        .bind(interaction.mode.as_str())
        .bind(interaction.confidence)
        .bind(interaction.escalated)
        .bind(interaction.verified)
        .bind(&actions_json)
        .bind(interaction.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(sqlx::Error::Database(db_error)) if db_error.is_unique_violation() => {
                Ok(InsertOutcome::Duplicate)
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn find_by_request(
        &self,
        customer_id: &CustomerId,
        request_id: &str,
    ) -> Result<Option<Interaction>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS}
             FROM interaction
             WHERE customer_id = ? AND request_id = ?"
        ))
        .bind(&customer_id.0)
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(interaction_from_row).transpose()
    }

    async fn list_recent(
        &self,
        customer_id: &CustomerId,
        limit: u32,
    ) -> Result<Vec<Interaction>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS}
             FROM interaction
             WHERE customer_id = ?
             ORDER BY created_at DESC
             LIMIT ?"
        ))
        .bind(&customer_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(interaction_from_row).collect()
    }

    async fn list_for_audit(
        &self,
        customer_id: &CustomerId,
        ticket_id: Option<&TicketId>,
    ) -> Result<Vec<Interaction>, RepositoryError> {
        let rows = if let Some(ticket_id) = ticket_id {
            sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS}
                 FROM interaction
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
                 FROM interaction
                 WHERE customer_id = ?
                 ORDER BY created_at ASC"
            ))
            .bind(&customer_id.0)
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(interaction_from_row).collect()
    }

    async fn count_all(&self) -> Result<i64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM interaction")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    async fn count_replayed(&self) -> Result<i64, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM interaction
             WHERE actions_json LIKE '%\"idempotency_replay\"%'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("count")?)
    }

    async fn recent_confidences(&self, limit: u32) -> Result<Vec<f64>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT confidence FROM interaction
             ORDER BY created_at DESC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|row| row.try_get("confidence").map_err(Into::into)).collect()
    }
}

fn interaction_from_row(row: SqliteRow) -> Result<Interaction, RepositoryError> {
    let channel_raw = row.try_get::<String, _>("channel")?;
    let channel = Channel::parse(&channel_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown channel `{channel_raw}`")))?;

    let mode_raw = row.try_get::<String, _>("mode")?;
    let mode = Mode::parse(&mode_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown mode `{mode_raw}`")))?;

    let actions_json = row.try_get::<String, _>("actions_json")?;
    let actions = decode_trail(&actions_json)
        .map_err(|error| RepositoryError::Decode(format!("decode actions: {error}")))?;

    Ok(Interaction {
        id: InteractionId(row.try_get("id")?),
        customer_id: CustomerId(row.try_get("customer_id")?),
        ticket_id: row.try_get::<Option<String>, _>("ticket_id")?.map(TicketId),
        request_id: row.try_get("request_id")?,
        channel,
        request_text: row.try_get("request_text")?,
        reply_text: row.try_get("reply_text")?,
        mode,
        confidence: row.try_get("confidence")?,
        escalated: row.try_get("escalated")?,
        verified: row.try_get("verified")?,
        actions,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| RepositoryError::Decode(format!("invalid timestamp for `{column}`: {value}")))
}
