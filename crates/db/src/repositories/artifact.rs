use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use flowops_core::domain::artifact::{AiArtifact, ArtifactId, ArtifactStatus, ArtifactType};
use flowops_core::domain::handoff::HandoffId;

use super::{ArtifactRepository, RepositoryError};
use crate::DbPool;

pub struct SqlArtifactRepository {
    pool: DbPool,
}

impl SqlArtifactRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ArtifactRepository for SqlArtifactRepository {
    async fn upsert(&self, artifact: AiArtifact) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO ai_artifact (
                id, handoff_id, type, status, input_json, output_json, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(handoff_id, type) DO UPDATE SET
                status = excluded.status,
                input_json = excluded.input_json,
                output_json = excluded.output_json,
                updated_at = excluded.updated_at",
        )
        .bind(&artifact.id.0)
        .bind(&artifact.handoff_id.0)
        .bind(artifact.artifact_type.as_str())
        .bind(artifact.status.as_str())
        .bind(&artifact.input_json)
        .bind(&artifact.output_json)
        .bind(artifact.created_at.to_rfc3339())
        .bind(artifact.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(
        &self,
        handoff_id: &HandoffId,
        artifact_type: ArtifactType,
    ) -> Result<Option<AiArtifact>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, handoff_id, type, status, input_json, output_json, created_at, updated_at
             FROM ai_artifact
             WHERE handoff_id = ? AND type = ?",
        )
        .bind(&handoff_id.0)
        .bind(artifact_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(artifact_from_row).transpose()
    }

    async fn list_for_handoff(
        &self,
        handoff_id: &HandoffId,
    ) -> Result<Vec<AiArtifact>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, handoff_id, type, status, input_json, output_json, created_at, updated_at
             FROM ai_artifact
             WHERE handoff_id = ?
             ORDER BY created_at ASC",
        )
        .bind(&handoff_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(artifact_from_row).collect()
    }
}

fn artifact_from_row(row: SqliteRow) -> Result<AiArtifact, RepositoryError> {
    let type_raw = row.try_get::<String, _>("type")?;
    let artifact_type = ArtifactType::parse(&type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown artifact type `{type_raw}`")))?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = ArtifactStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown artifact status `{status_raw}`"))
    })?;

    Ok(AiArtifact {
        id: ArtifactId(row.try_get("id")?),
        handoff_id: HandoffId(row.try_get("handoff_id")?),
        artifact_type,
        status,
        input_json: row.try_get("input_json")?,
        output_json: row.try_get("output_json")?,
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

    use flowops_core::domain::artifact::{AiArtifact, ArtifactId, ArtifactStatus, ArtifactType};
    use flowops_core::domain::customer::{Customer, CustomerId, Plan};
    use flowops_core::domain::handoff::{
        Handoff, HandoffId, HandoffPriority, HandoffReason, HandoffStatus,
    };
    use flowops_core::domain::interaction::Mode;

    use super::SqlArtifactRepository;
    use crate::connect_with_settings;
    use crate::migrations::run_pending;
    use crate::repositories::{
        ArtifactRepository, CustomerRepository, HandoffRepository, SqlCustomerRepository,
        SqlHandoffRepository,
    };

    async fn repos() -> (SqlArtifactRepository, SqlHandoffRepository, SqlCustomerRepository) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");
        (
            SqlArtifactRepository::new(pool.clone()),
            SqlHandoffRepository::new(pool.clone()),
            SqlCustomerRepository::new(pool),
        )
    }

    async fn seed_handoff(
        customers: &SqlCustomerRepository,
        handoffs: &SqlHandoffRepository,
        handoff_id: &str,
    ) {
        let now = Utc::now();
        customers
            .upsert(Customer {
                id: CustomerId("cus_1".to_string()),
                email: "cus_1@example.com".to_string(),
                plan: Plan::Pro,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("seed customer");
        handoffs
            .create(Handoff {
                id: HandoffId(handoff_id.to_string()),
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
                issues: Vec::new(),
                actions: Vec::new(),
                sla_due_at: now + Duration::minutes(60),
                sla_breached_at: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("seed handoff");
    }

    fn artifact(id: &str, handoff: &str, status: ArtifactStatus, output: &str) -> AiArtifact {
        let now = Utc::now();
        AiArtifact {
            id: ArtifactId(id.to_string()),
            handoff_id: HandoffId(handoff.to_string()),
            artifact_type: ArtifactType::ReplyDraft,
            status,
            input_json: r#"{"version":"handoff_context.v1"}"#.to_string(),
            output_json: output.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn upsert_then_find_round_trips() {
        let (artifacts, handoffs, customers) = repos().await;
        seed_handoff(&customers, &handoffs, "hf_1").await;

        artifacts
            .upsert(artifact("art_1", "hf_1", ArtifactStatus::Ok, r#"{"draftText":"..."}"#))
            .await
            .expect("upsert");

        let found = artifacts
            .find(&HandoffId("hf_1".to_string()), ArtifactType::ReplyDraft)
            .await
            .expect("find")
            .expect("artifact should exist");
        assert_eq!(found.status, ArtifactStatus::Ok);
        assert_eq!(found.output_json, r#"{"draftText":"..."}"#);
    }

    #[tokio::test]
    async fn regeneration_overwrites_in_place() {
        let (artifacts, handoffs, customers) = repos().await;
        seed_handoff(&customers, &handoffs, "hf_1").await;

        artifacts
            .upsert(artifact("art_1", "hf_1", ArtifactStatus::Failed, r#"{"error":"timeout"}"#))
            .await
            .expect("first upsert");
        artifacts
            .upsert(artifact("art_2", "hf_1", ArtifactStatus::Ok, r#"{"draftText":"..."}"#))
            .await
            .expect("second upsert");

        let listed = artifacts
            .list_for_handoff(&HandoffId("hf_1".to_string()))
            .await
            .expect("list");
        assert_eq!(listed.len(), 1, "one row per (handoff, type)");
        assert_eq!(listed[0].status, ArtifactStatus::Ok);
        assert_eq!(listed[0].id.0, "art_1", "original id survives regeneration");
    }

    #[tokio::test]
    async fn missing_artifact_is_none() {
        let (artifacts, handoffs, customers) = repos().await;
        seed_handoff(&customers, &handoffs, "hf_1").await;

        let found = artifacts
            .find(&HandoffId("hf_1".to_string()), ArtifactType::RiskAssessment)
            .await
            .expect("find");
        assert!(found.is_none());
    }
}
