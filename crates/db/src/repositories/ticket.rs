use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use flowops_core::domain::customer::CustomerId;
use flowops_core::domain::ticket::{Ticket, TicketId, TicketPriority, TicketStatus};

use super::{RepositoryError, TicketRepository};
use crate::DbPool;

pub struct SqlTicketRepository {
    pool: DbPool,
}

impl SqlTicketRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TicketRepository for SqlTicketRepository {
    async fn find_by_id(&self, id: &TicketId) -> Result<Option<Ticket>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, customer_id, subject, summary, priority, status, created_at, updated_at
             FROM ticket
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ticket_from_row).transpose()
    }

    async fn save(&self, ticket: Ticket) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO ticket (
                id, customer_id, subject, summary, priority, status, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                customer_id = excluded.customer_id,
                subject = excluded.subject,
                summary = excluded.summary,
                priority = excluded.priority,
                status = excluded.status,
                updated_at = excluded.updated_at",
        )
        .bind(&ticket.id.0)
        .bind(&ticket.customer_id.0)
        .bind(&ticket.subject)
        .bind(&ticket.summary)
        .bind(ticket.priority.as_str())
        .bind(ticket.status.as_str())
        .bind(ticket.created_at.to_rfc3339())
        .bind(ticket.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_customer(
        &self,
        customer_id: &CustomerId,
        ticket_id: Option<&TicketId>,
    ) -> Result<Vec<Ticket>, RepositoryError> {
        let rows = if let Some(ticket_id) = ticket_id {
            sqlx::query(
                "SELECT id, customer_id, subject, summary, priority, status, created_at, updated_at
                 FROM ticket
                 WHERE customer_id = ? AND id = ?
                 ORDER BY created_at DESC",
            )
            .bind(&customer_id.0)
            .bind(&ticket_id.0)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT id, customer_id, subject, summary, priority, status, created_at, updated_at
                 FROM ticket
                 WHERE customer_id = ?
                 ORDER BY created_at DESC",
            )
            .bind(&customer_id.0)
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(ticket_from_row).collect()
    }

    async fn mark_resolved(
        &self,
        id: &TicketId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE ticket
             SET status = 'resolved', updated_at = ?
             WHERE id = ? AND status NOT IN ('resolved', 'closed')",
        )
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn ticket_from_row(row: SqliteRow) -> Result<Ticket, RepositoryError> {
    let priority_raw = row.try_get::<String, _>("priority")?;
    let priority = TicketPriority::parse(&priority_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown ticket priority `{priority_raw}`"))
    })?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = TicketStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown ticket status `{status_raw}`")))?;

    Ok(Ticket {
        id: TicketId(row.try_get("id")?),
        customer_id: CustomerId(row.try_get("customer_id")?),
        subject: row.try_get("subject")?,
        summary: row.try_get("summary")?,
        priority,
        status,
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
    use chrono::Utc;

    use flowops_core::domain::customer::{Customer, CustomerId, Plan};
    use flowops_core::domain::ticket::{Ticket, TicketId, TicketPriority, TicketStatus};

    use super::SqlTicketRepository;
    use crate::connect_with_settings;
    use crate::migrations::run_pending;
    use crate::repositories::{CustomerRepository, SqlCustomerRepository, TicketRepository};

    async fn repos() -> (SqlTicketRepository, SqlCustomerRepository) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");
        (SqlTicketRepository::new(pool.clone()), SqlCustomerRepository::new(pool))
    }

    async fn seed_customer(customers: &SqlCustomerRepository, id: &str) {
        let now = Utc::now();
        customers
            .upsert(Customer {
                id: CustomerId(id.to_string()),
                email: format!("{id}@example.com"),
                plan: Plan::Pro,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("seed customer");
    }

    fn ticket(id: &str, customer: &str) -> Ticket {
        let now = Utc::now();
        Ticket {
            id: TicketId(id.to_string()),
            customer_id: CustomerId(customer.to_string()),
            subject: "Refund request".to_string(),
            summary: "please refund my last invoice".to_string(),
            priority: TicketPriority::Normal,
            status: TicketStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn save_then_find_round_trips() {
        let (tickets, customers) = repos().await;
        seed_customer(&customers, "cus_1").await;
        tickets.save(ticket("tkt_1", "cus_1")).await.expect("save");

        let found = tickets
            .find_by_id(&TicketId("tkt_1".to_string()))
            .await
            .expect("find")
            .expect("ticket should exist");
        assert_eq!(found.status, TicketStatus::Open);
        assert_eq!(found.priority, TicketPriority::Normal);
    }

    #[tokio::test]
    async fn mark_resolved_is_conditional_on_open_status() {
        let (tickets, customers) = repos().await;
        seed_customer(&customers, "cus_1").await;
        tickets.save(ticket("tkt_1", "cus_1")).await.expect("save");

        let now = Utc::now();
        assert!(tickets.mark_resolved(&TicketId("tkt_1".to_string()), now).await.expect("first"));
        assert!(
            !tickets.mark_resolved(&TicketId("tkt_1".to_string()), now).await.expect("second"),
            "already-resolved ticket should not change again",
        );

        let found = tickets
            .find_by_id(&TicketId("tkt_1".to_string()))
            .await
            .expect("find")
            .expect("ticket should exist");
        assert_eq!(found.status, TicketStatus::Resolved);
    }

    #[tokio::test]
    async fn list_for_customer_can_narrow_to_one_ticket() {
        let (tickets, customers) = repos().await;
        seed_customer(&customers, "cus_1").await;
        tickets.save(ticket("tkt_1", "cus_1")).await.expect("save");
        tickets.save(ticket("tkt_2", "cus_1")).await.expect("save");

        let all = tickets
            .list_for_customer(&CustomerId("cus_1".to_string()), None)
            .await
            .expect("list");
        assert_eq!(all.len(), 2);

        let narrowed = tickets
            .list_for_customer(
                &CustomerId("cus_1".to_string()),
                Some(&TicketId("tkt_2".to_string())),
            )
            .await
            .expect("list narrowed");
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].id.0, "tkt_2");
    }
}
