use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use flowops_core::domain::customer::{Customer, CustomerId, Plan};

use super::{CustomerRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCustomerRepository {
    pool: DbPool,
}

impl SqlCustomerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CustomerRepository for SqlCustomerRepository {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, email, plan, created_at, updated_at
             FROM customer
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(customer_from_row).transpose()
    }

    async fn upsert(&self, customer: Customer) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO customer (id, email, plan, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                plan = excluded.plan,
                updated_at = excluded.updated_at",
        )
        .bind(&customer.id.0)
        .bind(&customer.email)
        .bind(customer.plan.as_str())
        .bind(customer.created_at.to_rfc3339())
        .bind(customer.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn customer_from_row(row: SqliteRow) -> Result<Customer, RepositoryError> {
    let plan_raw = row.try_get::<String, _>("plan")?;
    let plan = Plan::parse(&plan_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown plan `{plan_raw}`")))?;

    Ok(Customer {
        id: CustomerId(row.try_get("id")?),
        email: row.try_get("email")?,
        plan,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| RepositoryError::Decode(format!("invalid timestamp for `{column}`: {value}")))
}
