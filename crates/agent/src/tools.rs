use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use flowops_core::domain::customer::{CustomerId, Plan};
use flowops_core::domain::facts::{AccountFacts, ApiKeyStatus, BillingFacts, InvoiceStatus};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Unavailable(String),
}

/// Account lookup seam. The pipeline never talks to upstream systems
/// directly; swapping this out changes nothing downstream.
#[async_trait]
pub trait AccountTool: Send + Sync {
    async fn account_status(&self, customer_id: &CustomerId) -> Result<AccountFacts, ToolError>;
}

#[async_trait]
pub trait BillingTool: Send + Sync {
    async fn billing_summary(&self, customer_id: &CustomerId) -> Result<BillingFacts, ToolError>;
}

/// Fixture-backed account tool. Stands in for the upstream account API
/// until one is wired up.
#[derive(Clone, Debug)]
pub struct StaticAccountTool {
    pub facts: AccountFacts,
}

impl Default for StaticAccountTool {
    fn default() -> Self {
        Self {
            facts: AccountFacts {
                plan: Plan::Pro,
                api_key_status: ApiKeyStatus::Expired,
                email: "customer@example.com".to_string(),
            },
        }
    }
}

#[async_trait]
impl AccountTool for StaticAccountTool {
    async fn account_status(&self, customer_id: &CustomerId) -> Result<AccountFacts, ToolError> {
        if customer_id.0.trim().is_empty() {
            return Err(ToolError::InvalidInput("customerId is required".to_string()));
        }
        Ok(self.facts.clone())
    }
}

#[derive(Clone, Debug)]
pub struct StaticBillingTool {
    pub facts: BillingFacts,
}

impl Default for StaticBillingTool {
    fn default() -> Self {
        Self {
            facts: BillingFacts {
                last_invoice_id: "inv_123".to_string(),
                last_invoice_amount: Decimal::from(49),
                invoice_status: InvoiceStatus::Paid,
                refundable_amount: Decimal::from(49),
            },
        }
    }
}

#[async_trait]
impl BillingTool for StaticBillingTool {
    async fn billing_summary(&self, customer_id: &CustomerId) -> Result<BillingFacts, ToolError> {
        if customer_id.0.trim().is_empty() {
            return Err(ToolError::InvalidInput("customerId is required".to_string()));
        }
        Ok(self.facts.clone())
    }
}
