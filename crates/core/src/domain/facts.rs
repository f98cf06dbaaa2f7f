use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::customer::Plan;

/// Ground-truth facts fetched from the account system before any decision
/// is made. The verifier treats these as authoritative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFacts {
    pub plan: Plan,
    pub api_key_status: ApiKeyStatus,
    pub email: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyStatus {
    Active,
    Expired,
    Revoked,
}

impl ApiKeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingFacts {
    pub last_invoice_id: String,
    pub last_invoice_amount: Decimal,
    pub invoice_status: InvoiceStatus,
    pub refundable_amount: Decimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Paid,
    Open,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Open => "open",
            Self::Void => "void",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "paid" => Some(Self::Paid),
            "open" => Some(Self::Open),
            "void" => Some(Self::Void),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ApiKeyStatus, InvoiceStatus};

    #[test]
    fn api_key_status_round_trips_from_storage_encoding() {
        for status in [ApiKeyStatus::Active, ApiKeyStatus::Expired, ApiKeyStatus::Revoked] {
            assert_eq!(ApiKeyStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn invoice_status_round_trips_from_storage_encoding() {
        for status in [InvoiceStatus::Paid, InvoiceStatus::Open, InvoiceStatus::Void] {
            assert_eq!(InvoiceStatus::parse(status.as_str()), Some(status));
        }
    }
}
