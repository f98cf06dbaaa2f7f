use serde::{Deserialize, Serialize};

use crate::domain::facts::{AccountFacts, BillingFacts};
use crate::policy::RefundDecision;

/// Checks a drafted reply against the facts the tools actually returned.
///
/// Matching is literal lowercase substring search: if the draft brings up a
/// topic ("plan:", "api key", "last invoice") the corresponding fact value
/// must appear verbatim. Silence about a topic is never an issue.
#[derive(Clone, Debug, PartialEq)]
pub struct VerificationInput<'a> {
    pub reply_draft: &'a str,
    pub account: &'a AccountFacts,
    pub billing: &'a BillingFacts,
    pub claimed_refund: Option<&'a RefundDecision>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub passed: bool,
    pub issues: Vec<String>,
}

pub fn verify_reply(input: &VerificationInput<'_>) -> VerificationOutcome {
    let mut issues = Vec::new();
    let draft = input.reply_draft.to_lowercase();

    if draft.contains("plan:") && !draft.contains(input.account.plan.as_str()) {
        issues.push("Reply mentions plan but does not match the account plan.".to_string());
    }

    if draft.contains("api key") && !draft.contains(input.account.api_key_status.as_str()) {
        issues.push("Reply mentions API key status but does not match tool output.".to_string());
    }

    if draft.contains("last invoice")
        && !draft.contains(&input.billing.last_invoice_id.to_lowercase())
    {
        issues.push("Reply mentions last invoice but invoice ID does not match.".to_string());
    }

    if draft.contains("last invoice") && !draft.contains(input.billing.invoice_status.as_str()) {
        issues
            .push("Reply mentions invoice but does not include correct invoice status.".to_string());
    }

    if let Some(refund) = input.claimed_refund {
        // Needs-human refunds still quote an eligible amount, so they are
        // held to the same amount checks as auto-approved ones.
        let approved = refund.allow;

        if approved && refund.max_amount > input.billing.refundable_amount {
            issues.push(format!(
                "Refund amount (€{}) exceeds refundable amount (€{}).",
                refund.max_amount, input.billing.refundable_amount
            ));
        }

        if approved && !draft.contains(&format!("€{}", refund.max_amount)) {
            issues.push(
                "Reply claims refund approval but does not include the approved amount."
                    .to_string(),
            );
        }

        if !approved && draft.contains("refund") && draft.contains("approved") {
            issues.push("Reply suggests refund approval but refund was not approved.".to_string());
        }
    }

    VerificationOutcome { passed: issues.is_empty(), issues }
}
