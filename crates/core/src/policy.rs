use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::customer::Plan;

/// Deterministic decision thresholds. Injected everywhere so tests and
/// deployments can tune limits without touching the decision code.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyConfig {
    /// Largest refund the pipeline may approve without a human.
    pub max_auto_refund: Decimal,
    /// Confidence below this always escalates.
    pub confidence_threshold: f64,
    pub enterprise_requires_human: bool,
    pub sla_minutes_enterprise: i64,
    pub sla_minutes_pro: i64,
    pub sla_minutes_default: i64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_auto_refund: Decimal::from(100),
            confidence_threshold: 0.75,
            enterprise_requires_human: true,
            sla_minutes_enterprise: 15,
            sla_minutes_pro: 60,
            sla_minutes_default: 240,
        }
    }
}

// PartialEq is fine here: confidence_threshold is only ever set from config
// literals, never computed.
impl Eq for PolicyConfig {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundDecision {
    pub allow: bool,
    pub needs_human: bool,
    pub max_amount: Decimal,
    pub reason: String,
}

pub fn decide_refund(
    plan: Plan,
    refundable_amount: Decimal,
    config: &PolicyConfig,
) -> RefundDecision {
    if refundable_amount <= Decimal::ZERO {
        return RefundDecision {
            allow: false,
            needs_human: false,
            max_amount: Decimal::ZERO,
            reason: "No refundable amount available.".to_string(),
        };
    }

    if plan == Plan::Enterprise && config.enterprise_requires_human {
        return RefundDecision {
            allow: true,
            needs_human: true,
            max_amount: refundable_amount.min(config.max_auto_refund),
            reason: "Enterprise refunds require human approval.".to_string(),
        };
    }

    if refundable_amount > config.max_auto_refund {
        return RefundDecision {
            allow: true,
            needs_human: true,
            max_amount: config.max_auto_refund,
            reason: format!(
                "Refund exceeds €{}. Human approval required.",
                config.max_auto_refund
            ),
        };
    }

    RefundDecision {
        allow: true,
        needs_human: false,
        max_amount: refundable_amount,
        reason: "Refund is within auto-approval limits.".to_string(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub escalate: bool,
    pub reason: String,
}

/// Fail-safe ordering: a failed verification escalates before confidence is
/// even considered.
pub fn should_escalate(
    plan: Plan,
    confidence: f64,
    verification_passed: bool,
    config: &PolicyConfig,
) -> EscalationDecision {
    if !verification_passed {
        return EscalationDecision {
            escalate: true,
            reason: "Verification failed. Escalating to a human.".to_string(),
        };
    }

    if confidence < config.confidence_threshold {
        return EscalationDecision {
            escalate: true,
            reason: format!("Low confidence ({confidence:.2}). Escalating to a human."),
        };
    }

    if plan == Plan::Enterprise {
        return EscalationDecision {
            escalate: false,
            reason: "High-risk plan. Proceed cautiously.".to_string(),
        };
    }

    EscalationDecision {
        escalate: false,
        reason: "Within policy. No escalation required.".to_string(),
    }
}

pub fn sla_minutes(plan: Plan, config: &PolicyConfig) -> i64 {
    match plan {
        Plan::Enterprise => config.sla_minutes_enterprise,
        Plan::Pro => config.sla_minutes_pro,
        Plan::Free => config.sla_minutes_default,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConfidenceInput<'a> {
    pub tool_fetch_ok: bool,
    pub message: &'a str,
}

/// Seam for replacing the shipped heuristic with a calibrated model
/// without touching the orchestrator.
pub trait ConfidenceEstimator: Send + Sync {
    fn estimate(&self, input: &ConfidenceInput<'_>) -> f64;
}

#[derive(Default)]
pub struct HeuristicConfidence;

impl ConfidenceEstimator for HeuristicConfidence {
    fn estimate(&self, input: &ConfidenceInput<'_>) -> f64 {
        if !input.tool_fetch_ok {
            return 0.4;
        }
        if input.message.trim().len() < 10 {
            return 0.6;
        }
        0.85
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{
        decide_refund, should_escalate, sla_minutes, ConfidenceEstimator, ConfidenceInput,
        HeuristicConfidence, PolicyConfig,
    };
    use crate::domain::customer::Plan;

    fn config() -> PolicyConfig {
        PolicyConfig::default()
    }

    #[test]
    fn refund_within_limit_auto_approves() {
        let decision = decide_refund(Plan::Pro, Decimal::from(49), &config());
        assert!(decision.allow);
        assert!(!decision.needs_human);
        assert_eq!(decision.max_amount, Decimal::from(49));
    }

    #[test]
    fn refund_at_limit_still_auto_approves() {
        let decision = decide_refund(Plan::Pro, Decimal::from(100), &config());
        assert!(decision.allow);
        assert!(!decision.needs_human);
    }

    #[test]
    fn refund_above_limit_requires_human_and_caps_amount() {
        let decision = decide_refund(Plan::Pro, Decimal::from(250), &config());
        assert!(decision.allow);
        assert!(decision.needs_human);
        assert_eq!(decision.max_amount, Decimal::from(100));
    }

    #[test]
    fn enterprise_refund_always_requires_human() {
        let decision = decide_refund(Plan::Enterprise, Decimal::from(10), &config());
        assert!(decision.allow);
        assert!(decision.needs_human);
        assert_eq!(decision.max_amount, Decimal::from(10));
    }

    #[test]
    fn zero_refundable_amount_denies() {
        let decision = decide_refund(Plan::Pro, Decimal::ZERO, &config());
        assert!(!decision.allow);
        assert_eq!(decision.max_amount, Decimal::ZERO);
    }

    #[test]
    fn approved_amount_never_exceeds_refundable_or_cap() {
        for amount in [1i64, 49, 100, 101, 500, 10_000] {
            for plan in [Plan::Free, Plan::Pro, Plan::Enterprise] {
                let refundable = Decimal::from(amount);
                let decision = decide_refund(plan, refundable, &config());
                assert!(decision.max_amount <= refundable);
                if !decision.needs_human {
                    assert!(decision.max_amount <= config().max_auto_refund);
                }
            }
        }
    }

    #[test]
    fn failed_verification_escalates_even_at_full_confidence() {
        let decision = should_escalate(Plan::Free, 1.0, false, &config());
        assert!(decision.escalate);
        assert!(decision.reason.contains("Verification failed"));
    }

    #[test]
    fn low_confidence_escalates() {
        let decision = should_escalate(Plan::Free, 0.6, true, &config());
        assert!(decision.escalate);
        assert!(decision.reason.contains("Low confidence"));
    }

    #[test]
    fn confident_verified_request_does_not_escalate() {
        let decision = should_escalate(Plan::Pro, 0.85, true, &config());
        assert!(!decision.escalate);
    }

    #[test]
    fn sla_tightens_with_plan_tier() {
        let config = config();
        assert_eq!(sla_minutes(Plan::Enterprise, &config), 15);
        assert_eq!(sla_minutes(Plan::Pro, &config), 60);
        assert_eq!(sla_minutes(Plan::Free, &config), 240);
    }

    #[test]
    fn heuristic_confidence_matches_known_bands() {
        let estimator = HeuristicConfidence;
        assert_eq!(
            estimator.estimate(&ConfidenceInput { tool_fetch_ok: false, message: "long enough message" }),
            0.4
        );
        assert_eq!(
            estimator.estimate(&ConfidenceInput { tool_fetch_ok: true, message: "short" }),
            0.6
        );
        assert_eq!(
            estimator.estimate(&ConfidenceInput {
                tool_fetch_ok: true,
                message: "please refund my last invoice"
            }),
            0.85
        );
    }
}
