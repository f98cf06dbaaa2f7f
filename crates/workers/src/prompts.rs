//! Prompt builders and output schemas for the generated artifacts.
//!
//! Every prompt pins the model to the context bundle as the only source
//! of facts; the schemas are enforced server side via structured outputs.

use std::sync::OnceLock;

use serde_json::{json, Value};

fn bundle_user_prompt(bundle_json: &str, task: &str) -> String {
    format!("CONTEXT (authoritative JSON):\n{bundle_json}\n\nTask:\n{task}\n")
}

pub fn reply_draft_prompt(bundle_json: &str) -> (String, String) {
    let system = concat!(
        "You draft customer support replies for a human operator.\n",
        "Rules:\n",
        "- Do NOT promise actions you cannot verify from CONTEXT.\n",
        "- Only use facts in CONTEXT.\n",
        "- If uncertain, say \"I will confirm\" instead of inventing.\n",
        "- Output JSON only.\n",
    )
    .to_string();
    let user = bundle_user_prompt(
        bundle_json,
        "Draft a customer-facing reply the human operator can approve.\n\
         Include citations that point to which facts you used (short bullet-like strings).",
    );
    (system, user)
}

pub fn risk_assessment_prompt(bundle_json: &str) -> (String, String) {
    let system = concat!(
        "You assist human operators by highlighting potential operational risk.\n",
        "Rules:\n",
        "- You do NOT make decisions.\n",
        "- You do NOT approve or deny actions.\n",
        "- You ONLY assess risk based on provided CONTEXT.\n",
        "- If uncertain, choose lower risk.\n",
        "- Use plain English only.\n",
        "- Do not mix languages.\n",
        "- Output JSON only.\n",
    )
    .to_string();
    let user = bundle_user_prompt(
        bundle_json,
        "Assess the potential operational risk of this handoff.\n\
         Explain your reasoning clearly for a human operator.",
    );
    (system, user)
}

pub fn resolution_suggestion_prompt(bundle_json: &str) -> (String, String) {
    let system = concat!(
        "You are an operations assistant producing a trustworthy resolution \
         suggestion for a human operator.\n",
        "Rules:\n",
        "- Only use facts present in CONTEXT.\n",
        "- Do NOT invent details.\n",
        "- Do NOT resolve automatically.\n",
        "- Explicitly list uncertainties.\n",
        "- If information is missing, prefer suggestedCategory = \"needs_more_info\".\n",
        "- Provide internal notes. Customer message is optional.\n",
        "- Output JSON only.\n",
    )
    .to_string();
    let user = bundle_user_prompt(
        bundle_json,
        "Suggest how the human operator could resolve this handoff.\n\
         Include the key facts you relied on and any uncertainties.",
    );
    (system, user)
}

pub fn reply_draft_schema() -> &'static Value {
    static SCHEMA: OnceLock<Value> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "version": { "type": "string", "enum": ["reply_draft.v1"] },
                "generatedAt": { "type": "string" },
                "handoffId": { "type": "string" },
                "draftText": { "type": "string", "minLength": 40, "maxLength": 1200 },
                "tone": { "type": "string", "enum": ["neutral", "empathetic", "concise"] },
                "citations": {
                    "type": "array",
                    "minItems": 1,
                    "maxItems": 10,
                    "items": { "type": "string", "minLength": 5, "maxLength": 140 }
                },
                "disclaimers": {
                    "type": "array",
                    "minItems": 0,
                    "maxItems": 5,
                    "items": { "type": "string", "minLength": 5, "maxLength": 160 }
                }
            },
            "required": [
                "version", "generatedAt", "handoffId",
                "draftText", "tone", "citations", "disclaimers"
            ]
        })
    })
}

pub fn risk_assessment_schema() -> &'static Value {
    static SCHEMA: OnceLock<Value> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "version": { "type": "string", "enum": ["risk_assessment.v1"] },
                "generatedAt": { "type": "string" },
                "handoffId": { "type": "string" },
                "riskLevel": { "type": "string", "enum": ["low", "medium", "high"] },
                "reasons": {
                    "type": "array",
                    "minItems": 1,
                    "maxItems": 6,
                    "items": { "type": "string", "minLength": 10, "maxLength": 160 }
                },
                "attentionFlags": {
                    "type": "array",
                    "minItems": 0,
                    "maxItems": 6,
                    "items": {
                        "type": "string",
                        "enum": [
                            "sla_near_breach",
                            "ambiguous_customer_intent",
                            "policy_edge_case",
                            "missing_information",
                            "repeat_escalation",
                            "financial_sensitivity"
                        ]
                    }
                }
            },
            "required": [
                "version", "generatedAt", "handoffId",
                "riskLevel", "reasons", "attentionFlags"
            ]
        })
    })
}

pub fn resolution_suggestion_schema() -> &'static Value {
    static SCHEMA: OnceLock<Value> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "version": { "type": "string", "enum": ["resolution_suggestion.v1"] },
                "generatedAt": { "type": "string" },
                "handoffId": { "type": "string" },
                "suggestedCategory": {
                    "type": "string",
                    "enum": [
                        "refund_possible",
                        "refund_not_allowed",
                        "billing_issue",
                        "technical_issue",
                        "account_access",
                        "policy_exception",
                        "needs_more_info",
                        "escalate_to_supervisor",
                        "other"
                    ]
                },
                "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                "uncertainties": {
                    "type": "array",
                    "maxItems": 8,
                    "items": { "type": "string", "minLength": 5, "maxLength": 160 }
                },
                "keyFactsUsed": {
                    "type": "array",
                    "maxItems": 10,
                    "items": { "type": "string", "minLength": 5, "maxLength": 160 }
                },
                "suggestedInternalNotes": { "type": "string", "minLength": 10, "maxLength": 600 },
                "suggestedCustomerMessage": { "type": "string", "maxLength": 1200 }
            },
            "required": [
                "version", "generatedAt", "handoffId",
                "suggestedCategory", "confidence", "uncertainties",
                "keyFactsUsed", "suggestedInternalNotes"
            ]
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_pin_the_context_bundle() {
        for (system, user) in [
            reply_draft_prompt("{\"version\":\"handoff_context.v1\"}"),
            risk_assessment_prompt("{\"version\":\"handoff_context.v1\"}"),
            resolution_suggestion_prompt("{\"version\":\"handoff_context.v1\"}"),
        ] {
            assert!(system.contains("Output JSON only."));
            assert!(user.starts_with("CONTEXT (authoritative JSON):\n"));
            assert!(user.contains("handoff_context.v1"));
            assert!(user.contains("Task:\n"));
        }
    }

    #[test]
    fn schemas_reject_unknown_keys_and_pin_versions() {
        let cases = [
            (reply_draft_schema(), "reply_draft.v1"),
            (risk_assessment_schema(), "risk_assessment.v1"),
            (resolution_suggestion_schema(), "resolution_suggestion.v1"),
        ];
        for (schema, version) in cases {
            assert_eq!(schema["additionalProperties"], serde_json::json!(false));
            assert_eq!(schema["properties"]["version"]["enum"][0], version);
        }
    }
}
