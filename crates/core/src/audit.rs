use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::action::ActionTag;
use crate::domain::customer::{Customer, CustomerId};
use crate::domain::handoff::Handoff;
use crate::domain::interaction::Interaction;
use crate::domain::outbox::OutboxEvent;
use crate::domain::ticket::{Ticket, TicketId};

/// Everything known about one customer (optionally narrowed to one ticket),
/// assembled for export. The JSON form serializes this struct directly; the
/// CSV form goes through [`flatten_bundle`].
#[derive(Clone, Debug, Serialize)]
pub struct AuditBundle {
    pub generated_at: DateTime<Utc>,
    pub scope: AuditScope,
    pub customer: Option<Customer>,
    pub tickets: Vec<Ticket>,
    pub interactions: Vec<Interaction>,
    pub handoffs: Vec<Handoff>,
    pub outbox: Vec<OutboxEvent>,
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditScope {
    pub customer_id: CustomerId,
    pub ticket_id: Option<TicketId>,
}

/// One CSV row as ordered `(header, value)` pairs. Different kinds carry
/// different columns; [`to_csv`] unions the headers in first-seen order.
pub type AuditRow = Vec<(&'static str, String)>;

pub fn flatten_bundle(bundle: &AuditBundle) -> Vec<AuditRow> {
    let mut rows = Vec::new();

    for interaction in &bundle.interactions {
        rows.push(vec![
            ("kind", "interaction".to_string()),
            ("id", interaction.id.0.clone()),
            ("customer_id", interaction.customer_id.0.clone()),
            ("ticket_id", opt_id(interaction.ticket_id.as_ref().map(|id| id.0.as_str()))),
            ("created_at", interaction.created_at.to_rfc3339()),
            ("mode", interaction.mode.as_str().to_string()),
            ("confidence", interaction.confidence.to_string()),
            ("verified", interaction.verified.to_string()),
            ("escalated", interaction.escalated.to_string()),
            ("request_id", interaction.request_id.clone()),
            ("request_text", interaction.request_text.clone()),
            ("reply_text", interaction.reply_text.clone()),
            ("actions", encode_tags(&interaction.actions)),
        ]);
    }

    for handoff in &bundle.handoffs {
        rows.push(vec![
            ("kind", "handoff".to_string()),
            ("id", handoff.id.0.clone()),
            ("customer_id", handoff.customer_id.0.clone()),
            ("ticket_id", opt_id(handoff.ticket_id.as_ref().map(|id| id.0.as_str()))),
            ("created_at", handoff.created_at.to_rfc3339()),
            ("status", handoff.status.as_str().to_string()),
            ("priority", handoff.priority.as_str().to_string()),
            ("reason", handoff.reason.as_str().to_string()),
            ("confidence", handoff.confidence.map(|value| value.to_string()).unwrap_or_default()),
            ("claimed_by", handoff.claimed_by.clone().unwrap_or_default()),
            ("claimed_at", opt_time(handoff.claimed_at)),
            ("resolved_by", handoff.resolved_by.clone().unwrap_or_default()),
            ("resolved_at", opt_time(handoff.resolved_at)),
            ("resolution_notes", handoff.resolution_notes.clone().unwrap_or_default()),
            ("issues", serde_json::to_string(&handoff.issues).unwrap_or_default()),
            ("actions", encode_tags(&handoff.actions)),
        ]);
    }

    for event in &bundle.outbox {
        rows.push(vec![
            ("kind", "outbox".to_string()),
            ("id", event.id.0.clone()),
            ("type", event.event_type.as_str().to_string()),
            ("status", event.status.as_str().to_string()),
            ("attempts", event.attempts.to_string()),
            ("idempotency_key", event.idempotency_key.0.clone()),
            ("next_attempt_at", event.next_attempt_at.to_rfc3339()),
            ("last_error", event.last_error.clone().unwrap_or_default()),
            ("created_at", event.created_at.to_rfc3339()),
        ]);
    }

    rows
}

/// Renders rows to CSV. Headers are the union of all row columns in
/// first-seen order; rows missing a column emit an empty cell.
pub fn to_csv(rows: &[AuditRow]) -> String {
    if rows.is_empty() {
        return String::new();
    }

    let mut headers: Vec<&'static str> = Vec::new();
    for row in rows {
        for (header, _) in row {
            if !headers.contains(header) {
                headers.push(header);
            }
        }
    }

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(headers.iter().map(|header| escape_cell(header)).collect::<Vec<_>>().join(","));

    for row in rows {
        let line = headers
            .iter()
            .map(|header| {
                row.iter()
                    .find(|(name, _)| name == header)
                    .map(|(_, value)| escape_cell(value))
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join(",");
        lines.push(line);
    }

    lines.join("\n")
}

fn escape_cell(value: &str) -> String {
    let needs_quoting = value.contains('"') || value.contains(',') || value.contains('\n');
    if needs_quoting {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn encode_tags(tags: &[ActionTag]) -> String {
    serde_json::to_string(tags).unwrap_or_default()
}

fn opt_id(value: Option<&str>) -> String {
    value.unwrap_or_default().to_string()
}

fn opt_time(value: Option<DateTime<Utc>>) -> String {
    value.map(|time| time.to_rfc3339()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{flatten_bundle, to_csv, AuditBundle, AuditScope};
    use crate::domain::action::ActionTag;
    use crate::domain::customer::CustomerId;
    use crate::domain::interaction::{Channel, Interaction, InteractionId, Mode};

    fn bundle_with_one_interaction(reply_text: &str) -> AuditBundle {
        AuditBundle {
            generated_at: Utc::now(),
            scope: AuditScope { customer_id: CustomerId("cus_1".to_string()), ticket_id: None },
            customer: None,
            tickets: Vec::new(),
            interactions: vec![Interaction {
                id: InteractionId("int_1".to_string()),
                customer_id: CustomerId("cus_1".to_string()),
                ticket_id: None,
                request_id: "req-1".to_string(),
                channel: Channel::Chat,
                request_text: "refund please".to_string(),
                reply_text: reply_text.to_string(),
                mode: Mode::Live,
                confidence: 0.85,
                escalated: false,
                verified: true,
                actions: vec![ActionTag::RefundAutoApproved],
                created_at: Utc::now(),
            }],
            handoffs: Vec::new(),
            outbox: Vec::new(),
        }
    }

    #[test]
    fn empty_bundle_renders_empty_csv() {
        let mut bundle = bundle_with_one_interaction("x");
        bundle.interactions.clear();
        assert_eq!(to_csv(&flatten_bundle(&bundle)), "");
    }

    #[test]
    fn header_row_comes_from_first_seen_columns() {
        let bundle = bundle_with_one_interaction("all good");
        let csv = to_csv(&flatten_bundle(&bundle));
        let header = csv.lines().next().expect("csv should have a header line");
        assert!(header.starts_with("kind,id,customer_id"));
    }

    #[test]
    fn cells_with_commas_or_quotes_are_quoted_and_doubled() {
        let bundle = bundle_with_one_interaction("hello, \"world\"");
        let csv = to_csv(&flatten_bundle(&bundle));
        assert!(csv.contains("\"hello, \"\"world\"\"\""));
    }

    #[test]
    fn action_trail_is_embedded_as_json() {
        let bundle = bundle_with_one_interaction("ok");
        let rows = flatten_bundle(&bundle);
        let actions = rows[0]
            .iter()
            .find(|(name, _)| *name == "actions")
            .map(|(_, value)| value.clone())
            .expect("interaction row should carry actions");
        assert_eq!(actions, r#"["refund_auto_approved"]"#);
    }
}
