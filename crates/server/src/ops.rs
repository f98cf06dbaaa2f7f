//! Operational and compliance routes.
//!
//! - `GET /ops/outbox?status=`            — recent outbox events
//! - `GET /ops/handoffs?status=&id=`      — handoff queue inspection
//! - `GET /ops/interactions/{customerId}` — recent interactions per customer
//! - `GET /metrics`                       — pipeline counters and drift
//! - `GET /audit/export.json`             — audit bundle as JSON
//! - `GET /audit/export.csv`              — audit bundle flattened to CSV

use axum::http::header::{HeaderName, CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flowops_core::audit::{flatten_bundle, to_csv, AuditBundle, AuditScope};
use flowops_core::domain::customer::CustomerId;
use flowops_core::domain::handoff::{HandoffId, HandoffStatus};
use flowops_core::domain::interaction::Interaction;
use flowops_core::domain::outbox::{OutboxEvent, OutboxStatus};
use flowops_core::domain::ticket::TicketId;

use crate::api::{ApiError, HandoffView};
use crate::bootstrap::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ops/outbox", get(list_outbox))
        .route("/ops/handoffs", get(list_ops_handoffs))
        .route("/ops/interactions/{customer_id}", get(list_interactions))
        .route("/metrics", get(metrics))
        .route("/audit/export.json", get(export_json))
        .route("/audit/export.csv", get(export_csv))
        .with_state(state)
}

const OPS_LIST_LIMIT: u32 = 50;
const INTERACTION_LIST_LIMIT: u32 = 20;

fn failure(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "ok": false, "error": error.into() })))
}

fn storage_error(error: flowops_db::RepositoryError) -> ApiError {
    tracing::error!(error = %error, "storage failure");
    failure(StatusCode::SERVICE_UNAVAILABLE, "storage temporarily unavailable")
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEventView {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub status: &'static str,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxEventView {
    fn from_event(event: &OutboxEvent) -> Self {
        Self {
            id: event.id.0.clone(),
            event_type: event.event_type.as_str(),
            status: event.status.as_str(),
            attempts: event.attempts,
            next_attempt_at: event.next_attempt_at,
            last_error: event.last_error.clone(),
            idempotency_key: event.idempotency_key.0.clone(),
            created_at: event.created_at,
            updated_at: event.updated_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct StatusQuery {
    status: Option<String>,
}

async fn list_outbox(
    Query(query): Query<StatusQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<OutboxEventView>>, ApiError> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            OutboxStatus::parse(raw)
                .ok_or_else(|| failure(StatusCode::BAD_REQUEST, "Unknown outbox status"))?,
        ),
    };

    let events = state.outbox.list(status, OPS_LIST_LIMIT).await.map_err(storage_error)?;
    Ok(Json(events.iter().map(OutboxEventView::from_event).collect()))
}

// ---------------------------------------------------------------------------
// Handoffs / interactions
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct OpsHandoffQuery {
    status: Option<String>,
    id: Option<String>,
}

async fn list_ops_handoffs(
    Query(query): Query<OpsHandoffQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<HandoffView>>, ApiError> {
    if let Some(id) = query.id {
        let found =
            state.handoffs.find_by_id(&HandoffId(id)).await.map_err(storage_error)?;
        return Ok(Json(found.iter().map(HandoffView::from_handoff).collect()));
    }

    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            HandoffStatus::parse(raw)
                .ok_or_else(|| failure(StatusCode::BAD_REQUEST, "Unknown handoff status"))?,
        ),
    };

    let handoffs = state.handoffs.list(status, OPS_LIST_LIMIT).await.map_err(storage_error)?;
    Ok(Json(handoffs.iter().map(HandoffView::from_handoff).collect()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionView {
    pub id: String,
    pub customer_id: String,
    pub ticket_id: Option<String>,
    pub request_id: String,
    pub channel: &'static str,
    pub mode: &'static str,
    pub confidence: f64,
    pub escalated: bool,
    pub verified: bool,
    pub request_text: String,
    pub reply_text: String,
    pub actions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl InteractionView {
    fn from_interaction(interaction: &Interaction) -> Self {
        Self {
            id: interaction.id.0.clone(),
            customer_id: interaction.customer_id.0.clone(),
            ticket_id: interaction.ticket_id.as_ref().map(|id| id.0.clone()),
            request_id: interaction.request_id.clone(),
            channel: interaction.channel.as_str(),
            mode: interaction.mode.as_str(),
            confidence: interaction.confidence,
            escalated: interaction.escalated,
            verified: interaction.verified,
            request_text: interaction.request_text.clone(),
            reply_text: interaction.reply_text.clone(),
            actions: interaction.actions.iter().map(|tag| tag.encode()).collect(),
            created_at: interaction.created_at,
        }
    }
}

async fn list_interactions(
    Path(customer_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<InteractionView>>, ApiError> {
    let interactions = state
        .interactions
        .list_recent(&CustomerId(customer_id), INTERACTION_LIST_LIMIT)
        .await
        .map_err(storage_error)?;
    Ok(Json(interactions.iter().map(InteractionView::from_interaction).collect()))
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Window compared against the preceding window for confidence drift.
const CONFIDENCE_WINDOW: u32 = 50;
/// Resolutions sampled for the average time-to-resolve.
const RESOLUTION_SAMPLE: u32 = 200;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub generated_at: DateTime<Utc>,
    pub counts: MetricCounts,
    pub handoffs: HandoffMetrics,
    pub idempotency: IdempotencyMetrics,
    pub rates: RateMetrics,
    pub confidence: ConfidenceMetrics,
}

#[derive(Debug, Serialize)]
pub struct MetricCounts {
    pub interactions: i64,
    pub handoffs: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffMetrics {
    pub pending: i64,
    pub claimed: i64,
    pub resolved: i64,
    pub avg_resolution_seconds: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyMetrics {
    pub replay_count: i64,
    pub replay_rate: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateMetrics {
    pub escalation_rate: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceMetrics {
    #[serde(rename = "N")]
    pub window: u32,
    pub avg_last_n: Option<f64>,
    pub avg_prev_n: Option<f64>,
    pub delta: Option<f64>,
}

fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn ratio(numerator: i64, denominator: i64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64
}

async fn metrics(State(state): State<AppState>) -> Result<Json<MetricsResponse>, ApiError> {
    let interactions = state.interactions.count_all().await.map_err(storage_error)?;
    let replay_count = state.interactions.count_replayed().await.map_err(storage_error)?;

    let pending =
        state.handoffs.count_by_status(HandoffStatus::Pending).await.map_err(storage_error)?;
    let claimed =
        state.handoffs.count_by_status(HandoffStatus::Claimed).await.map_err(storage_error)?;
    let resolved =
        state.handoffs.count_by_status(HandoffStatus::Resolved).await.map_err(storage_error)?;
    let total_handoffs = pending + claimed + resolved;

    let resolutions =
        state.handoffs.recent_resolutions(RESOLUTION_SAMPLE).await.map_err(storage_error)?;
    let durations: Vec<f64> = resolutions
        .iter()
        .map(|(created_at, resolved_at)| {
            (*resolved_at - *created_at).num_milliseconds() as f64 / 1000.0
        })
        .collect();

    // Newest first, so the head of the list is the current window and the
    // tail is the window before it.
    let confidences = state
        .interactions
        .recent_confidences(CONFIDENCE_WINDOW * 2)
        .await
        .map_err(storage_error)?;
    let split = confidences.len().min(CONFIDENCE_WINDOW as usize);
    let avg_last_n = average(&confidences[..split]);
    let avg_prev_n = average(&confidences[split..]);
    let delta = match (avg_last_n, avg_prev_n) {
        (Some(last), Some(prev)) => Some(last - prev),
        _ => None,
    };

    Ok(Json(MetricsResponse {
        generated_at: Utc::now(),
        counts: MetricCounts { interactions, handoffs: total_handoffs },
        handoffs: HandoffMetrics {
            pending,
            claimed,
            resolved,
            avg_resolution_seconds: average(&durations),
        },
        idempotency: IdempotencyMetrics {
            replay_count,
            replay_rate: ratio(replay_count, interactions),
        },
        rates: RateMetrics { escalation_rate: ratio(total_handoffs, interactions) },
        confidence: ConfidenceMetrics {
            window: CONFIDENCE_WINDOW,
            avg_last_n,
            avg_prev_n,
            delta,
        },
    }))
}

// ---------------------------------------------------------------------------
// Audit export
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuditQuery {
    customer_id: Option<String>,
    ticket_id: Option<String>,
}

/// Resolves the export scope and gathers every record for it. A `ticketId`
/// resolves to its customer first, so both parameters land on the same
/// customer-rooted bundle.
async fn build_bundle(state: &AppState, query: AuditQuery) -> Result<AuditBundle, ApiError> {
    let ticket_id = query.ticket_id.filter(|id| !id.is_empty()).map(TicketId);

    let customer_id = match (&ticket_id, query.customer_id.filter(|id| !id.is_empty())) {
        (Some(ticket_id), _) => {
            let ticket = state
                .tickets
                .find_by_id(ticket_id)
                .await
                .map_err(storage_error)?
                .ok_or_else(|| failure(StatusCode::NOT_FOUND, "Ticket not found"))?;
            ticket.customer_id
        }
        (None, Some(customer_id)) => CustomerId(customer_id),
        (None, None) => {
            return Err(failure(StatusCode::BAD_REQUEST, "Provide customerId or ticketId"))
        }
    };

    let customer =
        state.customers.find_by_id(&customer_id).await.map_err(storage_error)?;
    let tickets = state
        .tickets
        .list_for_customer(&customer_id, ticket_id.as_ref())
        .await
        .map_err(storage_error)?;
    let interactions = state
        .interactions
        .list_for_audit(&customer_id, ticket_id.as_ref())
        .await
        .map_err(storage_error)?;
    let handoffs = state
        .handoffs
        .list_for_audit(&customer_id, ticket_id.as_ref())
        .await
        .map_err(storage_error)?;
    let outbox =
        state.outbox.list_customer_emails(&customer_id).await.map_err(storage_error)?;

    Ok(AuditBundle {
        generated_at: Utc::now(),
        scope: AuditScope { customer_id, ticket_id },
        customer,
        tickets,
        interactions,
        handoffs,
        outbox,
    })
}

async fn export_json(
    Query(query): Query<AuditQuery>,
    State(state): State<AppState>,
) -> Result<Json<AuditBundle>, ApiError> {
    Ok(Json(build_bundle(&state, query).await?))
}

async fn export_csv(
    Query(query): Query<AuditQuery>,
    State(state): State<AppState>,
) -> Result<([(HeaderName, String); 2], String), ApiError> {
    let bundle = build_bundle(&state, query).await?;
    let csv = to_csv(&flatten_bundle(&bundle));

    Ok((
        [
            (CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"flowops_audit_{}.csv\"", bundle.scope.customer_id.0),
            ),
        ],
        csv,
    ))
}
