//! Operator-facing API routes.
//!
//! - `POST /chat`                                — run the support pipeline
//! - `GET  /handoffs?includeSignals=`            — handoff queue, optionally decorated
//! - `GET  /handoffs/{id}`                       — single handoff with parsed trails
//! - `POST /handoffs/{id}/claim`                 — exclusive claim (operator/supervisor)
//! - `POST /handoffs/{id}/resolve`               — resolve with ownership rules
//! - `GET  /handoffs/{id}/ai/summary`            — stored summary artifact
//! - `POST /handoffs/{id}/ai/draft`              — enqueue reply draft generation
//! - `POST /handoffs/{id}/ai/risk`               — enqueue risk assessment
//! - `POST /handoffs/{id}/ai/resolution-suggestion` — enqueue resolution suggestion

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use flowops_agent::{ChatRequest, ChatResponse, HandoffError};
use flowops_core::domain::artifact::{AiArtifact, ArtifactStatus, ArtifactType};
use flowops_core::domain::handoff::{Handoff, HandoffId};
use flowops_core::errors::{ApplicationError, InterfaceError};

use crate::auth::{authenticate, AuthRejection};
use crate::bootstrap::AppState;

pub type ApiError = (StatusCode, Json<Value>);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/handoffs", get(list_handoffs))
        .route("/handoffs/{id}", get(get_handoff))
        .route("/handoffs/{id}/claim", post(claim_handoff))
        .route("/handoffs/{id}/resolve", post(resolve_handoff))
        .route("/handoffs/{id}/ai/summary", get(get_ai_summary))
        .route("/handoffs/{id}/ai/draft", post(request_reply_draft))
        .route("/handoffs/{id}/ai/risk", post(request_risk_assessment))
        .route("/handoffs/{id}/ai/resolution-suggestion", post(request_resolution_suggestion))
        .with_state(state)
}

fn failure(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(json!({ "ok": false, "error": error.into() })))
}

fn auth_reject((status, Json(body)): AuthRejection) -> ApiError {
    (status, Json(json!({ "error": body.error, "message": body.message })))
}

fn app_error(error: ApplicationError) -> ApiError {
    tracing::error!(error = %error, "pipeline request failed");
    let interface = InterfaceError::from(error);
    let status = match interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    failure(status, interface.user_message())
}

fn handoff_error(error: HandoffError) -> ApiError {
    match error {
        HandoffError::NotFound => failure(StatusCode::NOT_FOUND, "Handoff not found"),
        HandoffError::Forbidden(message) => failure(StatusCode::FORBIDDEN, message),
        HandoffError::Conflict(message) => failure(StatusCode::CONFLICT, message),
        HandoffError::Repository(error) => {
            tracing::error!(error = %error, "handoff storage failure");
            failure(StatusCode::SERVICE_UNAVAILABLE, "storage temporarily unavailable")
        }
    }
}

fn storage_error(error: flowops_db::RepositoryError) -> ApiError {
    tracing::error!(error = %error, "storage failure");
    failure(StatusCode::SERVICE_UNAVAILABLE, "storage temporarily unavailable")
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffView {
    pub id: String,
    pub customer_id: String,
    pub ticket_id: Option<String>,
    pub reason: &'static str,
    pub priority: &'static str,
    pub mode: &'static str,
    pub confidence: Option<f64>,
    pub status: &'static str,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    pub issues: Vec<String>,
    pub actions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sla_due_at: DateTime<Utc>,
    pub sla_breached_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signals: Option<HandoffSignals>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffSignals {
    pub latest_risk_level: Option<String>,
    pub risk_status: &'static str,
    pub sla_remaining_seconds: i64,
    pub has_draft: bool,
    pub has_summary: bool,
    pub last_artifact_at: Option<DateTime<Utc>>,
}

impl HandoffView {
    pub(crate) fn from_handoff(handoff: &Handoff) -> Self {
        Self {
            id: handoff.id.0.clone(),
            customer_id: handoff.customer_id.0.clone(),
            ticket_id: handoff.ticket_id.as_ref().map(|id| id.0.clone()),
            reason: handoff.reason.as_str(),
            priority: handoff.priority.as_str(),
            mode: handoff.mode.as_str(),
            confidence: handoff.confidence,
            status: handoff.status.as_str(),
            claimed_by: handoff.claimed_by.clone(),
            claimed_at: handoff.claimed_at,
            resolved_by: handoff.resolved_by.clone(),
            resolved_at: handoff.resolved_at,
            resolution_notes: handoff.resolution_notes.clone(),
            issues: handoff.issues.clone(),
            actions: handoff.actions.iter().map(|tag| tag.encode()).collect(),
            created_at: handoff.created_at,
            updated_at: handoff.updated_at,
            sla_due_at: handoff.sla_due_at,
            sla_breached_at: handoff.sla_breached_at,
            signals: None,
        }
    }
}

/// Derives operator-dashboard signals from the stored artifacts, so the
/// queue renders in a single request.
fn compute_signals(artifacts: &[AiArtifact], sla_due_at: DateTime<Utc>) -> HandoffSignals {
    let ok_artifact = |artifact_type: ArtifactType| {
        artifacts
            .iter()
            .find(|artifact| {
                artifact.artifact_type == artifact_type && artifact.status == ArtifactStatus::Ok
            })
    };

    let latest_risk_level = ok_artifact(ArtifactType::RiskAssessment)
        .and_then(|artifact| serde_json::from_str::<Value>(&artifact.output_json).ok())
        .and_then(|output| output.get("riskLevel").and_then(Value::as_str).map(str::to_string))
        .filter(|level| matches!(level.as_str(), "low" | "medium" | "high"));

    HandoffSignals {
        risk_status: if latest_risk_level.is_some() { "assessed" } else { "not_assessed" },
        latest_risk_level,
        sla_remaining_seconds: (sla_due_at - Utc::now()).num_seconds(),
        has_draft: ok_artifact(ArtifactType::ReplyDraft).is_some(),
        has_summary: ok_artifact(ArtifactType::HandoffSummary).is_some(),
        last_artifact_at: artifacts.iter().map(|artifact| artifact.updated_at).max(),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    state.pipeline.handle(request).await.map(Json).map_err(app_error)
}

#[derive(Debug, Default, Deserialize)]
struct ListHandoffsQuery {
    #[serde(default, rename = "includeSignals", alias = "include_signals")]
    include_signals: Option<String>,
}

async fn list_handoffs(
    Query(query): Query<ListHandoffsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<HandoffView>>, ApiError> {
    let include_signals =
        matches!(query.include_signals.as_deref(), Some("1") | Some("true"));

    let handoffs = state.handoffs.list(None, 100).await.map_err(storage_error)?;

    let mut views = Vec::with_capacity(handoffs.len());
    for handoff in &handoffs {
        let mut view = HandoffView::from_handoff(handoff);
        if include_signals {
            let artifacts =
                state.artifacts.list_for_handoff(&handoff.id).await.map_err(storage_error)?;
            view.signals = Some(compute_signals(&artifacts, handoff.sla_due_at));
        }
        views.push(view);
    }

    Ok(Json(views))
}

async fn get_handoff(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<HandoffView>, ApiError> {
    let handoff = state
        .handoffs
        .find_by_id(&HandoffId(id))
        .await
        .map_err(storage_error)?
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "Handoff not found"))?;

    Ok(Json(HandoffView::from_handoff(&handoff)))
}

#[derive(Debug, Serialize)]
pub struct HandoffEnvelope {
    pub ok: bool,
    pub handoff: HandoffView,
}

async fn claim_handoff(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HandoffEnvelope>, ApiError> {
    let operator = authenticate(&headers, &state.operators).map_err(auth_reject)?;

    let handoff = state
        .handoff_service
        .claim(&HandoffId(id), operator, Utc::now())
        .await
        .map_err(handoff_error)?;

    Ok(Json(HandoffEnvelope { ok: true, handoff: HandoffView::from_handoff(&handoff) }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveBody {
    resolution_notes: Option<String>,
}

async fn resolve_handoff(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<ResolveBody>>,
) -> Result<Json<HandoffEnvelope>, ApiError> {
    let operator = authenticate(&headers, &state.operators).map_err(auth_reject)?;
    let notes = body.and_then(|Json(body)| body.resolution_notes);

    let handoff = state
        .handoff_service
        .resolve(&HandoffId(id), operator, notes.as_deref(), Utc::now())
        .await
        .map_err(handoff_error)?;

    Ok(Json(HandoffEnvelope { ok: true, handoff: HandoffView::from_handoff(&handoff) }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMeta {
    pub id: String,
    pub handoff_id: String,
    #[serde(rename = "type")]
    pub artifact_type: &'static str,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ArtifactEnvelope {
    pub ok: bool,
    pub artifact: ArtifactMeta,
    pub output: Value,
}

async fn get_ai_summary(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ArtifactEnvelope>, ApiError> {
    let artifact = state
        .artifacts
        .find(&HandoffId(id), ArtifactType::HandoffSummary)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| {
            failure(StatusCode::NOT_FOUND, "No AI summary found for this handoff yet.")
        })?;

    let output = serde_json::from_str(&artifact.output_json)
        .unwrap_or(Value::String(artifact.output_json.clone()));

    Ok(Json(ArtifactEnvelope {
        ok: true,
        artifact: ArtifactMeta {
            id: artifact.id.0,
            handoff_id: artifact.handoff_id.0,
            artifact_type: artifact.artifact_type.as_str(),
            status: artifact.status.as_str(),
            created_at: artifact.created_at,
            updated_at: artifact.updated_at,
        },
        output,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedResponse {
    pub ok: bool,
    pub queued: bool,
    pub handoff_id: String,
    pub event_type: &'static str,
    pub idempotency_key: String,
}

async fn request_artifact(
    id: String,
    artifact_type: ArtifactType,
    state: AppState,
    headers: HeaderMap,
) -> Result<Json<QueuedResponse>, ApiError> {
    let operator = authenticate(&headers, &state.operators).map_err(auth_reject)?;
    if !operator.role.can_work_handoffs() {
        return Err(auth_reject(crate::auth::forbidden()));
    }

    let request = state
        .handoff_service
        .request_artifact(&HandoffId(id), artifact_type, Utc::now())
        .await
        .map_err(handoff_error)?;

    Ok(Json(QueuedResponse {
        ok: true,
        queued: true,
        handoff_id: request.handoff_id.0,
        event_type: request.event_type.as_str(),
        idempotency_key: request.idempotency_key.0,
    }))
}

async fn request_reply_draft(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<QueuedResponse>, ApiError> {
    request_artifact(id, ArtifactType::ReplyDraft, state, headers).await
}

async fn request_risk_assessment(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<QueuedResponse>, ApiError> {
    request_artifact(id, ArtifactType::RiskAssessment, state, headers).await
}

async fn request_resolution_suggestion(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<QueuedResponse>, ApiError> {
    request_artifact(id, ArtifactType::ResolutionSuggestion, state, headers).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::{Path, Query, State};
    use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
    use axum::Json;
    use chrono::{Duration, Utc};

    use flowops_agent::{
        HandoffService, StaticAccountTool, StaticBillingTool, SupportPipeline,
    };
    use flowops_core::auth::{Operator, OperatorDirectory, OperatorRole};
    use flowops_core::domain::artifact::{AiArtifact, ArtifactId, ArtifactStatus, ArtifactType};
    use flowops_core::domain::customer::{Customer, CustomerId, Plan};
    use flowops_core::domain::handoff::{
        Handoff, HandoffId, HandoffPriority, HandoffReason, HandoffStatus,
    };
    use flowops_core::domain::interaction::Mode;
    use flowops_core::policy::{HeuristicConfidence, PolicyConfig};
    use flowops_db::repositories::{
        ArtifactRepository, CustomerRepository, HandoffRepository, InMemoryArtifactRepository,
        InMemoryCustomerRepository, InMemoryHandoffRepository, InMemoryInteractionRepository,
        InMemoryOutboxRepository, InMemoryTicketRepository, OutboxRepository,
    };

    use crate::bootstrap::AppState;

    use super::{
        claim_handoff, get_ai_summary, get_handoff, list_handoffs, request_reply_draft,
        resolve_handoff, ListHandoffsQuery, ResolveBody,
    };

    fn test_state() -> AppState {
        let customers = Arc::new(InMemoryCustomerRepository::default());
        let tickets = Arc::new(InMemoryTicketRepository::default());
        let interactions = Arc::new(InMemoryInteractionRepository::default());
        let handoffs = Arc::new(InMemoryHandoffRepository::default());
        let outbox = Arc::new(InMemoryOutboxRepository::default());
        let artifacts = Arc::new(InMemoryArtifactRepository::default());

        let pipeline = Arc::new(SupportPipeline::new(
            customers.clone(),
            tickets.clone(),
            interactions.clone(),
            handoffs.clone(),
            outbox.clone(),
            Arc::new(StaticAccountTool::default()),
            Arc::new(StaticBillingTool::default()),
            Arc::new(HeuristicConfidence),
            PolicyConfig::default(),
        ));
        let handoff_service =
            Arc::new(HandoffService::new(handoffs.clone(), tickets.clone(), outbox.clone()));

        AppState {
            pipeline,
            handoff_service,
            customers,
            tickets,
            interactions,
            handoffs,
            outbox,
            artifacts,
            operators: OperatorDirectory::new(vec![
                Operator::new("op_ana", "Ana", OperatorRole::Operator, "tok-ana"),
                Operator::new("op_kit", "Kit", OperatorRole::Viewer, "tok-kit"),
            ]),
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).expect("header"),
        );
        headers
    }

    async fn seed_handoff(state: &AppState, id: &str) {
        let now = Utc::now();
        state
            .customers
            .upsert(Customer {
                id: CustomerId("cus_1".to_string()),
                email: "cus_1@example.com".to_string(),
                plan: Plan::Pro,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("seed customer");
        state
            .handoffs
            .create(Handoff {
                id: HandoffId(id.to_string()),
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
                issues: vec![],
                actions: vec![],
                sla_due_at: now + Duration::minutes(60),
                sla_breached_at: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("seed handoff");
    }

    #[tokio::test]
    async fn claim_requires_a_valid_token() {
        let state = test_state();
        seed_handoff(&state, "hf_1").await;

        let result = claim_handoff(
            Path("hf_1".to_string()),
            State(state.clone()),
            HeaderMap::new(),
        )
        .await;
        let (status, _) = result.err().expect("rejected");
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let result =
            claim_handoff(Path("hf_1".to_string()), State(state), bearer("tok-kit")).await;
        let (status, _) = result.err().expect("viewer rejected");
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn claim_is_exclusive_and_conflicts_surface_as_409() {
        let state = test_state();
        seed_handoff(&state, "hf_1").await;

        let Json(envelope) =
            claim_handoff(Path("hf_1".to_string()), State(state.clone()), bearer("tok-ana"))
                .await
                .expect("first claim");
        assert!(envelope.ok);
        assert_eq!(envelope.handoff.status, "claimed");
        assert_eq!(envelope.handoff.claimed_by.as_deref(), Some("op_ana"));

        let result =
            claim_handoff(Path("hf_1".to_string()), State(state), bearer("tok-ana")).await;
        let (status, Json(body)) = result.err().expect("second claim rejected");
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Handoff already claimed or not pending");
    }

    #[tokio::test]
    async fn resolve_requires_a_prior_claim() {
        let state = test_state();
        seed_handoff(&state, "hf_1").await;

        let result = resolve_handoff(
            Path("hf_1".to_string()),
            State(state.clone()),
            bearer("tok-ana"),
            None,
        )
        .await;
        let (status, Json(body)) = result.err().expect("unclaimed resolve rejected");
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Handoff must be claimed before resolving");

        claim_handoff(Path("hf_1".to_string()), State(state.clone()), bearer("tok-ana"))
            .await
            .expect("claim");
        let Json(envelope) = resolve_handoff(
            Path("hf_1".to_string()),
            State(state),
            bearer("tok-ana"),
            Some(Json(ResolveBody { resolution_notes: Some("refund issued".to_string()) })),
        )
        .await
        .expect("resolve");
        assert_eq!(envelope.handoff.status, "resolved");
        assert_eq!(envelope.handoff.resolution_notes.as_deref(), Some("refund issued"));
    }

    #[tokio::test]
    async fn missing_handoff_is_a_404() {
        let state = test_state();
        let result = get_handoff(Path("hf_404".to_string()), State(state)).await;
        let (status, _) = result.err().expect("missing");
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ai_summary_is_404_until_generated() {
        let state = test_state();
        seed_handoff(&state, "hf_1").await;

        let result = get_ai_summary(Path("hf_1".to_string()), State(state.clone())).await;
        let (status, Json(body)) = result.err().expect("no artifact yet");
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "No AI summary found for this handoff yet.");

        let now = Utc::now();
        state
            .artifacts
            .upsert(AiArtifact {
                id: ArtifactId("art_1".to_string()),
                handoff_id: HandoffId("hf_1".to_string()),
                artifact_type: ArtifactType::HandoffSummary,
                status: ArtifactStatus::Ok,
                input_json: "{}".to_string(),
                output_json: r#"{"summaryText":"Handoff hf_1 is pending."}"#.to_string(),
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("store artifact");

        let Json(envelope) =
            get_ai_summary(Path("hf_1".to_string()), State(state)).await.expect("artifact");
        assert!(envelope.ok);
        assert_eq!(envelope.artifact.artifact_type, "handoff_summary.v1");
        assert_eq!(envelope.output["summaryText"], "Handoff hf_1 is pending.");
    }

    #[tokio::test]
    async fn artifact_enqueue_is_idempotent() {
        let state = test_state();
        seed_handoff(&state, "hf_1").await;

        for _ in 0..2 {
            let Json(response) = request_reply_draft(
                Path("hf_1".to_string()),
                State(state.clone()),
                bearer("tok-ana"),
            )
            .await
            .expect("enqueue");
            assert!(response.queued);
            assert_eq!(response.idempotency_key, "ai:reply_draft:hf_1");
        }

        let queued = state.outbox.list(None, 10).await.expect("list");
        assert_eq!(queued.len(), 1, "repeat requests collapse into one event");
    }

    #[tokio::test]
    async fn handoff_list_can_carry_signals() {
        let state = test_state();
        seed_handoff(&state, "hf_1").await;

        let Json(plain) = list_handoffs(
            Query(ListHandoffsQuery::default()),
            State(state.clone()),
        )
        .await
        .expect("list");
        assert_eq!(plain.len(), 1);
        assert!(plain[0].signals.is_none());

        let Json(decorated) = list_handoffs(
            Query(ListHandoffsQuery { include_signals: Some("1".to_string()) }),
            State(state),
        )
        .await
        .expect("list with signals");
        let signals = decorated[0].signals.as_ref().expect("signals present");
        assert_eq!(signals.risk_status, "not_assessed");
        assert!(!signals.has_summary);
        assert!(signals.sla_remaining_seconds > 0);
    }
}
