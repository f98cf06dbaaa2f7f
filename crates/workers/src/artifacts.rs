use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use flowops_core::domain::artifact::{AiArtifact, ArtifactId, ArtifactStatus, ArtifactType};
use flowops_core::domain::handoff::HandoffId;
use flowops_core::domain::outbox::OutboxEvent;
use flowops_core::domain::prefixed_id;
use flowops_db::repositories::ArtifactRepository;

use crate::context::{ContextBuilder, ContextBundle};
use crate::dispatcher::OutboxHandler;
use crate::generate::{GenerateRequest, StructuredGenerator};
use crate::prompts;

fn handoff_id_from_payload(event: &OutboxEvent) -> anyhow::Result<HandoffId> {
    let payload: Value = serde_json::from_str(&event.payload_json)?;
    let id = payload
        .get("handoffId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| anyhow::anyhow!("payload missing handoffId"))?;
    Ok(HandoffId(id.to_string()))
}

async fn store(
    artifacts: &dyn ArtifactRepository,
    handoff_id: &HandoffId,
    artifact_type: ArtifactType,
    status: ArtifactStatus,
    bundle: &ContextBundle,
    output: &Value,
) -> anyhow::Result<()> {
    let now = Utc::now();
    artifacts
        .upsert(AiArtifact {
            id: ArtifactId(prefixed_id("art_")),
            handoff_id: handoff_id.clone(),
            artifact_type,
            status,
            input_json: serde_json::to_string(bundle)?,
            output_json: serde_json::to_string(output)?,
            created_at: now,
            updated_at: now,
        })
        .await?;
    Ok(())
}

/// Produces the deterministic handoff summary. No model involved: the
/// summary is assembled from stored facts so it can never hallucinate.
pub struct HandoffSummaryHandler {
    context: Arc<ContextBuilder>,
    artifacts: Arc<dyn ArtifactRepository>,
}

impl HandoffSummaryHandler {
    pub fn new(context: Arc<ContextBuilder>, artifacts: Arc<dyn ArtifactRepository>) -> Self {
        Self { context, artifacts }
    }
}

#[async_trait]
impl OutboxHandler for HandoffSummaryHandler {
    async fn deliver(&self, event: &OutboxEvent) -> anyhow::Result<()> {
        let handoff_id = handoff_id_from_payload(event)?;
        let bundle = self.context.build(&handoff_id).await?;

        let confidence = bundle
            .handoff
            .confidence
            .map_or_else(|| "n/a".to_string(), |value| value.to_string());
        let summary_text = format!(
            "Handoff {} is {}. Reason={}, Priority={}, Confidence={}. Customer={} (plan={}).",
            bundle.handoff.id,
            bundle.handoff.status,
            bundle.handoff.reason,
            bundle.handoff.priority,
            confidence,
            bundle.customer.id,
            bundle.customer.plan,
        );
        let output = json!({
            "version": "handoff_summary.v1",
            "generatedAt": Utc::now(),
            "handoffId": handoff_id.0,
            "summaryText": summary_text,
        });

        store(
            self.artifacts.as_ref(),
            &handoff_id,
            ArtifactType::HandoffSummary,
            ArtifactStatus::Ok,
            &bundle,
            &output,
        )
        .await?;

        tracing::info!(handoff_id = %handoff_id.0, "handoff summary stored");
        Ok(())
    }
}

/// Runs one model-backed artifact type: builds the context bundle, asks
/// the generator for schema-shaped JSON, and stores the result. A failed
/// generation is stored too, so operators see the failure, and the error
/// propagates so the outbox retries.
pub struct GeneratedArtifactHandler {
    artifact_type: ArtifactType,
    generator: Arc<dyn StructuredGenerator>,
    context: Arc<ContextBuilder>,
    artifacts: Arc<dyn ArtifactRepository>,
}

impl GeneratedArtifactHandler {
    pub fn new(
        artifact_type: ArtifactType,
        generator: Arc<dyn StructuredGenerator>,
        context: Arc<ContextBuilder>,
        artifacts: Arc<dyn ArtifactRepository>,
    ) -> Self {
        Self { artifact_type, generator, context, artifacts }
    }

    fn request(&self, bundle_json: &str) -> anyhow::Result<GenerateRequest<'static>> {
        let (system, user, schema_name, schema) = match self.artifact_type {
            ArtifactType::ReplyDraft => {
                let (system, user) = prompts::reply_draft_prompt(bundle_json);
                (system, user, "reply_draft_v1", prompts::reply_draft_schema())
            }
            ArtifactType::RiskAssessment => {
                let (system, user) = prompts::risk_assessment_prompt(bundle_json);
                (system, user, "risk_assessment_v1", prompts::risk_assessment_schema())
            }
            ArtifactType::ResolutionSuggestion => {
                let (system, user) = prompts::resolution_suggestion_prompt(bundle_json);
                (
                    system,
                    user,
                    "resolution_suggestion_v1",
                    prompts::resolution_suggestion_schema(),
                )
            }
            ArtifactType::HandoffSummary => {
                anyhow::bail!("handoff summaries are deterministic, not generated")
            }
        };
        Ok(GenerateRequest { system, user, schema_name, schema })
    }

    /// Overrides the envelope fields so stored artifacts carry server
    /// truth even if the model echoed something else.
    fn finalize(&self, mut output: Value, handoff_id: &HandoffId) -> Value {
        if let Some(object) = output.as_object_mut() {
            object.insert("version".to_string(), json!(self.artifact_type.as_str()));
            object.insert("handoffId".to_string(), json!(handoff_id.0));
            object.insert("generatedAt".to_string(), json!(Utc::now()));

            if self.artifact_type == ArtifactType::ResolutionSuggestion {
                let clamped = object
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .map_or(0.0, |value| value.clamp(0.0, 1.0));
                object.insert("confidence".to_string(), json!(clamped));
            }
        }
        output
    }
}

#[async_trait]
impl OutboxHandler for GeneratedArtifactHandler {
    async fn deliver(&self, event: &OutboxEvent) -> anyhow::Result<()> {
        let handoff_id = handoff_id_from_payload(event)?;
        let bundle = self.context.build(&handoff_id).await?;
        let bundle_json = serde_json::to_string(&bundle)?;

        let request = self.request(&bundle_json)?;
        match self.generator.generate(request).await {
            Ok(output) => {
                let output = self.finalize(output, &handoff_id);
                store(
                    self.artifacts.as_ref(),
                    &handoff_id,
                    self.artifact_type,
                    ArtifactStatus::Ok,
                    &bundle,
                    &output,
                )
                .await?;
                tracing::info!(
                    handoff_id = %handoff_id.0,
                    artifact_type = self.artifact_type.as_str(),
                    "artifact stored"
                );
                Ok(())
            }
            Err(err) => {
                let output = json!({
                    "version": self.artifact_type.as_str(),
                    "generatedAt": Utc::now(),
                    "handoffId": handoff_id.0,
                    "error": err.to_string(),
                });
                store(
                    self.artifacts.as_ref(),
                    &handoff_id,
                    self.artifact_type,
                    ArtifactStatus::Failed,
                    &bundle,
                    &output,
                )
                .await?;
                tracing::warn!(
                    handoff_id = %handoff_id.0,
                    artifact_type = self.artifact_type.as_str(),
                    error = %err,
                    "artifact generation failed"
                );
                Err(err.into())
            }
        }
    }
}
