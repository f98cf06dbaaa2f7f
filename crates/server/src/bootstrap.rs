use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use flowops_agent::{HandoffService, StaticAccountTool, StaticBillingTool, SupportPipeline};
use flowops_core::auth::OperatorDirectory;
use flowops_core::config::{AppConfig, ConfigError, LoadOptions};
use flowops_core::policy::HeuristicConfidence;
use flowops_db::repositories::{
    SqlArtifactRepository, SqlCustomerRepository, SqlHandoffRepository, SqlInteractionRepository,
    SqlOutboxRepository, SqlTicketRepository,
};
use flowops_db::{
    connect_with_settings, migrations, ArtifactRepository, CustomerRepository, DbPool,
    HandoffRepository, InteractionRepository, OutboxRepository, TicketRepository,
};
use flowops_workers::{
    ContextBuilder, EmailSendHandler, GeneratedArtifactHandler, HandoffSummaryHandler,
    OpenAiGenerator, OutboxDispatcher, SlaBreachNotifyHandler, SlaWatchdog,
};
use flowops_core::domain::artifact::ArtifactType;
use flowops_core::domain::outbox::OutboxEventType;

/// Shared handle passed into every route handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SupportPipeline>,
    pub handoff_service: Arc<HandoffService>,
    pub customers: Arc<dyn CustomerRepository>,
    pub tickets: Arc<dyn TicketRepository>,
    pub interactions: Arc<dyn InteractionRepository>,
    pub handoffs: Arc<dyn HandoffRepository>,
    pub outbox: Arc<dyn OutboxRepository>,
    pub artifacts: Arc<dyn ArtifactRepository>,
    pub operators: OperatorDirectory,
}

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!("starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!("database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!("database migrations applied");

    let state = build_state(&config, db_pool.clone());
    info!(operators = config.operators.len(), "application bootstrap complete");

    Ok(Application { config, db_pool, state })
}

fn build_state(config: &AppConfig, db_pool: DbPool) -> AppState {
    let customers: Arc<dyn CustomerRepository> =
        Arc::new(SqlCustomerRepository::new(db_pool.clone()));
    let tickets: Arc<dyn TicketRepository> = Arc::new(SqlTicketRepository::new(db_pool.clone()));
    let interactions: Arc<dyn InteractionRepository> =
        Arc::new(SqlInteractionRepository::new(db_pool.clone()));
    let handoffs: Arc<dyn HandoffRepository> = Arc::new(SqlHandoffRepository::new(db_pool.clone()));
    let outbox: Arc<dyn OutboxRepository> = Arc::new(SqlOutboxRepository::new(db_pool.clone()));
    let artifacts: Arc<dyn ArtifactRepository> = Arc::new(SqlArtifactRepository::new(db_pool));

    let pipeline = Arc::new(SupportPipeline::new(
        customers.clone(),
        tickets.clone(),
        interactions.clone(),
        handoffs.clone(),
        outbox.clone(),
        Arc::new(StaticAccountTool::default()),
        Arc::new(StaticBillingTool::default()),
        Arc::new(HeuristicConfidence),
        config.policy.clone(),
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
        operators: config.operators.clone(),
    }
}

/// Wires up the outbox dispatcher with every registered handler plus the
/// SLA watchdog. Callers spawn the returned workers themselves.
pub fn build_workers(config: &AppConfig, state: &AppState) -> (OutboxDispatcher, SlaWatchdog) {
    let context = Arc::new(ContextBuilder::new(
        state.handoffs.clone(),
        state.customers.clone(),
        state.tickets.clone(),
        state.interactions.clone(),
    ));
    let generator = Arc::new(OpenAiGenerator::new(config.llm.clone()));

    let mut dispatcher = OutboxDispatcher::new(state.outbox.clone(), config.outbox.clone());
    dispatcher.register(OutboxEventType::EmailSend, Arc::new(EmailSendHandler));
    dispatcher.register(OutboxEventType::SlaBreachNotify, Arc::new(SlaBreachNotifyHandler));
    dispatcher.register(
        OutboxEventType::HandoffSummaryGenerate,
        Arc::new(HandoffSummaryHandler::new(context.clone(), state.artifacts.clone())),
    );
    for artifact_type in [
        ArtifactType::ReplyDraft,
        ArtifactType::RiskAssessment,
        ArtifactType::ResolutionSuggestion,
    ] {
        dispatcher.register(
            generate_event_type(artifact_type),
            Arc::new(GeneratedArtifactHandler::new(
                artifact_type,
                generator.clone(),
                context.clone(),
                state.artifacts.clone(),
            )),
        );
    }

    let watchdog =
        SlaWatchdog::new(state.handoffs.clone(), state.outbox.clone(), config.sla.clone());

    (dispatcher, watchdog)
}

fn generate_event_type(artifact_type: ArtifactType) -> OutboxEventType {
    match artifact_type {
        ArtifactType::HandoffSummary => OutboxEventType::HandoffSummaryGenerate,
        ArtifactType::ReplyDraft => OutboxEventType::ReplyDraftGenerate,
        ArtifactType::RiskAssessment => OutboxEventType::RiskAssessmentGenerate,
        ArtifactType::ResolutionSuggestion => OutboxEventType::ResolutionSuggestionGenerate,
    }
}

#[cfg(test)]
mod tests {
    use flowops_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::{bootstrap, build_workers};

    fn memory_options() -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:?cache=shared".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_connects_migrates_and_exposes_the_schema() {
        let app = bootstrap(memory_options()).await.expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN \
             ('customer', 'ticket', 'interaction', 'handoff', 'outbox_event', 'ai_artifact')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 6, "baseline tables should exist after bootstrap");

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn workers_assemble_from_the_bootstrapped_state() {
        let app = bootstrap(memory_options()).await.expect("bootstrap");

        let (dispatcher, watchdog) = build_workers(&app.config, &app.state);

        // Empty database: one cycle of each worker is a clean no-op.
        assert!(!dispatcher.run_once().await.expect("dispatcher cycle"));
        assert_eq!(watchdog.run_once().await.expect("watchdog cycle"), 0);

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_rejects_a_non_sqlite_database_url() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://localhost/flowops".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("bootstrap should fail").to_string();
        assert!(message.contains("database.url"));
    }
}
