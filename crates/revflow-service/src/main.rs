mod github;
pub mod logging;
mod routes;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use revflow_agents::{AiClient, AnalyzerAgent, DocUpdaterAgent, ReviewerAgent, SynthesizerAgent, TestGeneratorAgent};
use revflow_core::agent::AgentRegistry;
use revflow_core::config::Config;
use revflow_core::db::PostgresWorkflowStore;
use revflow_core::events::EventBus;
use revflow_core::mergequeue::MergeQueue;
use revflow_core::orchestrator::Orchestrator;
use revflow_core::persistence::WorkflowStore;
use revflow_core::remediation::RemediationEngine;
use tower_http::cors::CorsLayer;

use github::GithubProvider;

/// Shared application state handed to every axum handler. Kept small and
/// typed, bundling the store, config and event channels in one struct
/// rather than threading them through as separate extractors.
pub struct AppState {
    pub store: Arc<PostgresWorkflowStore>,
    pub config: Arc<Config>,
    pub start_time: Instant,
    pub events: Arc<EventBus>,
    pub log_tail: Arc<logging::LogTail>,
    pub provider: Arc<dyn revflow_core::provider::ProviderFacade>,
    pub orchestrator: Arc<Orchestrator>,
    pub merge_queue: Arc<MergeQueue>,
    pub remediation: Arc<RemediationEngine>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_tail = logging::LogTail::new();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "revflow_service=info,revflow_core=info,revflow_agents=info,tower_http=warn".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(log_tail.layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let store = Arc::new(PostgresWorkflowStore::connect(&config.database_url).await?);

    let provider: Arc<dyn revflow_core::provider::ProviderFacade> =
        Arc::new(GithubProvider::new(config.github_token.clone()));

    let ai = Arc::new(AiClient::new(
        config.ai_provider_url.clone(),
        config.ai_model.clone(),
        config.ai_api_key.clone(),
        Duration::from_secs(config.agent_timeout_s),
    ));

    let mut agents = AgentRegistry::new();
    agents.register(Arc::new(AnalyzerAgent::new(Arc::clone(&ai))));
    agents.register(Arc::new(ReviewerAgent::new(Arc::clone(&ai))));
    agents.register(Arc::new(TestGeneratorAgent::new(Arc::clone(&ai))));
    agents.register(Arc::new(DocUpdaterAgent::new(Arc::clone(&ai))));
    agents.register(Arc::new(SynthesizerAgent::new(Arc::clone(&ai))));
    let agents = Arc::new(agents);

    let events = EventBus::new();

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone() as Arc<dyn WorkflowStore>,
        Arc::clone(&provider),
        Arc::clone(&agents),
        Arc::clone(&events),
        Duration::from_secs(config.agent_timeout_s),
        config.max_concurrent_workflows as usize,
    ));

    let merge_queue = Arc::new(MergeQueue::new(
        Arc::clone(&provider),
        Arc::clone(&events),
        config.merge_queue.clone(),
    ));
    Arc::clone(&merge_queue).spawn_worker();

    let remediation = Arc::new(RemediationEngine::new(
        store.clone() as Arc<dyn WorkflowStore>,
        Arc::clone(&provider),
        Arc::clone(&orchestrator),
        Arc::clone(&events),
        config.remediation.clone(),
    ));

    let state = Arc::new(AppState {
        store,
        config: Arc::clone(&config),
        start_time: Instant::now(),
        events,
        log_tail,
        provider,
        orchestrator,
        merge_queue,
        remediation,
    });

    let app = Router::new()
        .route("/webhooks/pr", post(routes::webhook_pr))
        .route("/queue", post(routes::queue_submit))
        .route("/workflows/:id/remediate", post(routes::remediate))
        .route("/healthz", get(routes::healthz))
        .route("/events", get(routes::events))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.web_bind, config.web_port);
    tracing::info!(%addr, "revflow-service listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
