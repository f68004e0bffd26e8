// Workflow API server
// Decision: in-memory stores when DATABASE_URL is unset (local development)

mod capsules;
mod common;
mod drops;
mod providers;
mod workflows;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use common::{AppState, CapsuleRegistry};
use qlflow_core::EngineConfig;
use qlflow_engine::{
    MemoryWorkflowStore, PostgresWorkflowStore, Scheduler, WorkflowStore,
};
use qlflow_store::{ArtifactStore, MemoryArtifactStore, PostgresArtifactStore};
use qlflow_worker::Runner;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        workflows::generate,
        workflows::generate_extended,
        workflows::list_workflows,
        workflows::get_workflow,
        workflows::cancel_workflow,
        drops::list_drops,
        drops::get_drop,
        capsules::from_workflow,
        capsules::get_capsule,
        capsules::download_capsule,
        providers::provider_health,
    ),
    components(
        schemas(
            workflows::GenerateRequest,
            workflows::GenerateResponse,
            workflows::WorkflowView,
            workflows::StageView,
            drops::DropView,
            capsules::FromWorkflowRequest,
            capsules::FromWorkflowResponse,
            capsules::CapsuleView,
            providers::ProviderHealthView,
            common::ApiError,
        )
    ),
    tags(
        (name = "workflows", description = "Workflow submission and status"),
        (name = "drops", description = "Artifact reads"),
        (name = "capsules", description = "Capsule assembly and download"),
        (name = "providers", description = "Provider health introspection")
    ),
    info(
        title = "QuantumLayer Flow API",
        description = "Orchestration and artifact-flow engine for generation pipelines",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = EngineConfig::from_env().context("Failed to load engine configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("qlflow={},tower_http=info", config.log_level.0).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("qlflow-api starting...");

    // Stores: PostgreSQL when DATABASE_URL is configured, in-memory otherwise
    let (store, artifacts): (Arc<dyn WorkflowStore>, Arc<dyn ArtifactStore>) =
        match std::env::var("DATABASE_URL") {
            Ok(url) => {
                let pool = sqlx::PgPool::connect(&url)
                    .await
                    .context("Failed to connect to database")?;

                let workflow_store = PostgresWorkflowStore::new(pool.clone());
                workflow_store
                    .migrate()
                    .await
                    .context("Failed to run migrations")?;

                let artifact_store = PostgresArtifactStore::new(pool);
                tracing::info!("Connected to database");
                (Arc::new(workflow_store), Arc::new(artifact_store))
            }
            Err(_) => {
                tracing::warn!("DATABASE_URL not set, using in-memory stores");
                (
                    Arc::new(MemoryWorkflowStore::new()),
                    Arc::new(MemoryArtifactStore::new()),
                )
            }
        };

    let registry = qlflow_worker::build_registry(&config.services);
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        artifacts.clone(),
        registry,
        config,
    ));
    let runner = Arc::new(Runner::new(scheduler));

    // Pick up workflows stranded by a previous process
    let resumed = runner
        .resume_incomplete()
        .await
        .context("Failed to resume incomplete workflows")?;
    if resumed > 0 {
        tracing::info!(resumed, "resumed incomplete workflows");
    }

    let state = AppState {
        runner: runner.clone(),
        store,
        artifacts,
        capsules: Arc::new(CapsuleRegistry::new()),
    };

    let app = Router::new()
        .route("/health", get(health))
        .merge(workflows::routes(state.clone()))
        .merge(drops::routes(state.clone()))
        .merge(capsules::routes(state.clone()))
        .merge(providers::routes(state))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "qlflow-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received, draining workers");
            runner.shutdown();
        })
        .await
        .context("Server error")?;

    Ok(())
}
