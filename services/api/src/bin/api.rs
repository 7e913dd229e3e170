//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, OpenAiFaceComparisonAdapter, OpenAiFrameAnalysisAdapter, VisionClient},
    config::{Config, StoreBackend},
    error::ApiError,
    sweeper::run_sweeper,
    web::{rest::ApiDoc, router, state::AppState},
};
use async_openai::{config::OpenAIConfig, Client};
use axum::Router;
use liveness_core::{
    InMemorySessionRepository, InMemorySubmissionRepository, SessionRepository,
    SubmissionRepository, SystemClock,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to the Store & Run Migrations ---
    let (session_store, submission_store): (
        Arc<dyn SessionRepository>,
        Arc<dyn SubmissionRepository>,
    ) = match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or_else(|| ApiError::Internal("DATABASE_URL is required".to_string()))?;
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let db_adapter = Arc::new(DbAdapter::new(db_pool));
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            let sessions: Arc<dyn SessionRepository> = db_adapter.clone();
            let submissions: Arc<dyn SubmissionRepository> = db_adapter;
            (sessions, submissions)
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; sessions and submissions are lost on restart");
            let sessions: Arc<dyn SessionRepository> = Arc::new(InMemorySessionRepository::new());
            let submissions: Arc<dyn SubmissionRepository> =
                Arc::new(InMemorySubmissionRepository::new());
            (sessions, submissions)
        }
    };

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let vision = VisionClient::new(
        Client::with_config(openai_config),
        config.vision_model.clone(),
    );
    let analyzer = Arc::new(OpenAiFrameAnalysisAdapter::new(vision.clone()));
    let comparer = Arc::new(OpenAiFaceComparisonAdapter::new(vision));

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(
        config.clone(),
        session_store,
        submission_store,
        analyzer,
        comparer,
        Arc::new(SystemClock),
    ));

    // --- 5. Start the Expiry Sweeper ---
    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(run_sweeper(
        app_state.sessions.clone(),
        config.sweep_interval,
        shutdown.clone(),
    ));

    // --- 6. Create the Web Router ---
    let app = Router::new()
        .merge(router(app_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!("Sweeper task ended abnormally: {}", e);
    }
    Ok(())
}
