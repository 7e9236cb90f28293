mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::services::ChallengeStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plm_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting plm-server...");

    // Load configuration
    let config = Config::load()?;
    let config = Arc::new(config);
    tracing::info!("Configuration loaded");

    // Initialize database
    let db = Database::new(&config.database.path).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    // Create app state
    let state = AppState {
        db,
        config: config.clone(),
    };

    // Periodically sweep expired ceremony state
    let sweeper_db = state.db.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            match ChallengeStore::cleanup_expired(&sweeper_db).await {
                Ok(0) => {}
                Ok(n) => tracing::debug!("Swept {} expired challenge entries", n),
                Err(e) => tracing::warn!("Challenge sweep failed: {}", e),
            }
        }
    });

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Sync routes carry the session identity when a valid cookie is present
    let sync_routes = Router::new()
        .route(
            "/sync",
            get(handlers::sync::pull_data).post(handlers::sync::push_data),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::session::session_middleware,
        ));

    let api_routes = Router::new()
        // Passkey ceremonies
        .route(
            "/passkey/register",
            post(handlers::passkey::start_register).put(handlers::passkey::finish_register),
        )
        .route(
            "/passkey/login",
            post(handlers::passkey::start_login).put(handlers::passkey::finish_login),
        )
        // Session / account lifecycle
        .route("/logout", post(handlers::account::logout))
        .route("/account/delete", delete(handlers::account::delete_account))
        // Probes
        .route("/health", get(handlers::health::health_check))
        .merge(sync_routes);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
