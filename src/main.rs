// =============================================================================
// Barangay Backend - API Server Entry Point
// =============================================================================
// Table of Contents:
// 1. Imports
// 2. Application State
// 3. Main Entry Point
// 4. Router Setup
// =============================================================================

mod ai;
mod auth;
mod concerns;
mod config;
mod db;
mod error;
mod karma;
mod moderation;
mod notify;
mod votes;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;

// -----------------------------------------------------------------------------
// 2. Application State
// -----------------------------------------------------------------------------

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
}

// -----------------------------------------------------------------------------
// 3. Main Entry Point
// -----------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    let _ = dotenvy::dotenv();

    // Load configuration
    let config = Config::from_env()?;
    let bind_addr = config.bind_address.clone();

    // Ensure database directory exists for SQLite
    if config.database_url.starts_with("sqlite:") {
        let db_path = config.database_url.trim_start_matches("sqlite:");
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }
    }

    // Initialize database
    let db = Database::new(&config.database_url).await?;
    db.run_migrations().await?;

    // Create app state
    let state = AppState {
        config: Arc::new(config),
        db,
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Barangay API Server running on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

// -----------------------------------------------------------------------------
// 4. Router Setup
// -----------------------------------------------------------------------------

fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Auth routes
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/me", get(auth::get_current_user))
        // Concerns API
        .route("/api/concerns", get(concerns::list_concerns))
        .route("/api/concerns", post(concerns::create_concern))
        .route("/api/concerns/:id", get(concerns::get_concern))
        .route("/api/concerns/:id/status", post(concerns::update_status))
        .route("/api/concerns/:id/comments", post(concerns::add_comment))
        .route("/api/concerns/:id/vote", post(votes::vote_on_concern))
        .route("/api/concerns/:id/archive", post(concerns::archive_concern))
        .route(
            "/api/concerns/:id/unarchive",
            post(concerns::unarchive_concern),
        )
        .route(
            "/api/concerns/:id/flag-reporter",
            post(concerns::flag_reporter),
        )
        // Comment reports
        .route("/api/comments/:id/report", post(moderation::report_comment))
        // Notifications
        .route("/api/notifications", get(notify::get_notifications))
        // Admin API (LGU staff)
        .route(
            "/api/admin/moderation/queue",
            get(moderation::get_moderation_queue),
        )
        .route(
            "/api/admin/reports/:id/resolve",
            post(moderation::resolve_report),
        )
        .route(
            "/api/admin/users/:id/ban",
            post(moderation::ban_user_handler),
        )
        .route(
            "/api/admin/users/:id/unban",
            post(moderation::unban_user_handler),
        )
        .route(
            "/api/admin/users/:id/role",
            post(moderation::set_role_handler),
        )
        .route(
            "/api/admin/users/:id/karma-reset",
            post(moderation::reset_karma_handler),
        )
        .route(
            "/api/admin/comments/:id/reports",
            get(moderation::get_comment_reports),
        )
        .route("/api/admin/users/at-risk", get(moderation::get_at_risk_users))
        .route("/api/admin/audit", get(moderation::get_audit_log))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
