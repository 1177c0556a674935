//! JSON API for the Web App.
//!
//! Routes are grouped per resource and merged into one router that shares an
//! `Arc<AppState>`. Requests are traced with `TraceLayer`; CORS is open because
//! the Web App is served from Telegram's origin.

pub mod error;
pub mod extract;

mod ads;
mod auth;
mod health;
mod progress;
mod users;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use sqlx::SqlitePool;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::AuthSettings;
use crate::identity::IdentityService;
use crate::leveling::Rules;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub rules: Rules,
    pub auth: AuthSettings,
    pub identity: Option<Arc<dyn IdentityService>>,
    /// Admin routes are forbidden while this is `None`.
    pub admin_token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health::router())
        .merge(auth::router())
        .merge(users::router())
        .merge(progress::router())
        .merge(ads::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Serve the API on `addr` until Ctrl+C.
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let app = router(state);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(?err, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
