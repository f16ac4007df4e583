use crate::config::{AppState, ServerConfig};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::Value;
use tether_mcp::protocol::{error_codes, JsonRpcError, JsonRpcResponse};
use tether_mcp::{SessionError, SessionId};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

mod mcp;

/// Start the API server and run until a shutdown signal arrives
pub async fn serve(addr: &str, config: ServerConfig) -> Result<()> {
    let state = AppState::new(&config);

    let reaper_shutdown = CancellationToken::new();
    let reaper = config.session.idle_timeout().map(|idle_timeout| {
        state.mcp.sessions().spawn_reaper(
            config.session.sweep_interval(),
            idle_timeout,
            reaper_shutdown.clone(),
        )
    });

    let app = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state, reaper_shutdown))
        .await
        .context("API server failed")?;

    if let Some(reaper) = reaper {
        let _ = reaper.await;
    }
    tracing::info!("API server stopped");

    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM, after every open session has been closed
/// so attached push streams end cleanly.
async fn shutdown_signal(state: AppState, reaper: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }

    reaper.cancel();
    let closed = state.mcp.shutdown().await;
    tracing::info!(closed, "Closed open sessions");
}

/// Create the API router
fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(mcp::routes())
        // Middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.mcp.server_name,
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.mcp.sessions().len(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Session and transport rejections. Always rendered as a JSON-RPC error
/// envelope; the HTTP status carries the category.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or unknown session id.
    #[error("no valid session")]
    BadSession { id: Value },

    #[error("a stream is already attached to session {0}")]
    StreamConflict(SessionId),

    #[error("{0}")]
    Unavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_session() -> Self {
        ApiError::BadSession { id: Value::Null }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadSession { .. } => StatusCode::BAD_REQUEST,
            ApiError::StreamConflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(_) => ApiError::bad_session(),
            SessionError::StreamAttached(id) => ApiError::StreamConflict(id),
            SessionError::ResourceExhausted(reason) => ApiError::Unavailable(reason),
            SessionError::Transport(e) => ApiError::Internal(e.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (id, error) = match &self {
            ApiError::BadSession { id } => {
                tracing::warn!("Rejected request without a valid session");
                (id.clone(), JsonRpcError::bad_session())
            }
            ApiError::StreamConflict(session_id) => {
                tracing::warn!(session_id = %session_id, "Push stream already attached");
                (
                    Value::Null,
                    JsonRpcError::custom(error_codes::BAD_REQUEST, "Conflict: stream already attached"),
                )
            }
            ApiError::Unavailable(reason) => {
                tracing::warn!(reason = %reason, "Session rejected");
                (
                    Value::Null,
                    JsonRpcError::custom(
                        error_codes::BAD_REQUEST,
                        format!("Service Unavailable: {}", reason),
                    ),
                )
            }
            ApiError::Internal(e) => {
                tracing::error!(error = ?e, "Internal error");
                (Value::Null, JsonRpcError::internal_error("Internal error"))
            }
        };

        (status, Json(JsonRpcResponse::error(id, error))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
