use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::commands::{CommandSurface, COMMAND_NAMES};
use crate::error::PilotError;

#[derive(Clone)]
pub struct DashboardState {
    pub commands: CommandSurface,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

struct ApiError(PilotError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            PilotError::UnknownCommand(_) => StatusCode::NOT_FOUND,
            PilotError::InvalidArgument { .. } | PilotError::Json(_) => StatusCode::BAD_REQUEST,
            PilotError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                success: false,
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<PilotError> for ApiError {
    fn from(e: PilotError) -> Self {
        Self(e)
    }
}

/// Routes of the HTTP command surface.
pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/state", get(state_handler))
        .route("/api/commands", get(commands_handler))
        .route("/api/invoke/{name}", post(invoke_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve the command surface until `shutdown` is cancelled.
pub async fn run_dashboard(addr: SocketAddr, state: DashboardState, shutdown: CancellationToken) {
    let app = router(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind command surface");
            return;
        }
    };

    tracing::info!(addr = %addr, "Command surface listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "Command surface failed");
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn state_handler(State(state): State<DashboardState>) -> Result<Json<Value>, ApiError> {
    let doc = state.commands.state().await?;
    Ok(Json(serde_json::to_value(doc).map_err(PilotError::from)?))
}

async fn commands_handler() -> Json<&'static [&'static str]> {
    Json(COMMAND_NAMES)
}

async fn invoke_handler(
    State(state): State<DashboardState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let arg = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&body).map_err(PilotError::from)?
    };

    let result = state.commands.invoke(&name, arg).await?;
    Ok(Json(result))
}
