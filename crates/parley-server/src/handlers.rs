//! Plain HTTP routes: session directory, credential issuance, health.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parley_store::SessionSummary;

use crate::server::AppState;

/// `GET /sessions`: occupancy snapshot for the pre-join picker.
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.gateway.store().list_sessions())
}

/// `GET /token`: ephemeral credential for the browser's model connection.
pub async fn issue_token(State(state): State<AppState>) -> Response {
    match state.issuer.issue().await {
        Ok(payload) => (StatusCode::OK, Json(payload)).into_response(),
        Err(e) => {
            tracing::warn!(issuer = state.issuer.name(), error = %e, "Token generation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.public_message() })),
            )
                .into_response()
        }
    }
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "sessions": state.gateway.store().count(),
        "connections": state.gateway.registry().count(),
    }))
}
