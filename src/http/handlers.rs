use super::state::AppState;
use crate::history::{Utterance, HISTORY_STORE};
use crate::session::{SessionStats, Voice};
use crate::Error;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct OpenSessionRequest {
    /// Voice to speak with (default: configured persona voice)
    pub voice: Option<Voice>,

    /// Persona prompt, passed through verbatim (default: configured persona)
    pub system_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub status: String,
    pub message: String,
    pub stats: SessionStats,
}

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct StoreQuery {
    /// Store to operate on (default: history)
    pub store: Option<String>,
}

impl StoreQuery {
    fn name(&self) -> &str {
        self.store.as_deref().unwrap_or(HISTORY_STORE)
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Connection(_) | Error::Translation(_) | Error::Http(_) | Error::WebSocket(_) => {
            StatusCode::BAD_GATEWAY
        }
        Error::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Config(_) => StatusCode::BAD_REQUEST,
        Error::InvalidTransition { .. } | Error::Busy(_) => StatusCode::CONFLICT,
        Error::Storage(_) | Error::Io(_) | Error::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(context: &str, err: &Error) -> Response {
    error!("{}: {}", context, err);
    (
        status_for(err),
        Json(ErrorResponse {
            error: format!("{context}: {err}"),
        }),
    )
        .into_response()
}

async fn session_response(state: &AppState, status: &str, message: String) -> Response {
    match state.session.status().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(SessionResponse {
                status: status.to_string(),
                message,
                stats,
            }),
        )
            .into_response(),
        Err(e) => error_response("Failed to get session status", &e),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/open
/// Open a realtime translation session
pub async fn open_session(
    State(state): State<AppState>,
    body: Option<Json<OpenSessionRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let voice = req.voice.unwrap_or(state.default_voice);
    let prompt = req
        .system_prompt
        .unwrap_or_else(|| state.default_prompt.to_string());

    info!("Opening session with voice {}", voice);

    if let Err(e) = state.session.open(voice, prompt).await {
        return error_response("Failed to open session", &e);
    }

    session_response(&state, "open", format!("Session open with voice {voice}")).await
}

/// POST /session/disconnect
/// Tear down the current session (no-op when idle)
pub async fn disconnect_session(State(state): State<AppState>) -> impl IntoResponse {
    info!("Disconnecting session");

    if let Err(e) = state.session.disconnect().await {
        return error_response("Failed to disconnect", &e);
    }

    session_response(&state, "idle", "Session closed".to_string()).await
}

/// GET /session/status
pub async fn session_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.session.status().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => error_response("Failed to get session status", &e),
    }
}

/// POST /translate
/// Translate text and speak the result; persists to history on success
pub async fn translate(
    State(state): State<AppState>,
    Json(req): Json<TranslateRequest>,
) -> impl IntoResponse {
    match state.session.translate(req.text).await {
        Ok(utterance) => (StatusCode::OK, Json(utterance)).into_response(),
        Err(e) => error_response("Translation failed", &e),
    }
}

/// GET /mood
pub async fn get_mood(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.session.mood().current()))
}

/// GET /history?store=<name>
/// Newest first
pub async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<StoreQuery>,
) -> impl IntoResponse {
    match state.store.get_all(query.name()).await {
        Ok(utterances) => (StatusCode::OK, Json::<Vec<Utterance>>(utterances)).into_response(),
        Err(e) => error_response("Failed to list history", &e),
    }
}

/// DELETE /history?store=<name>
pub async fn clear_history(
    State(state): State<AppState>,
    Query(query): Query<StoreQuery>,
) -> impl IntoResponse {
    match state.store.clear(query.name()).await {
        Ok(()) => {
            info!("Cleared store {}", query.name());
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response("Failed to clear history", &e),
    }
}

/// DELETE /history/:id?store=<name>
pub async fn delete_history_entry(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<StoreQuery>,
) -> impl IntoResponse {
    match state.store.delete(query.name(), id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Utterance {} not found", id),
            }),
        )
            .into_response(),
        Err(e) => error_response("Failed to delete utterance", &e),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
