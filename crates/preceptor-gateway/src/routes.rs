//! HTTP handlers for the voice session surface.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use preceptor_core::error::PreceptorError;
use preceptor_core::types::{AudioFormat, ChannelRole};
use preceptor_rtc::ChannelCredentials;
use preceptor_session::{StartedSession, TurnInput, TurnReply};

use crate::state::GatewayState;

/// Error returned to callers: a coarse code and a human-readable summary.
/// Provider-internal diagnostics stay in the server log.
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }
}

impl From<PreceptorError> for ApiError {
    fn from(err: PreceptorError) -> Self {
        match err {
            PreceptorError::SessionNotFound(id) => Self {
                status: StatusCode::NOT_FOUND,
                code: "session_not_found",
                message: format!("no active session with id {id}"),
            },
            PreceptorError::SessionBusy(id) => Self {
                status: StatusCode::CONFLICT,
                code: "session_busy",
                message: format!("session {id} is already processing a turn"),
            },
            other => {
                error!(error = %other, "request failed");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: "internal error".into(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": { "code": self.code, "message": self.message }
        }));
        (self.status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub user_id: String,
    #[serde(default)]
    pub channel_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AudioTurnRequest {
    /// Base64-encoded audio bytes.
    pub audio: String,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TextTurnRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub channel_name: String,
    pub user_id: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_text: Option<String>,
    /// Base64-encoded reply audio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

impl From<TurnReply> for TurnResponse {
    fn from(reply: TurnReply) -> Self {
        match reply {
            TurnReply::NoSpeech => Self {
                status: "no_speech",
                transcript: None,
                assistant_text: None,
                audio: None,
            },
            TurnReply::Answer {
                transcript,
                assistant_text,
                audio,
            } => Self {
                status: "ok",
                transcript,
                assistant_text: Some(assistant_text),
                audio: audio.map(|bytes| BASE64.encode(bytes)),
            },
        }
    }
}

pub async fn start_session(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<StartSessionRequest>,
) -> Result<Json<StartedSession>, ApiError> {
    if req.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("user_id must not be empty"));
    }
    let started = state.registry.start(&req.user_id, req.channel_name).await?;
    Ok(Json(started))
}

pub async fn audio_turn(
    State(state): State<Arc<GatewayState>>,
    Path(session_id): Path<String>,
    Json(req): Json<AudioTurnRequest>,
) -> Result<Json<TurnResponse>, ApiError> {
    let bytes = BASE64
        .decode(req.audio.as_bytes())
        .map_err(|_| ApiError::bad_request("audio is not valid base64"))?;
    if bytes.is_empty() {
        return Err(ApiError::bad_request("no audio data received"));
    }
    let format = match req.format.as_deref() {
        None => AudioFormat::Wav,
        Some(s) => AudioFormat::parse(s)
            .ok_or_else(|| ApiError::bad_request(format!("unsupported audio format '{s}'")))?,
    };

    let reply = state
        .registry
        .process_turn(&session_id, TurnInput::Audio { bytes, format })
        .await?;
    Ok(Json(reply.into()))
}

pub async fn text_turn(
    State(state): State<Arc<GatewayState>>,
    Path(session_id): Path<String>,
    Json(req): Json<TextTurnRequest>,
) -> Result<Json<TurnResponse>, ApiError> {
    if req.text.trim().is_empty() {
        return Err(ApiError::bad_request("text must not be empty"));
    }
    let reply = state
        .registry
        .process_turn(&session_id, TurnInput::Text(req.text))
        .await?;
    Ok(Json(reply.into()))
}

pub async fn end_session(
    State(state): State<Arc<GatewayState>>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    let ended = state.registry.end(&session_id).await;
    Json(json!({ "ended": ended }))
}

pub async fn list_sessions(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<ListQuery>,
) -> Json<serde_json::Value> {
    let sessions = state.registry.list_active(query.user_id.as_deref()).await;
    Json(json!({ "sessions": sessions }))
}

/// Mint standalone channel credentials, outside any session.
pub async fn issue_token(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<ChannelCredentials>, ApiError> {
    if req.channel_name.trim().is_empty() || req.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("channel_name and user_id are required"));
    }
    let role = ChannelRole::parse(req.role.as_deref().unwrap_or_default());
    let credentials = state.issuer.issue(&req.channel_name, &req.user_id, role)?;
    Ok(Json(credentials))
}

pub async fn health(State(state): State<Arc<GatewayState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": state.registry.active_count().await,
        "turns_processed": state.registry.turns_processed(),
    }))
}
