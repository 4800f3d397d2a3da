//! HTTP surface.
//!
//! Handlers stay thin: authenticate, decode, delegate to the orchestrator,
//! recorder or profile store, encode. Every failure leaves as an `ApiError` body.

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, FromRequestParts, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use formcoach_protocol::{
    AnalyzeRequest, AnalyzeResponse, EndSessionRequest, EndSessionResponse, ErrorCode,
    HealthResponse, IntakeResponse, IntakeSaveResponse, PatientIntakeRequest,
    SessionListResponse, StartSessionRequest, StartSessionResponse,
};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::debug;

use crate::auth::parse_bearer;
use crate::error::ApiError;
use crate::state::SharedState;

type AppState = Arc<SharedState>;

pub fn router(state: AppState, max_frame_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/analyze", post(analyze))
        .route("/api/session/start", post(start_session))
        .route("/api/session/end", post(end_session))
        .route("/api/session/list", get(list_sessions))
        .route("/api/patient/intake", post(save_intake).get(get_intake))
        .layer(DefaultBodyLimit::max(max_frame_bytes))
        .with_state(state)
}

/// Serves until `shutdown` resolves, then drains in-flight requests.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    max_frame_bytes: usize,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state, max_frame_bytes))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Authenticated caller's user id.
pub struct AuthUser(pub String);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        let token = parse_bearer(header)?;
        let user_id = state.authenticator().authenticate(token)?;
        Ok(AuthUser(user_id))
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.health())
}

async fn analyze(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let request: AnalyzeRequest = decode_body(body)?;
    let response = state
        .orchestrator()
        .analyze_frame(&user_id, &request)
        .await?;
    Ok(Json(response))
}

async fn start_session(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<StartSessionResponse>, ApiError> {
    let request: StartSessionRequest = decode_body(body)?;
    let response = state
        .orchestrator()
        .start_session(&user_id, &request)
        .await?;
    Ok(Json(response))
}

async fn end_session(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<EndSessionResponse>, ApiError> {
    let request: EndSessionRequest = decode_body(body)?;
    let saved = state.recorder().end_session(&user_id, &request).await?;
    Ok(Json(EndSessionResponse {
        success: true,
        saved,
    }))
}

async fn list_sessions(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<SessionListResponse>, ApiError> {
    let sessions = state.recorder().list_sessions(&user_id).await?;
    debug!(user_id = %user_id, count = sessions.len(), "Sessions listed");
    Ok(Json(SessionListResponse { sessions }))
}

async fn save_intake(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<IntakeSaveResponse>, ApiError> {
    let request: PatientIntakeRequest = decode_body(body)?;
    let profile = state.profiles().save_intake(&user_id, request).await?;
    Ok(Json(IntakeSaveResponse {
        success: true,
        profile,
    }))
}

async fn get_intake(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<IntakeResponse>, ApiError> {
    let profile = state.profiles().get_intake(&user_id).await?;
    Ok(Json(IntakeResponse { profile }))
}

/// Decodes an optional JSON body. An empty body means "all defaults".
fn decode_body<T>(body: Result<Bytes, BytesRejection>) -> Result<T, ApiError>
where
    T: DeserializeOwned + Default,
{
    let bytes = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::new(ErrorCode::PayloadTooLarge, "Request body too large")
        } else {
            ApiError::new(ErrorCode::InvalidParams, rejection.body_text())
        }
    })?;

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }

    serde_json::from_slice(&bytes).map_err(|err| {
        ApiError::new(
            ErrorCode::InvalidParams,
            format!("Invalid JSON body: {}", err),
        )
    })
}
