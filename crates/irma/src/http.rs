//! Axum HTTP handlers for the IRMA server.
//!
//! Two surfaces share one engine: the requestor API under `/session` and the
//! wallet protocol under `/irma/`. Status subscriptions are streamed as
//! server-sent events.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{any, delete, get, post},
    Json, Router,
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use irma_core::SessionRequest;
use irma_server::{ProtocolResponse, Server, ServerError, StatusReceiver};

/// Shared application state for Axum handlers.
pub struct AppState {
    pub server: Arc<Server>,
}

/// Build the Axum router with all endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/session", post(handle_start_session))
        .route("/session/{token}", delete(handle_cancel))
        .route("/session/{token}/result", get(handle_result))
        .route("/session/{token}/request", get(handle_request))
        .route("/session/{token}/statusevents", get(handle_requestor_events))
        .route("/irma/{*path}", any(handle_protocol))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Engine error rendered as the wire error envelope.
pub struct ApiError(pub ServerError);

impl From<ServerError> for ApiError {
    fn from(e: ServerError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.to_remote())).into_response()
    }
}

// ---------------------------------------------------------------------------
// Requestor API
// ---------------------------------------------------------------------------

/// GET /health -- server info
async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let sessions = state.server.registry().len().unwrap_or(0);
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": sessions,
        "url": state.server.config().url,
    }))
}

/// POST /session -- start a session from a JSON session request
async fn handle_start_session(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request: SessionRequest = serde_json::from_slice(&body).map_err(ServerError::from)?;
    let (qr, token) = state.server.start_session(request)?;
    Ok(Json(serde_json::json!({
        "qr": qr,
        "token": token,
    })))
}

/// GET /session/{token}/result
async fn handle_result(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.server.session_result(&token)?))
}

/// GET /session/{token}/request
async fn handle_request(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.server.session_request(&token)?))
}

/// DELETE /session/{token}
async fn handle_cancel(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.server.cancel_session(&token)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /session/{token}/statusevents
async fn handle_requestor_events(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Response, ApiError> {
    let rx = state.server.subscribe_status(&token)?;
    Ok(status_events(rx))
}

// ---------------------------------------------------------------------------
// Wallet protocol
// ---------------------------------------------------------------------------

/// ANY /irma/{*path} -- hand the message to the protocol router
async fn handle_protocol(
    State(state): State<Arc<AppState>>,
    method: Method,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let headers: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let response = state
        .server
        .handle_protocol_message(&path, method.as_str(), &headers, &body);
    protocol_response(response)
}

fn protocol_response(response: ProtocolResponse) -> Response {
    if let Some(result) = &response.result {
        tracing::info!(
            token = %result.token,
            status = %result.status,
            proof_status = ?result.proof_status,
            "session result handed out"
        );
    }
    if let Some(rx) = response.events {
        return status_events(rx);
    }

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match response.body {
        Some(body) => (status, Json(body)).into_response(),
        None => status.into_response(),
    }
}

/// Stream status changes as SSE, ending after the first terminal status.
fn status_events(mut rx: StatusReceiver) -> Response {
    let (tx, events) = mpsc::channel::<Result<Event, Infallible>>(8);
    // Read before spawning so the status at subscription time is always sent.
    let mut status = *rx.borrow_and_update();
    tokio::spawn(async move {
        loop {
            let event = Event::default().data(status.to_string());
            if tx.send(Ok(event)).await.is_err() || status.finished() {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
            status = *rx.borrow_and_update();
        }
    });
    Sse::new(ReceiverStream::new(events))
        .keep_alive(KeepAlive::default())
        .into_response()
}
