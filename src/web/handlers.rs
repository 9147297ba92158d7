//! HTTP handlers for signaling and status

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{BridgeError, Result};
use crate::gateway::GatewayStatsSnapshot;
use crate::session::{AnswerResponse, OfferRequest, SessionSummary};
use crate::state::AppState;

/// Handle a session description offer
///
/// One synchronous round trip: the session is fully negotiated before the
/// response goes out, and a failed negotiation leaves nothing behind.
pub async fn offer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OfferRequest>,
) -> Result<Json<AnswerResponse>> {
    if req.kind != "offer" {
        return Err(BridgeError::Signaling(format!(
            "expected description type \"offer\", got \"{}\"",
            req.kind
        )));
    }
    if req.sdp.trim().is_empty() {
        return Err(BridgeError::Signaling("empty SDP".into()));
    }

    let (session, answer_sdp) = state.registry.create_session(req.sdp).await?;
    info!("answered offer with session {}", session.id);

    Ok(Json(AnswerResponse::new(answer_sdp)))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct SessionsResponse {
    pub session_count: usize,
    pub sessions: Vec<SessionSummary>,
    pub gateway: GatewayStatsSnapshot,
}

pub async fn sessions(State(state): State<Arc<AppState>>) -> Json<SessionsResponse> {
    let sessions = state.registry.list().await;
    Json(SessionsResponse {
        session_count: sessions.len(),
        sessions,
        gateway: state.gateway.stats(),
    })
}

#[derive(Deserialize)]
pub struct CloseSessionRequest {
    pub session_id: String,
}

#[derive(Serialize)]
pub struct CloseSessionResponse {
    pub success: bool,
}

/// Close a session explicitly; closing an unknown or already-closed session
/// is a no-op
pub async fn close_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CloseSessionRequest>,
) -> Json<CloseSessionResponse> {
    state.registry.close_session(&req.session_id).await;
    Json(CloseSessionResponse { success: true })
}
