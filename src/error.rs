use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Signaling failed: {0}")]
    Signaling(String),

    #[error("Malformed control message: {0}")]
    ChannelProtocol(String),

    #[error("Untrusted gateway origin: {0}")]
    GatewayAuth(std::net::IpAddr),

    #[error("Frame sequence violation: got {got}, last accepted {last}")]
    GatewaySequence { got: u64, last: u64 },

    #[error("Malformed frame record: {0}")]
    GatewayProtocol(String),

    #[error("Device writer failed: {0}")]
    DeviceWriter(String),

    #[error("Peer connection failed: {0}")]
    PeerConnection(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl BridgeError {
    fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::Signaling(_) => StatusCode::BAD_REQUEST,
            BridgeError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.to_string(),
        };

        tracing::error!(
            error_type = std::any::type_name_of_val(&self),
            error_message = %body.error,
            "Request failed"
        );

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, BridgeError>;
