//! Signaling types
//!
//! The offer/answer exchange is one synchronous HTTP round trip: the browser
//! posts `{sdp, type: "offer"}` and receives `{sdp, type: "answer"}` once the
//! local description is ready.

use serde::{Deserialize, Serialize};

/// Session description offer from the browser
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    /// SDP content
    pub sdp: String,
    /// Description type, must be "offer"
    #[serde(rename = "type")]
    pub kind: String,
}

/// Session description answer from the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    /// SDP content
    pub sdp: String,
    /// Description type, always "answer"
    #[serde(rename = "type")]
    pub kind: String,
}

impl AnswerResponse {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: "answer".to_string(),
        }
    }
}

/// Peer connection state, mirrored from the underlying connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Terminal states release the session and all its resources
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_request_parses_browser_payload() {
        let req: OfferRequest =
            serde_json::from_str(r#"{"sdp":"v=0...","type":"offer"}"#).unwrap();
        assert_eq!(req.kind, "offer");
        assert_eq!(req.sdp, "v=0...");
    }

    #[test]
    fn answer_serializes_with_type_field() {
        let json = serde_json::to_string(&AnswerResponse::new("v=0...")).unwrap();
        assert!(json.contains(r#""type":"answer""#));
    }

    #[test]
    fn terminal_states() {
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Disconnected.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
    }
}
