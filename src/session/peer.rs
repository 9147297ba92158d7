//! Peer connection construction and state wiring

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::signaling::ConnectionState;
use crate::error::{BridgeError, Result};

/// Create a peer connection with the default codec set
pub async fn new_peer_connection(stun_servers: &[String]) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| BridgeError::PeerConnection(format!("failed to register codecs: {}", e)))?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| BridgeError::PeerConnection(format!("failed to register interceptors: {}", e)))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let ice_servers = stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .collect();

    let config = RTCConfiguration {
        ice_servers,
        ..Default::default()
    };

    let pc = api
        .new_peer_connection(config)
        .await
        .map_err(|e| BridgeError::PeerConnection(format!("failed to create peer connection: {}", e)))?;

    Ok(Arc::new(pc))
}

/// Mirror peer connection state changes into a watch channel
///
/// The session is the only component that owns this sender; everything else
/// reads through the returned receiver.
pub fn wire_state_watch(
    pc: &Arc<RTCPeerConnection>,
    session_id: &str,
) -> watch::Receiver<ConnectionState> {
    let (state_tx, state_rx) = watch::channel(ConnectionState::New);
    let session_id = session_id.to_string();

    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        let new_state = match s {
            RTCPeerConnectionState::New => Some(ConnectionState::New),
            RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
            RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
            RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
            RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
            RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
            _ => None,
        };

        if let Some(new_state) = new_state {
            info!("peer {} connection state: {}", session_id, new_state);
            let _ = state_tx.send(new_state);
        }

        Box::pin(async {})
    }));

    state_rx
}

/// Apply a remote offer and produce the local answer
///
/// Waits for ICE gathering up to `gather_timeout` so the answer carries the
/// host candidates; the request stays bounded either way.
pub async fn apply_offer(
    pc: &Arc<RTCPeerConnection>,
    offer_sdp: String,
    gather_timeout: Duration,
) -> Result<String> {
    let offer = RTCSessionDescription::offer(offer_sdp)
        .map_err(|e| BridgeError::Signaling(format!("invalid SDP offer: {}", e)))?;

    pc.set_remote_description(offer)
        .await
        .map_err(|e| BridgeError::Signaling(format!("failed to apply offer: {}", e)))?;

    let answer = pc
        .create_answer(None)
        .await
        .map_err(|e| BridgeError::Signaling(format!("failed to create answer: {}", e)))?;

    let mut gather_complete = pc.gathering_complete_promise().await;

    pc.set_local_description(answer)
        .await
        .map_err(|e| BridgeError::Signaling(format!("failed to set local description: {}", e)))?;

    let _ = tokio::time::timeout(gather_timeout, gather_complete.recv()).await;

    let local = pc
        .local_description()
        .await
        .ok_or_else(|| BridgeError::Signaling("no local description generated".into()))?;

    Ok(local.sdp)
}
