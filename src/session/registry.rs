//! Session registry
//!
//! Explicit create/lookup/remove lifecycle keyed by session id; there is no
//! "current session" singleton anywhere in the bridge. The registry also
//! performs the whole offer-to-answer build so a failed negotiation never
//! leaves a half-constructed session behind.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use super::peer;
use super::sink::{self, InboundVideoSink};
use super::source::{self, OutboundVideoSource};
use super::{wire_data_channel, Session, SessionSummary};
use crate::config::AppConfig;
use crate::control::{ControlChannel, ControlSink};
use crate::device::{device_writable, DeviceClaims, DeviceWriter, SubprocessFactory};
use crate::error::{BridgeError, Result};
use crate::gateway::FrameGateway;
use tokio_util::sync::CancellationToken;

/// Registry of live sessions
pub struct SessionRegistry {
    config: AppConfig,
    gateway: Arc<FrameGateway>,
    control_sink: Arc<dyn ControlSink>,
    claims: Arc<DeviceClaims>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(
        config: AppConfig,
        gateway: Arc<FrameGateway>,
        control_sink: Arc<dyn ControlSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            gateway,
            control_sink,
            claims: DeviceClaims::new(),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Build a session from an offer and return it with the answer SDP
    ///
    /// On any failure everything created so far is torn down and no session
    /// is registered.
    pub async fn create_session(
        self: &Arc<Self>,
        offer_sdp: String,
    ) -> Result<(Arc<Session>, String)> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();

        let pc = peer::new_peer_connection(&self.config.stun_servers).await?;
        let state_rx = peer::wire_state_watch(&pc, &session_id);

        // Outbound: gateway-fed track with per-session synthetic fallback
        let track = source::new_outbound_track(&session_id);
        pc.add_track(track.clone())
            .await
            .map_err(|e| BridgeError::Signaling(format!("failed to add video track: {}", e)))?;
        let outbound = OutboundVideoSource::new(self.gateway.subscribe(), self.config.resolution);
        source::spawn_feed(track, outbound, self.config.fps, cancel.clone());

        // Control channel arrives from the browser during negotiation
        let control = ControlChannel::new(session_id.clone(), self.control_sink.clone());
        wire_data_channel(
            &pc,
            control.clone(),
            Duration::from_secs(self.config.hello_grace_secs),
            cancel.clone(),
        );

        // Inbound: optional device write-back, never required for the session
        let (writer, claimed_device) = match &self.config.device_path {
            Some(path) => match self.open_device_writer(path).await {
                Ok(writer) => (Some(Arc::new(writer)), Some(path.clone())),
                Err(e) => {
                    warn!(
                        "session {}: continuing without device writer: {}",
                        session_id, e
                    );
                    (None, None)
                }
            },
            None => (None, None),
        };

        let inbound = InboundVideoSink::new(
            session_id.clone(),
            self.config.resolution,
            writer.clone(),
            cancel.clone(),
        );
        sink::wire_inbound(&pc, inbound);

        let gather_timeout = Duration::from_millis(self.config.ice_gather_timeout_ms);
        let answer_sdp = match peer::apply_offer(&pc, offer_sdp, gather_timeout).await {
            Ok(sdp) => sdp,
            Err(e) => {
                cancel.cancel();
                if let Some(writer) = &writer {
                    writer.stop().await;
                }
                if let Some(path) = &claimed_device {
                    self.claims.release(path);
                }
                let _ = pc.close().await;
                return Err(e);
            }
        };

        let session = Session::new(
            session_id.clone(),
            pc,
            state_rx,
            control,
            writer,
            claimed_device,
            self.claims.clone(),
            cancel,
        );

        self.sessions
            .write()
            .await
            .insert(session_id.clone(), session.clone());
        self.spawn_monitor(&session);

        info!("session {} created ({})", session_id, session.state());
        Ok((session, answer_sdp))
    }

    /// Claim the device and start the writer subprocess
    async fn open_device_writer(&self, path: &Path) -> Result<DeviceWriter> {
        self.claims.claim(path)?;

        if !device_writable(path) {
            self.claims.release(path);
            return Err(BridgeError::DeviceWriter(format!(
                "device {} is not writable",
                path.display()
            )));
        }

        let command = self.config.resolved_writer_command(path);
        let factory = Arc::new(SubprocessFactory::new(command)?);
        match DeviceWriter::spawn(factory).await {
            Ok(writer) => Ok(writer),
            Err(e) => {
                self.claims.release(path);
                Err(e)
            }
        }
    }

    /// Watch the peer state and release the session on terminal states
    fn spawn_monitor(self: &Arc<Self>, session: &Arc<Session>) {
        let registry = self.clone();
        let session = session.clone();
        let mut state_rx = session.state_watch();

        tokio::spawn(async move {
            loop {
                if state_rx.changed().await.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                if state.is_terminal() {
                    info!("session {} reached terminal state {}", session.id, state);
                    session.close().await;
                    registry.remove(&session.id).await;
                    break;
                }
            }
        });
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(id)
    }

    /// Close and remove a session; unknown ids are a no-op
    pub async fn close_session(&self, id: &str) {
        if let Some(session) = self.remove(id).await {
            session.close().await;
        }
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        self.sessions
            .read()
            .await
            .values()
            .map(|s| SessionSummary::from(s.as_ref()))
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Close every session in parallel, used at shutdown
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().collect();
        let closes: Vec<_> = sessions
            .iter()
            .map(|(_, session)| session.close())
            .collect();
        futures::future::join_all(closes).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ChannelSink;
    use crate::session::signaling::ConnectionState;
    use std::net::{IpAddr, Ipv4Addr};
    use webrtc::peer_connection::RTCPeerConnection;
    use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

    fn test_registry() -> Arc<SessionRegistry> {
        let config = AppConfig {
            ice_gather_timeout_ms: 500,
            ..AppConfig::default()
        };
        let gateway = FrameGateway::new(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
        let (sink, _rx) = ChannelSink::new();
        SessionRegistry::new(config, gateway, Arc::new(sink))
    }

    /// Build a browser-like peer and produce a real offer
    async fn client_offer() -> (Arc<RTCPeerConnection>, String) {
        let pc = peer::new_peer_connection(&[]).await.unwrap();
        pc.create_data_channel("control", None).await.unwrap();
        pc.add_transceiver_from_kind(RTPCodecType::Video, None)
            .await
            .unwrap();

        let offer = pc.create_offer(None).await.unwrap();
        let mut gather = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await.unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(2), gather.recv()).await;

        let sdp = pc.local_description().await.unwrap().sdp;
        (pc, sdp)
    }

    #[tokio::test]
    async fn valid_offer_yields_one_session_and_answer() {
        let registry = test_registry();
        let (client, offer_sdp) = client_offer().await;

        let (session, answer) = registry.create_session(offer_sdp).await.unwrap();
        assert!(!answer.is_empty());
        assert!(answer.contains("v=0"));
        assert_eq!(registry.count().await, 1);
        assert!(!session.state().is_terminal());

        session.close().await;
        let _ = client.close().await;
    }

    #[tokio::test]
    async fn malformed_offer_creates_no_session() {
        let registry = test_registry();

        let result = registry.create_session("definitely not sdp".into()).await;
        assert!(matches!(result, Err(BridgeError::Signaling(_))));
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let registry = test_registry();
        let (client, offer_sdp) = client_offer().await;

        let (session, _answer) = registry.create_session(offer_sdp).await.unwrap();
        session.close().await;
        session.close().await;

        // State propagates through the peer callback; allow it a moment
        let mut state_rx = session.state_watch();
        while !state_rx.borrow_and_update().is_terminal() {
            tokio::time::timeout(Duration::from_secs(2), state_rx.changed())
                .await
                .expect("peer should reach a terminal state")
                .unwrap();
        }
        assert_eq!(session.state(), ConnectionState::Closed);

        // Registry-level close of an already-removed id is also a no-op
        registry.close_session(&session.id).await;
        registry.close_session(&session.id).await;

        let _ = client.close().await;
    }

    #[tokio::test]
    async fn terminal_state_releases_the_registry_slot() {
        let registry = test_registry();
        let (client, offer_sdp) = client_offer().await;

        let (session, _answer) = registry.create_session(offer_sdp).await.unwrap();
        assert_eq!(registry.count().await, 1);

        // Closing drives the peer connection to its terminal state; the
        // monitor task then removes the registry entry
        session.close().await;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while registry.count().await != 0 {
            assert!(tokio::time::Instant::now() < deadline, "session never removed");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let _ = client.close().await;
    }

    #[tokio::test]
    async fn close_all_empties_the_registry() {
        let registry = test_registry();
        let (client_a, offer_a) = client_offer().await;
        let (client_b, offer_b) = client_offer().await;

        registry.create_session(offer_a).await.unwrap();
        registry.create_session(offer_b).await.unwrap();
        assert_eq!(registry.count().await, 2);

        registry.close_all().await;
        assert_eq!(registry.count().await, 0);

        let _ = client_a.close().await;
        let _ = client_b.close().await;
    }
}
