//! Session negotiation, lifecycle and media routing
//!
//! One session per browser peer connection. The session owns every resource
//! created for that peer (tracks, control channel, device writer, feed tasks)
//! and is the only component that reacts to peer-connection state changes.
//! There is no reconnection: a terminal state tears the session down and a
//! new offer/answer cycle builds a brand-new one.

pub mod peer;
pub mod registry;
pub mod signaling;
pub mod sink;
pub mod source;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;

use crate::control::{ControlChannel, ControlChannelState, ControlStatsSnapshot};
use crate::device::{DeviceClaims, DeviceWriter};

pub use registry::SessionRegistry;
pub use signaling::{AnswerResponse, ConnectionState, OfferRequest};
pub use sink::InboundVideoSink;
pub use source::OutboundVideoSource;

/// One browser-to-bridge connection and the resources it owns
pub struct Session {
    pub id: String,
    created_at: DateTime<Utc>,
    pc: Arc<RTCPeerConnection>,
    state_rx: watch::Receiver<ConnectionState>,
    control: Arc<ControlChannel>,
    writer: Option<Arc<DeviceWriter>>,
    claimed_device: Option<PathBuf>,
    claims: Arc<DeviceClaims>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: String,
        pc: Arc<RTCPeerConnection>,
        state_rx: watch::Receiver<ConnectionState>,
        control: Arc<ControlChannel>,
        writer: Option<Arc<DeviceWriter>>,
        claimed_device: Option<PathBuf>,
        claims: Arc<DeviceClaims>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            created_at: Utc::now(),
            pc,
            state_rx,
            control,
            writer,
            claimed_device,
            claims,
            cancel,
            closed: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn control_state(&self) -> ControlChannelState {
        self.control.state()
    }

    pub fn control_stats(&self) -> ControlStatsSnapshot {
        self.control.stats()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn has_device_writer(&self) -> bool {
        self.writer.is_some()
    }

    /// Release everything the session owns; safe to call any number of times
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("session {} already closed", self.id);
            return;
        }

        // Cancels the track feed (which drops the gateway subscription), the
        // inbound readers and the hello grace timer
        self.cancel.cancel();

        if let Some(writer) = &self.writer {
            writer.stop().await;
        }
        if let Some(path) = &self.claimed_device {
            self.claims.release(path);
        }

        self.control.mark_closed();

        if let Err(e) = self.pc.close().await {
            debug!("session {}: peer close: {}", self.id, e);
        }

        info!("session {} closed", self.id);
    }
}

/// Session summary for the status API
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub state: ConnectionState,
    pub control: ControlChannelState,
    pub created_at: DateTime<Utc>,
    pub age_secs: i64,
    pub device_writer: bool,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            state: session.state(),
            control: session.control_state(),
            created_at: session.created_at(),
            age_secs: (Utc::now() - session.created_at()).num_seconds(),
            device_writer: session.has_device_writer(),
        }
    }
}

/// Wire the browser-created data channel to the session's control channel
///
/// The browser opens the channel; the bridge only receives it. Messages are
/// processed to completion in arrival order, which preserves the channel's
/// ordering guarantee end to end.
pub(crate) fn wire_data_channel(
    pc: &Arc<RTCPeerConnection>,
    control: Arc<ControlChannel>,
    hello_grace: Duration,
    cancel: CancellationToken,
) {
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let control = control.clone();
        let cancel = cancel.clone();

        Box::pin(async move {
            info!("data channel '{}' announced", dc.label());

            let on_open_control = control.clone();
            let on_open_cancel = cancel.clone();
            let on_open_dc = dc.clone();
            dc.on_open(Box::new(move || {
                info!("data channel '{}' open", on_open_dc.label());
                on_open_control.mark_open(hello_grace, &on_open_cancel);
                Box::pin(async {})
            }));

            let on_message_control = control.clone();
            dc.on_message(Box::new(move |msg: DataChannelMessage| {
                let control = on_message_control.clone();
                Box::pin(async move {
                    control.handle_raw(&msg.data).await;
                })
            }));

            let on_close_control = control.clone();
            dc.on_close(Box::new(move || {
                on_close_control.mark_closed();
                Box::pin(async {})
            }));
        })
    }));
}
