//! Control channel protocol
//!
//! Typed message framing for the reliable, ordered channel negotiated with the
//! browser. Each record is one JSON object; the browser is expected to open
//! the channel and send a `hello` first. Key and command events are forwarded
//! in arrival order to the registered sink; the bridge never buffers beyond
//! the channel's own backlog because human input tolerates loss far better
//! than a stalled transport.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};

/// Keyboard event as the browser reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: String,
    pub code: String,
    #[serde(rename = "altKey")]
    pub alt_key: bool,
    #[serde(rename = "ctrlKey")]
    pub ctrl_key: bool,
    #[serde(rename = "shiftKey")]
    pub shift_key: bool,
    #[serde(rename = "metaKey")]
    pub meta_key: bool,
    /// Session-relative logical timestamp assigned by the sender
    pub timestamp: u64,
    /// true on key down, false on release
    pub down: bool,
}

/// Control channel message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Channel (re)establishment marker; consumers reset ordering state
    Hello,
    /// Keyboard event
    Key(KeyEvent),
    /// Named command from the vocabulary agreed with the consumer
    Command { command: String },
}

/// Parse one raw channel record
pub fn parse_control_message(data: &[u8]) -> Result<ControlMessage> {
    serde_json::from_slice(data).map_err(|e| BridgeError::ChannelProtocol(e.to_string()))
}

/// Control channel state, as seen by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlChannelState {
    Connecting,
    Open,
    Closed,
    Error,
}

/// Consumer of forwarded control messages
///
/// The actual consumer (input injector, game process) lives outside the
/// bridge; implementations here only carry messages across that boundary.
#[async_trait]
pub trait ControlSink: Send + Sync {
    async fn deliver(&self, msg: ControlMessage) -> Result<()>;
}

/// Forwards each message as one JSON line over a short-lived loopback TCP
/// connection, the contract the host-side input server expects.
pub struct TcpForwardSink {
    addr: std::net::SocketAddr,
}

impl TcpForwardSink {
    pub fn new(addr: std::net::SocketAddr) -> Self {
        Self { addr }
    }
}

#[async_trait]
impl ControlSink for TcpForwardSink {
    async fn deliver(&self, msg: ControlMessage) -> Result<()> {
        let mut line = serde_json::to_vec(&msg)?;
        line.push(b'\n');

        let mut stream = TcpStream::connect(self.addr).await?;
        stream.write_all(&line).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

/// Delivers messages into an in-process channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ControlMessage>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ControlMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ControlSink for ChannelSink {
    async fn deliver(&self, msg: ControlMessage) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| BridgeError::ChannelProtocol("control consumer gone".into()))
    }
}

/// Sink used when no consumer is configured; messages are discarded quietly
pub struct NullSink;

#[async_trait]
impl ControlSink for NullSink {
    async fn deliver(&self, msg: ControlMessage) -> Result<()> {
        debug!("no control consumer configured, discarding {:?}", msg);
        Ok(())
    }
}

/// Forwarding counters
#[derive(Debug, Default)]
pub struct ControlStats {
    pub forwarded: AtomicU64,
    pub dropped_malformed: AtomicU64,
    pub dropped_unavailable: AtomicU64,
}

/// Snapshot of [`ControlStats`]
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ControlStatsSnapshot {
    pub forwarded: u64,
    pub dropped_malformed: u64,
    pub dropped_unavailable: u64,
}

impl ControlStats {
    pub fn snapshot(&self) -> ControlStatsSnapshot {
        ControlStatsSnapshot {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_unavailable: self.dropped_unavailable.load(Ordering::Relaxed),
        }
    }
}

/// One session's control channel
///
/// Transport-independent: the session wires the data channel callbacks to
/// [`handle_raw`](Self::handle_raw) and the state markers. Message order is
/// preserved because records are processed to completion in arrival order.
pub struct ControlChannel {
    session_id: String,
    sink: Arc<dyn ControlSink>,
    stats: ControlStats,
    state_tx: watch::Sender<ControlChannelState>,
    hello_seen: AtomicBool,
}

impl ControlChannel {
    pub fn new(session_id: String, sink: Arc<dyn ControlSink>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ControlChannelState::Connecting);
        Arc::new(Self {
            session_id,
            sink,
            stats: ControlStats::default(),
            state_tx,
            hello_seen: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> ControlChannelState {
        *self.state_tx.borrow()
    }

    pub fn stats(&self) -> ControlStatsSnapshot {
        self.stats.snapshot()
    }

    /// Mark the underlying channel open and start the hello grace timer
    pub fn mark_open(self: &Arc<Self>, grace: Duration, cancel: &CancellationToken) {
        self.state_tx.send_replace(ControlChannelState::Open);

        let channel = self.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(grace) => {
                    if !channel.hello_seen.load(Ordering::Relaxed) {
                        warn!(
                            "control channel for session {} saw no hello within {:?}",
                            channel.session_id, grace
                        );
                    }
                }
            }
        });
    }

    pub fn mark_closed(&self) {
        self.state_tx.send_replace(ControlChannelState::Closed);
    }

    pub fn mark_error(&self) {
        self.state_tx.send_replace(ControlChannelState::Error);
    }

    /// Process one raw channel record
    ///
    /// Malformed records and sink failures are counted, never fatal.
    pub async fn handle_raw(&self, data: &[u8]) {
        let msg = match parse_control_message(data) {
            Ok(msg) => msg,
            Err(e) => {
                self.stats.dropped_malformed.fetch_add(1, Ordering::Relaxed);
                warn!("session {}: {}", self.session_id, e);
                return;
            }
        };

        if matches!(msg, ControlMessage::Hello) {
            self.hello_seen.store(true, Ordering::Relaxed);
            debug!("session {}: control channel hello", self.session_id);
        }

        match self.sink.deliver(msg).await {
            Ok(()) => {
                self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats
                    .dropped_unavailable
                    .fetch_add(1, Ordering::Relaxed);
                debug!("session {}: control sink unavailable: {}", self.session_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arrow_up_json() -> &'static str {
        r#"{"type":"key","key":"ArrowUp","code":"ArrowUp","altKey":false,"ctrlKey":false,"shiftKey":false,"metaKey":false,"timestamp":1000,"down":true}"#
    }

    #[test]
    fn parse_hello() {
        let msg = parse_control_message(br#"{"type":"hello"}"#).unwrap();
        assert_eq!(msg, ControlMessage::Hello);
    }

    #[test]
    fn parse_key_event() {
        let msg = parse_control_message(arrow_up_json().as_bytes()).unwrap();
        match msg {
            ControlMessage::Key(event) => {
                assert_eq!(event.key, "ArrowUp");
                assert_eq!(event.code, "ArrowUp");
                assert!(!event.alt_key && !event.ctrl_key && !event.shift_key && !event.meta_key);
                assert_eq!(event.timestamp, 1000);
                assert!(event.down);
            }
            other => panic!("expected key event, got {:?}", other),
        }
    }

    #[test]
    fn parse_command() {
        let msg = parse_control_message(br#"{"type":"command","command":"fire"}"#).unwrap();
        assert_eq!(
            msg,
            ControlMessage::Command {
                command: "fire".into()
            }
        );
    }

    #[test]
    fn parse_garbage_fails() {
        assert!(parse_control_message(b"not json").is_err());
        assert!(parse_control_message(br#"{"type":"warp"}"#).is_err());
    }

    #[test]
    fn key_event_serializes_with_browser_field_names() {
        let msg = ControlMessage::Key(KeyEvent {
            key: "f".into(),
            code: "KeyF".into(),
            alt_key: false,
            ctrl_key: true,
            shift_key: false,
            meta_key: false,
            timestamp: 5,
            down: false,
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"key""#));
        assert!(json.contains(r#""ctrlKey":true"#));
        assert!(json.contains(r#""down":false"#));
    }

    #[tokio::test]
    async fn key_events_forwarded_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        let channel = ControlChannel::new("s1".into(), Arc::new(sink));

        channel.handle_raw(br#"{"type":"hello"}"#).await;
        channel.handle_raw(arrow_up_json().as_bytes()).await;
        channel
            .handle_raw(br#"{"type":"command","command":"shield"}"#)
            .await;

        assert_eq!(rx.recv().await.unwrap(), ControlMessage::Hello);
        match rx.recv().await.unwrap() {
            ControlMessage::Key(event) => assert_eq!(event.key, "ArrowUp"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            rx.recv().await.unwrap(),
            ControlMessage::Command {
                command: "shield".into()
            }
        );
        assert_eq!(channel.stats().forwarded, 3);
    }

    #[tokio::test]
    async fn malformed_messages_counted_not_fatal() {
        let (sink, mut rx) = ChannelSink::new();
        let channel = ControlChannel::new("s1".into(), Arc::new(sink));

        channel.handle_raw(b"{{{{").await;
        channel.handle_raw(arrow_up_json().as_bytes()).await;

        let stats = channel.stats();
        assert_eq!(stats.dropped_malformed, 1);
        assert_eq!(stats.forwarded, 1);
        assert!(matches!(rx.recv().await.unwrap(), ControlMessage::Key(_)));
    }

    #[tokio::test]
    async fn unavailable_sink_counts_drops() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        let channel = ControlChannel::new("s1".into(), Arc::new(sink));

        channel.handle_raw(br#"{"type":"command","command":"ice"}"#).await;

        let stats = channel.stats();
        assert_eq!(stats.dropped_unavailable, 1);
        assert_eq!(stats.forwarded, 0);
    }
}
