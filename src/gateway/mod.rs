//! Frame ingestion gateway
//!
//! A dedicated TCP listener, separate from the signaling endpoint, where the
//! host application (or any local producer) pushes rendered frames. The
//! gateway is the trust boundary: connections are checked against the
//! configured trust set at accept time and closed before any protocol
//! exchange when the origin is not allowed.
//!
//! Accepted frames are republished latest-wins to every subscribed outbound
//! video source. When the last producer disconnects, subscribers are told so
//! they fall back to their synthetic generators.

pub mod wire;

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::video::VideoFrame;

/// Per-connection monotonic sequence enforcement
#[derive(Debug, Default)]
pub struct SequenceValidator {
    last: Option<u64>,
}

impl SequenceValidator {
    /// Accept a sequence number if it is strictly greater than the last one
    pub fn accept(&mut self, sequence: u64) -> Result<()> {
        match self.last {
            Some(last) if sequence <= last => {
                Err(BridgeError::GatewaySequence {
                    got: sequence,
                    last,
                })
            }
            _ => {
                self.last = Some(sequence);
                Ok(())
            }
        }
    }
}

/// Gateway counters
#[derive(Debug, Default)]
pub struct GatewayStats {
    pub auth_rejected: AtomicU64,
    pub sequence_dropped: AtomicU64,
    pub frames_published: AtomicU64,
    pub protocol_errors: AtomicU64,
}

/// Snapshot of [`GatewayStats`]
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GatewayStatsSnapshot {
    pub auth_rejected: u64,
    pub sequence_dropped: u64,
    pub frames_published: u64,
    pub protocol_errors: u64,
    pub producers: usize,
}

/// Frame ingestion gateway service
pub struct FrameGateway {
    trust: Vec<IpAddr>,
    frame_tx: watch::Sender<Option<VideoFrame>>,
    stats: GatewayStats,
    producers: AtomicUsize,
    cancel: CancellationToken,
}

impl FrameGateway {
    pub fn new(trust: Vec<IpAddr>) -> Arc<Self> {
        let (frame_tx, _) = watch::channel(None);
        Arc::new(Self {
            trust,
            frame_tx,
            stats: GatewayStats::default(),
            producers: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to the republished frame stream
    ///
    /// The receiver only ever holds the most recent frame; `None` means no
    /// producer is connected and the subscriber should serve synthetic video.
    pub fn subscribe(&self) -> watch::Receiver<Option<VideoFrame>> {
        self.frame_tx.subscribe()
    }

    pub fn producer_count(&self) -> usize {
        self.producers.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> GatewayStatsSnapshot {
        GatewayStatsSnapshot {
            auth_rejected: self.stats.auth_rejected.load(Ordering::Relaxed),
            sequence_dropped: self.stats.sequence_dropped.load(Ordering::Relaxed),
            frames_published: self.stats.frames_published.load(Ordering::Relaxed),
            protocol_errors: self.stats.protocol_errors.load(Ordering::Relaxed),
            producers: self.producer_count(),
        }
    }

    /// Check a producer origin against the trust set
    pub fn is_trusted(&self, ip: IpAddr) -> bool {
        self.trust.contains(&ip)
    }

    /// Stop the accept loop and all producer connections
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Run the accept loop on an already-bound listener
    pub fn spawn(self: &Arc<Self>, listener: TcpListener) -> JoinHandle<()> {
        let gateway = self.clone();
        tokio::spawn(async move {
            gateway.accept_loop(listener).await;
        })
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        match listener.local_addr() {
            Ok(addr) => info!("frame gateway listening on {}", addr),
            Err(_) => info!("frame gateway listening"),
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("frame gateway shutting down");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if !self.is_trusted(addr.ip()) {
                                // Close before any protocol exchange
                                self.stats.auth_rejected.fetch_add(1, Ordering::Relaxed);
                                warn!("{}", BridgeError::GatewayAuth(addr.ip()));
                                drop(stream);
                                continue;
                            }

                            let gateway = self.clone();
                            tokio::spawn(async move {
                                gateway.run_producer(stream, addr).await;
                            });
                        }
                        Err(e) => {
                            warn!("frame gateway accept failed: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn run_producer(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let count = self.producers.fetch_add(1, Ordering::SeqCst) + 1;
        info!("frame producer connected from {} ({} active)", addr, count);

        let mut validator = SequenceValidator::default();
        let mut reader = BufReader::new(stream);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = wire::read_frame(&mut reader) => {
                    match result {
                        Ok(Some((header, payload))) => {
                            if let Err(e) = validator.accept(header.sequence) {
                                self.stats.sequence_dropped.fetch_add(1, Ordering::Relaxed);
                                debug!("producer {}: {}", addr, e);
                                continue;
                            }
                            let frame = VideoFrame::new(
                                payload,
                                header.resolution(),
                                header.format,
                                header.sequence,
                            );
                            self.publish(frame);
                        }
                        Ok(None) => {
                            info!("frame producer {} disconnected", addr);
                            break;
                        }
                        Err(e) => {
                            self.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
                            warn!("frame producer {} dropped: {}", addr, e);
                            break;
                        }
                    }
                }
            }
        }

        let remaining = self.producers.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            // Subscribers switch to their synthetic fallback
            self.frame_tx.send_replace(None);
            info!("no frame producers connected, subscribers fall back to synthetic video");
        }
    }

    /// Republish one accepted frame to all subscribers
    pub fn publish(&self, frame: VideoFrame) {
        self.stats.frames_published.fetch_add(1, Ordering::Relaxed);
        self.frame_tx.send_replace(Some(frame));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::format::PixelFormat;
    use bytes::Bytes;
    use std::net::Ipv4Addr;
    use tokio::io::AsyncWriteExt;

    fn frame_record(sequence: u64, payload: &[u8]) -> Vec<u8> {
        let header = wire::FrameHeader {
            width: 4,
            height: 4,
            format: PixelFormat::Jpeg,
            sequence,
            len: payload.len() as u32,
        };
        let mut record = header.encode().to_vec();
        record.extend_from_slice(payload);
        record
    }

    async fn bound_gateway(trust: Vec<IpAddr>) -> (Arc<FrameGateway>, SocketAddr) {
        let gateway = FrameGateway::new(trust);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        gateway.spawn(listener);
        (gateway, addr)
    }

    #[test]
    fn sequence_validator_drops_regressions() {
        let mut validator = SequenceValidator::default();
        assert!(validator.accept(1).is_ok());
        assert!(validator.accept(2).is_ok());
        assert!(validator.accept(4).is_ok());
        // 3 arrives after 4: out of order, dropped
        assert!(validator.accept(3).is_err());
        assert!(validator.accept(4).is_err());
        assert!(validator.accept(5).is_ok());
    }

    #[test]
    fn trust_check() {
        let gateway = FrameGateway::new(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
        assert!(gateway.is_trusted(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(!gateway.is_trusted("192.0.2.7".parse().unwrap()));
    }

    #[test]
    fn publish_reaches_subscriber() {
        let gateway = FrameGateway::new(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
        let rx = gateway.subscribe();
        assert!(rx.borrow().is_none());

        let frame = VideoFrame::new(
            Bytes::from_static(b"abc"),
            crate::video::Resolution::new(4, 4),
            PixelFormat::Jpeg,
            1,
        );
        gateway.publish(frame);
        assert_eq!(rx.borrow().as_ref().map(|f| f.sequence), Some(1));
    }

    #[tokio::test]
    async fn producer_stream_latest_wins_and_drops_out_of_order() {
        let (gateway, addr) = bound_gateway(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]).await;
        let mut rx = gateway.subscribe();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        for (sequence, payload) in [(1u64, b"a"), (2, b"b"), (4, b"d"), (3, b"c")] {
            stream
                .write_all(&frame_record(sequence, payload))
                .await
                .unwrap();
        }
        stream.flush().await.unwrap();

        // Wait until the newest accepted frame (sequence 4) is visible
        loop {
            rx.changed().await.unwrap();
            let latest = rx.borrow_and_update().as_ref().map(|f| f.sequence);
            if latest == Some(4) {
                break;
            }
            // Sequence 3 must never be observed after 4
            assert!(latest < Some(4) || latest.is_none());
        }

        // Give the out-of-order record a chance to (incorrectly) propagate
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(rx.borrow().as_ref().map(|f| f.sequence), Some(4));
        assert_eq!(gateway.stats().sequence_dropped, 1);

        drop(stream);
        gateway.shutdown();
    }

    #[tokio::test]
    async fn untrusted_origin_closed_without_protocol_exchange() {
        // Trust set that excludes loopback, so a local connection is rejected
        let (gateway, addr) = bound_gateway(vec!["192.0.2.1".parse().unwrap()]).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        // The gateway closes immediately; the first read observes EOF
        let mut buf = [0u8; 1];
        use tokio::io::AsyncReadExt;
        let n = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            stream.read(&mut buf),
        )
        .await
        .expect("gateway should close promptly")
        .unwrap();
        assert_eq!(n, 0);
        assert_eq!(gateway.stats().auth_rejected, 1);
        assert_eq!(gateway.producer_count(), 0);

        gateway.shutdown();
    }

    #[tokio::test]
    async fn producer_disconnect_triggers_fallback_signal() {
        let (gateway, addr) = bound_gateway(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]).await;
        let mut rx = gateway.subscribe();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&frame_record(1, b"x")).await.unwrap();
        stream.flush().await.unwrap();

        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_some());

        drop(stream);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_none());

        gateway.shutdown();
    }
}
