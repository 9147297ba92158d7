//! Outbound video source
//!
//! Per-session pull adapter between the frame gateway and the peer
//! connection's video track. The track feed runs at its own cadence and asks
//! the source for the next frame on every tick; the source only ever holds
//! the single most recently published frame and falls back to its synthetic
//! generator whenever no producer is live.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::video::format::Resolution;
use crate::video::frame::VideoFrame;
use crate::video::synthetic::SyntheticGenerator;

/// Create the local video track sent to the browser
pub fn new_outbound_track(session_id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        },
        "bridge-video".to_string(),
        format!("castbridge-{}", session_id),
    ))
}

/// Pull adapter serving the latest gateway frame or a synthetic one
pub struct OutboundVideoSource {
    gateway_rx: watch::Receiver<Option<VideoFrame>>,
    synthetic: SyntheticGenerator,
}

impl OutboundVideoSource {
    pub fn new(gateway_rx: watch::Receiver<Option<VideoFrame>>, resolution: Resolution) -> Self {
        Self {
            gateway_rx,
            synthetic: SyntheticGenerator::new(resolution),
        }
    }

    /// The next frame to send; never blocks
    pub fn next_frame(&mut self) -> VideoFrame {
        let latest = self.gateway_rx.borrow().clone();
        match latest {
            Some(frame) => frame,
            None => self.synthetic.next_frame(),
        }
    }
}

/// Drive the track at the negotiated cadence
///
/// Holding the source (and with it the gateway receiver) inside the task
/// means cancelling it also unsubscribes the session from the gateway.
pub fn spawn_feed(
    track: Arc<TrackLocalStaticSample>,
    mut source: OutboundVideoSource,
    fps: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let frame_interval = Duration::from_secs(1) / fps.max(1);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(frame_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let frame = source.next_frame();
                    let sample = Sample {
                        data: frame.data_bytes(),
                        duration: frame_interval,
                        ..Default::default()
                    };
                    if let Err(e) = track.write_sample(&sample).await {
                        debug!("outbound write_sample failed (no peer yet?): {}", e);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::format::PixelFormat;
    use bytes::Bytes;

    fn gateway_frame(sequence: u64) -> VideoFrame {
        VideoFrame::new(
            Bytes::from_static(b"encoded"),
            Resolution::VGA,
            PixelFormat::Vp8,
            sequence,
        )
    }

    #[test]
    fn serves_synthetic_before_any_producer_frame() {
        let (_tx, rx) = watch::channel(None);
        let mut source = OutboundVideoSource::new(rx, Resolution::new(32, 32));

        let frame = source.next_frame();
        assert_eq!(frame.format, PixelFormat::Rgb24);
        assert_eq!(frame.len(), 32 * 32 * 3);
    }

    #[test]
    fn serves_latest_gateway_frame() {
        let (tx, rx) = watch::channel(None);
        let mut source = OutboundVideoSource::new(rx, Resolution::new(32, 32));

        tx.send(Some(gateway_frame(1))).unwrap();
        tx.send(Some(gateway_frame(2))).unwrap();

        // Only the most recent publication is observable
        assert_eq!(source.next_frame().sequence, 2);
        // Repeated pulls keep serving it until something newer arrives
        assert_eq!(source.next_frame().sequence, 2);
    }

    #[test]
    fn falls_back_when_producer_goes_away() {
        let (tx, rx) = watch::channel(None);
        let mut source = OutboundVideoSource::new(rx, Resolution::new(32, 32));

        tx.send(Some(gateway_frame(5))).unwrap();
        assert_eq!(source.next_frame().sequence, 5);

        tx.send(None).unwrap();
        let frame = source.next_frame();
        assert_eq!(frame.format, PixelFormat::Rgb24);
    }

    #[tokio::test]
    async fn feed_task_stops_on_cancel() {
        let (_tx, rx) = watch::channel(None);
        let source = OutboundVideoSource::new(rx, Resolution::new(16, 16));
        let track = new_outbound_track("test");
        let cancel = CancellationToken::new();

        let task = spawn_feed(track, source, 30, cancel.clone());
        tokio::time::sleep(Duration::from_millis(80)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("feed task should stop promptly")
            .unwrap();
    }
}
