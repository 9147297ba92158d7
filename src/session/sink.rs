//! Inbound video sink
//!
//! Consumes the browser's webcam track at the peer connection's own decode
//! cadence: RTP packets are reassembled into encoded access units and wrapped
//! as frames. When the session owns a device writer, frames are handed over
//! latest-wins; without one they are dropped on the floor, which keeps the
//! v4l2 write-back strictly optional.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::media::io::sample_builder::SampleBuilder;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::codecs::h264::H264Packet;
use webrtc::rtp::codecs::vp8::Vp8Packet;
use webrtc::rtp::packetizer::Depacketizer;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use crate::device::DeviceWriter;
use crate::video::format::{PixelFormat, Resolution};
use crate::video::frame::VideoFrame;

/// Packets a sample may lag behind before the builder gives up on it
const SAMPLE_MAX_LATE: u16 = 32;

/// Video RTP clock rate
const VIDEO_CLOCK_RATE: u32 = 90000;

/// Per-session inbound sink
#[derive(Clone)]
pub struct InboundVideoSink {
    session_id: String,
    resolution: Resolution,
    writer: Option<Arc<DeviceWriter>>,
    frames_seen: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl InboundVideoSink {
    pub fn new(
        session_id: String,
        resolution: Resolution,
        writer: Option<Arc<DeviceWriter>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            resolution,
            writer,
            frames_seen: Arc::new(AtomicU64::new(0)),
            cancel,
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen.load(Ordering::Relaxed)
    }

    /// Deliver one reassembled frame
    ///
    /// The device writer's handoff slot keeps only the newest frame, so a
    /// saturated writer sheds the oldest unsent frame automatically.
    pub fn deliver(&self, frame: VideoFrame) {
        self.frames_seen.fetch_add(1, Ordering::Relaxed);
        if let Some(writer) = &self.writer {
            writer.deliver(frame);
        }
    }
}

/// Attach the sink to incoming tracks on the peer connection
pub fn wire_inbound(pc: &Arc<RTCPeerConnection>, sink: InboundVideoSink) {
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let sink = sink.clone();

        Box::pin(async move {
            if track.kind() != RTPCodecType::Video {
                debug!(
                    "session {}: ignoring non-video track (ssrc {})",
                    sink.session_id,
                    track.ssrc()
                );
                return;
            }

            let mime = track.codec().capability.mime_type.to_lowercase();
            info!(
                "session {}: inbound video track ssrc {} ({})",
                sink.session_id,
                track.ssrc(),
                mime
            );

            let cancel = sink.cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = read_track(track, mime, sink) => {}
                }
            });
        })
    }));
}

async fn read_track(track: Arc<TrackRemote>, mime: String, sink: InboundVideoSink) {
    if mime.contains("vp8") {
        depacketize(track, Vp8Packet::default(), PixelFormat::Vp8, sink).await;
    } else if mime.contains("h264") {
        depacketize(track, H264Packet::default(), PixelFormat::H264, sink).await;
    } else {
        warn!(
            "session {}: unsupported inbound codec {}, discarding track",
            sink.session_id, mime
        );
        // Keep draining so the transport does not back up
        while track.read_rtp().await.is_ok() {}
    }
}

async fn depacketize<D: Depacketizer>(
    track: Arc<TrackRemote>,
    depacketizer: D,
    format: PixelFormat,
    sink: InboundVideoSink,
) {
    let mut builder = SampleBuilder::new(SAMPLE_MAX_LATE, depacketizer, VIDEO_CLOCK_RATE);
    let mut sequence = 0u64;

    loop {
        match track.read_rtp().await {
            Ok((packet, _)) => {
                builder.push(packet);
                while let Some(sample) = builder.pop() {
                    sequence += 1;
                    sink.deliver(VideoFrame::new(
                        sample.data,
                        sink.resolution,
                        format,
                        sequence,
                    ));
                }
            }
            Err(e) => {
                debug!("session {}: inbound track ended: {}", sink.session_id, e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceWriter, FrameWriter, WriterFactory};
    use crate::error::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct RecordingWriter {
        seen: Arc<Mutex<Vec<u64>>>,
    }

    #[async_trait]
    impl FrameWriter for RecordingWriter {
        async fn write(&mut self, frame: &VideoFrame) -> Result<()> {
            self.seen.lock().push(frame.sequence);
            Ok(())
        }
        async fn stop(&mut self) {}
    }

    struct RecordingFactory {
        seen: Arc<Mutex<Vec<u64>>>,
    }

    #[async_trait]
    impl WriterFactory for RecordingFactory {
        async fn open(&self) -> Result<Box<dyn FrameWriter>> {
            Ok(Box::new(RecordingWriter {
                seen: self.seen.clone(),
            }))
        }
    }

    fn frame(sequence: u64) -> VideoFrame {
        VideoFrame::from_vec(vec![0u8; 8], Resolution::VGA, PixelFormat::Vp8, sequence)
    }

    #[tokio::test]
    async fn frames_flow_to_the_writer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let writer = Arc::new(
            DeviceWriter::spawn(Arc::new(RecordingFactory { seen: seen.clone() }))
                .await
                .unwrap(),
        );

        let sink = InboundVideoSink::new(
            "s1".into(),
            Resolution::VGA,
            Some(writer.clone()),
            CancellationToken::new(),
        );

        sink.deliver(frame(1));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(sink.frames_seen(), 1);
        assert_eq!(*seen.lock(), vec![1]);
        writer.stop().await;
    }

    #[tokio::test]
    async fn sink_without_writer_discards_quietly() {
        let sink = InboundVideoSink::new(
            "s1".into(),
            Resolution::VGA,
            None,
            CancellationToken::new(),
        );
        sink.deliver(frame(1));
        sink.deliver(frame(2));
        assert_eq!(sink.frames_seen(), 2);
    }
}
