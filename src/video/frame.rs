//! Video frame data structures

use bytes::Bytes;
use std::time::Instant;

use super::format::{PixelFormat, Resolution};

/// One video frame with metadata
///
/// Frames are immutable once published; `Bytes` makes cloning cheap, so every
/// consumer holds a read-only reference to the same payload.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame payload (raw pixels or one encoded access unit)
    data: Bytes,
    /// Frame resolution
    pub resolution: Resolution,
    /// Payload format
    pub format: PixelFormat,
    /// Per-source strictly increasing sequence number
    pub sequence: u64,
    /// When the frame entered the bridge
    pub arrived: Instant,
}

impl VideoFrame {
    pub fn new(data: Bytes, resolution: Resolution, format: PixelFormat, sequence: u64) -> Self {
        Self {
            data,
            resolution,
            format,
            sequence,
            arrived: Instant::now(),
        }
    }

    pub fn from_vec(
        data: Vec<u8>,
        resolution: Resolution,
        format: PixelFormat,
        sequence: u64,
    ) -> Self {
        Self::new(Bytes::from(data), resolution, format, sequence)
    }

    /// Frame payload as a byte slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Frame payload as `Bytes` (cheap clone)
    pub fn data_bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// Time since the frame entered the bridge
    pub fn age(&self) -> std::time::Duration {
        self.arrived.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_payload() {
        let frame = VideoFrame::from_vec(vec![1, 2, 3], Resolution::VGA, PixelFormat::Vp8, 7);
        let copy = frame.clone();
        assert_eq!(copy.data(), frame.data());
        assert_eq!(copy.sequence, 7);
    }
}
