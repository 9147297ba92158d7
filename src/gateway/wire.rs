//! Frame ingestion wire format
//!
//! Each record is self-describing: a fixed little-endian header followed by
//! the payload bytes. Nothing about a frame depends on a side channel, so a
//! producer can reconnect and resume pushing at any time.
//!
//! Layout:
//!
//! ```text
//! offset  size  field
//! 0       4     magic "CBF0"
//! 4       2     width (u16 le)
//! 6       2     height (u16 le)
//! 8       1     pixel format tag
//! 9       8     sequence (u64 le)
//! 17      4     payload length (u32 le)
//! 21      ...   payload
//! ```

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{BridgeError, Result};
use crate::video::format::{PixelFormat, Resolution};

/// Record magic, also a cheap protocol/version check
pub const FRAME_MAGIC: [u8; 4] = *b"CBF0";

/// Fixed header size in bytes
pub const HEADER_LEN: usize = 21;

/// Upper bound on a single payload; anything larger is a protocol error
pub const MAX_PAYLOAD_BYTES: u32 = 16 * 1024 * 1024;

/// Decoded frame record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub width: u16,
    pub height: u16,
    pub format: PixelFormat,
    pub sequence: u64,
    pub len: u32,
}

impl FrameHeader {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width as u32, self.height as u32)
    }

    /// Encode the header into its wire representation
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&FRAME_MAGIC);
        buf[4..6].copy_from_slice(&self.width.to_le_bytes());
        buf[6..8].copy_from_slice(&self.height.to_le_bytes());
        buf[8] = self.format.wire_tag();
        buf[9..17].copy_from_slice(&self.sequence.to_le_bytes());
        buf[17..21].copy_from_slice(&self.len.to_le_bytes());
        buf
    }

    /// Decode a header from its wire representation
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self> {
        if buf[0..4] != FRAME_MAGIC {
            return Err(BridgeError::GatewayProtocol(format!(
                "bad magic {:02x?}",
                &buf[0..4]
            )));
        }

        let width = u16::from_le_bytes([buf[4], buf[5]]);
        let height = u16::from_le_bytes([buf[6], buf[7]]);
        let format = PixelFormat::from_wire_tag(buf[8]).ok_or_else(|| {
            BridgeError::GatewayProtocol(format!("unknown pixel format tag 0x{:02x}", buf[8]))
        })?;
        let sequence = u64::from_le_bytes([
            buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15], buf[16],
        ]);
        let len = u32::from_le_bytes([buf[17], buf[18], buf[19], buf[20]]);

        if len > MAX_PAYLOAD_BYTES {
            return Err(BridgeError::GatewayProtocol(format!(
                "payload of {} bytes exceeds limit",
                len
            )));
        }

        Ok(Self {
            width,
            height,
            format,
            sequence,
            len,
        })
    }
}

/// Read one frame record from the stream
///
/// Returns `None` on a clean end of stream before the next header.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<(FrameHeader, Bytes)>> {
    let mut header_buf = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let header = FrameHeader::decode(&header_buf)?;

    let mut payload = vec![0u8; header.len as usize];
    reader.read_exact(&mut payload).await?;

    Ok(Some((header, Bytes::from(payload))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> FrameHeader {
        FrameHeader {
            width: 640,
            height: 480,
            format: PixelFormat::Jpeg,
            sequence: 99,
            len: 5,
        }
    }

    #[test]
    fn header_round_trip() {
        let encoded = header().encode();
        let decoded = FrameHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, header());
    }

    #[test]
    fn bad_magic_rejected() {
        let mut encoded = header().encode();
        encoded[0] = b'X';
        assert!(FrameHeader::decode(&encoded).is_err());
    }

    #[test]
    fn unknown_format_rejected() {
        let mut encoded = header().encode();
        encoded[8] = 0xEE;
        assert!(FrameHeader::decode(&encoded).is_err());
    }

    #[test]
    fn oversized_payload_rejected() {
        let mut bad = header();
        bad.len = MAX_PAYLOAD_BYTES + 1;
        assert!(FrameHeader::decode(&bad.encode()).is_err());
    }

    #[tokio::test]
    async fn read_frame_from_stream() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&header().encode());
        wire.extend_from_slice(b"hello");

        let mut cursor = std::io::Cursor::new(wire);
        let (decoded, payload) = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(decoded, header());
        assert_eq!(&payload[..], b"hello");

        // Clean EOF after the last record
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }
}
