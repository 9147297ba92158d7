//! Pixel format and geometry definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel/payload formats carried by the bridge
///
/// Uncompressed formats come from the synthetic generator and raw producers;
/// compressed formats come from the browser track and encoded producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// RGB24 (3 bytes per pixel)
    Rgb24,
    /// BGR24 (3 bytes per pixel)
    Bgr24,
    /// YUV420 planar
    Yuv420,
    /// JPEG compressed image
    Jpeg,
    /// VP8 encoded access unit
    Vp8,
    /// H264 encoded access unit
    H264,
}

impl PixelFormat {
    /// Wire tag used by the frame-ingestion protocol
    pub fn wire_tag(&self) -> u8 {
        match self {
            PixelFormat::Rgb24 => 1,
            PixelFormat::Bgr24 => 2,
            PixelFormat::Yuv420 => 3,
            PixelFormat::Jpeg => 4,
            PixelFormat::Vp8 => 5,
            PixelFormat::H264 => 6,
        }
    }

    /// Reverse of [`wire_tag`](Self::wire_tag)
    pub fn from_wire_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(PixelFormat::Rgb24),
            2 => Some(PixelFormat::Bgr24),
            3 => Some(PixelFormat::Yuv420),
            4 => Some(PixelFormat::Jpeg),
            5 => Some(PixelFormat::Vp8),
            6 => Some(PixelFormat::H264),
            _ => None,
        }
    }

    /// Check if format is compressed (variable frame size)
    pub fn is_compressed(&self) -> bool {
        matches!(self, PixelFormat::Jpeg | PixelFormat::Vp8 | PixelFormat::H264)
    }

    /// Expected frame size for a given resolution, None for compressed formats
    pub fn frame_size(&self, resolution: Resolution) -> Option<usize> {
        let pixels = (resolution.width * resolution.height) as usize;
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(pixels * 3),
            PixelFormat::Yuv420 => Some(pixels * 3 / 2),
            PixelFormat::Jpeg | PixelFormat::Vp8 | PixelFormat::H264 => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Rgb24 => "RGB24",
            PixelFormat::Bgr24 => "BGR24",
            PixelFormat::Yuv420 => "YUV420",
            PixelFormat::Jpeg => "JPEG",
            PixelFormat::Vp8 => "VP8",
            PixelFormat::H264 => "H264",
        };
        write!(f, "{}", name)
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// 640x480, the bridge default
    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };

    /// 1280x720
    pub const HD720: Resolution = Resolution {
        width: 1280,
        height: 720,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
