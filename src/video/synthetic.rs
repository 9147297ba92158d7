//! Synthetic video fallback
//!
//! Deterministic moving gradient served whenever no frame producer is
//! connected, so an outbound track never goes dark. The top-left corner
//! carries the frame counter as a strip of black/white blocks, which doubles
//! as a visible liveness/timestamp overlay.

use std::time::Instant;

use super::format::{PixelFormat, Resolution};
use super::frame::VideoFrame;

/// Side length of one overlay block in pixels
const OVERLAY_BLOCK: u32 = 8;

/// Number of frame-counter bits rendered in the overlay strip
const OVERLAY_BITS: u32 = 32;

/// Per-session synthetic frame generator
pub struct SyntheticGenerator {
    resolution: Resolution,
    sequence: u64,
    start: Instant,
}

impl SyntheticGenerator {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            sequence: 0,
            start: Instant::now(),
        }
    }

    /// Produce the next synthetic frame
    pub fn next_frame(&mut self) -> VideoFrame {
        self.sequence += 1;
        let elapsed_ms = self.start.elapsed().as_millis() as u64;
        let data = render(self.resolution, elapsed_ms, self.sequence);
        VideoFrame::from_vec(data, self.resolution, PixelFormat::Rgb24, self.sequence)
    }
}

/// Render one RGB24 pattern frame for the given instant and counter
///
/// Split out from the generator so the pattern is a pure function of its
/// inputs.
pub fn render(resolution: Resolution, elapsed_ms: u64, sequence: u64) -> Vec<u8> {
    let width = resolution.width as usize;
    let height = resolution.height as usize;
    let t = elapsed_ms as f64 / 1000.0;

    // Channel ramps: one shared gradient, phase-shifted per channel
    let shift_r = (t * 50.0) as usize;
    let shift_g = (t * 10.0) as usize;
    let shift_b = (t * 20.0) as usize;

    let mut row = vec![0u8; width * 3];
    for (x, px) in row.chunks_exact_mut(3).enumerate() {
        let ramp = |shift_right: bool, shift: usize| -> u8 {
            let pos = if shift_right {
                (x + width - shift % width.max(1)) % width.max(1)
            } else {
                (x + shift) % width.max(1)
            };
            ((pos * 256 / width.max(1)) & 0xFF) as u8
        };
        px[0] = ((x * 256 / width.max(1) + shift_r) & 0xFF) as u8;
        px[1] = ramp(true, shift_g);
        px[2] = ramp(false, shift_b);
    }

    let mut data = Vec::with_capacity(width * height * 3);
    for _ in 0..height {
        data.extend_from_slice(&row);
    }

    overlay_counter(&mut data, resolution, sequence);
    data
}

/// Stamp the frame counter as a horizontal strip of blocks, MSB first
fn overlay_counter(data: &mut [u8], resolution: Resolution, sequence: u64) {
    let width = resolution.width;
    let rows = OVERLAY_BLOCK.min(resolution.height);
    let bits = OVERLAY_BITS.min(width / OVERLAY_BLOCK);

    for bit in 0..bits {
        let set = (sequence >> (bits - 1 - bit)) & 1 == 1;
        let value = if set { 0xFF } else { 0x00 };
        let x0 = bit * OVERLAY_BLOCK;
        for y in 0..rows {
            for x in x0..(x0 + OVERLAY_BLOCK).min(width) {
                let idx = ((y * width + x) * 3) as usize;
                data[idx] = value;
                data[idx + 1] = value;
                data[idx + 2] = value;
            }
        }
    }
}
