//! Frame data model and the synthetic fallback generator

pub mod format;
pub mod frame;
pub mod synthetic;

pub use format::{PixelFormat, Resolution};
pub use frame::VideoFrame;
pub use synthetic::SyntheticGenerator;
