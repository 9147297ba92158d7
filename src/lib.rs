//! Castbridge - WebRTC media/control bridge
//!
//! Lets a browser act as the eyes, ears and hands of a headless application:
//! the browser's webcam and input events flow to the host, and the host's
//! rendered frames flow back over the same WebRTC session.

pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod gateway;
pub mod session;
pub mod state;
pub mod video;
pub mod web;

pub use error::{BridgeError, Result};
