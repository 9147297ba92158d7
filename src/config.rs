//! Runtime configuration
//!
//! All values are injected at startup (CLI flags with defaults below). The
//! bridge has no persistent settings store: it is meant to run next to the
//! host application under a supervisor that owns the configuration.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::video::format::Resolution;

/// Default signaling bind address
pub const DEFAULT_SIGNALING_BIND: &str = "0.0.0.0:8080";

/// Default frame-ingestion gateway bind address (loopback on purpose)
pub const DEFAULT_GATEWAY_BIND: &str = "127.0.0.1:9000";

/// Default local consumer for forwarded control events
pub const DEFAULT_CONTROL_FORWARD: &str = "127.0.0.1:5001";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Signaling endpoint bind address
    pub signaling_bind: SocketAddr,
    /// Frame-ingestion gateway bind address
    pub gateway_bind: SocketAddr,
    /// Source addresses allowed to push frames into the gateway
    pub gateway_trust: Vec<IpAddr>,
    /// Virtual camera device path (None disables the device writer)
    pub device_path: Option<PathBuf>,
    /// Device writer command; `{device}` is replaced by `device_path`
    pub writer_command: Vec<String>,
    /// Local address control events are forwarded to (None disables forwarding)
    pub control_forward: Option<SocketAddr>,
    /// Media geometry for outbound video and the synthetic fallback
    pub resolution: Resolution,
    /// Outbound track cadence in frames per second
    pub fps: u32,
    /// STUN server URLs (empty: host candidates only, fine on a LAN)
    pub stun_servers: Vec<String>,
    /// Bounded wait for ICE gathering while answering an offer, milliseconds
    pub ice_gather_timeout_ms: u64,
    /// Grace period before warning about a silent control channel, seconds
    pub hello_grace_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            signaling_bind: DEFAULT_SIGNALING_BIND.parse().expect("default bind"),
            gateway_bind: DEFAULT_GATEWAY_BIND.parse().expect("default bind"),
            gateway_trust: vec![
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(Ipv6Addr::LOCALHOST),
            ],
            device_path: None,
            writer_command: default_writer_command(),
            control_forward: Some(DEFAULT_CONTROL_FORWARD.parse().expect("default addr")),
            resolution: Resolution::VGA,
            fps: 20,
            stun_servers: vec![],
            ice_gather_timeout_ms: 2000,
            hello_grace_secs: 5,
        }
    }
}

/// Default device writer invocation: ffmpeg reading the encoded frame stream
/// from stdin and writing the v4l2 device. Swappable for anything that speaks
/// "bytes on stdin, frames on the device".
fn default_writer_command() -> Vec<String> {
    [
        "ffmpeg",
        "-hide_banner",
        "-loglevel",
        "error",
        "-i",
        "-",
        "-f",
        "v4l2",
        "{device}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl AppConfig {
    /// Validate cross-field constraints before the services start
    pub fn validate(&self) -> Result<()> {
        if self.fps == 0 {
            return Err(BridgeError::Config("fps must be at least 1".into()));
        }
        if self.gateway_trust.is_empty() {
            return Err(BridgeError::Config(
                "gateway trust set must not be empty".into(),
            ));
        }
        if self.writer_command.is_empty() {
            return Err(BridgeError::Config("writer command must not be empty".into()));
        }
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(BridgeError::Config("resolution must be non-zero".into()));
        }
        Ok(())
    }

    /// Writer command with the device path substituted
    pub fn resolved_writer_command(&self, device: &std::path::Path) -> Vec<String> {
        self.writer_command
            .iter()
            .map(|arg| {
                if arg == "{device}" {
                    device.to_string_lossy().to_string()
                } else {
                    arg.clone()
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.gateway_trust.contains(&IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[test]
    fn zero_fps_rejected() {
        let config = AppConfig {
            fps: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn writer_command_substitutes_device() {
        let config = AppConfig::default();
        let cmd = config.resolved_writer_command(std::path::Path::new("/dev/video7"));
        assert_eq!(cmd.last().map(String::as_str), Some("/dev/video7"));
        assert!(!cmd.iter().any(|a| a == "{device}"));
    }
}
