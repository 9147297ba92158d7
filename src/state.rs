use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::gateway::FrameGateway;
use crate::session::SessionRegistry;

/// Application-wide state shared across handlers
pub struct AppState {
    /// Runtime configuration
    pub config: AppConfig,
    /// Session registry, the only owner of live sessions
    pub registry: Arc<SessionRegistry>,
    /// Frame ingestion gateway
    pub gateway: Arc<FrameGateway>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        registry: Arc<SessionRegistry>,
        gateway: Arc<FrameGateway>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            gateway,
            shutdown_tx,
        })
    }

    /// Subscribe to the shutdown signal
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}
