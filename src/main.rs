use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use castbridge::config::AppConfig;
use castbridge::control::{ControlSink, NullSink, TcpForwardSink};
use castbridge::device::device_writable;
use castbridge::gateway::FrameGateway;
use castbridge::session::SessionRegistry;
use castbridge::state::AppState;
use castbridge::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// Castbridge command line arguments
#[derive(Parser, Debug)]
#[command(name = "castbridge")]
#[command(version, about = "WebRTC media/control bridge for headless applications", long_about = None)]
struct CliArgs {
    /// Signaling endpoint bind address
    #[arg(short = 'b', long, value_name = "ADDR:PORT")]
    signaling_bind: Option<SocketAddr>,

    /// Frame ingestion gateway bind address
    #[arg(short = 'g', long, value_name = "ADDR:PORT")]
    gateway_bind: Option<SocketAddr>,

    /// Additional trusted frame producer origin (repeatable)
    #[arg(long = "trust", value_name = "IP")]
    gateway_trust: Vec<IpAddr>,

    /// Virtual camera device path, e.g. /dev/video2 (optional)
    #[arg(short = 'd', long, value_name = "PATH")]
    device: Option<PathBuf>,

    /// Address control events are forwarded to
    #[arg(long, value_name = "ADDR:PORT")]
    control_forward: Option<SocketAddr>,

    /// Disable control event forwarding entirely
    #[arg(long)]
    no_control_forward: bool,

    /// Outbound video cadence in frames per second
    #[arg(long, value_name = "FPS")]
    fps: Option<u32>,

    /// STUN server URL (repeatable)
    #[arg(long = "stun", value_name = "URL")]
    stun_servers: Vec<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting castbridge v{}", env!("CARGO_PKG_VERSION"));

    let config = build_config(&args);
    config.validate()?;

    if let Some(device) = &config.device_path {
        if device_writable(device) {
            tracing::info!("virtual camera device: {}", device.display());
        } else {
            tracing::warn!(
                "virtual camera device {} is not writable; sessions will run without it",
                device.display()
            );
        }
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Frame ingestion gateway on its own listener
    let gateway = FrameGateway::new(config.gateway_trust.clone());
    let gateway_listener = tokio::net::TcpListener::bind(config.gateway_bind).await?;
    let gateway_task = gateway.spawn(gateway_listener);

    // Control events go to the host-side consumer, if one is configured
    let control_sink: Arc<dyn ControlSink> = match config.control_forward {
        Some(addr) => {
            tracing::info!("forwarding control events to {}", addr);
            Arc::new(TcpForwardSink::new(addr))
        }
        None => {
            tracing::info!("control event forwarding disabled");
            Arc::new(NullSink)
        }
    };

    let registry = SessionRegistry::new(config.clone(), gateway.clone(), control_sink);
    let state = AppState::new(config.clone(), registry.clone(), gateway.clone(), shutdown_tx);

    let app = web::router(state.clone());
    let listener = tokio::net::TcpListener::bind(config.signaling_bind).await?;
    tracing::info!("signaling endpoint listening on {}", listener.local_addr()?);

    let server = async move { axum::serve(listener, app).await };

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
        result = server => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
        }
    }

    // Orderly teardown: sessions first, then the gateway
    registry.close_all().await;
    gateway.shutdown();
    let _ = gateway_task.await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Merge CLI overrides into the default configuration
fn build_config(args: &CliArgs) -> AppConfig {
    let mut config = AppConfig::default();

    if let Some(addr) = args.signaling_bind {
        config.signaling_bind = addr;
    }
    if let Some(addr) = args.gateway_bind {
        config.gateway_bind = addr;
    }
    for ip in &args.gateway_trust {
        if !config.gateway_trust.contains(ip) {
            config.gateway_trust.push(*ip);
        }
    }
    config.device_path = args.device.clone();
    if args.no_control_forward {
        config.control_forward = None;
    } else if let Some(addr) = args.control_forward {
        config.control_forward = Some(addr);
    }
    if let Some(fps) = args.fps {
        config.fps = fps;
    }
    if !args.stun_servers.is_empty() {
        config.stun_servers = args.stun_servers.clone();
    }

    config
}

/// Wait for ctrl-c or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install ctrl-c handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    // Build filter string based on effective level
    let filter = match effective_level {
        LogLevel::Error => "castbridge=error,tower_http=error",
        LogLevel::Warn => "castbridge=warn,tower_http=warn",
        LogLevel::Info => "castbridge=info,tower_http=info",
        LogLevel::Debug => "castbridge=debug,tower_http=debug",
        LogLevel::Trace => "castbridge=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
