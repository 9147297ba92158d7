//! Virtual camera device writer
//!
//! Streams inbound frames to an external encoding process (ffmpeg by
//! default) that writes the configured v4l2 device. The subprocess lives
//! behind the narrow [`FrameWriter`]/[`WriterFactory`] interface so tests can
//! swap it for a mock, and so the session never learns more about the device
//! than "bytes in, device updated".
//!
//! Failure policy: a crashed subprocess is reopened a bounded number of times
//! with backoff; once the budget is spent the writer is `degraded` and frames
//! are discarded. The owning session is never failed by its writer.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::video::VideoFrame;

/// Restart budget before the writer degrades
const MAX_RESTARTS: u32 = 3;

/// Base backoff between restart attempts, doubled per attempt
const RESTART_BACKOFF: Duration = Duration::from_millis(500);

/// One live frame consumer (normally a subprocess stdin)
#[async_trait]
pub trait FrameWriter: Send {
    async fn write(&mut self, frame: &VideoFrame) -> Result<()>;
    async fn stop(&mut self);
}

/// Constructor for [`FrameWriter`] instances; called again on restart
#[async_trait]
pub trait WriterFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn FrameWriter>>;
}

/// Device writer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Running,
    Restarting,
    Degraded,
    Stopped,
}

/// Guards "at most one writer per device path"
#[derive(Debug, Default)]
pub struct DeviceClaims {
    claimed: Mutex<HashSet<PathBuf>>,
}

impl DeviceClaims {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim a device path, failing fast when it is already owned
    pub fn claim(&self, path: &Path) -> Result<()> {
        let mut claimed = self.claimed.lock();
        if !claimed.insert(path.to_path_buf()) {
            return Err(BridgeError::DeviceWriter(format!(
                "device {} already claimed by another session",
                path.display()
            )));
        }
        Ok(())
    }

    pub fn release(&self, path: &Path) {
        self.claimed.lock().remove(path);
    }
}

/// Spawns the external encoder bound to one device path
pub struct SubprocessFactory {
    command: Vec<String>,
}

impl SubprocessFactory {
    /// `command` must already have the device path substituted
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() {
            return Err(BridgeError::Config("writer command must not be empty".into()));
        }
        Ok(Self { command })
    }
}

#[async_trait]
impl WriterFactory for SubprocessFactory {
    async fn open(&self) -> Result<Box<dyn FrameWriter>> {
        let mut child = Command::new(&self.command[0])
            .args(&self.command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BridgeError::DeviceWriter(format!("failed to start {}: {}", self.command[0], e))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            BridgeError::DeviceWriter("writer subprocess has no stdin".into())
        })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[writer] {}", line);
                }
            });
        }

        info!(
            "device writer subprocess started: {} (pid {:?})",
            self.command[0],
            child.id()
        );

        Ok(Box::new(SubprocessWriter { child, stdin }))
    }
}

struct SubprocessWriter {
    child: Child,
    stdin: ChildStdin,
}

#[async_trait]
impl FrameWriter for SubprocessWriter {
    async fn write(&mut self, frame: &VideoFrame) -> Result<()> {
        if let Some(status) = self
            .child
            .try_wait()
            .map_err(|e| BridgeError::DeviceWriter(e.to_string()))?
        {
            return Err(BridgeError::DeviceWriter(format!(
                "writer subprocess exited: {}",
                status
            )));
        }

        self.stdin
            .write_all(frame.data())
            .await
            .map_err(|e| BridgeError::DeviceWriter(format!("stdin write failed: {}", e)))
    }

    async fn stop(&mut self) {
        let _ = self.stdin.shutdown().await;
        if let Err(e) = self.child.kill().await {
            warn!("failed to kill writer subprocess: {}", e);
        }
    }
}

/// Managed device writer owned by one session's inbound sink
pub struct DeviceWriter {
    frame_tx: watch::Sender<Option<VideoFrame>>,
    state_rx: watch::Receiver<WriterState>,
    dropped: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceWriter {
    /// Open the initial writer and start the write loop
    ///
    /// An initial open failure propagates: the caller treats it as "writer
    /// never created" and the session continues without the capability.
    pub async fn spawn(factory: Arc<dyn WriterFactory>) -> Result<Self> {
        let writer = factory.open().await?;

        let (frame_tx, frame_rx) = watch::channel(None);
        let (state_tx, state_rx) = watch::channel(WriterState::Running);
        let dropped = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(write_loop(
            factory,
            writer,
            frame_rx,
            state_tx,
            dropped.clone(),
            cancel.clone(),
        ));

        Ok(Self {
            frame_tx,
            state_rx,
            dropped,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Hand the writer a frame, replacing any unsent one (latest wins)
    pub fn deliver(&self, frame: VideoFrame) {
        self.frame_tx.send_replace(Some(frame));
    }

    pub fn state(&self) -> WriterState {
        *self.state_rx.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<WriterState> {
        self.state_rx.clone()
    }

    /// Frames discarded while degraded or during restarts
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop the write loop and the subprocess; idempotent
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn write_loop(
    factory: Arc<dyn WriterFactory>,
    mut writer: Box<dyn FrameWriter>,
    mut frame_rx: watch::Receiver<Option<VideoFrame>>,
    state_tx: watch::Sender<WriterState>,
    dropped: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    let mut restarts_left = MAX_RESTARTS;
    let mut degraded = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                writer.stop().await;
                state_tx.send_replace(WriterState::Stopped);
                break;
            }
            changed = frame_rx.changed() => {
                if changed.is_err() {
                    writer.stop().await;
                    state_tx.send_replace(WriterState::Stopped);
                    break;
                }

                let frame = frame_rx.borrow_and_update().clone();
                let Some(frame) = frame else { continue };

                if degraded {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }

                if let Err(e) = writer.write(&frame).await {
                    warn!("device writer error: {}", e);
                    dropped.fetch_add(1, Ordering::Relaxed);

                    match reopen(&factory, &state_tx, &cancel, &mut restarts_left).await {
                        Some(new_writer) => {
                            writer = new_writer;
                            state_tx.send_replace(WriterState::Running);
                        }
                        None => {
                            degraded = true;
                            state_tx.send_replace(WriterState::Degraded);
                            warn!("device writer degraded, discarding frames from here on");
                        }
                    }
                }
            }
        }
    }
}

/// Try to reopen the writer within the restart budget
async fn reopen(
    factory: &Arc<dyn WriterFactory>,
    state_tx: &watch::Sender<WriterState>,
    cancel: &CancellationToken,
    restarts_left: &mut u32,
) -> Option<Box<dyn FrameWriter>> {
    while *restarts_left > 0 {
        let attempt = MAX_RESTARTS - *restarts_left + 1;
        *restarts_left -= 1;
        state_tx.send_replace(WriterState::Restarting);

        let backoff = RESTART_BACKOFF * 2u32.saturating_pow(attempt - 1);
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(backoff) => {}
        }

        match factory.open().await {
            Ok(writer) => {
                info!("device writer restarted (attempt {})", attempt);
                return Some(writer);
            }
            Err(e) => {
                warn!("device writer restart attempt {} failed: {}", attempt, e);
            }
        }
    }
    None
}

/// Startup probe: a device path that cannot be opened for writing means the
/// writer is never created and the session runs without it.
pub fn device_writable(path: &Path) -> bool {
    std::fs::OpenOptions::new().write(true).open(path).is_ok()
}
