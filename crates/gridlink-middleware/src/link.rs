//! Telemetry transports.
//!
//! The runtime never touches a serial port or socket directly.  It hands
//! complete MAVLink frames to a [`MavlinkWriter`], which stamps the sequence
//! number and forwards each frame to a [`TelemetryLink`].
//!
//! # Overview
//!
//! - [`SerialLink`] – writes to a UART (e.g. `/dev/ttyAMA0`) at a fixed baud
//!   rate, 8N1.  A device that is missing or fails is reopened on the next
//!   send.
//! - [`UdpLink`] – sends each frame as one datagram to a fixed peer.
//! - [`LogLink`] – dry run: logs frame sizes and discards them.
//! - [`RecordingLink`] – keeps every frame in memory with its send time.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gridlink_types::{GridError, ObstacleVector};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::mavlink::{
    Heartbeat, MavFrame, MavIdentity, MavMessage, ObstacleDistance3d, decode_frame, encode_frame,
};

/// A byte sink for complete MAVLink frames.
///
/// # Contract
///
/// * `send` writes one whole frame or fails; it never writes a partial frame
///   that a later call could interleave with.
/// * Errors are [`GridError::Transport`] and are never fatal to the caller.
#[async_trait]
pub trait TelemetryLink: Send + Sync {
    /// Human-readable link name used in logs and errors.
    fn name(&self) -> &str;

    /// Deliver one frame.
    async fn send(&self, frame: &[u8]) -> Result<(), GridError>;
}

// ────────────────────────────────────────────────────────────────────────────
// SerialLink
// ────────────────────────────────────────────────────────────────────────────

/// Write side of an open serial device.
type PortWriter = Box<dyn AsyncWrite + Send + Unpin>;
type PortOpener = Box<dyn Fn(&Path) -> std::io::Result<PortWriter> + Send + Sync>;

pub struct SerialLink {
    name: String,
    path: PathBuf,
    opener: PortOpener,
    port: tokio::sync::Mutex<Option<PortWriter>>,
}

impl SerialLink {
    /// Open the serial device at `path` at `baud_rate`, 8N1, no flow control.
    ///
    /// A device that cannot be opened yet does not fail the call: the link
    /// starts disconnected and every send retries the open.  Must be called
    /// from within a tokio runtime.
    pub fn open(path: impl Into<PathBuf>, baud_rate: u32) -> Self {
        Self::with_opener(
            path.into(),
            Box::new(move |path: &Path| open_uart(path, baud_rate)),
        )
    }

    fn with_opener(path: PathBuf, opener: PortOpener) -> Self {
        let name = format!("serial:{}", path.display());
        let port = match opener(&path) {
            Ok(port) => {
                info!(link = %name, "serial link opened");
                Some(port)
            }
            Err(e) => {
                warn!(link = %name, error = %e, "serial device unavailable; retrying on send");
                None
            }
        };
        Self {
            name,
            path,
            opener,
            port: tokio::sync::Mutex::new(port),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.port.try_lock().is_ok_and(|port| port.is_some())
    }
}

fn open_uart(path: &Path, baud_rate: u32) -> std::io::Result<PortWriter> {
    let port = tokio_serial::new(path.to_string_lossy(), baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(std::io::Error::other)?;
    Ok(Box::new(port))
}

#[async_trait]
impl TelemetryLink for SerialLink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, frame: &[u8]) -> Result<(), GridError> {
        let mut guard = self.port.lock().await;
        if guard.is_none() {
            let port = (self.opener)(&self.path).map_err(|e| GridError::transport(&self.name, e))?;
            info!(link = %self.name, "serial link reopened");
            *guard = Some(port);
        }
        let Some(port) = guard.as_mut() else {
            return Err(GridError::transport(&self.name, "device not open"));
        };
        let result = match port.write_all(frame).await {
            Ok(()) => port.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            // Drop the handle; the next send reopens the device.
            *guard = None;
            return Err(GridError::transport(&self.name, e));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// UdpLink
// ────────────────────────────────────────────────────────────────────────────

pub struct UdpLink {
    name: String,
    socket: UdpSocket,
}

impl UdpLink {
    /// Bind an ephemeral local port and connect it to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Transport`] if binding or connecting fails.
    pub async fn connect(target: &str) -> Result<Self, GridError> {
        let name = format!("udp:{target}");
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| GridError::transport(&name, e))?;
        socket
            .connect(target)
            .await
            .map_err(|e| GridError::transport(&name, e))?;
        info!(link = %name, "udp link connected");
        Ok(Self { name, socket })
    }
}

#[async_trait]
impl TelemetryLink for UdpLink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, frame: &[u8]) -> Result<(), GridError> {
        let sent = self
            .socket
            .send(frame)
            .await
            .map_err(|e| GridError::transport(&self.name, e))?;
        if sent != frame.len() {
            return Err(GridError::transport(
                &self.name,
                format!("short datagram: {sent} of {} bytes", frame.len()),
            ));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LogLink
// ────────────────────────────────────────────────────────────────────────────

/// Dry-run link: logs every frame at `debug` level and drops it.
#[derive(Debug, Default)]
pub struct LogLink {
    frames: AtomicU64,
}

impl LogLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames accepted so far.
    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TelemetryLink for LogLink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, frame: &[u8]) -> Result<(), GridError> {
        let n = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        match decode_frame(frame) {
            Ok(decoded) => debug!(frame = n, bytes = frame.len(), message = ?decoded.message, "dry-run frame"),
            Err(e) => debug!(frame = n, bytes = frame.len(), error = %e, "dry-run frame (undecodable)"),
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RecordingLink
// ────────────────────────────────────────────────────────────────────────────

/// A frame captured by [`RecordingLink`].
#[derive(Debug, Clone)]
pub struct RecordedFrame {
    pub at: Instant,
    pub bytes: Vec<u8>,
}

/// In-memory link that records every frame with its send time.
///
/// Can be switched into a failing mode to exercise transport-error paths.
#[derive(Debug, Default)]
pub struct RecordingLink {
    frames: Mutex<Vec<RecordedFrame>>,
    failing: AtomicBool,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<RecordedFrame> {
        self.frames
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Every recorded frame, decoded, with its send time.  Undecodable
    /// frames are skipped.
    pub fn messages(&self) -> Vec<(Instant, MavFrame)> {
        self.frames()
            .into_iter()
            .filter_map(|f| decode_frame(&f.bytes).ok().map(|m| (f.at, m)))
            .collect()
    }

    pub fn heartbeats(&self) -> Vec<(Instant, Heartbeat)> {
        self.messages()
            .into_iter()
            .filter_map(|(at, f)| match f.message {
                MavMessage::Heartbeat(hb) => Some((at, hb)),
                _ => None,
            })
            .collect()
    }

    pub fn obstacles(&self) -> Vec<(Instant, ObstacleDistance3d)> {
        self.messages()
            .into_iter()
            .filter_map(|(at, f)| match f.message {
                MavMessage::ObstacleDistance3d(od) => Some((at, od)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl TelemetryLink for RecordingLink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, frame: &[u8]) -> Result<(), GridError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GridError::transport("recording", "simulated link failure"));
        }
        self.frames
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RecordedFrame {
                at: Instant::now(),
                bytes: frame.to_vec(),
            });
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MavlinkWriter
// ────────────────────────────────────────────────────────────────────────────

/// Encodes messages and writes them to a [`TelemetryLink`].
///
/// The sequence counter is held under a lock for the whole encode + send, so
/// frames reach the link in sequence order and never interleave.
pub struct MavlinkWriter {
    link: Arc<dyn TelemetryLink>,
    identity: MavIdentity,
    seq: tokio::sync::Mutex<u8>,
}

impl MavlinkWriter {
    pub fn new(link: Arc<dyn TelemetryLink>, identity: MavIdentity) -> Self {
        Self {
            link,
            identity,
            seq: tokio::sync::Mutex::new(0),
        }
    }

    pub fn link_name(&self) -> &str {
        self.link.name()
    }

    pub fn identity(&self) -> MavIdentity {
        self.identity
    }

    /// Encode and send one message.
    ///
    /// The sequence number advances even when the send fails, so a receiver
    /// can count dropped frames.
    pub async fn send(&self, message: &MavMessage) -> Result<(), GridError> {
        let mut seq = self.seq.lock().await;
        let frame = encode_frame(*seq, self.identity, message);
        *seq = seq.wrapping_add(1);
        self.link.send(&frame).await
    }

    pub async fn send_heartbeat(&self) -> Result<(), GridError> {
        self.send(&MavMessage::Heartbeat(Heartbeat::onboard_controller()))
            .await
    }

    pub async fn send_obstacle(&self, obstacle: &ObstacleVector) -> Result<(), GridError> {
        self.send(&MavMessage::ObstacleDistance3d(obstacle.into()))
            .await
    }
}

impl std::fmt::Debug for MavlinkWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MavlinkWriter")
            .field("link", &self.link.name())
            .field("identity", &self.identity)
            .finish()
    }
}
