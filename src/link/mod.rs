//! Serial link to the display.
//!
//! [`Link`] owns the connection to the panel and exposes byte-level writes with a
//! bounded deadline, a non-blocking liveness probe, and reconnection through the
//! [`Connector`] it was opened with.
//!
//! # States
//!
//! ```text
//!              open()/reconnect()
//! Disconnected ──────────────────> Connecting ──ok──> Connected
//!      ^                               │                  │
//!      │                               │ PermissionDenied │ write error / timeout /
//!      │                               v                  │ probe() == false
//!      │                            Faulted               │
//!      └──────────────────────────────────────────────────┘
//! ```
//!
//! The link never retries on its own. The runtime polls [`Link::reconnect`] on a
//! fixed interval while the link is not connected.
//!
//! # Transports
//!
//! The wire is abstracted behind [`Transport`] so the same link drives real
//! hardware ([`serial::SerialConnector`], behind the `serial` feature) and the
//! in-memory [`mock::MockDevice`] used by tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::IoError;

pub mod mock;
pub mod port_resolver;
#[cfg(feature = "serial")]
pub mod serial;

/// Baud rate the panel firmware is fixed at.
pub const DEFAULT_BAUD_RATE: u32 = 19200;

/// Lower bound for any write deadline.
pub const MIN_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection state of a [`Link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// No transport is open.
    Disconnected,
    /// An open attempt is in progress.
    Connecting,
    /// A transport is open and the device was alive at the last check.
    Connected,
    /// The last open attempt failed in a way polling will not fix.
    Faulted,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Faulted => "faulted",
        };
        write!(f, "{}", label)
    }
}

/// An open byte pipe to the device.
#[async_trait]
pub trait Transport: Send {
    /// Human-readable port identifier (e.g. `/dev/ttyACM0`).
    fn port_name(&self) -> &str;

    /// Writes the whole buffer. Deadlines are enforced by the caller.
    async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Non-blocking liveness check.
    fn is_alive(&mut self) -> bool;

    /// Releases the OS handle.
    async fn shutdown(&mut self) {}
}

/// Opens transports; kept by the link for reconnection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, baud_rate: u32) -> Result<Box<dyn Transport>, IoError>;
}

/// Static link parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    pub baud_rate: u32,
    pub min_write_timeout: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            min_write_timeout: MIN_WRITE_TIMEOUT,
        }
    }
}

impl LinkSettings {
    /// Deadline for writing `len` bytes: twice the 8N1 wire time, never below
    /// `min_write_timeout`.
    pub fn write_timeout(&self, len: usize) -> Duration {
        let bits = (len as u64).saturating_mul(10);
        let wire_ms = bits.saturating_mul(1000) / u64::from(self.baud_rate.max(1));
        Duration::from_millis(wire_ms.saturating_mul(2)).max(self.min_write_timeout)
    }
}

/// Logical connection to the display.
pub struct Link {
    connector: Arc<dyn Connector>,
    settings: LinkSettings,
    transport: Option<Box<dyn Transport>>,
    state: LinkState,
    port: Option<String>,
    last_io: Option<Instant>,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("state", &self.state)
            .field("port", &self.port)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Link {
    /// Opens the link, failing if the device cannot be reached.
    pub async fn open(
        connector: Arc<dyn Connector>,
        settings: LinkSettings,
    ) -> Result<Self, IoError> {
        let mut link = Self::disconnected(connector, settings);
        link.reconnect().await?;
        Ok(link)
    }

    /// Creates a link that starts out disconnected; the runtime will poll
    /// [`Link::reconnect`] until the device appears.
    pub fn disconnected(connector: Arc<dyn Connector>, settings: LinkSettings) -> Self {
        Self {
            connector,
            settings,
            transport: None,
            state: LinkState::Disconnected,
            port: None,
            last_io: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Port of the current or most recent transport.
    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Time of the last successful write or open.
    pub fn last_io(&self) -> Option<Instant> {
        self.last_io
    }

    /// One open attempt. Replaces any existing transport.
    pub async fn reconnect(&mut self) -> Result<(), IoError> {
        self.drop_transport().await;
        self.state = LinkState::Connecting;

        match self.connector.connect(self.settings.baud_rate).await {
            Ok(transport) => {
                let port = transport.port_name().to_string();
                tracing::info!(port = %port, baud = self.settings.baud_rate, "Link connected");
                self.port = Some(port);
                self.transport = Some(transport);
                self.state = LinkState::Connected;
                self.last_io = Some(Instant::now());
                Ok(())
            }
            Err(err) => {
                self.state = match err {
                    IoError::PermissionDenied(_) => LinkState::Faulted,
                    _ => LinkState::Disconnected,
                };
                tracing::debug!(error = %err, state = %self.state, "Link open attempt failed");
                Err(err)
            }
        }
    }

    /// Writes a complete byte sequence within the size-derived deadline.
    ///
    /// Any failure closes the transport and leaves the link `Disconnected`.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), IoError> {
        let deadline = self.settings.write_timeout(bytes.len());
        let transport = match self.transport.as_mut() {
            Some(transport) if self.state == LinkState::Connected => transport,
            _ => return Err(IoError::Disconnected),
        };

        let result = match tokio::time::timeout(deadline, transport.write_all(bytes)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(match IoError::from_write_error(&err) {
                IoError::Timeout(_) => IoError::Timeout(deadline),
                other => other,
            }),
            Err(_) => Err(IoError::Timeout(deadline)),
        };

        match result {
            Ok(()) => {
                self.last_io = Some(Instant::now());
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    port = self.port.as_deref().unwrap_or("?"),
                    error = %err,
                    "Write failed, dropping link"
                );
                self.mark_disconnected().await;
                Err(err)
            }
        }
    }

    /// Non-blocking liveness check. A dead transport is dropped.
    pub async fn probe(&mut self) -> bool {
        let alive = match self.transport.as_mut() {
            Some(transport) if self.state == LinkState::Connected => transport.is_alive(),
            _ => false,
        };
        if !alive && self.transport.is_some() {
            tracing::warn!(
                port = self.port.as_deref().unwrap_or("?"),
                "Device no longer present"
            );
            self.mark_disconnected().await;
        }
        alive
    }

    /// Drops the transport after an external observation of device loss.
    pub async fn mark_disconnected(&mut self) {
        self.drop_transport().await;
        self.state = LinkState::Disconnected;
    }

    /// Releases the OS handle. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.transport.is_some() {
            tracing::info!(port = self.port.as_deref().unwrap_or("?"), "Closing link");
        }
        self.mark_disconnected().await;
    }

    async fn drop_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await;
        }
    }
}
