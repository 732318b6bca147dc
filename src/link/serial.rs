//! Real serial transport (USB CDC / RS-232) via `tokio-serial`.
//!
//! Ports are opened on the blocking pool with 8N1 framing and no flow control.
//! Liveness is the device node still existing: the panel never answers, so there
//! is nothing to read back, and a vanished node is the only reliable unplug signal.

use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::task::spawn_blocking;
use tokio_serial::SerialPortBuilderExt;

use super::port_resolver::{resolve_path, PortSelector};
use super::{Connector, Transport};
use crate::error::IoError;

/// Opens the display's serial port, re-resolving the selector on every attempt.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    selector: PortSelector,
}

impl SerialConnector {
    pub fn new(selector: PortSelector) -> Self {
        Self { selector }
    }

    pub fn selector(&self) -> &PortSelector {
        &self.selector
    }

    fn resolve(&self) -> Result<String, IoError> {
        match &self.selector {
            PortSelector::Path(path) => resolve_path(path),
            PortSelector::Spec(spec) => spec.resolve(),
            PortSelector::Auto => detect_usb_port(),
        }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self, baud_rate: u32) -> Result<Box<dyn Transport>, IoError> {
        let connector = self.clone();
        let (path, stream) = spawn_blocking(move || {
            let path = connector.resolve()?;
            let stream = tokio_serial::new(&path, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
                .map_err(|e| map_open_error(&path, &e))?;
            Ok::<_, IoError>((path, stream))
        })
        .await
        .map_err(|e| IoError::Other(format!("serial open task failed: {}", e)))??;

        Ok(Box::new(SerialTransport { path, stream }))
    }
}

/// An open serial port.
pub struct SerialTransport {
    path: String,
    stream: tokio_serial::SerialStream,
}

#[async_trait]
impl Transport for SerialTransport {
    fn port_name(&self) -> &str {
        &self.path
    }

    async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    fn is_alive(&mut self) -> bool {
        Path::new(&self.path).exists()
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!(port = %self.path, error = %e, "Serial shutdown failed");
        }
    }
}

/// First USB serial port the OS knows about.
pub fn detect_usb_port() -> Result<String, IoError> {
    let ports = tokio_serial::available_ports().map_err(|e| IoError::Other(e.to_string()))?;
    ports
        .into_iter()
        .find(|port| matches!(port.port_type, serialport::SerialPortType::UsbPort(_)))
        .map(|port| port.port_name)
        .ok_or_else(|| IoError::NotFound("no USB serial port".to_string()))
}

/// Lists USB serial ports with their USB identity, for `--list`.
pub fn list_usb_ports() -> Vec<(String, String)> {
    let Ok(ports) = tokio_serial::available_ports() else {
        return Vec::new();
    };
    ports
        .into_iter()
        .filter_map(|port| match port.port_type {
            serialport::SerialPortType::UsbPort(info) => {
                let label = format!(
                    "{:04x}:{:04x} {}",
                    info.vid,
                    info.pid,
                    info.product.unwrap_or_default()
                );
                Some((port.port_name, label))
            }
            _ => None,
        })
        .collect()
}

fn map_open_error(path: &str, err: &tokio_serial::Error) -> IoError {
    use tokio_serial::ErrorKind;
    match err.kind() {
        ErrorKind::NoDevice => IoError::NotFound(path.to_string()),
        ErrorKind::Io(std::io::ErrorKind::NotFound) => IoError::NotFound(path.to_string()),
        ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            IoError::PermissionDenied(path.to_string())
        }
        _ if err.to_string().to_lowercase().contains("busy") => IoError::Busy(path.to_string()),
        _ => IoError::Other(format!("{}: {}", path, err)),
    }
}
