//! In-memory display for tests and dry runs.
//!
//! [`MockDevice`] is the test-facing handle; [`MockDevice::connector`] hands out
//! a [`Connector`] whose transports share its state. Every successful write is
//! recorded so tests can decode exactly what reached the "panel".
//!
//! Unplugging bumps a generation counter, so transports opened before the unplug
//! stay dead even after the device is plugged back in, matching how a re-enumerated
//! USB device needs a fresh open.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;

use super::{Connector, Transport};
use crate::error::IoError;

#[derive(Debug, Default)]
struct MockState {
    present: bool,
    generation: u64,
    busy: bool,
    permission_denied: bool,
    stall_writes: bool,
    fail_writes: Option<io::ErrorKind>,
    writes: Vec<Vec<u8>>,
    connect_attempts: usize,
    shutdowns: usize,
}

/// Shared handle to a simulated display.
#[derive(Debug, Clone)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Port name reported by mock transports.
    pub const PORT: &'static str = "mock://display";

    /// A plugged-in, idle device.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                present: true,
                ..MockState::default()
            })),
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MockConnector {
            state: Arc::clone(&self.state),
        })
    }

    /// Removes the device. Open transports fail their next write or probe.
    pub fn unplug(&self) {
        let mut state = self.state.lock();
        state.present = false;
        state.generation += 1;
    }

    pub fn replug(&self) {
        self.state.lock().present = true;
    }

    pub fn is_present(&self) -> bool {
        self.state.lock().present
    }

    /// Makes subsequent opens fail as if another process held the port.
    pub fn set_busy(&self, busy: bool) {
        self.state.lock().busy = busy;
    }

    pub fn set_permission_denied(&self, denied: bool) {
        self.state.lock().permission_denied = denied;
    }

    /// Writes never complete while set.
    pub fn stall_writes(&self, stall: bool) {
        self.state.lock().stall_writes = stall;
    }

    /// Fails every write with the given OS error kind until cleared.
    pub fn fail_writes(&self, kind: Option<io::ErrorKind>) {
        self.state.lock().fail_writes = kind;
    }

    /// Every successful write, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    /// All written bytes concatenated.
    pub fn bytes(&self) -> Vec<u8> {
        self.state.lock().writes.concat()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes.len()
    }

    pub fn clear_written(&self) {
        self.state.lock().writes.clear();
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts
    }

    pub fn shutdowns(&self) -> usize {
        self.state.lock().shutdowns
    }
}

struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _baud_rate: u32) -> Result<Box<dyn Transport>, IoError> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        if !state.present {
            return Err(IoError::NotFound(MockDevice::PORT.to_string()));
        }
        if state.permission_denied {
            return Err(IoError::PermissionDenied(MockDevice::PORT.to_string()));
        }
        if state.busy {
            return Err(IoError::Busy(MockDevice::PORT.to_string()));
        }
        Ok(Box::new(MockTransport {
            state: Arc::clone(&self.state),
            generation: state.generation,
        }))
    }
}

struct MockTransport {
    state: Arc<Mutex<MockState>>,
    generation: u64,
}

impl MockTransport {
    fn attached(state: &MockState, generation: u64) -> bool {
        state.present && state.generation == generation
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn port_name(&self) -> &str {
        MockDevice::PORT
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stall = {
            let mut state = self.state.lock();
            if !Self::attached(&state, self.generation) {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "mock device unplugged",
                ));
            }
            if let Some(kind) = state.fail_writes {
                return Err(io::Error::new(kind, "mock write failure"));
            }
            if !state.stall_writes {
                state.writes.push(bytes.to_vec());
            }
            state.stall_writes
        };
        if stall {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        Self::attached(&self.state.lock(), self.generation)
    }

    async fn shutdown(&mut self) {
        self.state.lock().shutdowns += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stale_transport_stays_dead_after_replug() {
        let device = MockDevice::new();
        let mut transport = device.connector().connect(19200).await.unwrap();
        assert!(transport.is_alive());

        device.unplug();
        device.replug();
        assert!(!transport.is_alive());
        assert!(transport.write_all(&[1]).await.is_err());

        let mut fresh = device.connector().connect(19200).await.unwrap();
        fresh.write_all(&[2]).await.unwrap();
        assert_eq!(device.bytes(), vec![2]);
    }

    #[tokio::test]
    async fn injected_write_failure() {
        let device = MockDevice::new();
        let mut transport = device.connector().connect(19200).await.unwrap();
        device.fail_writes(Some(io::ErrorKind::InvalidData));
        let err = transport.write_all(&[1]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(device.write_count(), 0);
    }
}
