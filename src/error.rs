//! Error types for the display runtime.
//!
//! The crate distinguishes four failure classes, each with its own recovery path:
//!
//! - **`IoError`**: transport-level failures on the serial [`Link`](crate::link::Link).
//!   Timeouts and disconnects are transient and are recovered by the reconnect loop.
//! - **`ProtocolError`**: a drawing request that cannot be expressed on the wire
//!   (region outside the panel, payload that does not match the region area). The
//!   offending draw call aborts and the error is returned to the caller.
//! - **`DrawError`**: what a drawing primitive returns, either of the two above.
//! - **`RuntimeError`**: illegal lifecycle transitions and activation failures in the
//!   [`PluginRuntime`](crate::plugin::runtime::PluginRuntime).
//!
//! Content modules report failures as `anyhow::Error`. Use [`link_error`] to find out
//! whether such an error was caused by the link, in which case the runtime treats it
//! as device loss instead of a module failure.

use thiserror::Error;

/// Convenience alias for results of drawing primitives.
pub type DrawResult<T> = std::result::Result<T, DrawError>;

/// Transport-level failures of the serial link.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IoError {
    /// The port path does not exist (device unplugged or never enumerated).
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// The port exists but is claimed by another process.
    #[error("Serial port busy: {0}")]
    Busy(String),

    /// The OS refused access to the port. Not recoverable by polling.
    #[error("Permission denied opening serial port: {0}")]
    PermissionDenied(String),

    /// A write did not complete within its deadline.
    #[error("Write timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The device vanished or the link is not currently connected.
    #[error("Device disconnected")]
    Disconnected,

    /// Any other transport failure.
    #[error("Serial I/O error: {0}")]
    Other(String),
}

impl IoError {
    /// Whether the reconnect loop can be expected to recover from this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IoError::Timeout(_) | IoError::Disconnected | IoError::NotFound(_) | IoError::Busy(_)
        )
    }

    /// Maps an OS error raised while writing to an already open port.
    ///
    /// Once a port is open, every failure except an explicit timeout means the
    /// device is gone as far as the runtime is concerned.
    pub fn from_write_error(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => IoError::Timeout(std::time::Duration::ZERO),
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotFound => IoError::Disconnected,
            _ => IoError::Other(err.to_string()),
        }
    }
}

/// A drawing request that violates the wire format's contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Region does not satisfy `0 <= x0 <= x1 < width` and `0 <= y0 <= y1 < height`.
    #[error("Region ({x0},{y0})-({x1},{y1}) outside {width}x{height} panel")]
    RegionOutOfBounds {
        x0: u32,
        y0: u32,
        x1: u32,
        y1: u32,
        width: u16,
        height: u16,
    },

    /// A rectangle with zero width or height.
    #[error("Empty region: {width}x{height}")]
    EmptyRegion { width: u16, height: u16 },

    /// Pixel payload length does not equal the region area.
    #[error("Pixel payload has {actual} values, region area is {expected}")]
    PayloadMismatch { expected: usize, actual: usize },

    /// Glyph scale factor must be at least 1.
    #[error("Invalid glyph scale: {0}")]
    InvalidScale(u8),

    /// Orientation may only be chosen while a module initializes.
    #[error("Orientation can only be set during module initialization")]
    OrientationLocked,
}

/// Error returned by drawing primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DrawError {
    /// The link failed while the frame was being written.
    #[error("Link error: {0}")]
    Link(#[from] IoError),

    /// The request could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Lifecycle errors raised by the plugin runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Operation not permitted in the current state.
    #[error("Cannot {operation} while runtime is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: crate::plugin::runtime::RuntimeState,
    },

    /// The module could not be constructed or its `initialize` failed.
    #[error("Failed to activate plugin '{plugin}': {source}")]
    ActivationFailed {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Finds the link error, if any, that caused a module failure.
pub fn link_error(err: &anyhow::Error) -> Option<&IoError> {
    err.chain().find_map(|cause| {
        cause
            .downcast_ref::<IoError>()
            .or_else(|| match cause.downcast_ref::<DrawError>() {
                Some(DrawError::Link(io)) => Some(io),
                _ => None,
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn transient_classification() {
        assert!(IoError::Disconnected.is_transient());
        assert!(IoError::Timeout(std::time::Duration::from_secs(1)).is_transient());
        assert!(!IoError::PermissionDenied("/dev/ttyACM0".into()).is_transient());
        assert!(!IoError::Other("framing".into()).is_transient());
    }

    #[test]
    fn write_errors_map_to_disconnect() {
        let err = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert_eq!(IoError::from_write_error(&err), IoError::Disconnected);

        let err = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad");
        assert!(matches!(IoError::from_write_error(&err), IoError::Other(_)));
    }

    #[test]
    fn finds_link_error_through_context() {
        let draw: DrawResult<()> = Err(DrawError::Link(IoError::Disconnected));
        let err = draw.context("drawing clock face").unwrap_err();
        assert_eq!(link_error(&err), Some(&IoError::Disconnected));
    }

    #[test]
    fn protocol_errors_are_not_link_errors() {
        let err = anyhow::Error::new(DrawError::Protocol(ProtocolError::InvalidScale(0)));
        assert!(link_error(&err).is_none());
    }
}
