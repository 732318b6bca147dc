//! # tiny_display
//!
//! Drives a small 160x80 RGB565 panel attached over USB serial and runs pluggable
//! content modules on it, one at a time.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: the bit-exact wire format (region header + big-endian RGB565 stream)
//!   and the `FrameCodec` that encodes it.
//! - **`display`**: drawing primitives on a borrowed link (`Canvas`), the 5x7 font and
//!   portrait rotation.
//! - **`link`**: the logical connection to the panel, its transports (serial, in-memory
//!   mock) and port resolution.
//! - **`plugin`**: the `ContentModule` contract, discovery (`PluginRegistry`), the
//!   single-instance scheduler (`PluginRuntime`) and the built-in modules.
//! - **`config`**: layered configuration (defaults, TOML, `TINY_DISPLAY_*` env vars).
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: the error taxonomy shared by the layers above.

pub mod config;
pub mod display;
pub mod error;
pub mod link;
pub mod logging;
pub mod plugin;
pub mod protocol;

pub use error::{DrawError, IoError, ProtocolError, RuntimeError};
