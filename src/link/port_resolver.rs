//! Picks the device node to open.
//!
//! The panel enumerates as a plain USB CDC device whose `/dev/ttyACM*` number
//! changes between plugs. A [`PortSelector`] names it in one of three ways:
//!
//! - an explicit path (`/dev/ttyACM0`, or a `usb-...` name under `/dev/serial/by-id`)
//! - a hardware match on the udev by-id name (vendor, model, serial)
//! - `auto`: the first USB serial port the OS reports (needs the `serial` feature)
//!
//! Resolution runs on every open attempt, so a re-enumerated device is found
//! again under its new node.
//!
//! udev by-id names look like:
//! ```text
//! usb-{VENDOR}_{MODEL}_{SERIAL}-if{INTERFACE}
//! ```

use std::path::{Path, PathBuf};

use crate::error::IoError;

/// Directory udev populates with stable serial symlinks.
pub const BY_ID_DIR: &str = "/dev/serial/by-id";

/// Hardware match against by-id names. All given fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortSpec {
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
}

impl PortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// At least one criterion is set.
    pub fn is_valid(&self) -> bool {
        self.vendor.is_some() || self.model.is_some() || self.serial.is_some()
    }

    /// Looks the spec up under [`BY_ID_DIR`].
    pub fn resolve(&self) -> Result<String, IoError> {
        self.resolve_in(Path::new(BY_ID_DIR))
    }

    /// Looks the spec up in `dir`. A missing directory means no device is plugged in.
    pub fn resolve_in(&self, dir: &Path) -> Result<String, IoError> {
        if !self.is_valid() {
            return Err(IoError::Other(
                "port spec needs a vendor, model or serial".to_string(),
            ));
        }
        if !dir.exists() {
            return Err(IoError::NotFound(self.to_string()));
        }

        let entries = std::fs::read_dir(dir).map_err(|e| IoError::Other(e.to_string()))?;
        let mut matches: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| self.matches_name(&entry.file_name().to_string_lossy()))
            .map(|entry| entry.path())
            .collect();
        matches.sort();

        match matches.as_slice() {
            [] => Err(IoError::NotFound(self.to_string())),
            [only] => Ok(canonical(only)),
            many => Err(IoError::Other(format!(
                "port spec {} is ambiguous: {}",
                self,
                many.iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    fn matches_name(&self, name: &str) -> bool {
        let Some(name) = name.strip_prefix("usb-") else {
            return false;
        };
        if let Some(vendor) = &self.vendor {
            if !name.starts_with(vendor.as_str()) {
                return false;
            }
        }
        if let Some(model) = &self.model {
            if !name.contains(model.as_str()) {
                return false;
            }
        }
        if let Some(serial) = &self.serial {
            if !name.contains(serial.as_str()) {
                return false;
            }
        }
        true
    }
}

impl std::fmt::Display for PortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields: Vec<String> = [
            ("vendor", &self.vendor),
            ("model", &self.model),
            ("serial", &self.serial),
        ]
        .iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| format!("{}={}", key, v)))
        .collect();
        write!(f, "[{}]", fields.join(" "))
    }
}

/// How the link finds its device node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSelector {
    /// Explicit device path or by-id name.
    Path(String),
    /// Hardware match under `/dev/serial/by-id`.
    Spec(PortSpec),
    /// First USB serial port reported by the OS.
    Auto,
}

impl PortSelector {
    /// Builds a selector from the `[device]` settings: a non-empty spec wins over
    /// the port string; `"auto"` or an empty port selects auto-detection.
    pub fn from_settings(port: &str, spec: PortSpec) -> Self {
        if spec.is_valid() {
            PortSelector::Spec(spec)
        } else if port.is_empty() || port.eq_ignore_ascii_case("auto") {
            PortSelector::Auto
        } else {
            PortSelector::Path(port.to_string())
        }
    }
}

impl std::fmt::Display for PortSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortSelector::Path(path) => write!(f, "{}", path),
            PortSelector::Spec(spec) => write!(f, "by-id {}", spec),
            PortSelector::Auto => write!(f, "auto"),
        }
    }
}

/// Resolves an explicit path or short by-id name to an existing device node.
pub fn resolve_path(port: &str) -> Result<String, IoError> {
    let path = if port.starts_with("usb-") {
        PathBuf::from(BY_ID_DIR).join(port)
    } else {
        PathBuf::from(port)
    };
    if path.exists() {
        Ok(canonical(&path))
    } else {
        Err(IoError::NotFound(path.display().to_string()))
    }
}

fn canonical(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

/// Splits a by-id name into vendor, model and serial.
pub fn parse_by_id_name(name: &str) -> (Option<String>, Option<String>, Option<String>) {
    let Some(name) = name.strip_prefix("usb-") else {
        return (None, None, None);
    };
    let name = name.find("-if").map_or(name, |idx| &name[..idx]);
    let parts: Vec<&str> = name.split('_').collect();

    match parts.as_slice() {
        [] | [""] => (None, None, None),
        [vendor] => (Some(vendor.to_string()), None, None),
        [vendor, serial] => (Some(vendor.to_string()), None, Some(serial.to_string())),
        [vendor, model @ .., serial] => (
            Some(vendor.to_string()),
            Some(model.join("_")),
            Some(serial.to_string()),
        ),
    }
}
