//! Configuration loading using Figment.
//!
//! Sources, later ones winning:
//! 1. built-in defaults
//! 2. `tiny-display.toml` (or the `--config` path)
//! 3. environment variables prefixed with `TINY_DISPLAY_`, nested with `__`
//!    (`TINY_DISPLAY_DEVICE__PORT=/dev/ttyACM0`)
//!
//! # Example
//! ```no_run
//! use tiny_display::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! println!("Port: {}", config.device.port);
//! # Ok::<(), figment::Error>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::link::port_resolver::{PortSelector, PortSpec};
use crate::link::{LinkSettings, DEFAULT_BAUD_RATE, MIN_WRITE_TIMEOUT};
use crate::logging::OutputFormat;
use crate::plugin::{ModuleConfig, RuntimePolicy, SearchLocation};
use crate::protocol::{FrameCodec, DEFAULT_HEIGHT, DEFAULT_WIDTH};

pub const DEFAULT_CONFIG_FILE: &str = "tiny-display.toml";
pub const ENV_PREFIX: &str = "TINY_DISPLAY_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub application: ApplicationConfig,
    pub device: DeviceConfig,
    pub runtime: RuntimePolicy,
    pub plugins: PluginsConfig,
    /// Per-entry module parameters, `[modules.<entry>]`.
    pub modules: HashMap<String, ModuleConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: OutputFormat::Pretty,
        }
    }
}

/// The display and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device path, by-id name, or `auto`.
    pub port: String,
    /// Hardware match under `/dev/serial/by-id`; overrides `port` when set.
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub baud_rate: u32,
    pub width: u16,
    pub height: u16,
    #[serde(with = "humantime_serde")]
    pub min_write_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: "auto".to_string(),
            vendor: None,
            model: None,
            serial: None,
            baud_rate: DEFAULT_BAUD_RATE,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            min_write_timeout: MIN_WRITE_TIMEOUT,
        }
    }
}

impl DeviceConfig {
    pub fn port_spec(&self) -> PortSpec {
        let mut spec = PortSpec::new();
        if let Some(vendor) = &self.vendor {
            spec = spec.vendor(vendor);
        }
        if let Some(model) = &self.model {
            spec = spec.model(model);
        }
        if let Some(serial) = &self.serial {
            spec = spec.serial(serial);
        }
        spec
    }

    pub fn port_selector(&self) -> PortSelector {
        PortSelector::from_settings(&self.port, self.port_spec())
    }

    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            baud_rate: self.baud_rate,
            min_write_timeout: self.min_write_timeout,
        }
    }

    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Directories scanned for `*.toml` plugin manifests, in order.
    pub search_paths: Vec<PathBuf>,
    /// Include the modules compiled into the binary.
    pub builtin: bool,
    /// Plugin started when none is given on the command line.
    pub default: Option<String>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            search_paths: vec![PathBuf::from("plugins")],
            builtin: true,
            default: None,
        }
    }
}

impl PluginsConfig {
    /// Built-ins first, then the configured directories.
    pub fn search_locations(&self) -> Vec<SearchLocation> {
        let builtin = self.builtin.then_some(SearchLocation::Builtin);
        builtin
            .into_iter()
            .chain(
                self.search_paths
                    .iter()
                    .cloned()
                    .map(SearchLocation::Directory),
            )
            .collect()
    }
}

impl AppConfig {
    /// Load configuration from `tiny-display.toml` and environment variables.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific file path. A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.device.baud_rate == 0 {
            return Err("device.baud_rate must be positive".to_string());
        }
        if self.device.width == 0 || self.device.height == 0 {
            return Err(format!(
                "Invalid display size {}x{}",
                self.device.width, self.device.height
            ));
        }

        if self.runtime.failure_threshold == 0 {
            return Err("runtime.failure_threshold must be at least 1".to_string());
        }
        if self.runtime.reconnect_interval.is_zero() || self.runtime.poll_interval.is_zero() {
            return Err("runtime intervals must be non-zero".to_string());
        }

        if !self.plugins.builtin && self.plugins.search_paths.is_empty() {
            return Err("No plugin sources: enable builtin or add search_paths".to_string());
        }

        Ok(())
    }
}
