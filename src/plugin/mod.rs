//! Content modules and their runtime.
//!
//! A content module renders one kind of screen (a clock, a status page, ...). It is
//! a value implementing [`ContentModule`], built by a [`ModuleFactory`] that was
//! registered with the [`PluginRegistry`](registry::PluginRegistry) at startup.
//! Discovery turns factories and on-disk manifests into [`PluginDescriptor`]s;
//! the [`PluginRuntime`](runtime::PluginRuntime) activates one descriptor at a time
//! and ticks it.
//!
//! # Contract
//!
//! | Operation           | Called                                         |
//! |---------------------|------------------------------------------------|
//! | `name`              | discovery, logging                             |
//! | `description`       | discovery, `--list`                            |
//! | `update_interval`   | discovery; seconds between ticks, at least 1   |
//! | `initialize`        | once, before any `update`                      |
//! | `update`            | every tick while the link is up                |
//! | `cleanup`           | once, before the instance is dropped           |
//!
//! Modules never hold on to the link. Each `initialize`/`update` call receives a
//! [`Canvas`] that borrows it for the duration of the call only.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::display::Canvas;

pub mod builtin;
pub mod registry;
pub mod runtime;

pub use registry::{Catalogue, PluginLoadError, PluginRegistry, SearchLocation};
pub use runtime::{PluginRuntime, RuntimeCommand, RuntimePolicy, RuntimeState};

/// The rendering contract every content module implements.
#[async_trait]
pub trait ContentModule: Send {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Seconds between updates.
    fn update_interval(&self) -> u64;

    /// Prepares the screen. This is the only call where the canvas orientation
    /// may be changed.
    async fn initialize(&mut self, canvas: &mut Canvas<'_>) -> anyhow::Result<()>;

    /// Redraws. `first_draw` is set on the first update after `initialize` and
    /// after every reconnect, when the panel has to be repainted from scratch.
    async fn update(&mut self, canvas: &mut Canvas<'_>, first_draw: bool) -> anyhow::Result<()>;

    /// Releases module resources. Errors are logged and otherwise ignored.
    async fn cleanup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Builds module instances for one entry point.
pub trait ModuleFactory: Send + Sync {
    /// Identifier manifests use to refer to this factory (e.g. `"clock"`).
    fn entry(&self) -> &'static str;

    /// Constructs a fresh, uninitialized instance.
    fn create(&self, config: &ModuleConfig) -> anyhow::Result<Box<dyn ContentModule>>;
}

/// A [`ModuleFactory`] backed by a closure.
pub struct FnModuleFactory<F> {
    entry: &'static str,
    build: F,
}

impl<F> FnModuleFactory<F>
where
    F: Fn(&ModuleConfig) -> anyhow::Result<Box<dyn ContentModule>> + Send + Sync,
{
    pub fn new(entry: &'static str, build: F) -> Self {
        Self { entry, build }
    }
}

impl<F> ModuleFactory for FnModuleFactory<F>
where
    F: Fn(&ModuleConfig) -> anyhow::Result<Box<dyn ContentModule>> + Send + Sync,
{
    fn entry(&self) -> &'static str {
        self.entry
    }

    fn create(&self, config: &ModuleConfig) -> anyhow::Result<Box<dyn ContentModule>> {
        (self.build)(config)
    }
}

/// Free-form module parameters from `[modules.<entry>]` or a manifest's `[config]`.
///
/// ```toml
/// [modules.clock]
/// cities = ["Shanghai=+08:00", "London=+00:00"]
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    #[serde(flatten)]
    pub params: HashMap<String, serde_json::Value>,
}

impl ModuleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.params.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.params.insert(key.into(), value);
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.as_u64())
    }

    /// Deserializes one parameter into a typed value.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        self.get(key)
            .map(|v| {
                serde_json::from_value(v.clone())
                    .map_err(|e| anyhow::anyhow!("Invalid value for '{}': {}", key, e))
            })
            .transpose()
    }

    /// Layers `other` on top of `self`.
    pub fn merged(&self, other: &ModuleConfig) -> ModuleConfig {
        let mut params = self.params.clone();
        params.extend(other.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        ModuleConfig { params }
    }
}

/// Immutable description of a discovered module.
#[derive(Clone)]
pub struct PluginDescriptor {
    name: String,
    description: String,
    update_interval: Duration,
    source: String,
    factory: Arc<dyn ModuleFactory>,
    config: ModuleConfig,
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("update_interval", &self.update_interval)
            .field("source", &self.source)
            .field("entry", &self.factory.entry())
            .finish()
    }
}

impl PluginDescriptor {
    pub(crate) fn new(
        name: String,
        description: String,
        update_interval: Duration,
        source: String,
        factory: Arc<dyn ModuleFactory>,
        config: ModuleConfig,
    ) -> Self {
        Self {
            name,
            description,
            update_interval,
            source,
            factory,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Where the descriptor came from (`builtin/<entry>` or a manifest path).
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn entry(&self) -> &'static str {
        self.factory.entry()
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// Builds a fresh instance from the descriptor's factory and parameters.
    pub fn instantiate(&self) -> anyhow::Result<Box<dyn ContentModule>> {
        self.factory.create(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_typed_access() {
        let mut config = ModuleConfig::new();
        config.set("cities", json!(["Shanghai=+08:00", "London=+00:00"]));
        config.set("title", json!("WORLD"));
        config.set("interval", json!(4));

        assert_eq!(config.get_str("title"), Some("WORLD"));
        assert_eq!(config.get_u64("interval"), Some(4));
        let cities: Vec<String> = config.get_as("cities").unwrap().unwrap();
        assert_eq!(cities.len(), 2);
        assert!(config.get_as::<Vec<String>>("missing").unwrap().is_none());
        assert!(config.get_as::<Vec<String>>("title").is_err());
    }

    #[test]
    fn merge_prefers_overlay() {
        let mut base = ModuleConfig::new();
        base.set("a", json!(1));
        base.set("b", json!(2));
        let mut overlay = ModuleConfig::new();
        overlay.set("b", json!(3));

        let merged = base.merged(&overlay);
        assert_eq!(merged.get_u64("a"), Some(1));
        assert_eq!(merged.get_u64("b"), Some(3));
    }

    #[test]
    fn config_from_toml_table() {
        let config: ModuleConfig = toml::from_str("cities = [\"Tokyo=+09:00\"]\nscale = 2").unwrap();
        assert_eq!(config.get_u64("scale"), Some(2));
    }
}
