//! Module discovery.
//!
//! [`PluginRegistry`] holds the factories compiled into the binary. Discovery walks
//! a list of [`SearchLocation`]s and validates every candidate into a
//! [`Catalogue`]:
//!
//! - [`SearchLocation::Builtin`] yields one candidate per registered factory,
//!   identified as `builtin/<entry>`.
//! - [`SearchLocation::Directory`] yields one candidate per `*.toml` manifest,
//!   identified by its path.
//!
//! A manifest selects a factory and may rename it or override its parameters:
//!
//! ```toml
//! entry = "clock"
//! name = "Asia Clock"
//! update_interval = 10
//!
//! [config]
//! cities = ["Tokyo=+09:00", "Shanghai=+08:00"]
//! ```
//!
//! Candidates are validated in lexicographic order of their source identifier, so
//! catalogue indices are stable across runs. A rejected candidate is logged and
//! recorded as a [`PluginLoadError`]; it never stops discovery of the others.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::{ModuleConfig, ModuleFactory, PluginDescriptor};

/// Longest accepted update interval, in seconds (one day).
pub const MAX_UPDATE_INTERVAL_SECS: u64 = 86_400;

/// Where discovery looks for candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchLocation {
    /// Every factory registered with the registry.
    Builtin,
    /// A directory of `*.toml` plugin manifests.
    Directory(PathBuf),
}

/// A candidate that failed validation.
#[derive(Debug, Clone)]
pub struct PluginLoadError {
    /// Source identifier of the candidate.
    pub source: String,
    pub message: String,
}

impl fmt::Display for PluginLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.message)
    }
}

/// On-disk plugin manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    pub entry: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Seconds; overrides the module's own interval.
    pub update_interval: Option<u64>,
    #[serde(default)]
    pub config: ModuleConfig,
}

struct Candidate {
    source: String,
    manifest: Result<PluginManifest, String>,
}

/// Ordered, read-only result of discovery.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    descriptors: Vec<PluginDescriptor>,
    rejected: Vec<PluginLoadError>,
}

impl Catalogue {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PluginDescriptor> {
        self.descriptors.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.descriptors.iter()
    }

    pub fn descriptors(&self) -> &[PluginDescriptor] {
        &self.descriptors
    }

    /// Candidates skipped during discovery.
    pub fn rejected(&self) -> &[PluginLoadError] {
        &self.rejected
    }

    /// Resolves a selection: a 0-based index, else an exact name, else a unique
    /// name prefix (both case-insensitive), else a source identifier.
    pub fn find(&self, query: &str) -> Option<&PluginDescriptor> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }
        if let Ok(index) = query.parse::<usize>() {
            return self.get(index);
        }

        let lower = query.to_lowercase();
        if let Some(exact) = self
            .descriptors
            .iter()
            .find(|d| d.name().to_lowercase() == lower)
        {
            return Some(exact);
        }

        let mut prefixed = self
            .descriptors
            .iter()
            .filter(|d| d.name().to_lowercase().starts_with(&lower));
        match (prefixed.next(), prefixed.next()) {
            (Some(only), None) => return Some(only),
            (Some(_), Some(_)) => {
                tracing::debug!(query, "Ambiguous plugin prefix");
                return None;
            }
            _ => {}
        }

        self.descriptors.iter().find(|d| d.source() == query)
    }
}

/// Factories known to this binary.
#[derive(Default)]
pub struct PluginRegistry {
    factories: BTreeMap<&'static str, Arc<dyn ModuleFactory>>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("entries", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the modules shipped in this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::builtin::register_all(&mut registry);
        registry
    }

    /// Registers a factory, replacing any earlier one with the same entry.
    pub fn register_factory(&mut self, factory: Arc<dyn ModuleFactory>) {
        let entry = factory.entry();
        if self.factories.insert(entry, factory).is_some() {
            tracing::warn!(entry, "Replacing previously registered module factory");
        }
    }

    pub fn register<F: ModuleFactory + 'static>(&mut self, factory: F) {
        self.register_factory(Arc::new(factory));
    }

    pub fn entries(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    /// Discovers and validates every candidate in `locations`.
    ///
    /// `configs` supplies per-entry parameters (`[modules.<entry>]`); a manifest's
    /// own `[config]` table is layered on top.
    pub async fn discover(
        &self,
        locations: &[SearchLocation],
        configs: &HashMap<String, ModuleConfig>,
    ) -> Catalogue {
        let mut candidates = Vec::new();
        let mut rejected = Vec::new();

        for location in locations {
            match location {
                SearchLocation::Builtin => {
                    candidates.extend(self.factories.keys().map(|entry| Candidate {
                        source: format!("builtin/{}", entry),
                        manifest: Ok(PluginManifest {
                            entry: entry.to_string(),
                            name: None,
                            description: None,
                            update_interval: None,
                            config: ModuleConfig::default(),
                        }),
                    }));
                }
                SearchLocation::Directory(dir) => {
                    scan_directory(dir, &mut candidates, &mut rejected).await;
                }
            }
        }

        candidates.sort_by(|a, b| a.source.cmp(&b.source));
        candidates.dedup_by(|a, b| a.source == b.source);

        let mut descriptors: Vec<PluginDescriptor> = Vec::new();
        for candidate in candidates {
            let source = candidate.source.clone();
            match self.validate(candidate, configs, &descriptors) {
                Ok(descriptor) => {
                    tracing::info!(
                        plugin = descriptor.name(),
                        source = %source,
                        interval = ?descriptor.update_interval(),
                        "Discovered plugin"
                    );
                    descriptors.push(descriptor);
                }
                Err(message) => {
                    tracing::warn!(source = %source, reason = %message, "Skipping plugin candidate");
                    rejected.push(PluginLoadError { source, message });
                }
            }
        }

        tracing::info!(
            found = descriptors.len(),
            skipped = rejected.len(),
            "Plugin discovery complete"
        );
        Catalogue {
            descriptors,
            rejected,
        }
    }

    fn validate(
        &self,
        candidate: Candidate,
        configs: &HashMap<String, ModuleConfig>,
        accepted: &[PluginDescriptor],
    ) -> Result<PluginDescriptor, String> {
        let manifest = candidate.manifest?;
        let factory = self
            .factories
            .get(manifest.entry.as_str())
            .cloned()
            .ok_or_else(|| format!("unknown module entry '{}'", manifest.entry))?;

        let config = configs
            .get(&manifest.entry)
            .cloned()
            .unwrap_or_default()
            .merged(&manifest.config);

        let probe = std::panic::catch_unwind(AssertUnwindSafe(|| factory.create(&config)))
            .map_err(|_| "module constructor panicked".to_string())?
            .map_err(|e| format!("module constructor failed: {:#}", e))?;

        let name = manifest
            .name
            .unwrap_or_else(|| probe.name().to_string())
            .trim()
            .to_string();
        if name.is_empty() {
            return Err("module name is empty".to_string());
        }

        let interval = manifest
            .update_interval
            .unwrap_or_else(|| probe.update_interval());
        if interval == 0 {
            return Err(format!("update interval of '{}' must be at least 1s", name));
        }
        if interval > MAX_UPDATE_INTERVAL_SECS {
            return Err(format!(
                "update interval of '{}' exceeds {}s",
                name, MAX_UPDATE_INTERVAL_SECS
            ));
        }

        if let Some(existing) = accepted
            .iter()
            .find(|d| d.name().eq_ignore_ascii_case(&name))
        {
            return Err(format!(
                "duplicate plugin name '{}' (already provided by {})",
                name,
                existing.source()
            ));
        }

        let description = manifest
            .description
            .unwrap_or_else(|| probe.description().to_string());

        Ok(PluginDescriptor::new(
            name,
            description,
            Duration::from_secs(interval),
            candidate.source,
            factory,
            config,
        ))
    }
}

async fn scan_directory(
    dir: &Path,
    candidates: &mut Vec<Candidate>,
    rejected: &mut Vec<PluginLoadError>,
) {
    if !dir.exists() {
        tracing::debug!("Plugin path does not exist: {}", dir.display());
        return;
    }

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            let err = PluginLoadError {
                source: dir.display().to_string(),
                message: format!("failed to read directory: {}", e),
            };
            tracing::warn!("{}", err);
            rejected.push(err);
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                let err = PluginLoadError {
                    source: dir.display().to_string(),
                    message: format!("failed to list directory entry: {}", e),
                };
                tracing::warn!("{}", err);
                rejected.push(err);
                break;
            }
        };
        let path = entry.path();
        if !path.is_file() || path.extension().map_or(true, |ext| ext != "toml") {
            continue;
        }
        let manifest = match tokio::fs::read_to_string(&path).await {
            Ok(content) => toml::from_str::<PluginManifest>(&content)
                .map_err(|e| format!("invalid manifest: {}", e.message())),
            Err(e) => Err(format!("failed to read manifest: {}", e)),
        };
        candidates.push(Candidate {
            source: path.display().to_string(),
            manifest,
        });
    }
}
