//! Shared fixtures: a scripted content module that records every call, and
//! helpers that put a runtime on top of the in-memory display.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use tiny_display::display::Canvas;
use tiny_display::link::mock::MockDevice;
use tiny_display::link::{Link, LinkSettings};
use tiny_display::plugin::{
    Catalogue, ContentModule, FnModuleFactory, PluginDescriptor, PluginRegistry, PluginRuntime,
    RuntimePolicy, SearchLocation,
};
use tiny_display::protocol::{FrameCodec, Rgb565};

/// What scripted modules did, shared between the test and every instance.
#[derive(Debug, Default)]
pub struct ProbeState {
    pub events: Vec<String>,
    pub update_times: Vec<Instant>,
    pub live: i32,
    pub max_live: i32,
    pub fail_init: bool,
    pub fail_updates: bool,
    pub panic_in_update: bool,
    pub panic_in_cleanup: bool,
    /// Unplugged by the next `update`, before it draws.
    pub unplug_during_update: Option<MockDevice>,
}

#[derive(Debug, Clone, Default)]
pub struct Probe(Arc<Mutex<ProbeState>>);

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut ProbeState) -> R) -> R {
        f(&mut self.0.lock())
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().events.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0
            .lock()
            .events
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub fn update_times(&self) -> Vec<Instant> {
        self.0.lock().update_times.clone()
    }

    pub fn clear(&self) {
        let mut state = self.0.lock();
        state.events.clear();
        state.update_times.clear();
    }
}

/// Content module driven by a [`Probe`].
pub struct Scripted {
    name: &'static str,
    interval: u64,
    probe: Probe,
}

#[async_trait]
impl ContentModule for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "scripted test module"
    }

    fn update_interval(&self) -> u64 {
        self.interval
    }

    async fn initialize(&mut self, canvas: &mut Canvas<'_>) -> anyhow::Result<()> {
        let fail = {
            let mut state = self.probe.0.lock();
            state.events.push(format!("init:{}", self.name));
            state.live += 1;
            state.max_live = state.max_live.max(state.live);
            state.fail_init
        };
        if fail {
            anyhow::bail!("{} refused to initialize", self.name);
        }
        canvas.clear(Rgb565::BLACK).await?;
        Ok(())
    }

    async fn update(&mut self, canvas: &mut Canvas<'_>, first_draw: bool) -> anyhow::Result<()> {
        let (fail, panic, unplug) = {
            let mut state = self.probe.0.lock();
            state.events.push(format!("update:{}:{}", self.name, first_draw));
            state.update_times.push(Instant::now());
            (
                state.fail_updates,
                state.panic_in_update,
                state.unplug_during_update.take(),
            )
        };
        if panic {
            panic!("{} exploded", self.name);
        }
        if fail {
            anyhow::bail!("{} update failed", self.name);
        }
        if let Some(device) = unplug {
            device.unplug();
        }
        canvas.draw_pixel(0, 0, Rgb565::WHITE).await?;
        Ok(())
    }

    async fn cleanup(&mut self) -> anyhow::Result<()> {
        let panic = {
            let mut state = self.probe.0.lock();
            state.events.push(format!("cleanup:{}", self.name));
            state.live -= 1;
            state.panic_in_cleanup
        };
        if panic {
            panic!("{} cleanup exploded", self.name);
        }
        Ok(())
    }
}

/// Registry holding scripted modules `alpha` ("Alpha", 1s) and `beta` ("Beta", 2s).
pub fn scripted_registry(probe: &Probe) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    for (entry, name, interval) in [("alpha", "Alpha", 1), ("beta", "Beta", 2)] {
        let probe = probe.clone();
        registry.register(FnModuleFactory::new(entry, move |_| {
            Ok(Box::new(Scripted {
                name,
                interval,
                probe: probe.clone(),
            }) as Box<dyn ContentModule>)
        }));
    }
    registry
}

pub async fn scripted_catalogue(probe: &Probe) -> Catalogue {
    scripted_registry(probe)
        .discover(&[SearchLocation::Builtin], &HashMap::new())
        .await
}

pub fn descriptor(catalogue: &Catalogue, name: &str) -> PluginDescriptor {
    catalogue
        .find(name)
        .cloned()
        .unwrap_or_else(|| panic!("plugin {} not discovered", name))
}

/// Runtime over a connected mock display with default policy.
pub async fn runtime_on(device: &MockDevice) -> PluginRuntime {
    let link = Link::open(device.connector(), LinkSettings::default())
        .await
        .expect("mock display opens");
    PluginRuntime::new(link, FrameCodec::new(160, 80), RuntimePolicy::default())
}
