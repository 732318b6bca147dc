//! The plugin runtime: one active module, ticked on its own cadence.
//!
//! # Lifecycle
//!
//! ```text
//!                 activate()                ok
//!  Idle/CleanedUp ──────────> Initializing ─────> Running ──switch()──> Switching ──> activate()
//!       ^                          │                 │
//!       │         init failed      │                 │ stop()
//!       ├──────────────────────────┘                 v
//!       │   evicted after N failed updates        Stopping ──> CleanedUp
//!       └────────────────────────────────────────────┘
//! ```
//!
//! There is a single thread of control. [`PluginRuntime::poll`] is one scheduler
//! decision point: it maintains the link, applies deferred commands and, if the
//! active module is due, runs exactly one `update`. Commands from
//! [`PluginRuntime::run`]'s channel are only looked at between polls, so a switch
//! or stop never interrupts a module mid-draw.
//!
//! # Device loss
//!
//! While the link is down nothing is ticked. The runtime retries the connection
//! every `reconnect_interval`; once it is back, the active module is ticked on the
//! same poll with `first_draw` set so it repaints the blank panel. `initialize` is
//! not run again. Update failures caused by the link going away are not counted
//! against the module.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{ContentModule, PluginDescriptor};
use crate::display::{Canvas, Orientation};
use crate::error::{link_error, IoError, RuntimeError};
use crate::link::Link;
use crate::protocol::FrameCodec;

/// Lifecycle state of the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeState {
    Idle,
    Initializing,
    Running,
    Switching,
    Stopping,
    CleanedUp,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RuntimeState::Idle => "idle",
            RuntimeState::Initializing => "initializing",
            RuntimeState::Running => "running",
            RuntimeState::Switching => "switching",
            RuntimeState::Stopping => "stopping",
            RuntimeState::CleanedUp => "cleaned up",
        };
        write!(f, "{}", label)
    }
}

/// Scheduling and recovery knobs (`[runtime]` in the config file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimePolicy {
    /// Delay between reconnection attempts while the link is down.
    #[serde(with = "humantime_serde")]
    pub reconnect_interval: Duration,
    /// Consecutive failed updates before a module is evicted.
    pub failure_threshold: u32,
    /// Longest the scheduler sleeps between decision points.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for RuntimePolicy {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(2),
            failure_threshold: 3,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Requests delivered to [`PluginRuntime::run`].
#[derive(Debug, Clone)]
pub enum RuntimeCommand {
    /// Replace the active module (or start one if none is active).
    Switch(PluginDescriptor),
    /// Clean up and leave the run loop.
    Stop,
}

/// A live module owned by the runtime.
struct PluginInstance {
    descriptor: PluginDescriptor,
    module: Box<dyn ContentModule>,
    orientation: Orientation,
    first_draw: bool,
    consecutive_failures: u32,
    next_tick: Instant,
    ticks: u64,
}

/// Scheduler owning the link and at most one module instance.
pub struct PluginRuntime {
    link: Link,
    codec: FrameCodec,
    policy: RuntimePolicy,
    state: RuntimeState,
    active: Option<PluginInstance>,
    pending: Option<PluginDescriptor>,
    next_reconnect: Instant,
    loss_reported: bool,
}

impl fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("state", &self.state)
            .field("link", &self.link)
            .field("active", &self.active_plugin().map(|d| d.name()))
            .field("policy", &self.policy)
            .finish()
    }
}

impl PluginRuntime {
    pub fn new(link: Link, codec: FrameCodec, policy: RuntimePolicy) -> Self {
        Self {
            link,
            codec,
            policy,
            state: RuntimeState::Idle,
            active: None,
            pending: None,
            next_reconnect: Instant::now(),
            loss_reported: false,
        }
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    pub fn policy(&self) -> &RuntimePolicy {
        &self.policy
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }

    /// Descriptor of the running module.
    pub fn active_plugin(&self) -> Option<&PluginDescriptor> {
        self.active.as_ref().map(|i| &i.descriptor)
    }

    /// Consecutive failed updates of the running module.
    pub fn active_failures(&self) -> Option<u32> {
        self.active.as_ref().map(|i| i.consecutive_failures)
    }

    /// Successful updates of the running module.
    pub fn active_ticks(&self) -> Option<u64> {
        self.active.as_ref().map(|i| i.ticks)
    }

    /// Descriptor waiting for the link before it can be activated.
    pub fn pending_plugin(&self) -> Option<&PluginDescriptor> {
        self.pending.as_ref()
    }

    fn set_state(&mut self, state: RuntimeState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "Runtime state change");
            self.state = state;
        }
    }

    /// Instantiates and initializes `descriptor`. Legal from `Idle` or `CleanedUp`.
    ///
    /// On failure the instance is cleaned up and discarded and the runtime is
    /// left `Idle`; the descriptor is not retried.
    pub async fn activate(&mut self, descriptor: &PluginDescriptor) -> Result<(), RuntimeError> {
        if !matches!(self.state, RuntimeState::Idle | RuntimeState::CleanedUp) {
            return Err(RuntimeError::InvalidTransition {
                operation: "activate",
                state: self.state,
            });
        }
        self.set_state(RuntimeState::Initializing);
        tracing::info!(plugin = descriptor.name(), "Activating plugin");

        let built = std::panic::catch_unwind(AssertUnwindSafe(|| descriptor.instantiate()));
        let mut module = match built {
            Ok(Ok(module)) => module,
            Ok(Err(source)) => return Err(self.activation_failed(descriptor, source)),
            Err(payload) => {
                let source =
                    anyhow::anyhow!("constructor panicked: {}", panic_message(&*payload));
                return Err(self.activation_failed(descriptor, source));
            }
        };

        let mut canvas = Canvas::for_initialize(&mut self.link, self.codec);
        let result = guarded(module.initialize(&mut canvas)).await;
        let orientation = canvas.orientation();
        drop(canvas);

        if let Err(source) = result {
            cleanup_module(descriptor.name(), module.as_mut()).await;
            return Err(self.activation_failed(descriptor, source));
        }

        tracing::info!(
            plugin = descriptor.name(),
            orientation = %orientation,
            interval = ?descriptor.update_interval(),
            "Plugin running"
        );
        self.active = Some(PluginInstance {
            descriptor: descriptor.clone(),
            module,
            orientation,
            first_draw: true,
            consecutive_failures: 0,
            next_tick: Instant::now(),
            ticks: 0,
        });
        self.set_state(RuntimeState::Running);
        Ok(())
    }

    fn activation_failed(
        &mut self,
        descriptor: &PluginDescriptor,
        source: anyhow::Error,
    ) -> RuntimeError {
        tracing::error!(
            plugin = descriptor.name(),
            error = %format!("{:#}", source),
            "Plugin failed to initialize"
        );
        self.set_state(RuntimeState::Idle);
        RuntimeError::ActivationFailed {
            plugin: descriptor.name().to_string(),
            source,
        }
    }

    /// Cleans up the running module and activates `descriptor`. Legal from `Running`.
    pub async fn switch(&mut self, descriptor: &PluginDescriptor) -> Result<(), RuntimeError> {
        if self.state != RuntimeState::Running {
            return Err(RuntimeError::InvalidTransition {
                operation: "switch",
                state: self.state,
            });
        }
        self.set_state(RuntimeState::Switching);
        if let Some(mut instance) = self.active.take() {
            tracing::info!(
                from = instance.descriptor.name(),
                to = descriptor.name(),
                "Switching plugin"
            );
            cleanup_module(instance.descriptor.name(), instance.module.as_mut()).await;
        }
        self.set_state(RuntimeState::Idle);
        self.activate(descriptor).await
    }

    /// Cleans up the active module, if any, and ends in `CleanedUp`. Idempotent.
    pub async fn stop(&mut self) {
        if self.state == RuntimeState::CleanedUp {
            return;
        }
        self.set_state(RuntimeState::Stopping);
        self.pending = None;
        if let Some(mut instance) = self.active.take() {
            tracing::info!(plugin = instance.descriptor.name(), "Stopping plugin");
            cleanup_module(instance.descriptor.name(), instance.module.as_mut()).await;
        }
        self.set_state(RuntimeState::CleanedUp);
    }

    /// [`stop`](Self::stop), then release the serial port.
    pub async fn shutdown(&mut self) {
        self.stop().await;
        self.link.close().await;
    }

    /// Blocks until the link is connected, retrying every `reconnect_interval`.
    ///
    /// Gives up only on errors polling cannot fix (permission denied).
    pub async fn wait_for_link(&mut self) -> Result<(), IoError> {
        let mut announced = false;
        loop {
            if self.link.is_connected() && self.link.probe().await {
                return Ok(());
            }
            match self.link.reconnect().await {
                Ok(()) => return Ok(()),
                Err(err @ IoError::PermissionDenied(_)) => return Err(err),
                Err(err) => {
                    if !announced {
                        tracing::info!(error = %err, "Waiting for display");
                        announced = true;
                    }
                }
            }
            tokio::time::sleep(self.policy.reconnect_interval).await;
        }
    }

    /// One scheduler decision point. Returns when the next one is due.
    pub async fn poll(&mut self) -> Instant {
        let now = Instant::now();
        let poll_deadline = deadline_after(now, self.policy.poll_interval);

        if !self.ensure_link(now).await {
            return self.next_reconnect.min(poll_deadline).max(now);
        }

        if let Some(descriptor) = self.pending.take() {
            self.apply(descriptor).await;
        }

        let due = match &self.active {
            Some(instance) if self.state == RuntimeState::Running => Some(instance.next_tick),
            _ => None,
        };
        match due {
            Some(next_tick) if next_tick <= now => {
                self.tick(now).await;
            }
            _ => {}
        }

        let wake = match &self.active {
            Some(instance) if self.link.is_connected() => instance.next_tick.min(poll_deadline),
            _ if !self.link.is_connected() => self.next_reconnect.min(poll_deadline),
            _ => poll_deadline,
        };
        wake.max(now)
    }

    /// Runs scheduler polls until stopped or the command channel closes.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<RuntimeCommand>) {
        while self.state != RuntimeState::CleanedUp {
            let wake = self.poll().await;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(RuntimeCommand::Switch(descriptor)) => {
                        if self.link.is_connected() {
                            self.apply(descriptor).await;
                        } else {
                            tracing::info!(plugin = descriptor.name(), "Display offline, activation deferred");
                            self.pending = Some(descriptor);
                        }
                    }
                    Some(RuntimeCommand::Stop) | None => self.stop().await,
                },
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    /// Switches to or activates `descriptor`, whichever the state allows.
    async fn apply(&mut self, descriptor: PluginDescriptor) {
        let result = match self.state {
            RuntimeState::Running => self.switch(&descriptor).await,
            _ => self.activate(&descriptor).await,
        };
        match result {
            Ok(()) => {}
            Err(RuntimeError::ActivationFailed { source, .. })
                if link_error(&source).is_some_and(IoError::is_transient) =>
            {
                tracing::warn!(plugin = descriptor.name(), "Display lost during activation, will retry");
                self.pending = Some(descriptor);
            }
            Err(err) => tracing::warn!(error = %err, "Plugin command not applied"),
        }
    }

    /// Keeps the link up. Returns whether it is usable now.
    async fn ensure_link(&mut self, now: Instant) -> bool {
        if self.link.is_connected() {
            if self.link.probe().await {
                return true;
            }
            self.on_link_lost(now);
            return false;
        }
        if now < self.next_reconnect {
            return false;
        }

        self.next_reconnect = deadline_after(now, self.policy.reconnect_interval);
        match self.link.reconnect().await {
            Ok(()) => {
                tracing::info!(port = self.link.port().unwrap_or("?"), "Display reconnected");
                self.loss_reported = false;
                if let Some(instance) = self.active.as_mut() {
                    instance.first_draw = true;
                    instance.next_tick = now;
                }
                true
            }
            Err(err) => {
                if !self.loss_reported {
                    tracing::warn!(error = %err, "Display unavailable, retrying every {:?}", self.policy.reconnect_interval);
                    self.loss_reported = true;
                }
                false
            }
        }
    }

    fn on_link_lost(&mut self, now: Instant) {
        if !self.loss_reported {
            tracing::warn!(
                plugin = self.active_plugin().map(|d| d.name()).unwrap_or("-"),
                "Display disconnected, suspending updates"
            );
            self.loss_reported = true;
        }
        self.next_reconnect = deadline_after(now, self.policy.reconnect_interval);
    }

    async fn tick(&mut self, started: Instant) {
        let Some(instance) = self.active.as_mut() else {
            return;
        };
        let mut canvas = Canvas::new(&mut self.link, self.codec, instance.orientation);
        let result = guarded(instance.module.update(&mut canvas, instance.first_draw)).await;
        drop(canvas);
        instance.next_tick = deadline_after(started, instance.descriptor.update_interval());

        let err = match result {
            Ok(()) => {
                instance.first_draw = false;
                instance.consecutive_failures = 0;
                instance.ticks += 1;
                return;
            }
            Err(err) => err,
        };

        let link_lost = !self.link.is_connected()
            || link_error(&err).is_some_and(IoError::is_transient);
        if link_lost {
            tracing::debug!(plugin = instance.descriptor.name(), error = %format!("{:#}", err), "Update interrupted by link loss");
            self.link.mark_disconnected().await;
            self.on_link_lost(Instant::now());
            return;
        }

        instance.consecutive_failures += 1;
        let failures = instance.consecutive_failures;
        tracing::warn!(
            plugin = instance.descriptor.name(),
            failures,
            error = %format!("{:#}", err),
            "Plugin update failed"
        );
        if failures >= self.policy.failure_threshold {
            self.evict().await;
        }
    }

    async fn evict(&mut self) {
        if let Some(mut instance) = self.active.take() {
            tracing::error!(
                plugin = instance.descriptor.name(),
                failures = instance.consecutive_failures,
                "Evicting plugin after repeated failures"
            );
            cleanup_module(instance.descriptor.name(), instance.module.as_mut()).await;
        }
        self.set_state(RuntimeState::Idle);
    }
}

/// Roughly 30 years, the same horizon tokio uses for an unarmed timer.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + interval`, saturating to a far-future deadline instead of overflowing.
fn deadline_after(start: Instant, interval: Duration) -> Instant {
    start
        .checked_add(interval)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// Awaits a module call, turning a panic into an error.
async fn guarded<F>(call: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!("panicked: {}", panic_message(&*payload))),
    }
}

/// Runs `cleanup`, logging and swallowing errors and panics.
async fn cleanup_module(name: &str, module: &mut dyn ContentModule) {
    if let Err(err) = guarded(module.cleanup()).await {
        tracing::warn!(plugin = name, error = %format!("{:#}", err), "Plugin cleanup failed");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
