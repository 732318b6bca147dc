//! CLI entry point for tiny-display
//!
//! Opens the panel, discovers content modules and runs one of them until Ctrl-C
//! (or `q` in interactive mode).
//!
//! # Usage
//!
//! ```bash
//! tiny-display --list
//! tiny-display --plugin clock
//! tiny-display --port /dev/ttyACM0 --plugin 0 --interactive
//! ```
//!
//! # Exit codes
//!
//! | Code | Meaning                                   |
//! |------|-------------------------------------------|
//! | 0    | stopped normally                          |
//! | 2    | invalid configuration                     |
//! | 3    | unknown plugin or empty catalogue         |
//! | 4    | the display cannot be opened (permission) |

use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;

use tiny_display::config::{AppConfig, DEFAULT_CONFIG_FILE};
use tiny_display::link::serial::{list_usb_ports, SerialConnector};
use tiny_display::link::{Connector, Link};
use tiny_display::logging::{self, parse_log_level, TracingConfig};
use tiny_display::plugin::{
    Catalogue, PluginDescriptor, PluginRegistry, PluginRuntime, RuntimeCommand,
};
use tiny_display::IoError;

const COMMAND_QUEUE: usize = 8;

#[derive(Parser)]
#[command(name = "tiny-display")]
#[command(about = "Pluggable content runtime for a USB-serial mini display", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Serial port (path, by-id name or "auto"); overrides the config file
    #[arg(long)]
    port: Option<String>,

    /// Plugin to run, by name or index
    #[arg(long)]
    plugin: Option<String>,

    /// List discovered plugins and serial ports, then exit
    #[arg(long)]
    list: bool,

    /// Read plugin selections from stdin while running
    #[arg(long)]
    interactive: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Unknown plugin '{0}' (try --list)")]
    UnknownPlugin(String),
    #[error("No plugins discovered")]
    NoPlugins,
    #[error("Cannot open display: {0}")]
    Device(#[from] IoError),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::Config(_) => 2,
            CliError::UnknownPlugin(_) | CliError::NoPlugins => 3,
            CliError::Device(_) => 4,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "Exiting");
            eprintln!("Error: {}", err);
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(&cli)?;
    let tracing_config = TracingConfig::from_app_config(&config).map_err(CliError::Config)?;
    logging::init(tracing_config).map_err(CliError::Config)?;
    tracing::debug!(config = %cli.config.display(), "Configuration loaded");

    let registry = PluginRegistry::with_builtins();
    let catalogue = registry
        .discover(&config.plugins.search_locations(), &config.modules)
        .await;

    if cli.list {
        print_catalogue(&catalogue);
        print_ports();
        return Ok(());
    }
    if catalogue.is_empty() {
        return Err(CliError::NoPlugins);
    }

    let query = cli.plugin.as_deref().or(config.plugins.default.as_deref());
    let descriptor = select_plugin(&catalogue, query)?;

    let connector: Arc<dyn Connector> =
        Arc::new(SerialConnector::new(config.device.port_selector()));
    let settings = config.device.link_settings();
    let link = match Link::open(connector.clone(), settings.clone()).await {
        Ok(link) => link,
        Err(err @ IoError::PermissionDenied(_)) => return Err(err.into()),
        Err(err) => {
            tracing::warn!(error = %err, port = %config.device.port_selector(), "Display not available yet");
            Link::disconnected(connector, settings)
        }
    };

    let mut runtime = PluginRuntime::new(link, config.device.codec(), config.runtime.clone());
    if !runtime.link().is_connected() {
        let interrupted = tokio::select! {
            waited = runtime.wait_for_link() => {
                waited?;
                false
            }
            _ = tokio::signal::ctrl_c() => true,
        };
        if interrupted {
            tracing::info!("Interrupted while waiting for display");
            runtime.shutdown().await;
            return Ok(());
        }
    }

    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    // Startup activation goes through the same path as later switches.
    let _ = tx.send(RuntimeCommand::Switch(descriptor)).await;

    let ctrl_c_tx = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, stopping");
            let _ = ctrl_c_tx.send(RuntimeCommand::Stop).await;
        }
    });

    if cli.interactive {
        print_catalogue(&catalogue);
        // Blocking stdin reads live on their own thread so they never hold up runtime shutdown.
        let menu_tx = tx.clone();
        let spawned = std::thread::Builder::new()
            .name("stdin-menu".into())
            .spawn(move || interactive_menu(std::io::stdin().lock(), &catalogue, &menu_tx));
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "Interactive menu unavailable");
        }
    }

    runtime.run(rx).await;
    drop(tx);
    runtime.shutdown().await;
    tracing::info!("Goodbye");
    Ok(())
}

fn load_config(cli: &Cli) -> Result<AppConfig, CliError> {
    let mut config =
        AppConfig::load_from(&cli.config).map_err(|e| CliError::Config(e.to_string()))?;
    if let Some(port) = &cli.port {
        config.device.port = port.clone();
        config.device.vendor = None;
        config.device.model = None;
        config.device.serial = None;
    }
    if let Some(level) = &cli.log_level {
        parse_log_level(level).map_err(CliError::Config)?;
        config.application.log_level = level.clone();
    }
    config.validate().map_err(CliError::Config)?;
    Ok(config)
}

fn select_plugin(catalogue: &Catalogue, query: Option<&str>) -> Result<PluginDescriptor, CliError> {
    match query {
        Some(query) => catalogue
            .find(query)
            .cloned()
            .ok_or_else(|| CliError::UnknownPlugin(query.to_string())),
        None => catalogue.get(0).cloned().ok_or(CliError::NoPlugins),
    }
}

fn print_catalogue(catalogue: &Catalogue) {
    println!("Available plugins:");
    for (index, descriptor) in catalogue.iter().enumerate() {
        println!(
            "  {}. {} ({}s) - {}",
            index,
            descriptor.name(),
            descriptor.update_interval().as_secs(),
            descriptor.description()
        );
    }
    for rejected in catalogue.rejected() {
        println!("  skipped {}", rejected);
    }
}

fn print_ports() {
    let ports = list_usb_ports();
    if ports.is_empty() {
        println!("No USB serial ports found");
        return;
    }
    println!("USB serial ports:");
    for (port, label) in ports {
        println!("  {} [{}]", port, label);
    }
}

/// Reads selections line by line: a plugin name or index switches, `q` quits.
///
/// Runs on a plain thread and blocks on `input`.
fn interactive_menu<R: BufRead>(
    input: R,
    catalogue: &Catalogue,
    commands: &mpsc::Sender<RuntimeCommand>,
) {
    println!("Enter a plugin name or index to switch, 'q' to quit.");
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Reading stdin failed");
                break;
            }
        };
        let choice = line.trim();
        if choice.is_empty() {
            continue;
        }
        if choice.eq_ignore_ascii_case("q") || choice.eq_ignore_ascii_case("quit") {
            let _ = commands.blocking_send(RuntimeCommand::Stop);
            return;
        }
        match catalogue.find(choice) {
            Some(descriptor) => {
                if commands
                    .blocking_send(RuntimeCommand::Switch(descriptor.clone()))
                    .is_err()
                {
                    return;
                }
            }
            None => println!("Unknown plugin '{}'", choice),
        }
    }
    tracing::debug!("Stdin closed, interactive menu finished");
}
