//! MidiHID GW
//!
//! Runs a scripted HID → MIDI/OSC bridge from a YAML configuration, optionally
//! driven by a recorded event stream.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use midihid_gw::bridge::{BridgeController, BridgeOptions, BridgeStatus};
use midihid_gw::config::{AppConfig, ScriptWatcher};
use midihid_gw::device::replay::{ReplaySource, ReplaySummary};
use midihid_gw::device::DeviceDelegate;
use midihid_gw::midi::{MidiTransport, MidirTransport};
use midihid_gw::ports;

/// MidiHID Gateway - drive MIDI and OSC from HID controllers with Lua scripts
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "bridge.yaml")]
    config: PathBuf,

    /// Replay device events from a JSON-lines file ("-" for stdin)
    #[arg(short, long)]
    events: Option<String>,

    /// Write the bridge configuration and settings here on shutdown
    #[arg(long)]
    save: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    if args.list_ports {
        init_logging(args.log_level.as_deref().unwrap_or("info"))?;
        let preferred = AppConfig::load(&args.config)
            .await
            .ok()
            .and_then(|config| config.midi.output_port);
        ports::list_ports_formatted(preferred.as_deref());
        return Ok(());
    }

    let config = AppConfig::load(&args.config).await?;

    let level = args
        .log_level
        .clone()
        .or_else(|| config.logging.as_ref().map(|l| l.level.clone()))
        .unwrap_or_else(|| "info".to_string());
    init_logging(&level)?;

    info!("Starting MidiHID GW v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config.display());

    let script = config.load_script(&args.config).await?;
    let bridge = Arc::new(build_bridge(&config, script)?);

    let watcher = match config.script_path(&args.config) {
        Some(path) => Some(ScriptWatcher::new(path)?),
        None => None,
    };

    run_app(bridge.clone(), &args, watcher, shutdown_signal()).await?;

    if let Some(path) = &args.save {
        let mut snapshot = config.clone();
        snapshot.bridge = bridge.save_configuration();
        snapshot.settings = bridge.save_settings();
        snapshot
            .save(path)
            .await
            .with_context(|| format!("Failed to save bridge to {}", path.display()))?;
        info!("Bridge saved to {}", path.display());
    }

    info!("MidiHID GW shutdown complete");
    Ok(())
}

fn build_bridge(config: &AppConfig, script: String) -> Result<BridgeController> {
    let mut bridge_config = config.bridge.clone();
    bridge_config.script = script;

    let mut options = BridgeOptions::new(bridge_config, config.settings.clone());
    options.enabled = true;

    if config.bridge.enable_midi {
        let name = &config.settings.name;
        let pattern = config.midi.output_port.as_deref().unwrap_or(name);
        let transport = MidirTransport::open(name, pattern)
            .with_context(|| format!("Failed to open MIDI output '{}'", pattern))?;
        options.midi_transport = Some(Arc::new(transport) as Arc<dyn MidiTransport>);
    }

    let bridge = BridgeController::new(options).context("Failed to create bridge")?;

    if let Some(err) = bridge.last_error() {
        warn!("Initial script not loaded: {}", err);
    }

    let name = bridge.name();
    bridge.subscribe(Arc::new(move |status: BridgeStatus| {
        info!("Bridge '{}' is {}", name, status);
    }));

    Ok(bridge)
}

fn open_events(path: &str) -> Result<Box<dyn BufRead + Send>> {
    if path == "-" {
        return Ok(Box::new(std::io::BufReader::new(std::io::stdin())));
    }
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open event file: {}", path))?;
    Ok(Box::new(std::io::BufReader::new(file)))
}

async fn run_app(
    bridge: Arc<BridgeController>,
    args: &Args,
    mut watcher: Option<ScriptWatcher>,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let replay = match &args.events {
        Some(path) => {
            let reader = open_events(path)?;
            let done = ReplaySource::spawn(reader, bridge.clone() as Arc<dyn DeviceDelegate>)
                .context("Failed to start event replay")?;
            info!("Replaying device events from {}", path);

            // Detached: may still be blocked on stdin when the runtime stops
            let (tx, rx) = tokio::sync::oneshot::channel();
            std::thread::spawn(move || {
                if let Ok(summary) = done.recv() {
                    let _ = tx.send(summary);
                }
            });
            Some(rx)
        }
        None => None,
    };

    let replay_done = async move {
        match replay {
            Some(rx) => rx.await.ok(),
            None => std::future::pending::<Option<ReplaySummary>>().await,
        }
    };

    tokio::pin!(shutdown);
    tokio::pin!(replay_done);

    loop {
        tokio::select! {
            Some(source) = next_script(&mut watcher) => {
                info!("Script file changed, reloading...");
                match bridge.set_source(&source) {
                    Ok(()) => info!("Script reloaded"),
                    Err(e) => warn!("Failed to reload script (keeping old script): {}", e),
                }
            }

            summary = &mut replay_done => {
                if let Some(summary) = summary {
                    info!(
                        "Event replay complete ({} delivered, {} skipped)",
                        summary.delivered, summary.skipped
                    );
                }
                break;
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    if let Some(err) = bridge.last_error() {
        warn!("Last bridge error: {}", err);
    }
    Ok(())
}

async fn next_script(watcher: &mut Option<ScriptWatcher>) -> Option<String> {
    match watcher {
        Some(watcher) => watcher.next_source().await,
        None => std::future::pending().await,
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
}
