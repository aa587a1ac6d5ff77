//! Mirra session host entry point.
//!
//! ```text
//! mirra-host                         Run in console mode (simulated platform)
//! mirra-host --config <path>         Load a custom config TOML
//! mirra-host --gen-config            Write default config to stdout
//! mirra-host --mode PeerWireless     Change the connection mode preference
//! mirra-host --run-for-secs 10       Stop the session after 10 seconds
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mirra_core::platform::sim::SimPlatform;
use mirra_core::{ConnectionMode, Supervisor};
use mirra_host::config::{HostConfig, PreferenceStore};
use mirra_host::service::SessionHost;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "mirra-host", about = "Mirra screen-mirroring session host")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "mirra-host.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Connection mode preference (saved to the config file).
    #[arg(long)]
    mode: Option<ConnectionMode>,

    /// Low-latency preference (saved to the config file).
    #[arg(long)]
    low_latency: Option<bool>,

    /// Hardware encoding preference (saved to the config file).
    #[arg(long)]
    hardware_encoding: Option<bool>,

    /// Start without the simulated external display attached.
    #[arg(long)]
    no_external_display: bool,

    /// Shut down after this many seconds.
    #[arg(long)]
    run_for_secs: Option<u64>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&HostConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config.
    let store = Arc::new(PreferenceStore::open(&cli.config));
    let config = store.snapshot();

    // Init tracing.
    init_tracing(&config)?;

    info!("mirra-host v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = store.update(|prefs| {
        if let Some(mode) = cli.mode {
            prefs.connection_mode = mode;
        }
        if let Some(low_latency) = cli.low_latency {
            prefs.low_latency = low_latency;
        }
        if let Some(hardware_encoding) = cli.hardware_encoding {
            prefs.hardware_encoding = hardware_encoding;
        }
    }) {
        warn!("could not save preferences to {}: {e}", store.path().display());
    }

    let prefs = store.snapshot().mirroring;
    info!("connection mode: {}", prefs.connection_mode);
    info!("low latency: {}", prefs.low_latency);
    info!("hardware encoding: {}", prefs.hardware_encoding);

    // Simulated platform.
    let sim = SimPlatform::new();
    let sim_cfg = &config.simulation;
    if sim_cfg.external_display && !cli.no_external_display {
        let id = sim
            .displays
            .connect_external(sim_cfg.width, sim_cfg.height, sim_cfg.refresh_rate);
        info!(
            "simulated external display #{id}: {}x{} @ {}Hz",
            sim_cfg.width, sim_cfg.height, sim_cfg.refresh_rate
        );
    }

    let (host, handle) = SessionHost::new(sim.platform(), store.clone());
    let host = host.with_telemetry_json(config.logging.telemetry_json);
    let stop = host.stop_handle();

    // Ctrl-C handler.
    let stop_clone = stop.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop_clone.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    // Frame source: pump into whatever surface is bound.
    let mut background = Supervisor::new(CancellationToken::new());
    let frame_rate = sim_cfg.frame_rate.max(1);
    let pump = sim.clone();
    background.spawn("frame-pump", move |token| async move {
        let mut tick = tokio::time::interval(Duration::from_secs(1) / frame_rate);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {
                    pump.pump_frames(1);
                }
            }
        }
        Ok(())
    });

    if let Some(secs) = cli.run_for_secs {
        let timer = handle.clone();
        background.spawn("run-timer", move |token| async move {
            tokio::select! {
                _ = token.cancelled() => Ok(()),
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    info!("run time of {secs}s elapsed");
                    timer.shutdown().await
                }
            }
        });
    }

    handle.start(SimPlatform::grant()).await?;
    host.run().await?;
    background.shutdown().await;

    Ok(())
}

/// Install the tracing subscriber. `RUST_LOG` overrides the configured
/// level; a configured file replaces stderr.
fn init_tracing(config: &HostConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.logging.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    }
    Ok(())
}
