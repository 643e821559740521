//! AI game master daemon.
//!
//! Connects to the emulator's telemetry socket, scores events, and hands the
//! significant ones to the configured agent backend.
//!
//! ```bash
//! cargo run -p emerald -- --config emerald.toml --dry-run
//! ```

use anyhow::Context;
use clap::Parser;
use emerald_core::{Daemon, GmConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "emerald=info,emerald_core=info";

#[derive(Debug, Parser)]
#[command(name = "emerald-gm", version, about = "AI game master for Pokemon Emerald")]
struct Args {
    /// Configuration file. Defaults are used when it does not exist.
    #[arg(short, long, default_value = "emerald.toml")]
    config: PathBuf,

    /// Log filter, e.g. `debug` or `emerald_core=trace`. Overrides RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,

    /// Log commands instead of sending them to the emulator.
    #[arg(long)]
    dry_run: bool,

    /// Significance threshold in [0, 1].
    #[arg(long)]
    threshold: Option<f64>,

    /// Emulator host.
    #[arg(long)]
    host: Option<String>,

    /// Emulator telemetry port.
    #[arg(long)]
    port: Option<u16>,
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    let mut config = GmConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.apply_env();
    if let Some(threshold) = args.threshold {
        config.gate.threshold = threshold;
    }
    if let Some(host) = args.host {
        config.emulator.host = host;
    }
    if let Some(port) = args.port {
        config.emulator.port = port;
    }
    config.relay.dry_run |= args.dry_run;
    config.validate().context("invalid configuration")?;

    let daemon = Daemon::from_config(config)
        .await
        .context("starting game master")?;

    daemon
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown requested");
        })
        .await;

    Ok(())
}
