//! Accountability Hub maintenance daemon
//!
//! ## Usage
//!
//! ```bash
//! # Create the database and schema
//! accountability-hub init
//!
//! # Expire overdue proofs once
//! accountability-hub sweep
//!
//! # Keep sweeping every `sweep_interval_secs` until Ctrl-C
//! accountability-hub watch --interval 60
//!
//! # Row counts as JSON
//! accountability-hub --data-dir /var/lib/hub stats
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use accountability_hub::services::spawn_logging_listener;
use accountability_hub::{Config, HubDb, Services};

#[derive(Parser, Debug)]
#[command(name = "accountability-hub")]
#[command(about = "Proof verification engine for peer accountability goals")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "HUB_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory holding the database
    #[arg(long, env = "HUB_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Hours a proof stays open for verification
    #[arg(long, env = "HUB_VERIFICATION_WINDOW_HOURS")]
    verification_window_hours: Option<i64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and schema
    Init,
    /// Expire overdue proofs once
    Sweep,
    /// Run the expiry sweep periodically until interrupted
    Watch {
        /// Seconds between sweeps (overrides config)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Print database statistics as JSON
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("accountability_hub=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    // CLI overrides
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(hours) = args.verification_window_hours {
        config.verification_window_hours = hours;
    }
    config.validate()?;

    let db = Arc::new(HubDb::open(&config).context("opening database")?);

    match args.command {
        Command::Init => {
            if !config.config_path().exists() {
                config.save(config.config_path())?;
            }
            info!(path = %config.database_path().display(), "Database ready");
        }
        Command::Sweep => {
            let services = Services::from_config(db, &config);
            let expired = services.proofs.expire_overdue()?;
            println!("{}", expired.len());
        }
        Command::Watch { interval } => {
            let secs = interval.unwrap_or(config.sweep_interval_secs).max(1);
            let services = Arc::new(Services::from_config(db, &config));
            run_watch(services, Duration::from_secs(secs)).await;
        }
        Command::Stats => {
            let stats = db.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

async fn run_watch(services: Arc<Services>, every: Duration) {
    let listener = spawn_logging_listener(services.events.clone());
    let mut ticker = tokio::time::interval(every);

    info!(interval_secs = every.as_secs(), "Watching for overdue proofs");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let proofs = services.proofs.clone();
                match tokio::task::spawn_blocking(move || proofs.expire_overdue()).await {
                    Ok(Ok(expired)) if !expired.is_empty() => {
                        info!(count = expired.len(), "Sweep expired proofs");
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!(error = %e, "Sweep failed"),
                    Err(e) => error!(error = %e, "Sweep task panicked"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    listener.abort();
}
