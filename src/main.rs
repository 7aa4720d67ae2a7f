//! # Blastline — Broadcast Campaign Engine
//!
//! Bulk messaging across WhatsApp, Instagram, Facebook, and Telegram with
//! per-recipient delivery tracking.
//!
//! Usage:
//!   blastline serve                  # Start gateway + background sweep
//!   blastline serve --port 8080      # Custom gateway port
//!   blastline sweep                  # Run one sweep pass and exit

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use blastline_channels::{ChannelAdapter, build_adapter};
use blastline_core::config::BlastlineConfig;
use blastline_core::types::Platform;
use blastline_engine::{DeliveryTracker, Dispatcher, SchedulerSweep, receipt_inbox, spawn_sweep};
use blastline_gateway::AppState;
use blastline_store::CampaignDb;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "blastline",
    version,
    about = "📣 Blastline — Broadcast Campaign Engine"
)]
struct Cli {
    /// Path to config file (default: ~/.blastline/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the gateway server and background scheduler sweep
    Serve {
        /// Override the gateway port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run a single sweep pass (promote due campaigns) and exit
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "blastline=debug,tower_http=debug"
    } else {
        "blastline=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => BlastlineConfig::load_from(std::path::Path::new(path))?,
        None => BlastlineConfig::load()?,
    };

    let db_path = config.database_path();
    let db = Arc::new(CampaignDb::open(&db_path)?);
    tracing::info!("💾 Campaign store: {}", db_path.display());

    // One adapter per configured platform; unconfigured platforms simply
    // cannot dispatch and their campaigns fail with a clear reason.
    let mut adapters: HashMap<Platform, Arc<dyn ChannelAdapter>> = HashMap::new();
    for &platform in Platform::ALL {
        match build_adapter(platform, &config.channel) {
            Ok(adapter) => {
                tracing::info!("✅ Channel ready: {}", platform);
                adapters.insert(platform, adapter);
            }
            Err(e) => tracing::debug!("Channel {} unavailable: {e}", platform),
        }
    }

    let dispatcher = Arc::new(Dispatcher::new(
        db.clone(),
        adapters,
        config.dispatcher.clone(),
    ));
    let sweep = Arc::new(SchedulerSweep::new(db.clone(), dispatcher));

    match cli.command {
        Command::Sweep => {
            let promoted = sweep.run_once(chrono::Utc::now()).await?;
            println!("Promoted {promoted} campaign(s)");
            Ok(())
        }
        Command::Serve { port } => {
            let tracker = Arc::new(DeliveryTracker::new(db.clone()));
            let receipts = receipt_inbox(tracker);

            spawn_sweep(sweep.clone(), config.sweep_interval_secs);

            let mut gateway_config = config.gateway.clone();
            if let Some(port) = port {
                gateway_config.port = port;
            }
            println!("📣 Blastline v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "   Gateway:  http://{}:{}",
                gateway_config.host, gateway_config.port
            );
            println!("   Sweep:    every {}s", config.sweep_interval_secs);

            blastline_gateway::start(AppState {
                gateway_config,
                db,
                sweep,
                receipts,
            })
            .await
        }
    }
}
