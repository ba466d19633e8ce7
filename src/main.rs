//! CLI entry point for satoshis-grid
//!
//! Runs a headless session: the feed, pipeline and lifecycle coordinator run as usual and
//! every collaborator call is logged.
//!
//! # Usage
//!
//! Live feed (falls back to demo after repeated connection failures):
//! ```bash
//! satoshis-grid run --config config/grid.toml
//! ```
//!
//! Synthetic feed only:
//! ```bash
//! satoshis-grid demo
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use satoshis_grid::config::DEFAULT_CONFIG_PATH;
use satoshis_grid::feed::api::{HttpMarketApi, MarketDataApi};
use satoshis_grid::feed::transport::{PushTransport, WsTransport};
use satoshis_grid::{
    logging, CollaboratorSet, FeedConnector, FeedSettings, GridConfig, LifecycleCoordinator,
    TracingCollaborator,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "satoshis-grid")]
#[command(about = "Live blockchain feed visualizer core (headless)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the live feed
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Run the synthetic feed only
    Demo {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run_session(config, true).await,
        Commands::Demo { config } => run_session(config, false).await,
    }
}

async fn run_session(config_path: PathBuf, live: bool) -> Result<()> {
    let config = GridConfig::load_from(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    config.validate().context("Invalid configuration")?;
    logging::init_from_config(&config).context("Failed to initialise logging")?;

    let session = config.session();
    let (transport, api): (Option<Arc<dyn PushTransport>>, Option<Arc<dyn MarketDataApi>>) =
        if live {
            let api = HttpMarketApi::new(&session.feed).context("Failed to build HTTP client")?;
            (Some(Arc::new(WsTransport)), Some(Arc::new(api)))
        } else {
            (None, None)
        };

    info!(
        name = %config.application.name,
        live,
        "Starting session"
    );
    let connector = FeedConnector::new(FeedSettings::from_session(&session), transport, api);
    let collaborators = CollaboratorSet::new().with(Box::new(TracingCollaborator));
    let mut coordinator = LifecycleCoordinator::new(&session, connector, collaborators);

    let lifecycle = coordinator.lifecycle_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received");
                lifecycle.unload();
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    coordinator.run().await;
    let stats = coordinator.pipeline().stats();
    info!(
        evicted = stats.evicted,
        exited = stats.exited,
        "Session ended"
    );
    Ok(())
}
