use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use cidgate::config::{self, GatewayConfig};
use cidgate::error::Result;
use cidgate::orchestrator::TransferOrchestrator;
use cidgate::prober::StatusProber;
use cidgate::registry::BackendRegistry;
use cidgate::server::{self, AppState};
use cidgate::state::Database;
use cidgate::store::FsStore;
use cidgate::{backend, logging};

#[derive(Parser)]
#[command(name = "cidgate")]
#[command(about = "Multi-backend content gateway for a content-addressed store")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway API server
    Serve {
        /// Override the configured listen address
        #[arg(long)]
        listen: Option<String>,
    },
    /// Load and print the effective configuration, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("cidgate: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::CheckConfig => {
            let rendered = serde_json::to_string_pretty(&cfg)
                .map_err(|e| cidgate::error::GatewayError::Serialization(e.to_string()))?;
            println!("{rendered}");
            Ok(())
        }
        Commands::Serve { listen } => {
            if let Some(listen) = listen {
                cfg.listen_addr = listen;
            }
            logging::init(&cfg.log);
            serve(cfg).await
        }
    }
}

async fn serve(cfg: GatewayConfig) -> Result<()> {
    let db = Database::connect(&cfg.database_path).await?;
    db.migrate().await?;

    let store = Arc::new(FsStore::open(&cfg.store_path)?);
    let registry = Arc::new(BackendRegistry::new(db.clone()));
    let adapters = backend::default_factory();

    let prober = Arc::new(StatusProber::new(
        registry.clone(),
        adapters.clone(),
        Duration::from_secs(cfg.probe.ttl_secs),
        Duration::from_secs(cfg.probe.timeout_secs),
    ));
    prober
        .clone()
        .run(Duration::from_secs(cfg.probe.interval_secs));

    let orchestrator = Arc::new(TransferOrchestrator::new(
        registry.clone(),
        prober.clone(),
        store,
        db,
        adapters,
        cfg.transfer.clone(),
    ));

    let state = AppState {
        registry,
        orchestrator,
        prober,
        config: cfg.clone(),
    };

    server::serve(state, &cfg.listen_addr).await
}
