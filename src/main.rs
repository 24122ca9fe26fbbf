//! tabgate daemon
//!
//! Serves the firewall, moderation and ledger API over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! tabgate
//!
//! # Start with custom config
//! tabgate --config /path/to/config.toml
//!
//! # Custom port and storage directory, JSON logs
//! tabgate --http-port 9000 --storage-dir /data/tabgate --log-json
//! ```

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tabgate::services::events::spawn_logging_listener;
use tabgate::{Config, EngineDb, HttpServer, Services};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tabgate")]
#[command(about = "Abuse firewall and TabCoins ledger for content publishing")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "TABGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "TABGATE_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "TABGATE_HTTP_PORT")]
    http_port: Option<u16>,

    /// Emit logs as JSON lines
    #[arg(long, env = "TABGATE_LOG_JSON")]
    log_json: bool,
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("tabgate=info".parse()?);
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json)?;

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)
            .with_context(|| format!("failed to load config {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid config: {}", e))?;

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        "Starting tabgate"
    );

    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = Arc::new(EngineDb::open(&config.storage_dir)?);
    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let services = Arc::new(Services::new(db.clone(), config));
    let listener = spawn_logging_listener(services.events.clone());

    let http_server = Arc::new(HttpServer::new(services, http_addr));
    info!("HTTP API available at http://{}", http_addr);
    info!("Press Ctrl+C to stop.");

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    listener.abort();

    if let Ok(stats) = db.stats() {
        info!(
            events = stats.event_count,
            ledger_entries = stats.balance_operation_count,
            "Final storage stats"
        );
    }

    Ok(())
}
