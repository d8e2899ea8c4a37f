mod textfile;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reconcile_core::{
    load_config, validate_config, CancelFlag, QBittorrentClient, Reconciler, TorrentClient,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("RECONCILE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("qbit-reconcile {} loading configuration from {:?}", VERSION, config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        config_hash = &config_hash[..16],
        dry_run = config.dry_run,
        url = %config.client.url,
        "Configuration loaded"
    );

    let textfile_path = config.metrics.textfile_path.clone();
    let registry = textfile::registry()?;

    let client: Arc<dyn TorrentClient> = Arc::new(
        QBittorrentClient::new(config.client.clone())
            .context("Failed to create qBittorrent client")?,
    );

    let cancel = CancelFlag::new();
    let reconciler = Reconciler::new(config, client)
        .context("Failed to prepare reconciliation")?
        .with_cancel_flag(cancel.clone());

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current item");
            cancel.cancel();
        }
    });

    let summary = reconciler.run().await;
    for line in summary.format_summary().lines() {
        info!("{}", line);
    }

    if let Some(path) = textfile_path {
        if let Err(e) = textfile::write(&registry, &path).await {
            warn!("Failed to write metrics: {:#}", e);
        } else {
            info!("Metrics written to {:?}", path);
        }
    }

    Ok(summary.outcome.exit_code())
}
