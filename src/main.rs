//! anchor-relay - asynchronous content anchoring dispatcher

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use anchor_relay::anchor_log::KvAnchorLog;
use anchor_relay::config::Config;
use anchor_relay::dispatcher::Dispatcher;
use anchor_relay::providers::active_providers;
use anchor_relay::queue::{AnchorQueue, FileStore, KvStore};

#[derive(Parser, Debug)]
#[command(name = "anchor-relay")]
#[command(about = "Delivers content anchors to external trust services")]
struct Args {
    /// Directory for the queue, lock and log state
    #[arg(long, env = "RELAY_DATA_DIR", default_value = "./anchor-relay-data")]
    data_dir: String,

    /// Log level
    #[arg(long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Validate provider settings and reachability, then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting anchor-relay v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();
    let providers = active_providers(&config)?;
    if providers.is_empty() {
        tracing::warn!("no providers are configured; queued records will be dropped on dispatch");
    } else {
        let names: Vec<&str> = providers.iter().map(|p| p.key().as_str()).collect();
        tracing::info!(providers = names.join(","), "active providers");
    }

    if args.check {
        let mut all_ok = true;
        for provider in &providers {
            let status = provider.test_connection().await?;
            all_ok &= status.success;
            if status.success {
                tracing::info!(provider = %provider.key(), message = %status.message, "connection ok");
            } else {
                tracing::error!(provider = %provider.key(), message = %status.message, "connection failed");
            }
        }
        if !all_ok {
            anyhow::bail!("one or more provider connection checks failed");
        }
        return Ok(());
    }

    let store: Arc<dyn KvStore> = Arc::new(FileStore::new(&args.data_dir)?);
    let queue = Arc::new(AnchorQueue::new(store.clone(), &config.queue));
    let log = Arc::new(KvAnchorLog::new(store));
    let dispatcher = Dispatcher::new(queue, providers, log);

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(());
        }
    });

    dispatcher.run(&config.dispatch, shutdown_rx).await;
    tracing::info!("anchor-relay stopped");
    Ok(())
}
