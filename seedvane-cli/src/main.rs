//! Seedvane - multi-server qBittorrent Prometheus exporter
//!
//! Loads server profiles from the environment, polls every instance on a
//! fixed interval and serves the resulting gauges on `/metrics` until
//! interrupted. Fatal configuration errors exit non-zero before anything
//! starts; per-server scrape failures never do.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use seedvane_core::{ExporterConfig, QbitClient, TorrentMetrics, TorrentSource, spawn_poller};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "seedvane")]
#[command(about = "A qBittorrent Prometheus exporter")]
struct Cli {
    /// Listen address for the metrics endpoint, overriding SEEDVANE_LISTEN.
    #[arg(long)]
    listen: Option<std::net::SocketAddr>,

    /// Remove series for torrents a server stops reporting instead of
    /// retaining their last values.
    #[arg(long)]
    evict_stale: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ExporterConfig::from_env().context("loading configuration")?;
    let listen_addr = cli.listen.unwrap_or(config.listen_addr);

    let metrics = Arc::new(if cli.evict_stale {
        TorrentMetrics::with_eviction()
    } else {
        TorrentMetrics::new()
    });

    let sources: Vec<Arc<dyn TorrentSource>> = config
        .servers
        .iter()
        .cloned()
        .map(|profile| Arc::new(QbitClient::new(profile)) as Arc<dyn TorrentSource>)
        .collect();

    tracing::info!(
        "polling {} server(s) every {:?}",
        sources.len(),
        config.recheck_interval
    );
    let poller = spawn_poller(sources, config.recheck_interval, metrics.clone());

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("binding {listen_addr}"))?;

    tokio::select! {
        result = seedvane_web::run_server(listener, metrics) => {
            result.context("metrics server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    poller.shutdown().await;
    Ok(())
}
