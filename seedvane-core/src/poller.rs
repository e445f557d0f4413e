//! Fan-out polling loop driving all configured servers on a fixed cadence.
//!
//! One background task owns the schedule. Each tick fans out one scrape per
//! server concurrently and waits for every one to finish before the cycle
//! ends; a failing or slow server only costs that server's contribution,
//! never another's. The loop runs until its handle signals shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::metrics::TorrentMetrics;
use crate::qbittorrent::TorrentSource;

/// Handle for the spawned polling task.
///
/// Dropping the handle leaves the poller running for the process lifetime;
/// calling [`PollerHandle::shutdown`] stops it cleanly, which keeps the loop
/// embeddable in tests instead of leaking a forever-task.
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl PollerHandle {
    /// Signals the poll loop to stop and waits for it to finish. A cycle in
    /// flight completes first; scrapes are bounded by their own timeouts.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Spawns the polling task and returns its handle.
///
/// The first cycle starts immediately; subsequent cycles start a fixed
/// interval after the previous cycle's start. When a cycle overruns the
/// interval the next one starts right after it completes, never overlapping.
pub fn spawn_poller(
    sources: Vec<Arc<dyn TorrentSource>>,
    interval: Duration,
    metrics: Arc<TorrentMetrics>,
) -> PollerHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run_poll_loop(sources, interval, metrics, shutdown_rx));
    PollerHandle {
        shutdown: shutdown_tx,
        task,
    }
}

async fn run_poll_loop(
    sources: Vec<Arc<dyn TorrentSource>>,
    interval: Duration,
    metrics: Arc<TorrentMetrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(
        "poller started: {} servers, interval {:?}",
        sources.len(),
        interval
    );

    let mut ticker = tokio::time::interval(interval);
    // Delay instead of bursting catch-up ticks after an overrun cycle.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => run_cycle(&sources, &metrics).await,
            _ = shutdown.changed() => {
                tracing::debug!("poller shutting down");
                break;
            }
        }
    }
}

/// Runs one scrape cycle: concurrent fan-out, then apply per server.
///
/// A server's records are applied only after its fetch fully succeeds, so
/// the registry never shows a mixture of old and new lists for one server.
/// Failures are logged with the offending hostname and skipped.
pub async fn run_cycle(sources: &[Arc<dyn TorrentSource>], metrics: &TorrentMetrics) {
    let scrapes = sources.iter().map(|source| {
        let source = Arc::clone(source);
        async move {
            let hostname = source.hostname().to_string();
            let result = source.fetch_torrents().await;
            (hostname, result)
        }
    });

    for (hostname, result) in futures::future::join_all(scrapes).await {
        match result {
            Ok(records) => {
                tracing::debug!("scraped {}: {} torrents", hostname, records.len());
                metrics.apply(&hostname, &records);
            }
            Err(e) => {
                tracing::warn!("scrape failed: {e}");
            }
        }
    }
}
