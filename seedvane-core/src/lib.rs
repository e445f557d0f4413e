//! Seedvane Core - qBittorrent polling and metric publication
//!
//! This crate provides the building blocks of the exporter: configuration
//! loading, the per-server scrape client, tracker-URL normalization, the
//! owned metric registry and the fan-out polling loop that ties them
//! together.

pub mod config;
pub mod metrics;
pub mod poller;
pub mod qbittorrent;
pub mod tracker;

// Re-export main types for convenient access
pub use config::{AuthMethod, ConfigError, ExporterConfig, ServerProfile};
pub use metrics::TorrentMetrics;
pub use poller::{PollerHandle, spawn_poller};
pub use qbittorrent::{QbitClient, ScrapeError, TorrentRecord, TorrentSource};
pub use tracker::tracker_host;
