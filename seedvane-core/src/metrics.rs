//! Owned Prometheus registry for per-torrent gauges.
//!
//! The registry is an explicit instance shared between the poller and the
//! exposition endpoint rather than process-wide globals, so tests get an
//! isolated registry each. Gauge writes are atomic per label tuple; readers
//! observe either the previous or the new value of a series, never a torn
//! one.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::qbittorrent::TorrentRecord;
use crate::tracker::tracker_host;

/// Lifecycle states counted as actively uploading.
const ACTIVE_STATES: [&str; 2] = ["uploading", "stalledUP"];

fn activity_value(state: &str) -> f64 {
    if ACTIVE_STATES.contains(&state) { 1.0 } else { 0.0 }
}

/// Label tuples a server emitted on its previous apply, used for eviction.
#[derive(Default)]
struct EmittedSeries {
    /// (name, tracker, state) tuples of the status family.
    status: HashSet<[String; 3]>,
    /// (name, tracker) tuples of the ratio/uploaded/size families.
    torrent: HashSet<[String; 2]>,
}

/// Gauge families describing the torrent lists of all configured servers.
pub struct TorrentMetrics {
    registry: Registry,
    status: GaugeVec,
    seed_ratio: GaugeVec,
    uploaded: GaugeVec,
    size: GaugeVec,
    evict_stale: bool,
    emitted: Mutex<HashMap<String, EmittedSeries>>,
}

impl TorrentMetrics {
    /// Creates a registry that retains the last value of every series
    /// forever, matching upstream exporter behavior: a torrent that
    /// disappears keeps its final values until process restart.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Creates a registry that additionally removes series for torrents a
    /// server no longer reports. Opt-in cardinality control; staleness
    /// retention stays the default.
    pub fn with_eviction() -> Self {
        Self::build(true)
    }

    fn build(evict_stale: bool) -> Self {
        let registry = Registry::new();

        let status = GaugeVec::new(
            Opts::new(
                "qbittorrent_torrent_status",
                "Current status of torrents (1 for actively uploading, 0 otherwise).",
            ),
            &["host", "name", "tracker", "state"],
        )
        .expect("status gauge opts");

        let seed_ratio = GaugeVec::new(
            Opts::new("qbittorrent_torrent_seed_ratio", "Seed ratio of torrents."),
            &["host", "name", "tracker"],
        )
        .expect("seed ratio gauge opts");

        let uploaded = GaugeVec::new(
            Opts::new(
                "qbittorrent_torrent_uploaded_bytes",
                "Total data uploaded in bytes per torrent.",
            ),
            &["host", "name", "tracker"],
        )
        .expect("uploaded gauge opts");

        let size = GaugeVec::new(
            Opts::new(
                "qbittorrent_torrent_size_bytes",
                "Size of the torrent's data, in bytes.",
            ),
            &["host", "name", "tracker"],
        )
        .expect("size gauge opts");

        for gauge in [&status, &seed_ratio, &uploaded, &size] {
            registry
                .register(Box::new(gauge.clone()))
                .expect("registering gauge in fresh registry");
        }

        Self {
            registry,
            status,
            seed_ratio,
            uploaded,
            size,
            evict_stale,
            emitted: Mutex::new(HashMap::new()),
        }
    }

    /// Applies one server's freshly scraped torrent list.
    ///
    /// Idempotent: applying identical input twice yields identical registry
    /// state. Concurrent applies for different hostnames touch disjoint
    /// label tuples and never corrupt shared state. With eviction enabled,
    /// series the server stopped reporting are removed afterwards.
    pub fn apply(&self, host: &str, records: &[TorrentRecord]) {
        let mut fresh = EmittedSeries::default();

        for record in records {
            let tracker = tracker_host(&record.tracker);

            self.status
                .with_label_values(&[host, &record.name, &tracker, &record.state])
                .set(activity_value(&record.state));
            self.seed_ratio
                .with_label_values(&[host, &record.name, &tracker])
                .set(record.ratio);
            self.uploaded
                .with_label_values(&[host, &record.name, &tracker])
                .set(record.uploaded as f64);
            if let Some(size) = record.size {
                self.size
                    .with_label_values(&[host, &record.name, &tracker])
                    .set(size as f64);
            }

            if self.evict_stale {
                fresh
                    .status
                    .insert([record.name.clone(), tracker.clone(), record.state.clone()]);
                fresh.torrent.insert([record.name.clone(), tracker]);
            }
        }

        if !self.evict_stale {
            return;
        }

        let mut emitted = self.emitted.lock();
        let previous = emitted.insert(host.to_string(), fresh);
        let Some(previous) = previous else { return };
        let current = &emitted[host];
        for [name, tracker, state] in previous.status.difference(&current.status) {
            let _ = self
                .status
                .remove_label_values(&[host, name, tracker, state]);
        }
        for [name, tracker] in previous.torrent.difference(&current.torrent) {
            let _ = self.seed_ratio.remove_label_values(&[host, name, tracker]);
            let _ = self.uploaded.remove_label_values(&[host, name, tracker]);
            let _ = self.size.remove_label_values(&[host, name, tracker]);
        }
    }

    /// Renders all families in the Prometheus text exposition format.
    ///
    /// # Errors
    /// - `prometheus::Error` - Encoding failure (not expected in practice)
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Total number of live series across all families.
    pub fn series_count(&self) -> usize {
        self.registry
            .gather()
            .iter()
            .map(|family| family.get_metric().len())
            .sum()
    }
}

impl Default for TorrentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, state: &str, tracker: &str, ratio: f64, uploaded: i64) -> TorrentRecord {
        TorrentRecord {
            name: name.to_string(),
            state: state.to_string(),
            tracker: tracker.to_string(),
            ratio,
            uploaded,
            size: None,
        }
    }

    fn spec_records() -> Vec<TorrentRecord> {
        vec![
            record(
                "Torrent 1",
                "uploading",
                "https://tracker1.example.com/announce/foobar",
                1.5,
                104_857_600,
            ),
            record(
                "Torrent 2",
                "pausedUP",
                "https://tracker2.example.com/announce/fizzbuzz",
                0.8,
                52_428_800,
            ),
        ]
    }

    #[test]
    fn test_activity_indicator_per_state() {
        assert_eq!(activity_value("uploading"), 1.0);
        assert_eq!(activity_value("stalledUP"), 1.0);
        assert_eq!(activity_value("pausedUP"), 0.0);
        assert_eq!(activity_value("downloading"), 0.0);
        assert_eq!(activity_value(""), 0.0);
    }

    #[test]
    fn test_apply_publishes_expected_series() {
        let metrics = TorrentMetrics::new();
        metrics.apply("host-A", &spec_records());

        // status x2, seed ratio x2, uploaded x2; no sizes reported.
        assert_eq!(metrics.series_count(), 6);

        let status = metrics
            .status
            .with_label_values(&["host-A", "Torrent 1", "tracker1.example.com", "uploading"]);
        assert_eq!(status.get(), 1.0);
        let status = metrics
            .status
            .with_label_values(&["host-A", "Torrent 2", "tracker2.example.com", "pausedUP"]);
        assert_eq!(status.get(), 0.0);

        let ratio = metrics
            .seed_ratio
            .with_label_values(&["host-A", "Torrent 1", "tracker1.example.com"]);
        assert_eq!(ratio.get(), 1.5);
        let ratio = metrics
            .seed_ratio
            .with_label_values(&["host-A", "Torrent 2", "tracker2.example.com"]);
        assert_eq!(ratio.get(), 0.8);

        let uploaded = metrics
            .uploaded
            .with_label_values(&["host-A", "Torrent 1", "tracker1.example.com"]);
        assert_eq!(uploaded.get(), 104_857_600.0);
        let uploaded = metrics
            .uploaded
            .with_label_values(&["host-A", "Torrent 2", "tracker2.example.com"]);
        assert_eq!(uploaded.get(), 52_428_800.0);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let metrics = TorrentMetrics::new();
        metrics.apply("host-A", &spec_records());
        let first = metrics.encode().unwrap();

        metrics.apply("host-A", &spec_records());
        assert_eq!(metrics.encode().unwrap(), first);
        assert_eq!(metrics.series_count(), 6);
    }

    #[test]
    fn test_size_series_only_when_reported() {
        let metrics = TorrentMetrics::new();
        let mut records = spec_records();
        records[0].size = Some(4_294_967_296);
        metrics.apply("host-A", &records);

        assert_eq!(metrics.series_count(), 7);
        let size = metrics
            .size
            .with_label_values(&["host-A", "Torrent 1", "tracker1.example.com"]);
        assert_eq!(size.get(), 4_294_967_296.0);
    }

    #[test]
    fn test_concurrent_servers_produce_union_without_cross_contamination() {
        let metrics = TorrentMetrics::with_eviction();
        let records_a = spec_records();
        let records_b = vec![record(
            "Torrent 3",
            "stalledUP",
            "https://tracker3.example.com/announce",
            2.0,
            1024,
        )];

        std::thread::scope(|scope| {
            scope.spawn(|| metrics.apply("host-A", &records_a));
            scope.spawn(|| metrics.apply("host-B", &records_b));
        });

        assert_eq!(metrics.series_count(), 9);
        let status = metrics
            .status
            .with_label_values(&["host-B", "Torrent 3", "tracker3.example.com", "stalledUP"]);
        assert_eq!(status.get(), 1.0);

        // host-B's list never bleeds into host-A's labels.
        let exported = metrics.encode().unwrap();
        assert!(!exported.contains(r#"host="host-A",name="Torrent 3""#));
    }

    #[test]
    fn test_stale_series_retained_by_default() {
        let metrics = TorrentMetrics::new();
        metrics.apply("host-A", &spec_records());
        metrics.apply("host-A", &spec_records()[..1]);

        // Torrent 2 disappeared upstream but keeps its last values.
        assert_eq!(metrics.series_count(), 6);
        let ratio = metrics
            .seed_ratio
            .with_label_values(&["host-A", "Torrent 2", "tracker2.example.com"]);
        assert_eq!(ratio.get(), 0.8);
    }

    #[test]
    fn test_eviction_removes_series_no_longer_reported() {
        let metrics = TorrentMetrics::with_eviction();
        metrics.apply("host-A", &spec_records());
        assert_eq!(metrics.series_count(), 6);

        metrics.apply("host-A", &spec_records()[..1]);
        assert_eq!(metrics.series_count(), 3);
        assert!(!metrics.encode().unwrap().contains("Torrent 2"));
    }

    #[test]
    fn test_eviction_drops_old_state_series_on_transition() {
        let metrics = TorrentMetrics::with_eviction();
        let tracker = "https://tracker1.example.com/announce";
        metrics.apply("host-A", &[record("Torrent 1", "uploading", tracker, 1.0, 10)]);
        metrics.apply("host-A", &[record("Torrent 1", "pausedUP", tracker, 1.0, 10)]);

        let exported = metrics.encode().unwrap();
        assert!(exported.contains(r#"state="pausedUP""#));
        assert!(!exported.contains(r#"state="uploading""#));
        assert_eq!(metrics.series_count(), 3);
    }

    #[test]
    fn test_eviction_scoped_to_one_server() {
        let metrics = TorrentMetrics::with_eviction();
        metrics.apply("host-A", &spec_records());
        metrics.apply("host-B", &spec_records());
        assert_eq!(metrics.series_count(), 12);

        // host-A shrinking must not touch host-B's series.
        metrics.apply("host-A", &[]);
        assert_eq!(metrics.series_count(), 6);
        assert!(metrics.encode().unwrap().contains(r#"host="host-B""#));
    }

    #[test]
    fn test_encode_emits_text_exposition_format() {
        let metrics = TorrentMetrics::new();
        metrics.apply("host-A", &spec_records());
        let exported = metrics.encode().unwrap();

        assert!(exported.contains("# TYPE qbittorrent_torrent_status gauge"));
        assert!(exported.contains(
            r#"qbittorrent_torrent_status{host="host-A",name="Torrent 1",state="uploading",tracker="tracker1.example.com"} 1"#
        ));
        assert!(exported.contains("qbittorrent_torrent_uploaded_bytes"));
    }
}
