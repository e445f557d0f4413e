//! Tracker announce-URL normalization for metric labels.

use url::Url;

/// Extracts the host component of an announce URL for use as a label value.
///
/// Keeps label cardinality stable across announce paths and passkeys by
/// reducing `https://tracker1.example.com/announce/foobar` to
/// `tracker1.example.com`. Malformed input is returned unchanged rather than
/// dropping the torrent; worst case the label is less clean.
pub fn tracker_host(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => host.to_string(),
            None => raw.to_string(),
        },
        Err(_) => raw.to_string(),
    }
}
