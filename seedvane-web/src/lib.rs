//! Seedvane Web - HTTP exposition surface
//!
//! Serves the owned metric registry in the Prometheus text format. The
//! endpoint reads the registry on demand and never reflects upstream
//! scrape failures; an unreachable server just means stale series.

#![warn(missing_docs)]

pub mod server;

// Re-export main types
pub use server::{AppState, router, run_server};
