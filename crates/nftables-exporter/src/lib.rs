//! Prometheus exporter for nftables state.
//!
//! # Architecture
//!
//! ```text
//!   nft --json list ...        (shell, NftRunner)
//!          |
//!          v
//!   Fetcher ── parse_objects ──> Rule / Chain / CounterObject / Collection
//!          |
//!          v
//!   Collector ── correlate (rule comments -> counters)
//!             ── annotate_with_country (GeoIpDatabase, optional)
//!          |
//!          v
//!   ExporterMetrics (prometheus Registry) <── GET /metrics (axum)
//! ```
//!
//! The collector is the only writer of the registry. It polls on a fixed
//! interval; scrapes read whatever the last completed cycle left behind.

pub mod collector;
pub mod config;
pub mod correlator;
pub mod enrich;
pub mod error;
pub mod fetcher;
pub mod geoip;
pub mod logging;
pub mod metrics;
pub mod metrics_server;
pub mod retry;
pub mod shell;
pub mod types;

pub use collector::{Collector, CollectorConfig};
pub use config::Args;
pub use enrich::CountryLookup;
pub use error::{ExporterError, Result};
pub use fetcher::Fetcher;
pub use geoip::{GeoIpConfig, GeoIpDatabase};
pub use metrics::{ExporterMetrics, ObjectLabels};
pub use metrics_server::MetricsServerConfig;
pub use retry::RetryPolicy;
pub use shell::{NftCommand, NftRunner};
