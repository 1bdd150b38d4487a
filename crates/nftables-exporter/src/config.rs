//! Command-line and environment configuration.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::collector::CollectorConfig;
use crate::geoip::{GeoIpConfig, DEFAULT_CACHE_DIR, DEFAULT_EDITION};
use crate::metrics::DEFAULT_NAMESPACE;
use crate::metrics_server::MetricsServerConfig;
use crate::shell::NFT_CMD;

/// Prometheus exporter for nftables state.
#[derive(Parser, Clone, PartialEq, Eq)]
#[command(name = "nftables-exporter")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to listen on
    #[arg(short = 'a', long, env = "NFTABLES_EXPORTER_ADDRESS", default_value = "0.0.0.0")]
    pub address: IpAddr,

    /// Port to listen on
    #[arg(short = 'p', long, env = "NFTABLES_EXPORTER_PORT", default_value = "9630")]
    pub port: u16,

    /// Seconds between two collection cycles
    #[arg(
        short = 'u',
        long,
        env = "NFTABLES_EXPORTER_UPDATE_PERIOD",
        default_value = "60",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub update: u64,

    /// Metric namespace
    #[arg(short = 'n', long, env = "NFTABLES_EXPORTER_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Log level (trace, debug, info, warn, error; Python names such as WARNING accepted)
    #[arg(short = 'l', long, env = "NFTABLES_EXPORTER_LOG_LEVEL", default_value = "info")]
    pub loglevel: String,

    /// Path to the nft binary
    #[arg(long, env = "NFTABLES_EXPORTER_NFT_PATH", default_value = NFT_CMD)]
    pub nft: String,

    /// MaxMind license key; enables country enrichment
    #[arg(long, env = "MAXMIND_LICENSE_KEY", hide_env_values = true)]
    pub mmlicense: Option<String>,

    /// MaxMind database edition
    #[arg(long, env = "MAXMIND_DATABASE_EDITION", default_value = DEFAULT_EDITION)]
    pub mmedition: String,

    /// Directory for the downloaded MaxMind database
    #[arg(long, env = "MAXMIND_CACHE_DIRECTORY", default_value = DEFAULT_CACHE_DIR)]
    pub mmcachedir: PathBuf,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("update", &self.update)
            .field("namespace", &self.namespace)
            .field("loglevel", &self.loglevel)
            .field("nft", &self.nft)
            .field("mmlicense", &self.mmlicense.as_ref().map(|_| "<redacted>"))
            .field("mmedition", &self.mmedition)
            .field("mmcachedir", &self.mmcachedir)
            .finish()
    }
}

impl Args {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            update_interval: Duration::from_secs(self.update),
        }
    }

    pub fn metrics_server_config(&self) -> MetricsServerConfig {
        MetricsServerConfig {
            listen_addr: self.listen_addr(),
        }
    }

    /// Geo enrichment settings, `None` unless both license and edition are set.
    pub fn geoip_config(&self) -> Option<GeoIpConfig> {
        let license_key = self.mmlicense.as_deref().unwrap_or_default();
        if license_key.is_empty() || self.mmedition.is_empty() {
            return None;
        }
        Some(GeoIpConfig {
            license_key: license_key.to_string(),
            edition: self.mmedition.clone(),
            cache_dir: self.mmcachedir.clone(),
        })
    }
}
