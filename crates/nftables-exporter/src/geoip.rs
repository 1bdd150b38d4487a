//! MaxMind geo database provisioning and country lookup.
//!
//! The database is downloaded once at startup and cached:
//!
//! 1. fetch the published SHA-256 of the archive
//! 2. reuse `<cache_dir>/<edition>.tar.gz` if it matches, download otherwise
//! 3. unpack the archive and pick the newest `<edition>_*/<edition>.mmdb`
//!
//! Both downloads are retried by a [`RetryPolicy`].

use maxminddb::{geoip2, Reader};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::enrich::CountryLookup;
use crate::error::{ExporterError, Result};
use crate::retry::RetryPolicy;

/// MaxMind download endpoint.
pub const MAXMIND_DOWNLOAD_URL: &str = "https://download.maxmind.com/app/geoip_download";

/// Default database edition.
pub const DEFAULT_EDITION: &str = "GeoLite2-Country";

/// Default cache directory.
pub const DEFAULT_CACHE_DIR: &str = "./data";

/// Where to get the database from and where to keep it.
#[derive(Clone, PartialEq, Eq)]
pub struct GeoIpConfig {
    pub license_key: String,
    pub edition: String,
    pub cache_dir: PathBuf,
}

impl fmt::Debug for GeoIpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeoIpConfig")
            .field("license_key", &"<redacted>")
            .field("edition", &self.edition)
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}

impl GeoIpConfig {
    /// Path of the cached archive.
    pub fn archive_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{}.tar.gz", self.edition))
    }
}

/// Downloads (if needed), verifies and unpacks the database.
///
/// # Returns
///
/// The path of the extracted `.mmdb` file.
pub async fn prepare_database(config: &GeoIpConfig, policy: RetryPolicy) -> Result<PathBuf> {
    let client = reqwest::Client::new();

    let checksum = policy
        .run(
            "download maxmind database checksum",
            |e| matches!(e, ExporterError::Http(_)),
            || download_checksum(&client, config),
        )
        .await?;
    debug!(checksum = %checksum, "Database checksum");

    let archive = policy
        .run(
            "download maxmind database archive",
            ExporterError::is_retryable,
            || download_archive(&client, config, &checksum),
        )
        .await?;

    let cache_dir = config.cache_dir.clone();
    let edition = config.edition.clone();
    tokio::task::spawn_blocking(move || extract_archive(&archive, &cache_dir, &edition))
        .await
        .map_err(|e| ExporterError::GeoIp(format!("extraction task failed: {e}")))?
}

fn download_request(
    client: &reqwest::Client,
    config: &GeoIpConfig,
    suffix: &str,
) -> reqwest::RequestBuilder {
    client.get(MAXMIND_DOWNLOAD_URL).query(&[
        ("edition_id", config.edition.as_str()),
        ("license_key", config.license_key.as_str()),
        ("suffix", suffix),
    ])
}

/// Fetches the published SHA-256 of the database archive.
pub async fn download_checksum(client: &reqwest::Client, config: &GeoIpConfig) -> Result<String> {
    let body = download_request(client, config, "tar.gz.sha256")
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    parse_checksum(&body)
}

/// Extracts the checksum from a `sha256sum`-style line.
pub fn parse_checksum(body: &str) -> Result<String> {
    body.split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or_else(|| ExporterError::GeoIp("empty checksum response".to_string()))
}

/// Returns the cached archive, downloading it when missing or stale.
pub async fn download_archive(
    client: &reqwest::Client,
    config: &GeoIpConfig,
    checksum: &str,
) -> Result<PathBuf> {
    let archive = config.archive_path();
    if !archive.exists() || verify_file_checksum(&archive, checksum).await.is_err() {
        info!(edition = %config.edition, "Downloading maxmind geoip database");
        tokio::fs::create_dir_all(&config.cache_dir).await?;
        let bytes = download_request(client, config, "tar.gz")
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        tokio::fs::write(&archive, &bytes).await?;
    }
    verify_file_checksum(&archive, checksum).await?;
    Ok(archive)
}

/// Computes the hex SHA-256 of a file.
pub fn file_checksum(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Fails with [`ExporterError::ChecksumMismatch`] unless the file hashes to
/// `expected`.
pub async fn verify_file_checksum(path: &Path, expected: &str) -> Result<()> {
    let owned = path.to_path_buf();
    let actual = tokio::task::spawn_blocking(move || file_checksum(&owned))
        .await
        .map_err(|e| ExporterError::GeoIp(format!("checksum task failed: {e}")))??;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(ExporterError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Unpacks a `.tar.gz` database archive into `cache_dir`.
///
/// MaxMind archives contain a dated directory (`<edition>_YYYYMMDD`); when
/// several are present the lexicographically last one wins.
pub fn extract_archive(archive: &Path, cache_dir: &Path, edition: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(cache_dir)?;
    let decoder = flate2::read::GzDecoder::new(File::open(archive)?);
    tar::Archive::new(decoder).unpack(cache_dir)?;

    let prefix = format!("{edition}_");
    let database_file = format!("{edition}.mmdb");
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(cache_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .map(|entry| entry.path().join(&database_file))
        .filter(|path| path.is_file())
        .collect();
    candidates.sort();

    let database = candidates.pop().ok_or_else(|| {
        ExporterError::GeoIp(format!(
            "no {database_file} found in {}",
            cache_dir.display()
        ))
    })?;
    info!(path = %database.display(), "Maxmind database stored");
    Ok(database)
}

/// Country lookups against an opened MaxMind database.
pub struct GeoIpDatabase {
    reader: Reader<Vec<u8>>,
}

impl GeoIpDatabase {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = Reader::open_readfile(path)
            .map_err(|e| ExporterError::GeoIp(format!("{}: {e}", path.display())))?;
        Ok(Self { reader })
    }
}

impl CountryLookup for GeoIpDatabase {
    fn country_code(&self, address: &str) -> Option<String> {
        let ip: IpAddr = address.parse().ok()?;
        let record: geoip2::Country = self.reader.lookup(ip).ok()?;
        record
            .country
            .and_then(|country| country.iso_code)
            .map(str::to_string)
    }
}
