//! Server configuration from environment variables

use anyhow::Context;
use daylight::Coordinate;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Stockholm, used when no coordinate is configured
const DEFAULT_LATITUDE: f64 = 59.334591;
const DEFAULT_LONGITUDE: f64 = 18.063240;

/// Runtime configuration, read once at startup
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Directory holding `lamps.json`
    pub data_dir: PathBuf,
    /// HTTP listen address
    pub bind_addr: SocketAddr,
    /// Site coordinate for the daylight feed
    pub coordinate: Coordinate,
    /// Daylight feed poll interval
    pub daylight_poll: Duration,
    /// Seed for the jitter random source (entropy when unset)
    pub rng_seed: Option<u64>,
}

impl ServerConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let data_dir = lookup("DATA_DIR").map_or_else(|| PathBuf::from("./data"), PathBuf::from);
        let bind_addr = parse_or(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?;
        let latitude = parse_or(&lookup, "LATITUDE", DEFAULT_LATITUDE)?;
        let longitude = parse_or(&lookup, "LONGITUDE", DEFAULT_LONGITUDE)?;
        let poll_secs: u64 = parse_or(&lookup, "DAYLIGHT_POLL_SECS", 30)?;
        let rng_seed = lookup("RNG_SEED")
            .map(|raw| raw.trim().parse::<u64>())
            .transpose()
            .context("Invalid RNG_SEED")?;

        anyhow::ensure!(
            (-90.0..=90.0).contains(&latitude),
            "LATITUDE out of range: {latitude}"
        );
        anyhow::ensure!(
            (-180.0..=180.0).contains(&longitude),
            "LONGITUDE out of range: {longitude}"
        );
        anyhow::ensure!(poll_secs > 0, "DAYLIGHT_POLL_SECS must be positive");

        Ok(Self {
            data_dir,
            bind_addr,
            coordinate: Coordinate::new(latitude, longitude),
            daylight_poll: Duration::from_secs(poll_secs),
            rng_seed,
        })
    }

    /// Path of the device data file
    #[must_use]
    pub fn lamps_path(&self) -> PathBuf {
        self.data_dir.join("lamps.json")
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {key}: {raw:?}")),
        None => Ok(default),
    }
}
