//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Pipeline configuration.
///
/// All values can be overridden through `HARVESTER_*` environment variables;
/// `Default` carries the production values.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the local libSQL database file.
    pub db_path: PathBuf,
    /// Root folder for downloaded reports, partitioned by date and bank.
    pub download_root: PathBuf,
    /// HTTP client timeout for direct PDF fetches (Pattern B).
    pub http_timeout: Duration,
    /// Poll interval while waiting for a click-triggered download (Pattern A).
    pub poll_interval: Duration,
    /// Total time to wait for a click-triggered download before giving up.
    pub download_timeout: Duration,
    /// Maximum failure records per entry before the item is no longer retried.
    pub max_attempts: u32,
    /// Age after which a leftover run lock from a crashed run is broken.
    pub lock_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/report-harvester.db"),
            download_root: PathBuf::from("./downloads/reports"),
            http_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(15),
            download_timeout: Duration::from_secs(60),
            max_attempts: 5,
            lock_ttl: Duration::from_secs(3600),
        }
    }
}

impl Config {
    /// Build a config from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            db_path: env_path("HARVESTER_DB_PATH", defaults.db_path),
            download_root: env_path("HARVESTER_DOWNLOAD_ROOT", defaults.download_root),
            http_timeout: env_secs("HARVESTER_HTTP_TIMEOUT_SECS", defaults.http_timeout)?,
            poll_interval: env_secs("HARVESTER_POLL_INTERVAL_SECS", defaults.poll_interval)?,
            download_timeout: env_secs(
                "HARVESTER_DOWNLOAD_TIMEOUT_SECS",
                defaults.download_timeout,
            )?,
            max_attempts: env_u32("HARVESTER_MAX_ATTEMPTS", defaults.max_attempts)?,
            lock_ttl: env_secs("HARVESTER_LOCK_TTL_SECS", defaults.lock_ttl)?,
        })
    }
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(default),
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse::<u32>().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.download_timeout, Duration::from_secs(60));
        assert!(config.max_attempts > 0);
    }
}
