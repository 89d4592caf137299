//! Indexer Configuration
//!
//! Values come from the built-in defaults, then an optional TOML file, then
//! `MOCHIMAP_*` environment variables. Command line flags are applied last by
//! the binary.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{IndexerError, Result};

/// Peer lists tried in order when the directory needs seeding: the public
/// remote lists, then a local fallback file
pub const DEFAULT_BOOTSTRAP_SOURCES: [&str; 4] = [
    "https://www.mochimap.com/startnodes.lst",
    "https://www.mochimap.net/startnodes.lst",
    "https://mochimo.org/startnodes.lst",
    "./startnodes.lst",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Base URL of the protocol gateway
    pub gateway_url: String,

    /// Gateway request timeout (seconds)
    pub request_timeout_secs: u64,

    /// Directory of the sled document store
    pub data_dir: PathBuf,

    /// Pending transaction feed written by the local node
    pub mempool_path: PathBuf,

    /// Peer list sources: http(s) URLs or local file paths, tried in order
    pub bootstrap_sources: Vec<String>,

    /// Crawl cycle tick (milliseconds)
    pub tick_interval_ms: u64,

    /// A peer probed within this window is skipped (seconds)
    pub probe_interval_secs: u64,

    /// No OK peer for this long triggers a re-seed (seconds)
    pub idle_threshold_secs: u64,

    /// Backoff after every bootstrap source failed (seconds)
    pub seed_retry_secs: u64,

    /// Peers not OK for this long become eligible for eviction (seconds)
    pub stale_after_secs: u64,

    /// Capacity of the recently-seen block cache
    pub dedup_capacity: usize,

    /// Concurrent block checks
    pub sync_workers: usize,

    /// Run the backscan after each new tip
    pub integrity_sweep: bool,

    /// Mempool feed poll interval (milliseconds)
    pub mempool_poll_ms: u64,

    /// Health and metrics listener, disabled when unset
    pub metrics_addr: Option<String>,
}

fn default_mempool_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mochimo")
        .join("bin")
        .join("d")
        .join("txclean.dat")
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:2096".to_string(),
            request_timeout_secs: 10,
            data_dir: PathBuf::from("./mochimap-data"),
            mempool_path: default_mempool_path(),
            bootstrap_sources: DEFAULT_BOOTSTRAP_SOURCES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            tick_interval_ms: 1000,
            probe_interval_secs: 30,
            idle_threshold_secs: 60,
            seed_retry_secs: 60,
            stale_after_secs: 3 * 24 * 60 * 60,
            dedup_capacity: 4096,
            sync_workers: num_cpus::get().max(1) * 2,
            integrity_sweep: true,
            mempool_poll_ms: 500,
            metrics_addr: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(val) = env::var(key) {
        if let Ok(parsed) = val.trim().parse::<T>() {
            *target = parsed;
        }
    }
}

impl IndexerConfig {
    /// Read a TOML file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            IndexerError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&raw)
            .map_err(|e| IndexerError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Apply `MOCHIMAP_*` environment overrides
    pub fn apply_env(mut self) -> Self {
        if let Ok(val) = env::var("MOCHIMAP_GATEWAY_URL") {
            self.gateway_url = val.trim().to_string();
        }
        if let Ok(val) = env::var("MOCHIMAP_DATA_DIR") {
            self.data_dir = PathBuf::from(val.trim());
        }
        if let Ok(val) = env::var("MOCHIMAP_MEMPOOL_PATH") {
            self.mempool_path = PathBuf::from(val.trim());
        }
        // Comma separated; an extra source such as a local fallback file
        // can be appended with MOCHIMAP_STARTLIST
        if let Ok(val) = env::var("MOCHIMAP_BOOTSTRAP_SOURCES") {
            self.bootstrap_sources = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(val) = env::var("MOCHIMAP_STARTLIST") {
            if !val.trim().is_empty() {
                self.bootstrap_sources.push(val.trim().to_string());
            }
        }
        if let Ok(val) = env::var("MOCHIMAP_INTEGRITY_SWEEP") {
            self.integrity_sweep = val.trim().eq_ignore_ascii_case("true");
        }
        if let Ok(val) = env::var("MOCHIMAP_METRICS_ADDR") {
            self.metrics_addr = Some(val.trim().to_string()).filter(|s| !s.is_empty());
        }

        env_parse("MOCHIMAP_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs);
        env_parse("MOCHIMAP_TICK_INTERVAL_MS", &mut self.tick_interval_ms);
        env_parse("MOCHIMAP_PROBE_INTERVAL_SECS", &mut self.probe_interval_secs);
        env_parse("MOCHIMAP_IDLE_THRESHOLD_SECS", &mut self.idle_threshold_secs);
        env_parse("MOCHIMAP_SEED_RETRY_SECS", &mut self.seed_retry_secs);
        env_parse("MOCHIMAP_STALE_AFTER_SECS", &mut self.stale_after_secs);
        env_parse("MOCHIMAP_DEDUP_CAPACITY", &mut self.dedup_capacity);
        env_parse("MOCHIMAP_SYNC_WORKERS", &mut self.sync_workers);
        env_parse("MOCHIMAP_MEMPOOL_POLL_MS", &mut self.mempool_poll_ms);

        self
    }

    /// Defaults overridden by the environment
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.gateway_url.trim().is_empty() {
            return Err("gateway_url must be set".to_string());
        }
        url::Url::parse(&self.gateway_url)
            .map_err(|e| format!("Invalid gateway_url {}: {}", self.gateway_url, e))?;

        for source in &self.bootstrap_sources {
            if source.starts_with("http") {
                url::Url::parse(source)
                    .map_err(|e| format!("Invalid bootstrap source {}: {}", source, e))?;
            }
        }

        let nonzero = [
            ("tick_interval_ms", self.tick_interval_ms),
            ("request_timeout_secs", self.request_timeout_secs),
            ("mempool_poll_ms", self.mempool_poll_ms),
            ("dedup_capacity", self.dedup_capacity as u64),
            ("sync_workers", self.sync_workers as u64),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(format!("{} must be greater than zero", name));
            }
        }

        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn mempool_poll(&self) -> Duration {
        Duration::from_millis(self.mempool_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_crawl_cadence() {
        let config = IndexerConfig::default();
        assert_eq!(config.tick_interval_ms, 1000);
        assert_eq!(config.probe_interval_secs, 30);
        assert_eq!(config.idle_threshold_secs, 60);
        assert_eq!(config.stale_after_secs, 259_200);
        assert_eq!(config.dedup_capacity, 4096);
        assert_eq!(config.bootstrap_sources.len(), 4);
        assert!(config.mempool_path.ends_with("txclean.dat"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "gateway_url = \"http://gateway:9000\"").unwrap();
        writeln!(file, "sync_workers = 3").unwrap();

        let config = IndexerConfig::load(file.path()).unwrap();
        assert_eq!(config.gateway_url, "http://gateway:9000");
        assert_eq!(config.sync_workers, 3);
        assert_eq!(config.seed_retry_secs, 60);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = IndexerConfig {
            gateway_url: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = IndexerConfig {
            dedup_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("dedup_capacity"));

        let config = IndexerConfig {
            bootstrap_sources: vec!["http://".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_sources_end_with_local_file() {
        let config = IndexerConfig::default();
        let (last, remote) = config.bootstrap_sources.split_last().unwrap();
        assert_eq!(last, "./startnodes.lst");
        assert!(remote.iter().all(|s| s.starts_with("https://")));
    }

    #[test]
    fn test_file_sources_skip_url_check() {
        let config = IndexerConfig {
            bootstrap_sources: vec!["./startnodes.lst".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
