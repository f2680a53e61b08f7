//! Scheduler configuration.
//!
//! Loaded from a TOML file:
//!
//! ```toml
//! default_storage = "offsite"
//! state_dir = "/var/lib/stowaway"
//!
//! [transfer]
//! chunk_size = 8388608
//! tick_timeout_us = 30000000
//!
//! [storages.offsite]
//! type = "dropbox"
//! folder = "Apps/site"
//! ```
//!
//! Bearer tokens can be left out of the file and supplied through
//! `STOWAWAY_<NAME>_TOKEN`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use stowaway_registry::{StorageConfig, StorageRegistry};
use stowaway_storage::DEFAULT_CHUNK_SIZE;
use stowaway_transfer::ChunkConfig;
use tracing::debug;

const DEFAULT_STALE_SESSION_AGE_SECS: u64 = 2 * 24 * 60 * 60;
const DEFAULT_PURGE_INTERVAL_SECS: u64 = 60 * 60;

/// Transfer tuning. Microsecond values of 0 disable the limit; a
/// `chunk_size` of 0 or less copies each file in a single call.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransferTuning {
    pub chunk_size: i64,
    pub chunk_timeout_us: u64,
    pub tick_timeout_us: u64,
    pub max_iterations: u32,
    pub throttle_us: u64,
}

impl Default for TransferTuning {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE as i64,
            chunk_timeout_us: 0,
            tick_timeout_us: 0,
            max_iterations: 0,
            throttle_us: 0,
        }
    }
}

impl TransferTuning {
    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            chunk_size: u64::try_from(self.chunk_size).ok().filter(|n| *n > 0),
            chunk_timeout: micros(self.chunk_timeout_us),
            tick_timeout: micros(self.tick_timeout_us),
            max_iterations: Some(self.max_iterations).filter(|n| *n > 0),
            throttle: micros(self.throttle_us),
        }
    }
}

fn micros(us: u64) -> Option<Duration> {
    (us > 0).then(|| Duration::from_micros(us))
}

#[derive(Debug, Clone, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub default_storage: Option<String>,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Multipart uploads older than this are aborted by `purge`.
    #[serde(default = "default_stale_session_age")]
    pub stale_session_age_secs: u64,
    /// Interval of the background purge during long uploads.
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
    #[serde(default)]
    pub transfer: TransferTuning,
    #[serde(default)]
    pub storages: BTreeMap<String, StorageConfig>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".stowaway")
}

fn default_stale_session_age() -> u64 {
    DEFAULT_STALE_SESSION_AGE_SECS
}

fn default_purge_interval() -> u64 {
    DEFAULT_PURGE_INTERVAL_SECS
}

impl CliConfig {
    /// Reads the file and applies token overrides from the environment.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config = Self::parse(&text)
            .with_context(|| format!("invalid config {}", path.display()))?;
        config.apply_token_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Replaces bearer tokens with `STOWAWAY_<NAME>_TOKEN` values found by
    /// `lookup`.
    pub fn apply_token_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for (name, storage) in &mut self.storages {
            let key = token_env_key(name);
            if let Some(token) = lookup(&key).filter(|t| !t.is_empty()) {
                if storage.set_access_token(token) {
                    debug!(storage = %name, env = %key, "access token taken from environment");
                }
            }
        }
    }

    pub fn stale_session_age(&self) -> Duration {
        Duration::from_secs(self.stale_session_age_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }

    pub fn registry(&self) -> anyhow::Result<StorageRegistry> {
        let mut registry = StorageRegistry::with_default_providers();
        for (name, storage) in &self.storages {
            registry.add_storage(name.clone(), storage.clone());
        }
        if let Some(name) = &self.default_storage {
            registry.set_default(name)?;
        }
        Ok(registry)
    }
}

/// `offsite-eu` becomes `STOWAWAY_OFFSITE_EU_TOKEN`.
pub fn token_env_key(name: &str) -> String {
    let name: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("STOWAWAY_{name}_TOKEN")
}
