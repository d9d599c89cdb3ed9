//! Configuration for accountability-hub

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::HubError;

/// Default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("accountability-hub")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Database file name inside `data_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Maximum pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// SQLite busy timeout applied to every pooled connection
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Hours a proof stays open for verification after upload
    #[serde(default = "default_verification_window_hours")]
    pub verification_window_hours: i64,

    /// Expiry sweep interval for `watch` mode
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Public endpoint that serves uploaded proof images
    #[serde(default = "default_blob_endpoint")]
    pub blob_public_endpoint: String,

    /// Bucket proof images are uploaded into
    #[serde(default = "default_proof_bucket")]
    pub proof_bucket: String,
}

fn default_database_file() -> String {
    "hub.db".to_string()
}

fn default_pool_size() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_verification_window_hours() -> i64 {
    72
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_blob_endpoint() -> String {
    "http://localhost:9000".to_string()
}

fn default_proof_bucket() -> String {
    "goal-proofs".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: default_database_file(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            verification_window_hours: default_verification_window_hours(),
            sweep_interval_secs: default_sweep_interval(),
            blob_public_endpoint: default_blob_endpoint(),
            proof_bucket: default_proof_bucket(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, HubError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| HubError::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), HubError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| HubError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), HubError> {
        if self.pool_size == 0 {
            return Err(HubError::Config("pool_size must be at least 1".into()));
        }
        if self.verification_window_hours <= 0 {
            return Err(HubError::Config(
                "verification_window_hours must be positive".into(),
            ));
        }
        if self.database_file.is_empty() {
            return Err(HubError::Config("database_file is required".into()));
        }
        Ok(())
    }

    /// Full path of the SQLite database
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    pub fn verification_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.verification_window_hours)
    }
}
