use crate::error::{JunkError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonConfig {
    /// Maildir directories to filter, each with its own statistics store
    #[serde(default)]
    pub maildirs: Vec<PathBuf>,
    /// Seconds between two bulk learn cycles
    #[serde(default = "default_learn_interval")]
    pub learn_interval_secs: u64,
    /// Pending arrival events buffered per mailbox
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Store file name inside each Maildir
    #[serde(default = "default_store_file")]
    pub file_name: String,
    /// Backup file name inside each Maildir
    #[serde(default = "default_backup_file")]
    pub backup_file_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

fn default_learn_interval() -> u64 {
    12 * 60 * 60
}

fn default_event_queue_capacity() -> usize {
    256
}

fn default_store_file() -> String {
    "junk.db".to_string()
}

fn default_backup_file() -> String {
    "junk.db.backup".to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_busy_timeout() -> u64 {
    30
}

impl DaemonConfig {
    pub fn learn_interval(&self) -> Duration {
        Duration::from_secs(self.learn_interval_secs)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            maildirs: Vec::new(),
            learn_interval_secs: default_learn_interval(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            file_name: default_store_file(),
            backup_file_name: default_backup_file(),
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| JunkError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| JunkError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Check the settings the daemon cannot run without
    pub fn validate(&self) -> Result<()> {
        if self.daemon.maildirs.is_empty() {
            return Err(JunkError::Config("No Maildir configured".to_string()));
        }
        if self.daemon.learn_interval_secs == 0 {
            return Err(JunkError::Config(
                "learn_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.daemon.event_queue_capacity == 0 {
            return Err(JunkError::Config(
                "event_queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.store.file_name == self.store.backup_file_name {
            return Err(JunkError::Config(
                "store and backup file names must differ".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
