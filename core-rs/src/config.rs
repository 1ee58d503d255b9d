/**
 * config.rs
 * Service configuration (YAML format)
 *
 * Format:
 * ```yaml
 * storageDirectory: /var/lib/originstore
 * queue:
 *   policy: bounded
 *   capacity: 1024
 * logging:
 *   level: info
 * ```
 *
 * Only `storageDirectory` is required; everything else has a default.
 */

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{Result, StoreError};

/// Default capacity of a bounded task queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default log level when RUST_LOG is not set
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// What happens when producers outpace the worker
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", tag = "policy")]
pub enum QueuePolicy {
    /// Reject new tasks with `QueueFull` once `capacity` tasks are waiting
    Bounded {
        #[serde(default = "default_capacity")]
        capacity: usize,
    },
    /// Accept everything; limited only by memory
    Unbounded,
}

fn default_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for QueuePolicy {
    fn default() -> Self {
        QueuePolicy::Bounded {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// Service configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub storage_directory: PathBuf,
    #[serde(default)]
    pub queue: QueuePolicy,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Defaults for everything but the storage directory
    pub fn new<P: Into<PathBuf>>(storage_directory: P) -> Self {
        ServiceConfig {
            storage_directory: storage_directory.into(),
            queue: QueuePolicy::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn with_queue(mut self, queue: QueuePolicy) -> Self {
        self.queue = queue;
        self
    }

    /// Load and validate a YAML config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            StoreError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: ServiceConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Ensures:
    /// - storageDirectory is non-empty
    /// - a bounded queue has room for at least one task
    /// - logging.level is non-empty
    pub fn validate(&self) -> Result<()> {
        if self.storage_directory.as_os_str().is_empty() {
            return Err(StoreError::Config("storageDirectory cannot be empty".to_string()));
        }

        if let QueuePolicy::Bounded { capacity: 0 } = self.queue {
            return Err(StoreError::Config("queue.capacity must be greater than zero".to_string()));
        }

        if self.logging.level.trim().is_empty() {
            return Err(StoreError::Config("logging.level cannot be empty".to_string()));
        }

        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path.as_ref(), yaml)?;
        Ok(())
    }
}
