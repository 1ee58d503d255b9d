//! Error types for the origin storage coordinator

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Protocol violation ({kind}): {reason}")]
    ProtocolViolation { kind: String, reason: String },

    #[error("Unknown connection: {0}")]
    UnknownConnection(u64),

    #[error("Callback {callback} already outstanding on connection {connection}")]
    DuplicateCallback { connection: u64, callback: u64 },

    #[error("Task queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Task queue closed")]
    QueueClosed,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid origin: {0}")]
    InvalidOrigin(String),

    #[error("Database engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Shorthand for a protocol violation on a given request kind.
    pub fn protocol(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        StoreError::ProtocolViolation {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// True when the connection layer should flag the sender as invalid.
    ///
    /// Everything else is either a transient condition (queue full) or a
    /// failure local to the service.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            StoreError::ProtocolViolation { .. } | StoreError::DuplicateCallback { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
