//! Security origins and per-origin database identifiers
//!
//! An origin is written two ways:
//! - URL form, used on the wire: `https://example.com:8443`
//! - Directory form, used on disk: `https_example.com_8443`
//!
//! A database lives at `{origin directory}/{database directory}` below the
//! storage root, where the database directory is `idb-` followed by the
//! hex-encoded UTF-8 database name. Both forms round-trip exactly.

use crate::errors::{Result, StoreError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

static URL_FORM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]*)://([A-Za-z0-9._\-]+)(?::(\d{1,5}))?/?$")
        .expect("origin URL pattern is valid")
});

static DIRECTORY_FORM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z][a-z0-9+.\-]*)_([A-Za-z0-9._\-]+)_(\d{1,5})$")
        .expect("origin directory pattern is valid")
});

/// Prefix of every database directory name.
pub const DATABASE_DIRECTORY_PREFIX: &str = "idb-";

/// Security origin: scheme, host and port
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecurityOrigin {
    scheme: String,
    host: String,
    port: u16,
}

impl SecurityOrigin {
    /// Build an origin from parts. Scheme and host are lowercased.
    pub fn new(scheme: &str, host: &str, port: u16) -> Result<Self> {
        let origin = SecurityOrigin {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
        };
        // Validate through the directory form so both encodings stay in sync
        Self::from_directory_name(&origin.directory_name())?;
        Ok(origin)
    }

    /// Parse the URL form. A missing port falls back to the scheme default.
    pub fn parse(url: &str) -> Result<Self> {
        let caps = URL_FORM
            .captures(url.trim())
            .ok_or_else(|| StoreError::InvalidOrigin(url.to_string()))?;

        let scheme = caps[1].to_ascii_lowercase();
        let port = match caps.get(3) {
            Some(port) => port
                .as_str()
                .parse::<u16>()
                .map_err(|_| StoreError::InvalidOrigin(url.to_string()))?,
            None => default_port(&scheme),
        };

        Ok(SecurityOrigin {
            host: caps[2].to_ascii_lowercase(),
            scheme,
            port,
        })
    }

    /// Parse the on-disk directory form (`scheme_host_port`).
    pub fn from_directory_name(name: &str) -> Result<Self> {
        let caps = DIRECTORY_FORM
            .captures(name)
            .ok_or_else(|| StoreError::InvalidOrigin(name.to_string()))?;

        let port = caps[3]
            .parse::<u16>()
            .map_err(|_| StoreError::InvalidOrigin(name.to_string()))?;

        Ok(SecurityOrigin {
            scheme: caps[1].to_string(),
            host: caps[2].to_string(),
            port,
        })
    }

    /// Directory name for this origin below the storage root
    pub fn directory_name(&self) -> String {
        format!("{}_{}_{}", self.scheme, self.host, self.port)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

fn default_port(scheme: &str) -> u16 {
    match scheme {
        "http" | "ws" => 80,
        "https" | "wss" => 443,
        _ => 0,
    }
}

impl fmt::Display for SecurityOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl TryFrom<String> for SecurityOrigin {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self> {
        SecurityOrigin::parse(&value)
    }
}

impl From<SecurityOrigin> for String {
    fn from(origin: SecurityOrigin) -> Self {
        origin.to_string()
    }
}

/// Names one per-origin database. Sole key of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatabaseIdentifier {
    pub origin: SecurityOrigin,
    pub name: String,
}

impl DatabaseIdentifier {
    pub fn new(origin: SecurityOrigin, name: impl Into<String>) -> Self {
        Self {
            origin,
            name: name.into(),
        }
    }

    /// Directory name of this database inside its origin directory
    pub fn directory_name(&self) -> String {
        format!("{}{}", DATABASE_DIRECTORY_PREFIX, hex::encode(self.name.as_bytes()))
    }

    /// Path relative to the storage root
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.origin.directory_name()).join(self.directory_name())
    }

    /// Rebuild an identifier from the two on-disk directory names.
    pub fn from_directory_names(origin_dir: &str, database_dir: &str) -> Result<Self> {
        let origin = SecurityOrigin::from_directory_name(origin_dir)?;
        let encoded = database_dir
            .strip_prefix(DATABASE_DIRECTORY_PREFIX)
            .ok_or_else(|| StoreError::InvalidPath(database_dir.to_string()))?;
        let bytes = hex::decode(encoded).map_err(|_| StoreError::InvalidPath(database_dir.to_string()))?;
        let name = String::from_utf8(bytes).map_err(|_| StoreError::InvalidPath(database_dir.to_string()))?;
        Ok(Self { origin, name })
    }
}

impl fmt::Display for DatabaseIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.origin, self.name)
    }
}
