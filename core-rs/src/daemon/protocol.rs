//! Request/reply protocol between client connections and the coordinator
//!
//! The connection layer hands over a [`RawRequest`]: an operation kind string,
//! its JSON parameters and a caller-chosen callback id. [`Operation::parse`]
//! turns that into a typed operation or a protocol violation. Every reply
//! echoes the callback id verbatim.
//!
//! | kind | parameters | reply |
//! |---|---|---|
//! | `enumerate-origins` | none | `origins` |
//! | `delete-for-origin` | `{origin}` | `removed` |
//! | `delete-modified-between` | `{start, end}` | `removed` |
//! | `delete-all` | none | `removed` |
//! | `open-database` | `{origin, name}` | `opened` |
//! | `close-database` | `{origin, name}` | `closed` |
//!
//! Timestamps are either seconds since the Unix epoch (number) or RFC 3339
//! strings, always interpreted as UTC. The range is inclusive.

use crate::errors::{Result, StoreError};
use crate::origin::{DatabaseIdentifier, SecurityOrigin};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Connection identifier assigned by the connection set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Caller-chosen token correlating a reply with its request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(pub u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request as delivered by the (external) connection layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRequest {
    pub kind: String,
    #[serde(default)]
    pub parameters: Value,
    pub callback_id: CallbackId,
}

impl RawRequest {
    pub fn new(kind: impl Into<String>, parameters: Value, callback_id: u64) -> Self {
        Self {
            kind: kind.into(),
            parameters,
            callback_id: CallbackId(callback_id),
        }
    }
}

/// Recognized operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    EnumerateOrigins,
    DeleteForOrigin,
    DeleteModifiedBetween,
    DeleteAll,
    OpenDatabase,
    CloseDatabase,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::EnumerateOrigins,
        OperationKind::DeleteForOrigin,
        OperationKind::DeleteModifiedBetween,
        OperationKind::DeleteAll,
        OperationKind::OpenDatabase,
        OperationKind::CloseDatabase,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::EnumerateOrigins => "enumerate-origins",
            OperationKind::DeleteForOrigin => "delete-for-origin",
            OperationKind::DeleteModifiedBetween => "delete-modified-between",
            OperationKind::DeleteAll => "delete-all",
            OperationKind::OpenDatabase => "open-database",
            OperationKind::CloseDatabase => "close-database",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated operation, ready to be queued
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    EnumerateOrigins,
    DeleteForOrigin { origin: SecurityOrigin },
    DeleteModifiedBetween { start: DateTime<Utc>, end: DateTime<Utc> },
    DeleteAll,
    OpenDatabase { identifier: DatabaseIdentifier },
    CloseDatabase { identifier: DatabaseIdentifier },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct OriginParams {
    origin: SecurityOrigin,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RangeParams {
    start: Timestamp,
    end: Timestamp,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseParams {
    origin: SecurityOrigin,
    name: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Timestamp {
    Seconds(f64),
    Rfc3339(DateTime<Utc>),
}

impl Timestamp {
    fn to_utc(&self, kind: OperationKind) -> Result<DateTime<Utc>> {
        match self {
            Timestamp::Rfc3339(time) => Ok(*time),
            Timestamp::Seconds(seconds) => {
                if !seconds.is_finite() {
                    return Err(StoreError::protocol(kind.as_str(), "timestamp is not finite"));
                }
                let whole = seconds.floor();
                let nanos = ((seconds - whole) * 1_000_000_000.0).round().min(999_999_999.0) as u32;
                DateTime::from_timestamp(whole as i64, nanos)
                    .ok_or_else(|| StoreError::protocol(kind.as_str(), format!("timestamp {} out of range", seconds)))
            }
        }
    }
}

fn parse_params<T: DeserializeOwned>(kind: OperationKind, parameters: &Value) -> Result<T> {
    T::deserialize(parameters).map_err(|e| StoreError::protocol(kind.as_str(), format!("malformed parameters: {}", e)))
}

fn expect_no_params(kind: OperationKind, parameters: &Value) -> Result<()> {
    match parameters {
        Value::Null => Ok(()),
        Value::Object(map) if map.is_empty() => Ok(()),
        _ => Err(StoreError::protocol(kind.as_str(), "operation takes no parameters")),
    }
}

impl Operation {
    /// Validate a raw request. Unknown kinds and malformed parameters are
    /// protocol violations.
    pub fn parse(kind: &str, parameters: &Value) -> Result<Operation> {
        let kind = OperationKind::from_name(kind)
            .ok_or_else(|| StoreError::protocol(kind, "unrecognized operation kind"))?;

        let operation = match kind {
            OperationKind::EnumerateOrigins => {
                expect_no_params(kind, parameters)?;
                Operation::EnumerateOrigins
            }
            OperationKind::DeleteAll => {
                expect_no_params(kind, parameters)?;
                Operation::DeleteAll
            }
            OperationKind::DeleteForOrigin => {
                let params: OriginParams = parse_params(kind, parameters)?;
                Operation::DeleteForOrigin { origin: params.origin }
            }
            OperationKind::DeleteModifiedBetween => {
                let params: RangeParams = parse_params(kind, parameters)?;
                let start = params.start.to_utc(kind)?;
                let end = params.end.to_utc(kind)?;
                if start > end {
                    return Err(StoreError::protocol(kind.as_str(), "start is after end"));
                }
                Operation::DeleteModifiedBetween { start, end }
            }
            OperationKind::OpenDatabase => {
                let params: DatabaseParams = parse_params(kind, parameters)?;
                Operation::OpenDatabase {
                    identifier: DatabaseIdentifier::new(params.origin, params.name),
                }
            }
            OperationKind::CloseDatabase => {
                let params: DatabaseParams = parse_params(kind, parameters)?;
                Operation::CloseDatabase {
                    identifier: DatabaseIdentifier::new(params.origin, params.name),
                }
            }
        };

        Ok(operation)
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::EnumerateOrigins => OperationKind::EnumerateOrigins,
            Operation::DeleteForOrigin { .. } => OperationKind::DeleteForOrigin,
            Operation::DeleteModifiedBetween { .. } => OperationKind::DeleteModifiedBetween,
            Operation::DeleteAll => OperationKind::DeleteAll,
            Operation::OpenDatabase { .. } => OperationKind::OpenDatabase,
            Operation::CloseDatabase { .. } => OperationKind::CloseDatabase,
        }
    }

    /// Database the operation names, if any
    pub fn identifier(&self) -> Option<&DatabaseIdentifier> {
        match self {
            Operation::OpenDatabase { identifier } | Operation::CloseDatabase { identifier } => Some(identifier),
            _ => None,
        }
    }

    /// Raw form of this operation, as a client would send it
    pub fn to_request(&self, callback_id: u64) -> RawRequest {
        let parameters = match self {
            Operation::EnumerateOrigins | Operation::DeleteAll => Value::Null,
            Operation::DeleteForOrigin { origin } => serde_json::json!({ "origin": origin.to_string() }),
            Operation::DeleteModifiedBetween { start, end } => serde_json::json!({
                "start": start.to_rfc3339(),
                "end": end.to_rfc3339(),
            }),
            Operation::OpenDatabase { identifier } | Operation::CloseDatabase { identifier } => serde_json::json!({
                "origin": identifier.origin.to_string(),
                "name": identifier.name,
            }),
        };
        RawRequest::new(self.kind().as_str(), parameters, callback_id)
    }
}

/// Reply routed back to the issuing connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub callback_id: CallbackId,
    pub payload: ReplyPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ReplyPayload {
    Origins { origins: Vec<SecurityOrigin> },
    Removed { count: usize },
    Opened { identifier: DatabaseIdentifier, serial: u64 },
    Closed { evicted: bool },
    Failed { message: String },
}
