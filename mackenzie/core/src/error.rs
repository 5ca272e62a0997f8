//! Error types shared by every mackenzie component.

use std::fmt;

/// The error type returned by every fallible operation in this workspace.
#[derive(Debug)]
pub enum MackenzieError {
    /// A required configuration value was missing or failed to parse. Fatal at startup.
    Configuration(String),
    /// An operation conflicts with already-recorded state (setup hash mismatch, duplicate
    /// task id). The caller decides whether this is ignorable.
    SemanticConflict(String),
    /// The referenced entity (setup, task, minimizer) does not exist.
    NotFound(String),
    /// A transient failure in an external collaborator (scheduler CLI, RPC channel,
    /// database) whose retry envelope has been exhausted.
    Transient(String),
    /// The TLS handshake or certificate material is invalid. Fatal.
    Tls(String),
    /// I/O failure reading or writing persisted state.
    Io(std::io::Error),
    /// JSON (de)serialization failure on a task/result payload.
    Json(serde_json::Error),
    /// The embedded database returned an error.
    Db(sled::Error),
    /// A gRPC transport-level failure.
    Rpc(tonic::Status),
}

impl fmt::Display for MackenzieError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MackenzieError::Configuration(msg) => write!(f, "configuration error: {msg}"),
            MackenzieError::SemanticConflict(msg) => write!(f, "semantic conflict: {msg}"),
            MackenzieError::NotFound(msg) => write!(f, "not found: {msg}"),
            MackenzieError::Transient(msg) => write!(f, "transient failure: {msg}"),
            MackenzieError::Tls(msg) => write!(f, "tls error: {msg}"),
            MackenzieError::Io(e) => write!(f, "io error: {e}"),
            MackenzieError::Json(e) => write!(f, "json error: {e}"),
            MackenzieError::Db(e) => write!(f, "db error: {e}"),
            MackenzieError::Rpc(s) => write!(f, "rpc error: {s}"),
        }
    }
}

impl std::error::Error for MackenzieError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MackenzieError::Io(e) => Some(e),
            MackenzieError::Json(e) => Some(e),
            MackenzieError::Db(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MackenzieError {
    fn from(e: std::io::Error) -> Self {
        MackenzieError::Io(e)
    }
}

impl From<serde_json::Error> for MackenzieError {
    fn from(e: serde_json::Error) -> Self {
        MackenzieError::Json(e)
    }
}

impl From<sled::Error> for MackenzieError {
    fn from(e: sled::Error) -> Self {
        MackenzieError::Db(e)
    }
}

impl From<MackenzieError> for tonic::Status {
    fn from(e: MackenzieError) -> Self {
        match e {
            MackenzieError::SemanticConflict(msg) => tonic::Status::already_exists(msg),
            MackenzieError::NotFound(msg) => tonic::Status::not_found(msg),
            MackenzieError::Transient(msg) => tonic::Status::unavailable(msg),
            other => tonic::Status::internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, MackenzieError>;
