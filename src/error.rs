use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;

#[cfg(feature = "service")]
use sqlx::Error as SqlxError;

/// JSON-RPC error codes used at the tool-dispatch boundary.
pub mod rpc_code {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const STORAGE_FAILURE: i64 = -32000;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum SightlineError {
    #[error("Storage failure: {0}")]
    Storage(String),
    #[error("Invalid Command: {0}")]
    Command(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

impl SightlineError {
    pub fn rpc_code(&self) -> i64 {
        match self {
            SightlineError::Storage(_) => rpc_code::STORAGE_FAILURE,
            SightlineError::Command(_) => rpc_code::INVALID_PARAMS,
            SightlineError::Config(_) => rpc_code::INTERNAL_ERROR,
            SightlineError::Io(_) => rpc_code::STORAGE_FAILURE,
            SightlineError::NotFound(_) => rpc_code::INVALID_PARAMS,
            SightlineError::Serialization(_) => rpc_code::INVALID_PARAMS,
            SightlineError::UnknownTool(_) => rpc_code::METHOD_NOT_FOUND,
        }
    }
}

impl From<toml::de::Error> for SightlineError {
    fn from(src: toml::de::Error) -> SightlineError {
        SightlineError::Config(format!("Toml deserialization error: {src}"))
    }
}

impl From<JsonError> for SightlineError {
    fn from(src: JsonError) -> SightlineError {
        SightlineError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for SightlineError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => SightlineError::NotFound(format!("{x}")),
            _ => SightlineError::Io(format!("IOError: {}: {x}", x.kind())),
        }
    }
}

impl From<time::error::Format> for SightlineError {
    fn from(src: time::error::Format) -> SightlineError {
        SightlineError::Serialization(format!("Timestamp formatting error: {src}"))
    }
}

#[cfg(feature = "service")]
impl From<SqlxError> for SightlineError {
    fn from(db_error: SqlxError) -> Self {
        SightlineError::Storage(format!("database error: {db_error:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_failures_map_to_server_error_code() {
        let err = SightlineError::Storage("disk gone".to_string());
        assert_eq!(err.rpc_code(), rpc_code::STORAGE_FAILURE);
        assert_eq!(err.to_string(), "Storage failure: disk gone");
    }

    #[test]
    fn io_not_found_becomes_not_found() {
        let err: SightlineError = io::Error::new(io::ErrorKind::NotFound, "nope").into();
        assert!(matches!(err, SightlineError::NotFound(_)));
    }
}
