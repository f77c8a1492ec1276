//! Error types for the controller bridge

use std::io;

use serde_json::{json, Value};
use thiserror::Error;

use crate::protocol::{error_codes, JsonRpcError};

/// Errors raised while bridging worker requests
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The worker transport is gone; in-flight requests fail with this
    #[error("Transport closed")]
    TransportClosed,

    /// The worker is not in the running state
    #[error("Worker '{name}' is not running")]
    WorkerUnavailable { name: String },

    /// IO error on the transport
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed framing or JSON-RPC message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error response received from the peer
    #[error("{message}")]
    Remote {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    /// No content for the URI
    #[error("File not found: {uri}")]
    NotFound { uri: String },

    /// The controller may not read the URI
    #[error("Permission denied: {uri}")]
    PermissionDenied { uri: String },

    /// Content exists but is not valid text
    #[error("Failed to decode {uri}: {reason}")]
    Decode { uri: String, reason: String },

    /// The URI could not be parsed
    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    /// The URI scheme has no resolver
    #[error("Unsupported URI scheme '{scheme}' for {uri}")]
    UnsupportedScheme { uri: String, scheme: String },

    /// The database engine cannot run on this host
    #[error("{engine} is not available")]
    EngineUnavailable { engine: String },

    /// The controller cannot host this kind of connection
    #[error("Connection '{name}' uses unsupported backend '{backend}'")]
    UnsupportedBackend { name: String, backend: String },

    /// The connection configuration is unusable
    #[error("Invalid connection configuration: {0}")]
    InvalidConnection(String),

    /// The host refused to create a display surface
    #[error("Failed to create display surface: {0}")]
    SurfaceCreation(String),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration parsed but failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Worker process management failed
    #[error("Process error: {0}")]
    Process(#[from] malloy_process::ProcessError),
}

impl BridgeError {
    /// Stable identifier sent to workers in the error `data`
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::TransportClosed => "transport_closed",
            BridgeError::WorkerUnavailable { .. } => "worker_unavailable",
            BridgeError::Io(_) => "io",
            BridgeError::Protocol(_) => "protocol",
            BridgeError::Remote { .. } => "remote",
            BridgeError::NotFound { .. } => "not_found",
            BridgeError::PermissionDenied { .. } => "permission_denied",
            BridgeError::Decode { .. } => "decode",
            BridgeError::InvalidUri { .. } => "invalid_uri",
            BridgeError::UnsupportedScheme { .. } => "unsupported_scheme",
            BridgeError::EngineUnavailable { .. } => "engine_unavailable",
            BridgeError::UnsupportedBackend { .. } => "unsupported_backend",
            BridgeError::InvalidConnection(_) => "invalid_connection",
            BridgeError::SurfaceCreation(_) => "surface_creation",
            BridgeError::Config(_) => "config",
            BridgeError::InvalidConfiguration(_) => "invalid_configuration",
            BridgeError::Process(_) => "process",
        }
    }

    /// Map a filesystem error for `uri` onto the resolution taxonomy
    pub fn from_io(uri: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => BridgeError::NotFound {
                uri: uri.to_string(),
            },
            io::ErrorKind::PermissionDenied => BridgeError::PermissionDenied {
                uri: uri.to_string(),
            },
            io::ErrorKind::InvalidData => BridgeError::Decode {
                uri: uri.to_string(),
                reason: err.to_string(),
            },
            _ => BridgeError::Io(err),
        }
    }

    /// Convert into the error object of a rejected JSON-RPC response
    pub fn to_rpc_error(&self) -> JsonRpcError {
        match self {
            BridgeError::Remote {
                code,
                message,
                data,
            } => JsonRpcError {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
            other => JsonRpcError {
                code: error_codes::REQUEST_FAILED,
                message: other.to_string(),
                data: Some(json!({ "kind": other.kind() })),
            },
        }
    }
}

impl From<JsonRpcError> for BridgeError {
    fn from(error: JsonRpcError) -> Self {
        BridgeError::Remote {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_not_found() {
        let err = BridgeError::from_io(
            "file:///missing.malloy",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, BridgeError::NotFound { ref uri } if uri == "file:///missing.malloy"));
    }

    #[test]
    fn test_from_io_permission() {
        let err = BridgeError::from_io(
            "file:///secret",
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        );
        assert_eq!(err.kind(), "permission_denied");
    }

    #[test]
    fn test_rpc_error_carries_message_and_kind() {
        let err = BridgeError::NotFound {
            uri: "file:///a.malloy".to_string(),
        };
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, error_codes::REQUEST_FAILED);
        assert_eq!(rpc.message, "File not found: file:///a.malloy");
        assert_eq!(rpc.data, Some(json!({"kind": "not_found"})));
    }

    #[test]
    fn test_remote_round_trips_unchanged() {
        let original = JsonRpcError {
            code: -32001,
            message: "boom".to_string(),
            data: Some(json!({"kind": "decode"})),
        };
        let err = BridgeError::from(original.clone());
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.to_rpc_error(), original);
    }
}
