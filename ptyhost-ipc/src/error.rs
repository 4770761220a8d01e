//! Error types for the helper channel.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON-RPC error object carried in a failed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    /// The method does not exist on the callee.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Parameters could not be decoded.
    pub const INVALID_PARAMS: i64 = -32602;
    /// The callee failed while handling a valid request.
    pub const FAILED: i64 = -32000;
    /// The `target` object does not exist (or no longer exists).
    pub const UNKNOWN_OBJECT: i64 = -32001;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(Self::FAILED, message)
    }

    pub fn unknown_object(target: &str) -> Self {
        Self::new(Self::UNKNOWN_OBJECT, format!("No such object {target}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, message)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Errors produced by the transport and the JSON-RPC layer.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("I/O error on helper channel: {0}")]
    Io(#[from] std::io::Error),

    /// The channel reached end-of-file or failed; it will never recover.
    #[error("connection closed")]
    Closed,

    #[error("remote error: {message} (code {code})")]
    Remote { code: i64, message: String },

    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),

    /// A [`crate::Handle`] did not index into the attached descriptors.
    #[error("descriptor handle {0} out of range")]
    BadHandle(i32),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl IpcError {
    pub fn is_closed(&self) -> bool {
        matches!(self, IpcError::Closed)
    }
}

impl From<RpcError> for IpcError {
    fn from(e: RpcError) -> Self {
        IpcError::Remote {
            code: e.code,
            message: e.message,
        }
    }
}
