use thiserror::Error;

use super::envelope::{ErrorObject, Token};

/// Transport, protocol and remote failures observed by a client or server.
#[derive(Error, Debug)]
pub enum TrpcError {
    /// Retry budget or wall-clock timeout exhausted.
    ///
    /// `transferred` is how many bytes crossed the wire before giving up.
    #[error("I/O timed out after {transferred} bytes")]
    Timeout { transferred: usize },

    #[error("Peer closed the connection after {transferred} bytes")]
    PeerClosed { transferred: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Frame too large: {length} bytes (capacity {capacity} bytes)")]
    FrameTooLarge { length: usize, capacity: usize },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not connected")]
    NotConnected,

    /// A stale response could not be drained; the connection must not be reused.
    #[error("Connection is unhealthy")]
    Unhealthy,

    #[error("Remote error {code}: {}", message.as_deref().unwrap_or("<no message>"))]
    Remote { code: i32, message: Option<String> },

    #[error("Response token mismatch: expected {expected}, received {received}")]
    TokenMismatch { expected: Token, received: Token },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl TrpcError {
    /// True for failures that leave the connection in an unknown framing state.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            TrpcError::Timeout { .. }
                | TrpcError::Remote { .. }
                | TrpcError::Json(_)
                | TrpcError::Unhealthy
                | TrpcError::TokenMismatch { .. }
        )
    }
}

impl From<std::net::AddrParseError> for TrpcError {
    fn from(err: std::net::AddrParseError) -> Self {
        TrpcError::InvalidEndpoint(err.to_string())
    }
}

impl From<ErrorObject> for TrpcError {
    fn from(err: ErrorObject) -> Self {
        TrpcError::Remote {
            code: err.code,
            message: err.message,
        }
    }
}

pub type Result<T> = std::result::Result<T, TrpcError>;

// Standard JSON-RPC 2.0 error codes
/// Invalid JSON was received, or an argument could not be coerced
pub const PARSE_ERROR: i32 = -32700;
/// The JSON sent is not a valid Request object
pub const INVALID_REQUEST: i32 = -32600;
/// The method does not exist / is not available
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid method parameter(s)
pub const INVALID_PARAMS: i32 = -32602;
/// Internal error raised by a handler
pub const INTERNAL_ERROR: i32 = -32603;

/// Application-level failure raised while dispatching a request.
///
/// These never abort a connection: the server translates them into an
/// error envelope and keeps serving.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Invalid params: expected {expected} argument(s), received {received}")]
    InvalidParams { expected: usize, received: usize },
    #[error("{0}")]
    Internal(String),
}

impl Fault {
    pub fn code(&self) -> i32 {
        match self {
            Fault::ParseError(_) => PARSE_ERROR,
            Fault::InvalidRequest(_) => INVALID_REQUEST,
            Fault::MethodNotFound(_) => METHOD_NOT_FOUND,
            Fault::InvalidParams { .. } => INVALID_PARAMS,
            Fault::Internal(_) => INTERNAL_ERROR,
        }
    }

    /// Human readable detail, empty when there is nothing to add to the code.
    pub fn message(&self) -> String {
        self.to_string()
    }
}
