//! Client error types.

use std::fmt;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug)]
pub enum ClientError {
    /// Configuration error.
    Config(String),
    /// IO error.
    Io(std::io::Error),
    /// Opening the WebSocket failed.
    Connection(String),
    /// The session is not connected.
    NotConnected,
    /// Protocol/framing error.
    Protocol(String),
    /// Request timed out.
    Timeout(String),
    /// The session disconnected before a reply arrived.
    Abandoned,
    /// The device answered with an error status.
    Device(String),
    /// History store failure.
    History(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Connection(msg) => write!(f, "connection error: {}", msg),
            Self::NotConnected => write!(f, "not connected to device"),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::Timeout(msg) => write!(f, "timeout: {}", msg),
            Self::Abandoned => write!(f, "request abandoned: connection closed before reply"),
            Self::Device(msg) => write!(f, "device error: {}", msg),
            Self::History(msg) => write!(f, "history error: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<doorlink_protocol::ProtocolError> for ClientError {
    fn from(err: doorlink_protocol::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<doorlink_core::HistoryError> for ClientError {
    fn from(err: doorlink_core::HistoryError) -> Self {
        Self::History(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(err.to_string())
    }
}
