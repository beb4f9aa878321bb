//! Error types for the exchange stream client

use thiserror::Error;

use crate::parser::ErrorCode;

/// Stream client errors
#[derive(Error, Debug)]
pub enum StreamError {
    /// Connection-level failure: reset, unexpected close, TLS failure.
    /// Fatal to the current transport; the caller owns reconnect policy.
    #[error("Socket error: {0}")]
    Socket(String),

    /// A received frame could not be interpreted. Contained per frame.
    #[error("Listener error: {0}")]
    Listener(String),

    /// A cache could not be built because the delta lacked definitional data.
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A FAILURE status arrived with `connectionClosed`
    #[error("Connection closed by server: {0:?}")]
    ServerClosed(Option<ErrorCode>),

    #[error("Socket read timed out after {0}s")]
    Timeout(u64),

    #[error("Not connected")]
    NotConnected,
}

impl StreamError {
    /// Whether the error ends the current connection
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StreamError::Socket(_)
                | StreamError::ServerClosed(_)
                | StreamError::Timeout(_)
                | StreamError::NotConnected
        )
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Socket(err.to_string())
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Listener(err.to_string())
    }
}

impl From<tokio_native_tls::native_tls::Error> for StreamError {
    fn from(err: tokio_native_tls::native_tls::Error) -> Self {
        StreamError::Socket(err.to_string())
    }
}

impl From<config::ConfigError> for StreamError {
    fn from(err: config::ConfigError) -> Self {
        StreamError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
