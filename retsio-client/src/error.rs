//! Client error types.

use retsio_cache::CacheError;
use retsio_protocol::{Operation, ProtocolError};
use thiserror::Error;

/// Failures raised by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timeout")]
    Timeout,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("body read failed: {0}")]
    Body(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("operation not implemented: {0}")]
    NotImplemented(Operation),

    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(Operation),

    #[error("metadata fetch failed: {0}")]
    MetadataFetchFailed(#[source] Box<ClientError>),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("event stream closed before completion")]
    StreamClosed,
}

impl ClientError {
    /// Returns whether a caller could reasonably retry the operation.
    ///
    /// The client itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(TransportError::Connect(_))
            | ClientError::Transport(TransportError::Timeout)
            | ClientError::Transport(TransportError::Body(_)) => true,
            ClientError::MetadataFetchFailed(inner) => inner.is_retryable(),
            _ => false,
        }
    }
}
