use std::{io, mem::discriminant, sync::Arc};

use alloy::transports::{RpcError, TransportErrorKind};
use thiserror::Error;

use crate::{robust_provider::http_client::HttpError, types::WatcherResult};

/// A stored key that does not follow the canonical encoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed key {key:?}: {reason}")]
pub struct KeyError {
    pub key: String,
    pub reason: &'static str,
}

impl KeyError {
    pub(crate) fn new(key: impl Into<String>, reason: &'static str) -> Self {
        Self { key: key.into(), reason }
    }
}

/// The three ways a chain adapter call can fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// Node lag, timeouts, rate limits and other conditions worth retrying.
    #[error("transient observation error: {0}")]
    TransientObservation(String),

    /// The node or the adapter cannot serve the requested range as asked.
    #[error("unsupported range {from}..={to}: {reason}")]
    UnsupportedRange { from: u64, to: u64, reason: String },

    /// Missing endpoint, missing contract address or similar. Never retried.
    #[error("fatal configuration error: {0}")]
    FatalConfiguration(String),
}

impl AdapterError {
    pub(crate) fn transient(message: impl Into<String>) -> Self {
        AdapterError::TransientObservation(message.into())
    }

    pub(crate) fn fatal(message: impl Into<String>) -> Self {
        AdapterError::FatalConfiguration(message.into())
    }

    pub(crate) fn unsupported(from: u64, to: u64, reason: impl Into<String>) -> Self {
        AdapterError::UnsupportedRange { from, to, reason: reason.into() }
    }
}

impl From<RpcError<TransportErrorKind>> for AdapterError {
    fn from(error: RpcError<TransportErrorKind>) -> Self {
        AdapterError::TransientObservation(error.to_string())
    }
}

impl From<HttpError> for AdapterError {
    fn from(error: HttpError) -> Self {
        AdapterError::TransientObservation(error.to_string())
    }
}

impl From<KeyError> for AdapterError {
    fn from(error: KeyError) -> Self {
        AdapterError::TransientObservation(error.to_string())
    }
}

/// Errors raised by a [`crate::sink::Sink`].
#[derive(Error, Debug, Clone)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(Arc<io::Error>),

    #[error("sink serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    MalformedKey(#[from] KeyError),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

impl From<io::Error> for SinkError {
    fn from(error: io::Error) -> Self {
        SinkError::Io(Arc::new(error))
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(error: serde_json::Error) -> Self {
        SinkError::Serialization(error.to_string())
    }
}

/// Errors emitted by a watcher.
///
/// Builder validation errors are returned from `build()`. Once a watcher runs, only
/// [`WatcherError::FatalConfiguration`] ends it; everything else is retried internally and
/// surfaces in the progress stream only as a notification.
#[derive(Error, Debug, Clone)]
pub enum WatcherError {
    #[error("fatal configuration error: {0}")]
    FatalConfiguration(String),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    MalformedKey(#[from] KeyError),

    /// Raised by one-shot drivers, which report instead of retrying forever.
    #[error(transparent)]
    Adapter(AdapterError),

    #[error("unsupported range {from}..={to}: {reason}")]
    UnsupportedRange { from: u64, to: u64, reason: String },

    #[error("Max batch size must be greater than 0")]
    InvalidMaxBatchSize,

    #[error("Poll interval must be greater than 0")]
    InvalidPollInterval,

    #[error("Stream buffer capacity must be greater than 0")]
    InvalidBufferCapacity,

    #[error("invalid range: from {from} is greater than to {to}")]
    InvalidRange { from: u64, to: u64 },
}

impl From<AdapterError> for WatcherError {
    fn from(error: AdapterError) -> Self {
        match error {
            AdapterError::FatalConfiguration(message) => WatcherError::FatalConfiguration(message),
            AdapterError::UnsupportedRange { from, to, reason } => {
                WatcherError::UnsupportedRange { from, to, reason }
            }
            other => WatcherError::Adapter(other),
        }
    }
}

impl PartialEq<WatcherError> for WatcherResult {
    fn eq(&self, other: &WatcherError) -> bool {
        match self {
            Ok(_) => false,
            Err(err) => discriminant(err) == discriminant(other),
        }
    }
}
