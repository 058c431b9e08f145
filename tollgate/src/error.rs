//! Error types shared by every tollgate component
//!
//! Admission denials are *not* errors: they come back as
//! [`Decision::Denied`](crate::Decision::Denied). Everything in this module is
//! an infrastructure failure that the caller should treat as retryable.

use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by external collaborators such as the authoritative data source
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures talking to the shared counter store
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached
    #[error("connection error: {0}")]
    Connection(String),

    /// A single round trip exceeded its bound
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The store answered with something we could not understand
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The store rejected the command
    #[error("store returned error: {0}")]
    Server(String),

    /// A counter key holds a value that is not a decimal integer
    #[error("value at key '{key}' is not an integer")]
    NotAnInteger { key: String },
}

/// Failures handing a payload to the durable queue
#[derive(Error, Debug)]
pub enum QueueError {
    /// The consumer side has gone away
    #[error("queue '{queue}' is closed")]
    Closed { queue: String },

    /// The queue cannot accept more messages without blocking
    #[error("queue '{queue}' is full")]
    Full { queue: String },

    /// The broker refused or failed the publish
    #[error("broker error: {0}")]
    Broker(String),
}

/// Infrastructure error surfaced by the admission controller, the cache and the emitter
#[derive(Error, Debug)]
pub enum Error {
    #[error("counter store failure: {0}")]
    Store(#[from] StoreError),

    #[error("durable queue failure: {0}")]
    Queue(#[from] QueueError),

    #[error("authoritative source failure: {source}")]
    Source {
        #[source]
        source: BoxError,
    },

    /// A bounded round trip did not complete in time
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// A cache hit whose bytes do not decode into the expected shape
    #[error("malformed cached payload at '{key}': {source}")]
    MalformedPayload {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize payload: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Rejected at construction time
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Raw records may not be forwarded to the audit queue
    #[error("queue '{queue}' only accepts audit events")]
    ReservedQueue { queue: String },
}

impl From<BoxError> for Error {
    fn from(source: BoxError) -> Self {
        Error::Source { source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
