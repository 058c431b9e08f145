use std::time::Duration;
use thiserror::Error;
use tollgate::{QueueError, StoreError};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An `-ERR ...` reply
    #[error("Server returned error: {0}")]
    Server(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected reply to {command}: {reply}")]
    UnexpectedReply {
        command: &'static str,
        reply: String,
    },
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl From<ClientError> for StoreError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Io(e) => StoreError::Connection(e.to_string()),
            ClientError::ConnectionClosed => {
                StoreError::Connection("connection closed by server".to_string())
            }
            ClientError::Timeout(after) => StoreError::Timeout(after),
            ClientError::Server(message) => StoreError::Server(message),
            e @ (ClientError::Protocol(_) | ClientError::UnexpectedReply { .. }) => {
                StoreError::Protocol(e.to_string())
            }
        }
    }
}

impl From<ClientError> for QueueError {
    fn from(e: ClientError) -> Self {
        QueueError::Broker(e.to_string())
    }
}
