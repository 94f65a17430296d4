use crate::manager::ConnectionError;

use thiserror::Error;

/// Errors raised by stream administration.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    /// The named stream does not exist.
    #[error("stream '{0}' not found")]
    NotFound(String),

    /// The broker refused the operation.
    #[error("stream operation rejected by broker: {0}")]
    BrokerRejected(String),

    /// There is no live connection.
    #[error("not connected")]
    NotConnected,
}

impl From<ConnectionError> for StreamError {
    fn from(_: ConnectionError) -> Self {
        Self::NotConnected
    }
}
