use std::time::Duration;

use thiserror::Error;

/// Errors raised by the connection manager.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The broker could not be reached before the connect timeout elapsed.
    #[error("timed out after {0:?} waiting for the broker")]
    Timeout(Duration),

    /// The broker was reached but the handshake failed for good.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The operation needs a live connection and there is none.
    #[error("not connected")]
    NotConnected,

    /// The attempt was cancelled by a concurrent disconnect.
    #[error("connection attempt cancelled")]
    Cancelled,
}
