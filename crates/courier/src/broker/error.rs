use thiserror::Error;

/// Failure reported by a broker binding for an operation on a live connection.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// A stream with this name exists with a different configuration.
    #[error("stream name already in use")]
    AlreadyExists,

    /// The connection is gone.
    #[error("connection closed")]
    Disconnected,

    /// The named stream does not exist.
    #[error("stream not found")]
    NotFound,

    /// The broker refused the operation.
    #[error("rejected by broker: {0}")]
    Rejected(String),
}

/// Failure of a single connection attempt.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectFailure {
    /// Worth trying again before the deadline (refused, DNS, IO).
    #[error("transient transport failure: {0}")]
    Retriable(String),

    /// Retrying will not help (malformed URL, authorization).
    #[error("{0}")]
    Fatal(String),
}
