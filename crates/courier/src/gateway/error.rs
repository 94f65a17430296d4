use crate::codec::EncodeError;
use crate::manager::ConnectionError;

use thiserror::Error;

/// Errors raised when publishing.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    /// There is no live connection.
    #[error("not connected")]
    NotConnected,

    /// The payload could not be encoded.
    #[error(transparent)]
    SerializationFailure(#[from] EncodeError),

    /// The broker refused the message.
    #[error("publish rejected by broker: {0}")]
    BrokerRejected(String),
}

impl From<ConnectionError> for PublishError {
    fn from(_: ConnectionError) -> Self {
        Self::NotConnected
    }
}

/// Errors raised when subscribing or unsubscribing.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SubscribeError {
    /// There is no live connection.
    #[error("not connected")]
    NotConnected,

    /// The broker refused the subscription change.
    #[error("subscription rejected by broker: {0}")]
    BrokerRejected(String),
}

impl From<ConnectionError> for SubscribeError {
    fn from(_: ConnectionError) -> Self {
        Self::NotConnected
    }
}
