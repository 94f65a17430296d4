use crate::codec::{self, DecodeError};

use bytes::Bytes;
use serde::de::DeserializeOwned;

/// A message as it travels over the wire: a subject and an opaque body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Subject the message was published on.
    pub subject: String,

    /// Message body, a UTF-8 JSON document for typed traffic.
    pub payload: Bytes,
}

impl Envelope {
    /// Creates a new envelope.
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
        }
    }

    /// Decodes the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::Malformed` if the payload is not valid JSON for `T`.
    pub fn decode<T>(&self) -> Result<T, DecodeError>
    where
        T: DeserializeOwned,
    {
        codec::decode(&self.payload)
    }
}
