use thiserror::Error;

/// A payload could not be decoded.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The bytes are not valid JSON, or do not match the expected type.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// A value could not be encoded.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("failed to encode payload: {0}")]
pub struct EncodeError(pub String);
