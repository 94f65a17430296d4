mod error;

pub use error::{DecodeError, EncodeError};

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encodes `value` as a UTF-8 JSON document.
///
/// Output is stable for a given value as long as its fields serialize in a
/// fixed order (structs do; `HashMap` does not).
///
/// # Errors
///
/// Returns `EncodeError` if the value's `Serialize` impl fails, e.g. a map with
/// non-string keys.
pub fn encode<T>(value: &T) -> Result<Bytes, EncodeError>
where
    T: Serialize + ?Sized,
{
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decodes a JSON document into `T`.
///
/// # Errors
///
/// Returns `DecodeError::Malformed` on invalid JSON or a schema mismatch.
pub fn decode<T>(bytes: &[u8]) -> Result<T, DecodeError>
where
    T: DeserializeOwned,
{
    serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))
}
