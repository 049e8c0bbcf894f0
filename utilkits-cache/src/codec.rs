//! Byte layout of values stored in the distributed backend.
//!
//! ```text
//! [version: u8][sliding window ms: u64 LE, 0 = none][payload]
//! ```
//!
//! The payload is produced by a single [`ValueSerializer`]; there is no
//! second envelope around it. The header travels with the value so that a
//! read can refresh a sliding window without knowing the write options.

use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use utilkits_core::SerializationError;

/// Current record layout version.
pub const RECORD_VERSION: u8 = 1;

/// Bytes before the payload.
pub const HEADER_LEN: usize = 9;

/// Turns values into payload bytes and back.
pub trait ValueSerializer: Send + Sync + 'static {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializationError>;

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError>;
}

/// JSON payloads via serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl ValueSerializer for JsonSerializer {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        serde_json::to_vec(value).map_err(|e| SerializationError::Encode {
            reason: e.to_string(),
        })
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        serde_json::from_slice(bytes).map_err(|e| SerializationError::Decode {
            reason: e.to_string(),
        })
    }
}

/// A decoded record borrowing its payload from the raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub sliding: Option<Duration>,
    pub payload: &'a [u8],
}

pub fn encode_record(payload: &[u8], sliding: Option<Duration>) -> Vec<u8> {
    // Sub-millisecond windows round up so they are not mistaken for "none".
    let sliding_ms = sliding
        .map(|window| u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1))
        .unwrap_or(0);

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.push(RECORD_VERSION);
    bytes.extend_from_slice(&sliding_ms.to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

pub fn decode_record(bytes: &[u8]) -> Result<Record<'_>, SerializationError> {
    let (&version, rest) = bytes
        .split_first()
        .ok_or(SerializationError::Truncated { len: bytes.len() })?;
    if version != RECORD_VERSION {
        return Err(SerializationError::UnsupportedVersion {
            found: version,
            expected: RECORD_VERSION,
        });
    }
    if bytes.len() < HEADER_LEN {
        return Err(SerializationError::Truncated { len: bytes.len() });
    }

    let mut sliding_bytes = [0u8; 8];
    sliding_bytes.copy_from_slice(&rest[..8]);
    let sliding_ms = u64::from_le_bytes(sliding_bytes);

    Ok(Record {
        sliding: (sliding_ms > 0).then(|| Duration::from_millis(sliding_ms)),
        payload: &bytes[HEADER_LEN..],
    })
}

/// Serialize a value and wrap it in a record.
pub fn encode_value<T, S>(
    serializer: &S,
    value: &T,
    sliding: Option<Duration>,
) -> Result<Vec<u8>, SerializationError>
where
    T: Serialize,
    S: ValueSerializer,
{
    let payload = serializer.serialize(value)?;
    Ok(encode_record(&payload, sliding))
}

/// Unwrap a record and deserialize its payload.
pub fn decode_value<'a, T, S>(
    serializer: &S,
    bytes: &'a [u8],
) -> Result<(T, Record<'a>), SerializationError>
where
    T: DeserializeOwned,
    S: ValueSerializer,
{
    let record = decode_record(bytes)?;
    let value = serializer.deserialize(record.payload)?;
    Ok((value, record))
}
