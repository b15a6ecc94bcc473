//! Typed values and the tagged wire format shared by the backends.
//!
//! Every value is written as a fixed-width kind tag followed by the raw
//! payload:
//!
//! ```text
//! string<utf-8 bytes>
//! buffer<raw bytes>
//! object<json>
//! ```
//!
//! Tags shorter than [`TAG_WIDTH`] are right-padded with spaces.

use crate::error::{StoreError, StoreResult};
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;

/// Width in bytes of the kind tag that prefixes every encoded value.
pub const TAG_WIDTH: usize = 6;

/// The kind of payload a stored value carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// UTF-8 text
    String,
    /// Opaque bytes
    Buffer,
    /// A JSON document
    Object,
}

impl ValueKind {
    /// The tag written in front of the payload.
    pub fn tag(self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Buffer => "buffer",
            ValueKind::Object => "object",
        }
    }

    /// Resolve a (possibly padded) tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim_end() {
            "string" => Some(ValueKind::String),
            "buffer" => Some(ValueKind::Buffer),
            "object" => Some(ValueKind::Object),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A value that can live in a [`Store`](crate::Store) bucket.
///
/// The memory backend keeps values as-is; remote backends go through
/// [`encode`] and [`decode`].
pub trait StoreValue: Clone + Send + Sync + 'static {
    /// Kind tag for this type.
    const KIND: ValueKind;

    /// Serialize the payload (without the tag).
    fn to_payload(&self) -> StoreResult<Bytes>;

    /// Rebuild a value from a payload of kind [`Self::KIND`].
    fn from_payload(payload: Bytes) -> StoreResult<Self>;
}

impl StoreValue for String {
    const KIND: ValueKind = ValueKind::String;

    fn to_payload(&self) -> StoreResult<Bytes> {
        Ok(Bytes::copy_from_slice(self.as_bytes()))
    }

    fn from_payload(payload: Bytes) -> StoreResult<Self> {
        String::from_utf8(payload.to_vec()).map_err(|e| StoreError::Deserialization(e.to_string()))
    }
}

impl StoreValue for Bytes {
    const KIND: ValueKind = ValueKind::Buffer;

    fn to_payload(&self) -> StoreResult<Bytes> {
        Ok(self.clone())
    }

    fn from_payload(payload: Bytes) -> StoreResult<Self> {
        Ok(payload)
    }
}

/// Serialize an object payload. Used by [`StoreValue`] impls of kind
/// [`ValueKind::Object`].
pub fn to_json_payload<T: Serialize>(value: &T) -> StoreResult<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Deserialize an object payload.
pub fn from_json_payload<T: DeserializeOwned>(payload: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(payload).map_err(|e| StoreError::Deserialization(e.to_string()))
}

/// Encode a value into the tagged wire format.
pub fn encode<T: StoreValue>(value: &T) -> StoreResult<Vec<u8>> {
    let payload = value.to_payload()?;
    let mut out = Vec::with_capacity(TAG_WIDTH + payload.len());
    out.extend_from_slice(format!("{:<width$}", T::KIND.tag(), width = TAG_WIDTH).as_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode a value from the tagged wire format.
///
/// An unknown tag, or a value too short to carry one, is an
/// [`StoreError::UnknownValueKind`]. A known tag of the wrong kind is a
/// deserialization error.
pub fn decode<T: StoreValue>(raw: &[u8]) -> StoreResult<T> {
    if raw.len() < TAG_WIDTH {
        return Err(StoreError::UnknownValueKind(
            String::from_utf8_lossy(raw).into_owned(),
        ));
    }

    let (tag, payload) = raw.split_at(TAG_WIDTH);
    let tag = String::from_utf8_lossy(tag);
    let kind = ValueKind::from_tag(&tag)
        .ok_or_else(|| StoreError::UnknownValueKind(tag.clone().into_owned()))?;

    if kind != T::KIND {
        return Err(StoreError::Deserialization(format!(
            "expected {} value, found {}",
            T::KIND,
            kind
        )));
    }

    T::from_payload(Bytes::copy_from_slice(payload))
}
