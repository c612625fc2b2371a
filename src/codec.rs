//! The on-disk wire encoding for keys and values.
//!
//! This module is the in-scope half of "codec": the tag-byte scheme, the
//! `strings`/`is_key` branching, the Unicode marker, and the absent-value
//! sentinel. Turning an arbitrary host value into canonical bytes in the
//! first place is the out-of-scope [`ValueCodec`] collaborator — this
//! module never looks inside a structured payload, it only tags and
//! untags byte strings.

use crate::error::{CacheError, Result};

const TAG_BYTES: u8 = b' '; // 0x20
const TAG_UNICODE: u8 = b'U'; // 0x55

/// The shape of a value (or key) immediately before/after wire encoding.
///
/// `Bytes` and `Text` correspond to the two in-memory string
/// representations a dynamically-typed host language would distinguish
/// at runtime; Rust gets to make that distinction at the type level
/// instead. `Text` always takes the `'U'` tag, `Bytes` always
/// takes the `' '` tag — including when `Bytes` carries an externally
/// structured-serialized payload (`strings == false`, `is_key == false`):
/// this cache uses the same `' '` tag for "raw bytes" and "structured
/// payload" because the distinguishing context (`strings`, `is_key`) is
/// supplied again at decode time, not recovered from the tag alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Absent,
    Bytes(Vec<u8>),
    Text(String),
}

impl Payload {
    /// The raw bytes hashed for bucket placement and compared during
    /// `_find` — always the pre-tag, pre-serialization bytes.
    pub fn raw_bytes(&self) -> &[u8] {
        match self {
            Payload::Absent => b"",
            Payload::Bytes(b) => b,
            Payload::Text(s) => s.as_bytes(),
        }
    }
}

/// Encode a [`Payload`] to the bytes actually written into an entry's
/// key/value region.
pub fn encode_wire(payload: &Payload) -> Vec<u8> {
    match payload {
        Payload::Absent => Vec::new(),
        Payload::Bytes(b) => {
            let mut out = Vec::with_capacity(1 + b.len());
            out.push(TAG_BYTES);
            out.extend_from_slice(b);
            out
        }
        Payload::Text(s) => {
            let bytes = s.as_bytes();
            let mut out = Vec::with_capacity(1 + bytes.len());
            out.push(TAG_UNICODE);
            out.extend_from_slice(bytes);
            out
        }
    }
}

/// Decode wire bytes back into a [`Payload`]. `strings`/`is_key` disambiguate the `' '` tag between
/// "raw bytes" and "structured-serialization remainder" — this module
/// treats both the same way (`Payload::Bytes`) and leaves deserializing a
/// structured remainder to the [`ValueCodec`] collaborator the caller
/// layers on top.
pub fn decode_wire(bytes: &[u8]) -> Result<Payload> {
    if bytes.is_empty() {
        return Ok(Payload::Absent);
    }
    let (tag, rest) = (bytes[0], &bytes[1..]);
    match tag {
        TAG_UNICODE => {
            let s = std::str::from_utf8(rest)
                .map_err(|e| CacheError::UnsupportedData(format!("invalid UTF-8 value: {e}")))?;
            Ok(Payload::Text(s.to_string()))
        }
        _ => Ok(Payload::Bytes(rest.to_vec())),
    }
}

/// External collaborator: maps a host value type `V` to/from
/// opaque bytes. Used only for values (never keys) when `strings` is
/// false and the value isn't already `Payload::Bytes`/`Payload::Text`.
/// The core cache never inspects `V` directly — it calls this trait.
///
/// `to_payload`/`from_payload` pick which wire tag a value gets. The
/// default implementation always wraps `to_bytes`'s result in
/// `Payload::Bytes`, which is correct for any codec whose in-memory form
/// isn't text. A codec whose `V` *is* text (see [`StringCodec`]) should
/// override both so that values round-trip through `Payload::Text` and
/// pick up the `'U'` tag on disk.
pub trait ValueCodec<V>: Send + Sync {
    fn to_bytes(&self, value: &V) -> Result<Vec<u8>>;
    fn from_bytes(&self, bytes: &[u8]) -> Result<V>;

    fn to_payload(&self, value: &V) -> Result<Payload> {
        Ok(Payload::Bytes(self.to_bytes(value)?))
    }

    fn from_payload(&self, payload: &Payload) -> Result<V> {
        self.from_bytes(payload.raw_bytes())
    }
}

/// Identity codec for crates that already work in raw bytes. Used when a
/// cache is opened with `strings = true`, where values are stored as
/// opaque byte strings with no structured serialization step.
#[derive(Clone, Copy, Default)]
pub struct BytesCodec;

impl ValueCodec<Vec<u8>> for BytesCodec {
    fn to_bytes(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// Codec for `V = String`. Values round-trip through [`Payload::Text`]
/// rather than `Payload::Bytes`, so they actually pick up the `'U'` wire
/// tag on encode instead of only being reachable on decode.
#[derive(Clone, Copy, Default)]
pub struct StringCodec;

impl ValueCodec<String> for StringCodec {
    fn to_bytes(&self, value: &String) -> Result<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<String> {
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| CacheError::UnsupportedData(format!("invalid UTF-8 value: {e}")))
    }

    fn to_payload(&self, value: &String) -> Result<Payload> {
        Ok(Payload::Text(value.clone()))
    }

    fn from_payload(&self, payload: &Payload) -> Result<String> {
        match payload {
            Payload::Text(s) => Ok(s.clone()),
            other => self.from_bytes(other.raw_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_bytes() {
        let p = Payload::Bytes(vec![1, 2, 3]);
        let wire = encode_wire(&p);
        assert_eq!(wire[0], TAG_BYTES);
        assert_eq!(decode_wire(&wire).unwrap(), p);
    }

    #[test]
    fn round_trips_text() {
        let p = Payload::Text("héllo".to_string());
        let wire = encode_wire(&p);
        assert_eq!(wire[0], TAG_UNICODE);
        assert_eq!(decode_wire(&wire).unwrap(), p);
    }

    #[test]
    fn string_codec_encodes_with_unicode_tag() {
        let codec = StringCodec;
        let payload = codec.to_payload(&"héllo".to_string()).unwrap();
        assert_eq!(payload, Payload::Text("héllo".to_string()));
        let wire = encode_wire(&payload);
        assert_eq!(wire[0], TAG_UNICODE);

        let decoded = decode_wire(&wire).unwrap();
        assert_eq!(codec.from_payload(&decoded).unwrap(), "héllo");
    }

    #[test]
    fn absent_round_trips_to_empty_bytes() {
        let wire = encode_wire(&Payload::Absent);
        assert!(wire.is_empty());
        assert_eq!(decode_wire(&wire).unwrap(), Payload::Absent);
    }

    #[test]
    fn invalid_utf8_under_unicode_tag_is_rejected() {
        let bad = vec![TAG_UNICODE, 0xff, 0xfe];
        assert!(decode_wire(&bad).is_err());
    }
}
