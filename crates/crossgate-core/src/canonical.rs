//! Canonical encoding for hashing and signing.
//!
//! Log entries are hashed over a fixed subset of their fields, encoded as a
//! deterministic CBOR map (RFC 8949 core deterministic encoding):
//!
//! ```text
//! { 0: session_id, 1: type, 2: key, 3: operation, 4: timestamp, 5: data }
//! ```
//!
//! - Integer map keys in ascending order
//! - Integers use the smallest valid encoding
//! - Definite lengths only
//! - Text fields are UTF-8 text strings, the timestamp is an integer
//!
//! These bytes are also what the content-addressed store holds, so
//! `SHA-256(canonical bytes)` is both the entry hash and its content ID.
//!
//! Changing the subset or its order invalidates every existing signature.
//! Such a change must come with a new [`LOG_ENTRY_DOMAIN`].
//!
//! Recovery messages are signed over `domain || CBOR(body)`, where the body is
//! the message without its signature and the domain names the message type.

use ciborium::value::Value;
use serde::Serialize;

use crate::crypto::Sha256Hash;
use crate::error::CoreError;
use crate::log_entry::LogContent;
use crate::types::{LogKey, SessionId};

/// Signing domain for log entries. Versioned with the canonical subset.
pub const LOG_ENTRY_DOMAIN: &[u8] = b"crossgate/log-entry/v1";

/// Field keys of the canonical log content map.
mod keys {
    pub const SESSION_ID: u64 = 0;
    pub const TYPE: u64 = 1;
    pub const KEY: u64 = 2;
    pub const OPERATION: u64 = 3;
    pub const TIMESTAMP: u64 = 4;
    pub const DATA: u64 = 5;
}

const FIELD_COUNT: u64 = 6;

/// Encode the hashed subset of a log entry to canonical CBOR bytes.
pub fn canonical_content_bytes(content: &LogContent) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + content.data.len());

    encode_uint(&mut buf, 5, FIELD_COUNT);

    encode_uint(&mut buf, 0, keys::SESSION_ID);
    encode_text(&mut buf, content.session_id.as_str());

    encode_uint(&mut buf, 0, keys::TYPE);
    encode_text(&mut buf, &content.log_type);

    encode_uint(&mut buf, 0, keys::KEY);
    encode_text(&mut buf, content.key.as_str());

    encode_uint(&mut buf, 0, keys::OPERATION);
    encode_text(&mut buf, &content.operation);

    encode_uint(&mut buf, 0, keys::TIMESTAMP);
    encode_int(&mut buf, content.timestamp);

    encode_uint(&mut buf, 0, keys::DATA);
    encode_text(&mut buf, &content.data);

    buf
}

/// Hash of the canonical content.
pub fn content_hash(content: &LogContent) -> Sha256Hash {
    Sha256Hash::hash(&canonical_content_bytes(content))
}

/// The message a gateway signs for a log entry: `LOG_ENTRY_DOMAIN || hash`.
pub fn entry_signing_message(hash: &Sha256Hash) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LOG_ENTRY_DOMAIN.len() + 32);
    buf.extend_from_slice(LOG_ENTRY_DOMAIN);
    buf.extend_from_slice(hash.as_bytes());
    buf
}

/// The message a gateway signs for a recovery message body.
pub fn message_signing_bytes<T: Serialize>(domain: &[u8], body: &T) -> Result<Vec<u8>, CoreError> {
    let mut buf = domain.to_vec();
    ciborium::into_writer(body, &mut buf).map_err(|e| CoreError::EncodingError(e.to_string()))?;
    Ok(buf)
}

/// Encode a signed integer (major types 0 and 1).
fn encode_int(buf: &mut Vec<u8>, n: i64) {
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, 1, (-1 - n) as u64);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a text string (major type 3).
fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Decode canonical content bytes read back from the content store.
///
/// Non-canonical encodings are rejected: the bytes must re-encode to
/// themselves, otherwise their hash would not be the content ID.
pub fn decode_content(bytes: &[u8]) -> Result<LogContent, CoreError> {
    let value: Value =
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))?;

    let map = match value {
        Value::Map(m) => m,
        _ => return Err(CoreError::DecodingError("expected map".into())),
    };

    let get = |key: u64| -> Option<&Value> {
        map.iter()
            .find(|(k, _)| match k {
                Value::Integer(i) => i128::from(*i) == key as i128,
                _ => false,
            })
            .map(|(_, v)| v)
    };

    let text = |key: u64, name: &str| -> Result<String, CoreError> {
        match get(key) {
            Some(Value::Text(s)) => Ok(s.clone()),
            _ => Err(CoreError::DecodingError(format!("missing or invalid {}", name))),
        }
    };

    let timestamp = match get(keys::TIMESTAMP) {
        Some(Value::Integer(i)) => i64::try_from(i128::from(*i))
            .map_err(|_| CoreError::DecodingError("timestamp out of range".into()))?,
        _ => return Err(CoreError::DecodingError("missing or invalid timestamp".into())),
    };

    let content = LogContent {
        session_id: SessionId::new(text(keys::SESSION_ID, "session_id")?),
        log_type: text(keys::TYPE, "type")?,
        key: LogKey::from_raw(text(keys::KEY, "key")?),
        operation: text(keys::OPERATION, "operation")?,
        timestamp,
        data: text(keys::DATA, "data")?,
    };

    if canonical_content_bytes(&content) != bytes {
        return Err(CoreError::DecodingError("non-canonical encoding".into()));
    }

    Ok(content)
}
