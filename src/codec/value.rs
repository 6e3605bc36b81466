//! Value serialization.
//!
//! Every stored payload starts with a one-byte tag naming its encoding, so a
//! reader never needs outside context to decode it.

use serde::Serialize;
use serde::de::{DeserializeOwned, IntoDeserializer};

use crate::codec::shape::{self, Shape};
use crate::error::{KvError, KvResult};

/// Encoding strategy recorded in front of every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Top-level string stored as raw UTF-8.
    PlainText,
    /// JSON, readable straight out of the raw store.
    Structured,
    /// bincode, for values JSON cannot reproduce exactly.
    BinaryFallback,
}

impl Encoding {
    pub fn tag(self) -> u8 {
        match self {
            Encoding::PlainText => b't',
            Encoding::Structured => b'j',
            Encoding::BinaryFallback => b'b',
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b't' => Some(Encoding::PlainText),
            b'j' => Some(Encoding::Structured),
            b'b' => Some(Encoding::BinaryFallback),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::PlainText => "plain-text-safe",
            Encoding::Structured => "structured",
            Encoding::BinaryFallback => "binary-fallback",
        }
    }
}

/// A tagged payload as handed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedValue {
    encoding: Encoding,
    payload: Vec<u8>,
}

impl SerializedValue {
    pub fn new(encoding: Encoding, payload: Vec<u8>) -> Self {
        Self { encoding, payload }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Wire form: tag byte followed by the payload.
    pub fn into_bytes(self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.payload.len() + 1);
        bytes.push(self.encoding.tag());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn from_bytes(mut bytes: Vec<u8>) -> KvResult<Self> {
        let Some(&tag) = bytes.first() else {
            return Err(KvError::Deserialization("empty payload".to_string()));
        };
        let encoding = Encoding::from_tag(tag).ok_or_else(|| {
            KvError::Deserialization(format!("unknown encoding tag 0x{:02x}", tag))
        })?;
        bytes.remove(0);
        Ok(Self {
            encoding,
            payload: bytes,
        })
    }
}

/// Serialize `value`, picking the encoding from its shape.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> KvResult<SerializedValue> {
    match shape::classify(value) {
        Shape::Text => {
            if let Ok(serde_json::Value::String(text)) = serde_json::to_value(value) {
                return Ok(SerializedValue::new(Encoding::PlainText, text.into_bytes()));
            }
            encode_binary(value)
        }
        Shape::Structured => match serde_json::to_vec(value) {
            Ok(json) => Ok(SerializedValue::new(Encoding::Structured, json)),
            Err(_) => encode_binary(value),
        },
        Shape::Opaque => encode_binary(value),
    }
}

/// Decode a payload according to its tag alone.
pub fn decode<T: DeserializeOwned>(value: &SerializedValue) -> KvResult<T> {
    match value.encoding {
        Encoding::PlainText => {
            let text = std::str::from_utf8(&value.payload)
                .map_err(|e| KvError::Deserialization(e.to_string()))?;
            let deserializer: serde::de::value::StrDeserializer<'_, serde::de::value::Error> =
                text.into_deserializer();
            T::deserialize(deserializer).map_err(|e| KvError::Deserialization(e.to_string()))
        }
        Encoding::Structured => serde_json::from_slice(&value.payload)
            .map_err(|e| KvError::Deserialization(e.to_string())),
        Encoding::BinaryFallback => bincode::deserialize(&value.payload)
            .map_err(|e| KvError::Deserialization(e.to_string())),
    }
}

/// Shorthand for `encode(value)?.into_bytes()`.
pub fn to_bytes<T: Serialize + ?Sized>(value: &T) -> KvResult<Vec<u8>> {
    encode(value).map(SerializedValue::into_bytes)
}

/// Shorthand for `decode(&SerializedValue::from_bytes(bytes)?)`.
pub fn from_bytes<T: DeserializeOwned>(bytes: Vec<u8>) -> KvResult<T> {
    decode(&SerializedValue::from_bytes(bytes)?)
}

fn encode_binary<T: Serialize + ?Sized>(value: &T) -> KvResult<SerializedValue> {
    bincode::serialize(value)
        .map(|payload| SerializedValue::new(Encoding::BinaryFallback, payload))
        .map_err(|e| KvError::invalid(format!("value cannot be serialized: {}", e)))
}
