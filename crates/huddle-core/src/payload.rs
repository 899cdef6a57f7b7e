//! Relayed payloads and their wire framing.
//!
//! The relay never looks inside a payload. A text frame is checked to hold
//! JSON and then forwarded as the exact bytes the sender wrote. Binary
//! payloads travel as binary frames.

use bytes::Bytes;
use serde::de::IgnoredAny;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while decoding or encoding a payload.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A text frame did not hold valid JSON.
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// A text frame body was not UTF-8.
    #[error("text payload is not UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// A message relayed between room members.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// JSON text as written by the sender. Always valid UTF-8 and valid JSON
    /// when built through [`Payload::from_text`] or [`Payload::from_utf8`].
    Structured(Bytes),
    /// Opaque bytes, carried as a binary frame.
    Binary(Bytes),
}

impl Payload {
    /// Check a text frame body is JSON and keep it verbatim.
    pub fn from_text(text: &str) -> Result<Self, CodecError> {
        let _: IgnoredAny = serde_json::from_str(text)?;
        Ok(Self::Structured(Bytes::copy_from_slice(text.as_bytes())))
    }

    /// Like [`Payload::from_text`], but takes ownership of the frame body so
    /// it is forwarded without a copy.
    pub fn from_utf8(body: Bytes) -> Result<Self, CodecError> {
        let text = std::str::from_utf8(&body)?;
        let _: IgnoredAny = serde_json::from_str(text)?;
        Ok(Self::Structured(body))
    }

    /// The JSON text of a structured payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Structured(body) => std::str::from_utf8(body).ok(),
            Self::Binary(_) => None,
        }
    }

    /// Encode into a frame ready to be queued on any number of connections.
    ///
    /// Structured payloads reuse the sender's bytes; nothing is re-serialized.
    pub fn encode(&self) -> Result<Frame, CodecError> {
        match self {
            Self::Structured(body) => {
                let _ = std::str::from_utf8(body)?;
                Ok(Frame::Text(body.clone()))
            }
            Self::Binary(bytes) => Ok(Frame::Binary(bytes.clone())),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Structured(Bytes::from(value.to_string()))
    }
}

/// An encoded payload. Both variants hold [`Bytes`], so cloning one encoding
/// for every recipient of a broadcast is a reference-count bump.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Text frame. The body is UTF-8.
    Text(Bytes),
    /// Binary frame.
    Binary(Bytes),
}

impl Frame {
    /// Size of the frame body in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(bytes) | Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the frame body is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Body of a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(bytes) => std::str::from_utf8(bytes).ok(),
            Self::Binary(_) => None,
        }
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Self::Text(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Self::Text(Bytes::from(text))
    }
}
