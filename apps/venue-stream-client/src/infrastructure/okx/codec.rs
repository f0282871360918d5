//! Frame Codec
//!
//! JSON encoding of directives and decoding of inbound frames. Decode
//! failures are reported as [`DecodeError`] and are always handled by the
//! caller logging and dropping the frame.

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::messages::{Directive, InboundFrame, Push};

/// Inbound frame or payload could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame is not a JSON object of the expected shape.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The frame carries no `data` array.
    #[error("frame has no data")]
    MissingData,

    /// The `data` array does not match the requested element type.
    #[error("payload shape mismatch: {0}")]
    Payload(#[source] serde_json::Error),
}

/// Directive could not be encoded.
#[derive(Debug, thiserror::Error)]
#[error("failed to encode directive: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// JSON codec for the venue feed.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Parse one inbound frame.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::Malformed` for non-JSON input or a JSON value
    /// that is not a frame object.
    pub fn decode(&self, bytes: &[u8]) -> Result<InboundFrame, DecodeError> {
        serde_json::from_slice(bytes).map_err(DecodeError::Malformed)
    }

    /// Decode the frame's `data` array into `T`.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::MissingData` when the frame has no payload and
    /// `DecodeError::Payload` when the payload does not match `T`.
    pub fn decode_push<T: DeserializeOwned>(
        &self,
        frame: &InboundFrame,
    ) -> Result<Push<T>, DecodeError> {
        let raw = frame.data.as_ref().ok_or(DecodeError::MissingData)?;
        let data: Vec<T> = serde_json::from_str(raw.get()).map_err(DecodeError::Payload)?;

        Ok(Push {
            event: frame.event.clone(),
            arg: frame.arg.clone(),
            action: frame.action.clone(),
            data,
        })
    }

    /// Serialize a directive to its wire text.
    ///
    /// # Errors
    ///
    /// Returns `EncodeError` if an argument fails to serialize.
    pub fn encode<A: Serialize>(&self, directive: &Directive<A>) -> Result<String, EncodeError> {
        Ok(serde_json::to_string(directive)?)
    }
}
