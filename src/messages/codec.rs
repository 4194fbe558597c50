//! Frame encoding: a header followed by a body, binary or JSON.
//!
//! Binary frames are the header and body written back to back as positional
//! MessagePack values. JSON frames are a two element array `[header, body]`.

use super::header::MessageHeader;
use crate::error::{EtpError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Wire encoding of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    Binary,
    Json,
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::Binary
    }
}

/// Body bytes whose concrete type is known only after routing on the header.
#[derive(Clone, Debug)]
pub enum RawBody {
    Binary(Vec<u8>),
    Json(serde_json::Value),
}

impl RawBody {
    /// Decode into a concrete body type.
    pub fn decode<B: DeserializeOwned>(self) -> Result<B> {
        match self {
            RawBody::Binary(bytes) => Ok(rmp_serde::from_slice(&bytes)?),
            RawBody::Json(value) => {
                serde_json::from_value(value).map_err(|e| EtpError::Deserialization(e.to_string()))
            }
        }
    }
}

/// Encode a complete frame.
pub fn encode_frame<B: Serialize>(
    encoding: Encoding,
    header: &MessageHeader,
    body: &B,
) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Binary => {
            let mut frame = rmp_serde::to_vec(header)?;
            frame.extend(rmp_serde::to_vec(body)?);
            Ok(frame)
        }
        Encoding::Json => Ok(serde_json::to_vec(&(header, body))?),
    }
}

/// Split a frame into its header and a not-yet-decoded body.
pub fn decode_frame(encoding: Encoding, frame: &[u8]) -> Result<(MessageHeader, RawBody)> {
    match encoding {
        Encoding::Binary => {
            let mut rest = frame;
            let header: MessageHeader = rmp_serde::from_read(&mut rest)?;
            Ok((header, RawBody::Binary(rest.to_vec())))
        }
        Encoding::Json => {
            let (header, body): (MessageHeader, serde_json::Value) = serde_json::from_slice(frame)
                .map_err(|e| EtpError::Deserialization(e.to_string()))?;
            Ok((header, RawBody::Json(body)))
        }
    }
}
