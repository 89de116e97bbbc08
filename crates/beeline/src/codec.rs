//! Payload codecs for activity inputs, results and timer control data.
//!
//! Every payload that crosses the task-dispatch service is a string. The
//! reference encoding is JSON, gzip-compressed, then base64-encoded
//! ([`GzipJsonCodec`]). Any codec whose `deserialize(serialize(v)) == v`
//! can be swapped in through [`PayloadCodec`].

use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::Value;
use thiserror::Error;

/// Errors produced while encoding or decoding a payload.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload is not valid base64.
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Compression or decompression failed.
    #[error("gzip failure: {0}")]
    Gzip(#[from] std::io::Error),

    /// The decoded bytes are not valid JSON.
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Lossless, pluggable serializer for payloads.
pub trait PayloadCodec: Send + Sync + 'static {
    /// Encode a value for transport.
    fn serialize(&self, value: &Value) -> Result<String, CodecError>;

    /// Decode a value previously produced by [`serialize`](Self::serialize).
    fn deserialize(&self, data: &str) -> Result<Value, CodecError>;
}

/// JSON, then gzip, then base64.
///
/// This is the encoding the history service holds for every workflow
/// started by [`WorkflowService`](crate::WorkflowService) and is the default
/// for the runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipJsonCodec;

impl PayloadCodec for GzipJsonCodec {
    fn serialize(&self, value: &Value) -> Result<String, CodecError> {
        let json = serde_json::to_vec(value)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        let compressed = encoder.finish()?;
        Ok(STANDARD.encode(compressed))
    }

    fn deserialize(&self, data: &str) -> Result<Value, CodecError> {
        let compressed = STANDARD.decode(data.trim())?;
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut json = Vec::new();
        decoder.read_to_end(&mut json)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// Plain JSON text. Useful when payloads must stay human-readable.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn serialize(&self, value: &Value) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }

    fn deserialize(&self, data: &str) -> Result<Value, CodecError> {
        Ok(serde_json::from_str(data)?)
    }
}
