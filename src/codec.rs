//! Snappy codec for batch payloads
//!
//! Batches are compressed once on the live path; the compressed bytes are
//! what gets sent and, on failure, spilled. Replay sends spilled payloads
//! as-is, so nothing in the crate ever compresses the same batch twice.

use bytes::Bytes;

use crate::error::WriteError;

/// Content-Encoding value advertised on backend writes.
pub const CONTENT_ENCODING: &str = "snappy";

/// Compress a raw batch.
pub fn compress(raw: &[u8]) -> Result<Bytes, WriteError> {
    snap::raw::Encoder::new()
        .compress_vec(raw)
        .map(Bytes::from)
        .map_err(|e| WriteError::Transient(format!("snappy compression failed: {e}")))
}

/// Decompress a batch payload.
pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>, WriteError> {
    snap::raw::Decoder::new()
        .decompress_vec(compressed)
        .map_err(|e| WriteError::Transient(format!("snappy decompression failed: {e}")))
}
