//! Optional LZ4 compression of encoded packets.
//!
//! Command batches in a busy frame (box-selected armies, queued build orders)
//! compress well; completion reports and leave notices are a handful of bytes
//! and go out raw. Every wire payload starts with a one-byte flag telling the
//! receiver which case it is looking at.

use lz4_flex::{compress_prepend_size, decompress_size_prepended};

/// Payload is stored as-is.
pub const FLAG_RAW: u8 = 0x00;

/// Payload is LZ4 block data with a little-endian `u32` size prefix.
pub const FLAG_LZ4: u8 = 0x01;

/// Controls when payloads are compressed.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Minimum encoded size (bytes) before compression is applied. Default: 256.
    pub threshold: usize,
    /// Whether compression is enabled at all. Default: true.
    pub enabled: bool,
    /// Largest decompressed size accepted from the network. Default: 64 KiB.
    pub max_decompressed_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            threshold: 256,
            enabled: true,
            max_decompressed_size: 64 * 1024,
        }
    }
}

/// Errors that can occur while unwrapping a received payload.
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    /// No flag byte.
    #[error("empty payload, no compression flag")]
    EmptyPayload,
    /// The declared decompressed size is above the configured limit.
    #[error("declared size {declared} exceeds limit {limit}")]
    TooLarge {
        /// Size announced by the sender.
        declared: usize,
        /// Configured maximum.
        limit: usize,
    },
    /// LZ4 decompression failed.
    #[error("LZ4 decompression failed: {0}")]
    DecompressFailed(String),
    /// Unrecognized flag byte.
    #[error("unknown compression flag: 0x{0:02X}")]
    UnknownFlag(u8),
}

/// Prefix `data` with a flag byte, compressing it when it is large enough.
pub fn wrap_payload(data: &[u8], config: &CompressionConfig) -> Vec<u8> {
    if config.enabled && data.len() >= config.threshold {
        let compressed = compress_prepend_size(data);
        if compressed.len() < data.len() {
            let mut out = Vec::with_capacity(1 + compressed.len());
            out.push(FLAG_LZ4);
            out.extend_from_slice(&compressed);
            return out;
        }
    }
    let mut out = Vec::with_capacity(1 + data.len());
    out.push(FLAG_RAW);
    out.extend_from_slice(data);
    out
}

/// Strip the flag byte and decompress if needed.
pub fn unwrap_payload(data: &[u8], config: &CompressionConfig) -> Result<Vec<u8>, CompressionError> {
    let (&flag, body) = data.split_first().ok_or(CompressionError::EmptyPayload)?;
    match flag {
        FLAG_RAW => Ok(body.to_vec()),
        FLAG_LZ4 => {
            let declared = body
                .get(..4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
                .ok_or_else(|| CompressionError::DecompressFailed("missing size prefix".into()))?;
            if declared > config.max_decompressed_size {
                return Err(CompressionError::TooLarge {
                    declared,
                    limit: config.max_decompressed_size,
                });
            }
            decompress_size_prepended(body)
                .map_err(|e| CompressionError::DecompressFailed(e.to_string()))
        }
        other => Err(CompressionError::UnknownFlag(other)),
    }
}
