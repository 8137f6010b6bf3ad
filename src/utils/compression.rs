use serde::{Deserialize, Serialize};

use crate::config::MAX_PAYLOAD_SIZE;
use crate::error::{constants, BridgeError, Result};

/// General-purpose compressors understood by the wire codec.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    #[default]
    Lz4,
    Zstd,
}

impl CompressionKind {
    /// Frame flag value identifying this compressor
    pub fn flag(self) -> u8 {
        match self {
            CompressionKind::Lz4 => 0x01,
            CompressionKind::Zstd => 0x02,
        }
    }

    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0x01 => Some(CompressionKind::Lz4),
            0x02 => Some(CompressionKind::Zstd),
            _ => None,
        }
    }
}

/// Maximum output size for decompression, bounded by what one datagram may carry
const MAX_DECOMPRESSION_SIZE: usize = MAX_PAYLOAD_SIZE;

fn decompression_failed() -> BridgeError {
    BridgeError::MalformedPacket(constants::ERR_DECOMPRESSION_FAILED.to_string())
}

/// Compresses data using the specified compression algorithm
///
/// # Errors
/// Returns `BridgeError::Serialization` if the compressor fails
pub fn compress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            zstd::stream::copy_encode(data, &mut out, 1)
                .map_err(|e| BridgeError::Serialization(format!("zstd: {e}")))?;
            Ok(out)
        }
    }
}

/// Decompresses data that was compressed with the specified algorithm
///
/// Output is capped at [`MAX_PAYLOAD_SIZE`] so a tiny datagram cannot claim
/// an arbitrarily large allocation.
///
/// # Errors
/// Returns `BridgeError::MalformedPacket` if decompression fails or the
/// output would exceed the cap.
pub fn decompress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => {
            // lz4_flex prepends the uncompressed size as a 4-byte little-endian integer
            if data.len() < 4 {
                return Err(decompression_failed());
            }

            let claimed_size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if claimed_size > MAX_DECOMPRESSION_SIZE {
                return Err(decompression_failed());
            }

            lz4_flex::decompress_size_prepended(data).map_err(|_| decompression_failed())
        }
        CompressionKind::Zstd => {
            use std::io::Read;

            let mut reader = zstd::stream::Decoder::new(data).map_err(|_| decompression_failed())?;
            let mut out = Vec::new();
            let mut buffer = [0u8; 4096];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        out.extend_from_slice(&buffer[..n]);
                        if out.len() > MAX_DECOMPRESSION_SIZE {
                            return Err(decompression_failed());
                        }
                    }
                    Err(_) => return Err(decompression_failed()),
                }
            }
            Ok(out)
        }
    }
}

/// Compress data when it reaches `threshold_bytes` and the result is actually smaller.
///
/// Returns the output bytes and a flag indicating whether compression was applied.
pub fn maybe_compress(
    data: &[u8],
    kind: CompressionKind,
    threshold_bytes: usize,
) -> Result<(Vec<u8>, bool)> {
    if data.len() < threshold_bytes {
        return Ok((data.to_vec(), false));
    }

    let compressed = compress(data, kind)?;
    if compressed.len() < data.len() {
        Ok((compressed, true))
    } else {
        Ok((data.to_vec(), false))
    }
}
