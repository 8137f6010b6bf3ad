#![no_main]

use euicc_bridge::utils::compression::{decompress, CompressionKind};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = decompress(data, CompressionKind::Lz4);
    let _ = decompress(data, CompressionKind::Zstd);
});
