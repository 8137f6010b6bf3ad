#![no_main]

use euicc_bridge::core::codec::decode;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Any datagram a peer can send must decode or fail cleanly
    let _ = decode(data);
});
