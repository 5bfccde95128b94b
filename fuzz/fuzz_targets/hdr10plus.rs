#![no_main]

use libfuzzer_sys::fuzz_target;
use sei_codecs::hdr10plus;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must never panic; valid metadata must
    // survive a re-encode.
    if let Ok(metadata) = hdr10plus::decode(data) {
        let _ = hdr10plus::encode(&metadata);
    }
});
