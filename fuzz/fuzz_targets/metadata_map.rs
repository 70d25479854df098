//! Fuzz target for rebuilding codec metadata from arbitrary map values.
//!
//! Splits the input into key/value pairs and asks every built-in codec's
//! chain to plan a decode. Parsing must fail with an error, never panic.
//!
//! Run with: cargo +nightly fuzz run metadata_map

#![no_main]

use libfuzzer_sys::fuzz_target;
use objcodec::{CodecChain, MetadataMap};

const KEYS: &[&str] = &[
    "x-emc-transform-mode",
    "uncompressed-size",
    "compressed-size",
    "compression-ratio",
    "uncompressed-sha1",
    "x-emc-enc-key-id",
    "x-emc-enc-object-key",
    "x-emc-enc-iv",
    "x-emc-enc-unencrypted-size",
    "x-emc-enc-unencrypted-sha1",
    "x-emc-enc-metadata-signature",
];

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let map: MetadataMap = KEYS
        .iter()
        .zip(text.split('\n'))
        .map(|(key, value)| (*key, value))
        .collect();

    let _ = map.transform_mode();
    for spec in ["COMP:Deflate/5", "COMP:LZMA/5", "ENC:AES/CBC/PKCS5Padding"] {
        if let Ok(chain) = CodecChain::from_specs([spec]) {
            let _ = chain.encode_metadata(&map);
        }
    }
});
