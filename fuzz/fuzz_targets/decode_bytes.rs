//! Fuzz target for decoding arbitrary bytes through the compression codecs.
//!
//! The metadata claims a small payload so the decoders either fail cleanly
//! or produce output that the size and digest check rejects. Neither may
//! panic or hang.
//!
//! Run with: cargo +nightly fuzz run decode_bytes

#![no_main]

use std::io::{Cursor, Read};

use libfuzzer_sys::fuzz_target;
use objcodec::{CodecChain, MetadataMap};

fuzz_target!(|data: &[u8]| {
    for spec in ["COMP:Deflate/5", "COMP:LZMA/5"] {
        let mut map: MetadataMap = [
            ("x-emc-transform-mode", spec),
            ("uncompressed-size", "64"),
            ("compressed-size", "32"),
            ("compression-ratio", "50.0%"),
            ("uncompressed-sha1", "da39a3ee5e6b4b0d3255bfef95601890afd80709"),
        ]
        .into_iter()
        .collect();

        let Ok(chain) = CodecChain::from_specs([spec]) else {
            continue;
        };
        let Ok(mut reader) = chain.decode_reader(Cursor::new(data.to_vec()), &mut map) else {
            continue;
        };
        let mut out = Vec::new();
        if reader.read_to_end(&mut out).is_ok() {
            // Only an exact match for the claimed payload gets through.
            assert_eq!(out.len(), 64);
        }
        let _ = reader.close();
    }
});
