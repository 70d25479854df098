//! Shared test utilities for integration tests.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test file
//! compiles as a separate crate and may only use a subset of these helpers.

#![allow(dead_code)]

use std::io::{Cursor, Read, Write};
use std::sync::{Arc, OnceLock};

use objcodec::{BasicKeyProvider, CodecChain, CodecProperties, KeyPair, MetadataMap};

/// Returns one of three cached 1024-bit key pairs.
///
/// Key generation dominates test runtime, so every test shares these.
pub fn key(slot: usize) -> KeyPair {
    static KEYS: OnceLock<Vec<KeyPair>> = OnceLock::new();
    let keys = KEYS.get_or_init(|| {
        (0..3)
            .map(|_| KeyPair::generate(1024).expect("key generation"))
            .collect()
    });
    keys[slot].clone()
}

/// Properties with `master` as the master key and `others` as old keys.
pub fn properties(master: KeyPair, others: Vec<KeyPair>) -> CodecProperties {
    let provider = BasicKeyProvider::with_keys(master, others).expect("provider");
    CodecProperties::new().key_provider(Arc::new(provider))
}

/// Text with some binary noise; compresses well but not trivially.
pub fn payload(len: usize) -> Vec<u8> {
    let text = b"Lorem ipsum dolor sit amet, consectetur adipiscing elit. ";
    (0..len)
        .map(|i| {
            if i % 251 < 200 {
                text[i % text.len()]
            } else {
                (i.wrapping_mul(31).wrapping_add(i >> 3)) as u8
            }
        })
        .collect()
}

/// Encodes through a chain writer.
pub fn encode_push(chain: &CodecChain, data: &[u8], map: &mut MetadataMap) -> Vec<u8> {
    let mut writer = chain.encode_writer(Vec::new(), map).expect("open encode writer");
    writer.write_all(data).expect("write");
    writer.finish().expect("finish")
}

/// Encodes through a chain reader.
pub fn encode_pull(chain: &CodecChain, data: &[u8], map: &mut MetadataMap) -> Vec<u8> {
    let mut reader = chain
        .encode_reader(Cursor::new(data.to_vec()), map)
        .expect("open encode reader");
    let mut out = Vec::new();
    reader.read_to_end(&mut out).expect("read");
    reader.finish().expect("finish");
    out
}

/// Decodes through a chain writer.
pub fn decode_push(
    chain: &CodecChain,
    data: &[u8],
    map: &mut MetadataMap,
) -> objcodec::Result<Vec<u8>> {
    let mut writer = chain.decode_writer(Vec::new(), map)?;
    writer.write_all(data)?;
    writer.finish()
}

/// Decodes through a chain reader.
pub fn decode_pull(
    chain: &CodecChain,
    data: &[u8],
    map: &mut MetadataMap,
) -> objcodec::Result<Vec<u8>> {
    let mut reader = chain.decode_reader(Cursor::new(data.to_vec()), map)?;
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    reader.finish()?;
    Ok(out)
}
