//! End-to-end codec chain tests.
//!
//! These tests drive every built-in codec and combination through both push
//! (writer) and pull (reader) streams and check the metadata map protocol:
//! transform-mode ordering, caller keys, partial decode and size prediction.

#![cfg(all(feature = "lzma", feature = "deflate"))]

mod common;

use std::sync::Arc;

use common::{decode_pull, decode_push, encode_pull, encode_push, key, payload, properties};
use objcodec::{
    Codec, CodecChain, DeflateCodec, EncodeSpec, EncryptionCodec, Error, LzmaCodec, MetadataMap,
    NoncePolicy, TRANSFORM_MODE_KEY,
};

const LZMA: &str = "COMP:LZMA/5";
const DEFLATE: &str = "COMP:Deflate/5";
const AES: &str = "ENC:AES/CBC/PKCS5Padding";

fn chain(specs: &[&str]) -> CodecChain {
    CodecChain::from_specs(specs)
        .unwrap()
        .with_properties(properties(key(0), vec![]))
}

const COMBINATIONS: &[&[&str]] = &[
    &[LZMA],
    &[DEFLATE],
    &[AES],
    &[LZMA, AES],
    &[DEFLATE, AES],
    &[AES, DEFLATE],
];

#[test]
fn test_push_encode_pull_decode() {
    let data = payload(50_000);
    for specs in COMBINATIONS {
        let chain = chain(specs);
        let mut map = MetadataMap::new();
        let encoded = encode_push(&chain, &data, &mut map);
        assert_ne!(encoded, data, "{specs:?}");
        assert_eq!(map.transform_mode().len(), specs.len());

        let decoded = decode_pull(&chain, &encoded, &mut map).unwrap();
        assert_eq!(decoded, data, "{specs:?}");
        assert!(map.is_empty(), "{specs:?} left {:?}", map.into_inner());
    }
}

#[test]
fn test_pull_encode_push_decode() {
    let data = payload(30_000);
    for specs in COMBINATIONS {
        let chain = chain(specs);
        let mut map = MetadataMap::new();
        let encoded = encode_pull(&chain, &data, &mut map);

        let decoded = decode_push(&chain, &encoded, &mut map).unwrap();
        assert_eq!(decoded, data, "{specs:?}");
        assert!(map.is_empty(), "{specs:?}");
    }
}

#[test]
fn test_empty_payload() {
    for specs in COMBINATIONS {
        let chain = chain(specs);
        let mut map = MetadataMap::new();
        let encoded = encode_push(&chain, &[], &mut map);
        assert!(decode_pull(&chain, &encoded, &mut map).unwrap().is_empty());
    }
}

#[test]
fn test_priority_orders_transform_mode() {
    let chain = chain(&[AES, LZMA]);
    assert_eq!(
        chain.specs().iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        [LZMA, AES]
    );

    let mut map = MetadataMap::new();
    encode_push(&chain, b"ordered", &mut map);
    assert_eq!(
        map.get(TRANSFORM_MODE_KEY),
        Some("COMP:LZMA/5,ENC:AES/CBC/PKCS5Padding")
    );

    let mut pulled = MetadataMap::new();
    encode_pull(&chain, b"ordered", &mut pulled);
    assert_eq!(pulled.get(TRANSFORM_MODE_KEY), map.get(TRANSFORM_MODE_KEY));
}

#[test]
fn test_two_compressors_rejected() {
    let lzma: Arc<dyn Codec> = Arc::new(LzmaCodec::new());
    let deflate: Arc<dyn Codec> = Arc::new(DeflateCodec::new());
    let encryption: Arc<dyn Codec> = Arc::new(EncryptionCodec::new());
    let result = CodecChain::with_specs([
        (encryption, None),
        (deflate, Some(EncodeSpec::parse("COMP:Deflate/1").unwrap())),
        (lzma, None),
    ]);
    assert!(matches!(result, Err(Error::UnsupportedSpec { spec }) if spec == LZMA));
    assert!(matches!(
        CodecChain::from_specs([LZMA, "COMP:Deflate/9"]),
        Err(Error::UnsupportedSpec { .. })
    ));
}

#[test]
fn test_with_specs_sorts_caller_codecs() {
    let deflate: Arc<dyn Codec> = Arc::new(DeflateCodec::new());
    let encryption: Arc<dyn Codec> = Arc::new(EncryptionCodec::new());
    let chain = CodecChain::with_specs([
        (encryption, None),
        (deflate, Some(EncodeSpec::parse("COMP:Deflate/1").unwrap())),
    ])
    .unwrap()
    .with_properties(properties(key(0), vec![]));

    let mut map = MetadataMap::new();
    let data = payload(4_000);
    let encoded = encode_push(&chain, &data, &mut map);
    assert_eq!(map.transform_mode(), ["COMP:Deflate/1", AES]);
    assert_eq!(decode_pull(&chain, &encoded, &mut map).unwrap(), data);
    assert!(map.is_empty());
}

#[test]
fn test_with_specs_rejects_foreign_override() {
    let deflate: Arc<dyn Codec> = Arc::new(DeflateCodec::new());
    let result = CodecChain::with_specs([(deflate, Some(EncodeSpec::parse(LZMA).unwrap()))]);
    assert!(matches!(result, Err(Error::UnsupportedSpec { .. })));
}

#[test]
fn test_push_and_pull_encode_identically() {
    let chain = CodecChain::from_specs([LZMA, AES]).unwrap().with_properties(
        properties(key(0), vec![]).nonce_policy(NoncePolicy::Deterministic { seed: [9; 32] }),
    );
    let data = payload(12_345);
    let mut pushed_map = MetadataMap::new();
    let mut pulled_map = MetadataMap::new();
    let pushed = encode_push(&chain, &data, &mut pushed_map);
    let pulled = encode_pull(&chain, &data, &mut pulled_map);
    assert_eq!(pushed, pulled);
    assert_eq!(
        pushed_map.get("uncompressed-sha1"),
        pulled_map.get("uncompressed-sha1")
    );
}

#[test]
fn test_caller_keys_survive_roundtrip() {
    let chain = chain(&[DEFLATE, AES]);
    let mut map = MetadataMap::new();
    map.insert("content-type", "text/plain").unwrap();
    map.insert("x-emc-owner", "storage").unwrap();

    let encoded = encode_push(&chain, &payload(1_000), &mut map);
    assert!(map.len() > 2);
    decode_pull(&chain, &encoded, &mut map).unwrap();

    assert_eq!(map.len(), 2);
    assert_eq!(map.get("content-type"), Some("text/plain"));
    assert_eq!(map.get("x-emc-owner"), Some("storage"));
}

#[test]
fn test_reserved_key_rejected() {
    let mut map = MetadataMap::new();
    assert!(matches!(
        map.insert(TRANSFORM_MODE_KEY, LZMA),
        Err(Error::ReservedKey(_))
    ));
}

#[test]
fn test_partial_decode_leaves_inner_transform() {
    let data = payload(20_000);
    let mut map = MetadataMap::new();
    let encoded = encode_push(&chain(&[LZMA, AES]), &data, &mut map);

    let decrypted = decode_pull(&chain(&[AES]), &encoded, &mut map).unwrap();
    assert_eq!(map.transform_mode(), [LZMA]);
    assert!(map.contains_key("uncompressed-size"));
    assert!(!map.contains_key("x-emc-enc-key-id"));
    assert_ne!(decrypted, data);

    let decoded = decode_push(&chain(&[LZMA]), &decrypted, &mut map).unwrap();
    assert_eq!(decoded, data);
    assert!(map.is_empty());
}

#[test]
fn test_decode_accepts_spaced_transform_list() {
    let chain = chain(&[LZMA, AES]);
    let data = payload(9_000);
    let mut map = MetadataMap::new();
    let encoded = encode_push(&chain, &data, &mut map);

    let mut entries = map.into_inner();
    let spaced = entries[TRANSFORM_MODE_KEY].replace(',', ", ");
    entries.insert(TRANSFORM_MODE_KEY.to_string(), spaced);
    entries.insert("owner".to_string(), "caller".to_string());
    let mut map = MetadataMap::from(entries);

    assert_eq!(decode_pull(&chain, &encoded, &mut map).unwrap(), data);
    assert_eq!(map.len(), 1);
    assert_eq!(map.get("owner"), Some("caller"));
}

#[test]
fn test_chain_mismatch() {
    let mut map = MetadataMap::new();
    let encoded = encode_push(&chain(&[LZMA]), b"mismatch", &mut map);
    let result = decode_pull(&chain(&[DEFLATE]), &encoded, &mut map);
    assert!(matches!(result, Err(Error::ChainMismatch { specs }) if specs == [LZMA]));
    assert_eq!(map.transform_mode(), [LZMA]);
}

#[test]
fn test_encode_metadata_plans_decode() {
    let chain = chain(&[DEFLATE, AES]);
    let mut map = MetadataMap::new();
    encode_push(&chain, &payload(777), &mut map);

    let records = chain.encode_metadata(&map).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].encode_spec().as_str(), DEFLATE);
    assert_eq!(records[1].encode_spec().as_str(), AES);
    assert!(records.iter().all(|r| r.is_complete()));
    assert!(records[0].as_compression().is_some());
    assert!(records[1].as_encryption().is_some());
}

#[test]
fn test_incomplete_metadata() {
    let chain = chain(&[LZMA]);
    let mut map = MetadataMap::new();
    encode_push(&chain, b"fields", &mut map);

    let mut entries = map.into_inner();
    entries.remove("compressed-size");
    let map = MetadataMap::from(entries);
    assert!(matches!(
        chain.encode_metadata(&map),
        Err(Error::IncompleteMetadata { field: "compressed-size", .. })
    ));
}

#[test]
fn test_encoded_size_prediction() {
    let encrypt = chain(&[AES]);
    assert!(encrypt.is_size_predictable());
    assert_eq!(encrypt.encoded_size(2_516_125).unwrap(), 2_516_128);
    assert_eq!(encrypt.encoded_size(2_516_128).unwrap(), 2_516_144);

    let data = payload(10_000);
    let mut map = MetadataMap::new();
    let encoded = encode_push(&encrypt, &data, &mut map);
    assert_eq!(encoded.len() as u64, encrypt.encoded_size(10_000).unwrap());

    let mixed = chain(&[LZMA, AES]);
    assert!(!mixed.is_size_predictable());
    assert!(matches!(
        mixed.encoded_size(10),
        Err(Error::SizeNotPredictable { spec }) if spec == LZMA
    ));
}

#[test]
fn test_unsupported_spec() {
    assert!(matches!(
        CodecChain::from_specs(["COMP:Zstd/3"]),
        Err(Error::UnsupportedSpec { .. })
    ));
    assert!(matches!(
        CodecChain::from_specs(["ENC:AES/GCM/NoPadding"]),
        Err(Error::UnsupportedSpec { .. })
    ));
}

#[test]
fn test_corrupted_payload_detected() {
    let chain = chain(&[DEFLATE]);
    let data = payload(8_000);
    let mut map = MetadataMap::new();
    encode_push(&chain, &data, &mut map);

    // Same metadata, different payload of the same length.
    let mut other = MetadataMap::new();
    let mut tampered = data.clone();
    tampered[100] ^= 0xFF;
    let encoded = encode_push(&chain, &tampered, &mut other);

    let err = decode_pull(&chain, &encoded, &mut map).unwrap_err();
    assert!(matches!(err, Error::DigestMismatch { .. }), "{err:?}");
    assert!(err.is_integrity_error());
}
