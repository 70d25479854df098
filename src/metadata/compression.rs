//! Metadata recorded by compression codecs.

use std::collections::BTreeMap;

use crate::checksum::Tally;
use crate::encode_spec::{EncodeSpec, TYPE_COMPRESSION};
use crate::metadata::{MetadataMap, parse_digest, parse_size};
use crate::{Error, Result};

/// Size of the payload before compression.
pub const UNCOMPRESSED_SIZE_KEY: &str = "uncompressed-size";
/// Size of the compressed payload.
pub const COMPRESSED_SIZE_KEY: &str = "compressed-size";
/// Space saved, formatted as `95.2%`.
pub const COMPRESSION_RATIO_KEY: &str = "compression-ratio";
/// SHA-1 of the payload before compression, as 40 lowercase hex digits.
pub const UNCOMPRESSED_SHA1_KEY: &str = "uncompressed-sha1";

const FIELD_KEYS: &[&str] = &[
    UNCOMPRESSED_SIZE_KEY,
    COMPRESSED_SIZE_KEY,
    COMPRESSION_RATIO_KEY,
    UNCOMPRESSED_SHA1_KEY,
];

/// Sizes, ratio and digest recorded when a compression stream closes.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionMetadata {
    spec: EncodeSpec,
    original_size: u64,
    compressed_size: u64,
    compression_ratio: f64,
    original_digest: Option<[u8; 20]>,
}

impl CompressionMetadata {
    /// Creates empty metadata for a compression spec.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] if `spec` is not a `COMP:` spec.
    pub fn new(spec: EncodeSpec) -> Result<Self> {
        if spec.spec_type() != TYPE_COMPRESSION {
            return Err(Error::InvalidSpec {
                spec: spec.to_string(),
                reason: "not a compression spec",
            });
        }
        Ok(Self {
            spec,
            original_size: 0,
            compressed_size: 0,
            compression_ratio: 0.0,
            original_digest: None,
        })
    }

    /// Rebuilds metadata from a persisted map.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IncompleteMetadata`] if any of the four compression
    /// fields is absent and [`Error::InvalidMetadata`] if one fails to parse.
    pub fn from_map(spec: EncodeSpec, map: &MetadataMap) -> Result<Self> {
        let mut metadata = Self::new(spec)?;
        metadata.original_size = parse_size(map, "compression", UNCOMPRESSED_SIZE_KEY)?;
        metadata.compressed_size = parse_size(map, "compression", COMPRESSED_SIZE_KEY)?;

        let ratio = map.required("compression", COMPRESSION_RATIO_KEY)?;
        metadata.compression_ratio = ratio
            .strip_suffix('%')
            .unwrap_or(ratio)
            .trim()
            .parse()
            .map_err(|e: std::num::ParseFloatError| Error::InvalidMetadata {
                key: COMPRESSION_RATIO_KEY.into(),
                reason: e.to_string(),
            })?;

        metadata.original_digest = Some(parse_digest(map, "compression", UNCOMPRESSED_SHA1_KEY)?);
        Ok(metadata)
    }

    /// Records the final sizes and digest once the stream has closed.
    pub(crate) fn complete(&mut self, uncompressed: Tally, compressed_size: u64) {
        self.original_size = uncompressed.bytes;
        self.original_digest = Some(uncompressed.digest);
        self.compressed_size = compressed_size;
        if self.original_size > 0 && self.compressed_size > 0 {
            self.compression_ratio =
                100.0 - (self.compressed_size as f64 * 100.0 / self.original_size as f64);
        }
    }

    /// Returns the encode spec.
    pub fn encode_spec(&self) -> &EncodeSpec {
        &self.spec
    }

    /// Returns the uncompressed size.
    pub fn original_size(&self) -> u64 {
        self.original_size
    }

    /// Returns the compressed size.
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    /// Returns the percentage of space saved.
    pub fn compression_ratio(&self) -> f64 {
        self.compression_ratio
    }

    /// Returns the SHA-1 of the uncompressed payload.
    pub fn original_digest(&self) -> Option<[u8; 20]> {
        self.original_digest
    }

    /// Returns `true` once the stream has closed and the digest is known.
    pub fn is_complete(&self) -> bool {
        self.original_digest.is_some()
    }

    /// Renders the map fields owned by compression.
    pub fn to_map(&self) -> BTreeMap<&'static str, String> {
        let mut map = BTreeMap::new();
        map.insert(UNCOMPRESSED_SIZE_KEY, self.original_size.to_string());
        map.insert(COMPRESSED_SIZE_KEY, self.compressed_size.to_string());
        map.insert(
            COMPRESSION_RATIO_KEY,
            format!("{:.1}%", self.compression_ratio),
        );
        if let Some(digest) = self.original_digest {
            map.insert(UNCOMPRESSED_SHA1_KEY, hex::encode(digest));
        }
        map
    }

    /// Keys this metadata writes into the flat map.
    pub fn field_keys() -> &'static [&'static str] {
        FIELD_KEYS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{Checksum, Sha1};

    fn lzma_spec() -> EncodeSpec {
        EncodeSpec::parse("COMP:LZMA/5").unwrap()
    }

    #[test]
    fn test_ratio_formatting() {
        let mut metadata = CompressionMetadata::new(lzma_spec()).unwrap();
        metadata.complete(
            Tally {
                bytes: 2516125,
                digest: Sha1::compute(b"x"),
            },
            120338,
        );
        assert_eq!(metadata.to_map()[COMPRESSION_RATIO_KEY], "95.2%");
        assert!(metadata.is_complete());
    }

    #[test]
    fn test_ratio_zero_for_empty_input() {
        let mut metadata = CompressionMetadata::new(lzma_spec()).unwrap();
        metadata.complete(
            Tally {
                bytes: 0,
                digest: Sha1::compute(b""),
            },
            17,
        );
        assert_eq!(metadata.compression_ratio(), 0.0);
        assert_eq!(metadata.to_map()[COMPRESSION_RATIO_KEY], "0.0%");
    }

    #[test]
    fn test_incomplete_before_close() {
        let metadata = CompressionMetadata::new(lzma_spec()).unwrap();
        assert!(!metadata.is_complete());
        assert!(!metadata.to_map().contains_key(UNCOMPRESSED_SHA1_KEY));
    }

    #[test]
    fn test_rejects_encryption_spec() {
        let spec = EncodeSpec::parse("ENC:AES/CBC/PKCS5Padding").unwrap();
        assert!(CompressionMetadata::new(spec).is_err());
    }

    #[test]
    fn test_from_map() {
        let map: MetadataMap = [
            (UNCOMPRESSED_SIZE_KEY, "2516125"),
            (COMPRESSED_SIZE_KEY, "223548"),
            (COMPRESSION_RATIO_KEY, "91.1%"),
            (
                UNCOMPRESSED_SHA1_KEY,
                "027e997e6b1dfc97b93eb28dc9a6804096d85873",
            ),
        ]
        .into_iter()
        .collect();

        let metadata = CompressionMetadata::from_map(lzma_spec(), &map).unwrap();
        assert_eq!(metadata.original_size(), 2516125);
        assert_eq!(metadata.compressed_size(), 223548);
        assert!((metadata.compression_ratio() - 91.1).abs() < 1e-9);
        assert_eq!(
            hex::encode(metadata.original_digest().unwrap()),
            "027e997e6b1dfc97b93eb28dc9a6804096d85873"
        );
    }

    #[test]
    fn test_from_map_missing_field() {
        let map: MetadataMap = [(UNCOMPRESSED_SIZE_KEY, "10")].into_iter().collect();
        assert!(matches!(
            CompressionMetadata::from_map(lzma_spec(), &map),
            Err(Error::IncompleteMetadata {
                field: COMPRESSED_SIZE_KEY,
                ..
            })
        ));
    }
}
