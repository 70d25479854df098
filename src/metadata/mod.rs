//! Codec metadata and the flat metadata map.
//!
//! Every codec in a chain records side-channel data (sizes, digests, wrapped
//! keys) that is needed to reverse its transform later. The records are
//! typed ([`Metadata`]) while a chain is running and flattened into a single
//! string map ([`MetadataMap`]) that the caller persists alongside the
//! object, for example as HTTP headers.
//!
//! The map reserves one key, [`TRANSFORM_MODE_KEY`], for the comma-joined
//! list of applied encode specs (outermost last). Codec-owned fields are
//! only added or removed by the chain, and removal during decode is limited
//! to the keys the decoded codecs own, so caller keys are never touched.

mod compression;

pub use compression::{
    COMPRESSED_SIZE_KEY, COMPRESSION_RATIO_KEY, CompressionMetadata, UNCOMPRESSED_SHA1_KEY,
    UNCOMPRESSED_SIZE_KEY,
};

use std::collections::{BTreeMap, HashMap};

use crate::crypto::EncryptionMetadata;
use crate::encode_spec::EncodeSpec;
use crate::{Error, Result};

/// Reserved key holding the comma-joined transform-mode list.
pub const TRANSFORM_MODE_KEY: &str = "x-emc-transform-mode";

/// Metadata produced by one codec.
#[derive(Debug, Clone, PartialEq)]
pub enum Metadata {
    /// Compression sizes, ratio and digest.
    Compression(CompressionMetadata),
    /// Envelope encryption fields.
    Encryption(EncryptionMetadata),
}

impl Metadata {
    /// Returns the spec of the codec that produced this record.
    pub fn encode_spec(&self) -> &EncodeSpec {
        match self {
            Metadata::Compression(m) => m.encode_spec(),
            Metadata::Encryption(m) => m.encode_spec(),
        }
    }

    /// Returns `true` once every field has been populated.
    pub fn is_complete(&self) -> bool {
        match self {
            Metadata::Compression(m) => m.is_complete(),
            Metadata::Encryption(m) => m.is_complete(),
        }
    }

    /// Renders the populated fields as map entries.
    pub fn to_map(&self) -> BTreeMap<&'static str, String> {
        match self {
            Metadata::Compression(m) => m.to_map(),
            Metadata::Encryption(m) => m.to_map(),
        }
    }

    /// Keys this record owns in the flat map.
    pub fn field_keys(&self) -> &'static [&'static str] {
        match self {
            Metadata::Compression(_) => CompressionMetadata::field_keys(),
            Metadata::Encryption(_) => EncryptionMetadata::field_keys(),
        }
    }

    /// Returns the size of the payload before this codec was applied.
    pub fn original_size(&self) -> Option<u64> {
        match self {
            Metadata::Compression(m) => m.is_complete().then(|| m.original_size()),
            Metadata::Encryption(m) => m.original_size(),
        }
    }

    /// Returns the SHA-1 of the payload before this codec was applied.
    pub fn original_digest(&self) -> Option<[u8; 20]> {
        match self {
            Metadata::Compression(m) => m.original_digest(),
            Metadata::Encryption(m) => m.original_digest(),
        }
    }

    /// Returns the compression record, if this is one.
    pub fn as_compression(&self) -> Option<&CompressionMetadata> {
        match self {
            Metadata::Compression(m) => Some(m),
            Metadata::Encryption(_) => None,
        }
    }

    /// Returns the compression record mutably, if this is one.
    pub fn as_compression_mut(&mut self) -> Option<&mut CompressionMetadata> {
        match self {
            Metadata::Compression(m) => Some(m),
            Metadata::Encryption(_) => None,
        }
    }

    /// Returns the encryption record, if this is one.
    pub fn as_encryption(&self) -> Option<&EncryptionMetadata> {
        match self {
            Metadata::Encryption(m) => Some(m),
            Metadata::Compression(_) => None,
        }
    }

    /// Returns the encryption record mutably, if this is one.
    pub fn as_encryption_mut(&mut self) -> Option<&mut EncryptionMetadata> {
        match self {
            Metadata::Encryption(m) => Some(m),
            Metadata::Compression(_) => None,
        }
    }
}

/// The flat string map persisted alongside an encoded object.
///
/// # Example
///
/// ```rust
/// use objcodec::MetadataMap;
///
/// let mut map = MetadataMap::new();
/// map.insert("content-type", "text/plain").unwrap();
/// assert!(map.insert("x-emc-transform-mode", "COMP:LZMA/5").is_err());
/// assert!(map.transform_mode().is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataMap {
    entries: BTreeMap<String, String>,
}

impl MetadataMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `key` is reserved for the chain.
    pub fn is_reserved(key: &str) -> bool {
        key == TRANSFORM_MODE_KEY
    }

    /// Returns the value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Returns `true` if the map holds `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts a caller-owned entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReservedKey`] for the transform-mode key.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Option<String>> {
        let key = key.into();
        if Self::is_reserved(&key) {
            return Err(Error::ReservedKey(key));
        }
        Ok(self.entries.insert(key, value.into()))
    }

    /// Removes a caller-owned entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReservedKey`] for the transform-mode key.
    pub fn remove(&mut self, key: &str) -> Result<Option<String>> {
        if Self::is_reserved(key) {
            return Err(Error::ReservedKey(key.to_string()));
        }
        Ok(self.entries.remove(key))
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Consumes the map and returns the wire-format entries.
    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.entries
    }

    /// Returns the applied encode specs, outermost last.
    pub fn transform_mode(&self) -> Vec<&str> {
        match self.get(TRANSFORM_MODE_KEY) {
            Some(list) if !list.trim().is_empty() => list.split(',').map(str::trim).collect(),
            _ => Vec::new(),
        }
    }

    /// Returns the value for a codec field or reports it missing.
    pub(crate) fn required(&self, codec: &'static str, key: &'static str) -> Result<&str> {
        self.get(key)
            .ok_or(Error::IncompleteMetadata { codec, field: key })
    }

    /// Appends a spec to the transform-mode list.
    pub(crate) fn push_transform(&mut self, spec: &EncodeSpec) {
        let list = match self.entries.get(TRANSFORM_MODE_KEY) {
            Some(existing) if !existing.trim().is_empty() => format!("{existing},{spec}"),
            _ => spec.to_string(),
        };
        self.entries.insert(TRANSFORM_MODE_KEY.to_string(), list);
    }

    /// Removes a spec from the tail of the transform-mode list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMetadata`] if the list does not end with `spec`.
    pub(crate) fn pop_transform(&mut self, spec: &EncodeSpec) -> Result<()> {
        let mut list = self.transform_mode();
        if list.last() != Some(&spec.as_str()) {
            return Err(Error::InvalidMetadata {
                key: TRANSFORM_MODE_KEY.into(),
                reason: format!("list '{}' does not end with {spec}", list.join(",")),
            });
        }
        list.pop();
        let rest = list.join(",");
        if rest.is_empty() {
            self.entries.remove(TRANSFORM_MODE_KEY);
        } else {
            self.entries.insert(TRANSFORM_MODE_KEY.to_string(), rest);
        }
        Ok(())
    }

    /// Merges a codec's fields into the map.
    pub(crate) fn apply(&mut self, metadata: &Metadata) {
        for (key, value) in metadata.to_map() {
            self.entries.insert(key.to_string(), value);
        }
    }

    /// Removes the fields a codec owns, leaving every other key alone.
    pub(crate) fn retract(&mut self, metadata: &Metadata) {
        for key in metadata.field_keys() {
            self.entries.remove(*key);
        }
    }
}

impl From<HashMap<String, String>> for MetadataMap {
    fn from(entries: HashMap<String, String>) -> Self {
        entries.into_iter().collect()
    }
}

impl From<BTreeMap<String, String>> for MetadataMap {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }
}

impl From<MetadataMap> for HashMap<String, String> {
    fn from(map: MetadataMap) -> Self {
        map.entries.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MetadataMap {
    /// Builds a map from persisted entries, including reserved keys.
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Parses a required decimal size field.
pub(crate) fn parse_size(map: &MetadataMap, codec: &'static str, key: &'static str) -> Result<u64> {
    map.required(codec, key)?
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| Error::InvalidMetadata {
            key: key.into(),
            reason: e.to_string(),
        })
}

/// Parses a required 40-digit hex SHA-1 field.
pub(crate) fn parse_digest(
    map: &MetadataMap,
    codec: &'static str,
    key: &'static str,
) -> Result<[u8; 20]> {
    let mut digest = [0u8; 20];
    hex::decode_to_slice(map.required(codec, key)?.trim(), &mut digest).map_err(|e| {
        Error::InvalidMetadata {
            key: key.into(),
            reason: e.to_string(),
        }
    })?;
    Ok(digest)
}
