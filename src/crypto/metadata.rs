//! Envelope encryption metadata and its detached signature.

use std::collections::BTreeMap;

use base64::Engine;
use base64::alphabet::URL_SAFE;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use rand::rngs::OsRng;
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::BLOCK_SIZE;
use crate::encode_spec::{EncodeSpec, TYPE_ENCRYPTION};
use crate::metadata::{MetadataMap, parse_digest, parse_size};
use crate::{Error, Result};

/// Prefix shared by every encryption field.
pub const ENCRYPTION_PREFIX: &str = "x-emc-enc-";
/// Fingerprint of the master key that wrapped the object key.
pub const KEY_ID_KEY: &str = "x-emc-enc-key-id";
/// Wrapped object key, base64url.
pub const OBJECT_KEY_KEY: &str = "x-emc-enc-object-key";
/// Initialization vector, base64url.
pub const IV_KEY: &str = "x-emc-enc-iv";
/// Plaintext size.
pub const UNENCRYPTED_SIZE_KEY: &str = "x-emc-enc-unencrypted-size";
/// Plaintext SHA-1, lowercase hex.
pub const UNENCRYPTED_SHA1_KEY: &str = "x-emc-enc-unencrypted-sha1";
/// Signature over the other encryption fields, base64url.
pub const SIGNATURE_KEY: &str = "x-emc-enc-metadata-signature";

const FIELD_KEYS: &[&str] = &[
    KEY_ID_KEY,
    OBJECT_KEY_KEY,
    IV_KEY,
    UNENCRYPTED_SIZE_KEY,
    UNENCRYPTED_SHA1_KEY,
    SIGNATURE_KEY,
];

const CODEC: &str = "encryption";

/// RFC 4648 base64url with padding; decoding accepts either form.
const BASE64_URL: GeneralPurpose = GeneralPurpose::new(
    &URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

fn decode_field(map: &MetadataMap, key: &'static str) -> Result<Vec<u8>> {
    BASE64_URL
        .decode(map.required(CODEC, key)?.trim())
        .map_err(|e| Error::InvalidMetadata {
            key: key.into(),
            reason: e.to_string(),
        })
}

fn crypto_error(context: &str, e: rsa::Error) -> Error {
    Error::CryptoError(format!("{context}: {e}"))
}

/// Fields recorded by the encryption codec.
///
/// Every field is unset until the encoding stream closes; the signature is
/// computed last, over the canonical rendering of the others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionMetadata {
    spec: EncodeSpec,
    init_vector: Option<[u8; BLOCK_SIZE]>,
    master_key_fingerprint: Option<String>,
    encrypted_key: Option<Vec<u8>>,
    original_size: Option<u64>,
    original_digest: Option<[u8; 20]>,
    signature: Option<String>,
}

impl EncryptionMetadata {
    /// Creates empty metadata for an encryption spec.
    pub fn new(spec: EncodeSpec) -> Result<Self> {
        if spec.spec_type() != TYPE_ENCRYPTION {
            return Err(Error::InvalidSpec {
                spec: spec.to_string(),
                reason: "not an encryption spec",
            });
        }
        Ok(Self {
            spec,
            init_vector: None,
            master_key_fingerprint: None,
            encrypted_key: None,
            original_size: None,
            original_digest: None,
            signature: None,
        })
    }

    /// Rebuilds metadata from a persisted map.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IncompleteMetadata`] if any encryption field is
    /// absent and [`Error::InvalidMetadata`] if one fails to parse.
    pub fn from_map(spec: EncodeSpec, map: &MetadataMap) -> Result<Self> {
        let mut metadata = Self::new(spec)?;

        let iv: [u8; BLOCK_SIZE] =
            decode_field(map, IV_KEY)?
                .try_into()
                .map_err(|iv: Vec<u8>| Error::InvalidMetadata {
                    key: IV_KEY.into(),
                    reason: format!("expected {BLOCK_SIZE} bytes, got {}", iv.len()),
                })?;
        metadata.init_vector = Some(iv);
        let fingerprint = map.required(CODEC, KEY_ID_KEY)?.trim();
        metadata.master_key_fingerprint = Some(fingerprint.to_string());
        metadata.encrypted_key = Some(decode_field(map, OBJECT_KEY_KEY)?);
        metadata.original_digest = Some(parse_digest(map, CODEC, UNENCRYPTED_SHA1_KEY)?);
        metadata.original_size = Some(parse_size(map, CODEC, UNENCRYPTED_SIZE_KEY)?);
        metadata.signature = Some(map.required(CODEC, SIGNATURE_KEY)?.trim().to_string());
        Ok(metadata)
    }

    /// Returns the encode spec.
    pub fn encode_spec(&self) -> &EncodeSpec {
        &self.spec
    }

    /// Returns the IV.
    pub fn init_vector(&self) -> Option<[u8; BLOCK_SIZE]> {
        self.init_vector
    }

    /// Returns the fingerprint of the key that wrapped the object key.
    pub fn master_key_fingerprint(&self) -> Option<&str> {
        self.master_key_fingerprint.as_deref()
    }

    /// Returns the wrapped object key.
    pub fn encrypted_key(&self) -> Option<&[u8]> {
        self.encrypted_key.as_deref()
    }

    /// Returns the plaintext size.
    pub fn original_size(&self) -> Option<u64> {
        self.original_size
    }

    /// Returns the plaintext SHA-1.
    pub fn original_digest(&self) -> Option<[u8; 20]> {
        self.original_digest
    }

    /// Returns the base64url signature.
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    /// Returns `true` once every field, including the signature, is set.
    pub fn is_complete(&self) -> bool {
        self.init_vector.is_some()
            && self.master_key_fingerprint.is_some()
            && self.encrypted_key.is_some()
            && self.original_size.is_some()
            && self.original_digest.is_some()
            && self.signature.is_some()
    }

    pub(crate) fn set_payload(&mut self, size: u64, digest: [u8; 20], iv: [u8; BLOCK_SIZE]) {
        self.original_size = Some(size);
        self.original_digest = Some(digest);
        self.init_vector = Some(iv);
    }

    pub(crate) fn set_master_key_fingerprint(&mut self, fingerprint: &str) {
        self.master_key_fingerprint = Some(fingerprint.to_string());
    }

    /// Renders the fields that are set.
    pub fn to_map(&self) -> BTreeMap<&'static str, String> {
        let mut map = BTreeMap::new();
        if let Some(fp) = &self.master_key_fingerprint {
            map.insert(KEY_ID_KEY, fp.clone());
        }
        if let Some(key) = &self.encrypted_key {
            map.insert(OBJECT_KEY_KEY, BASE64_URL.encode(key));
        }
        if let Some(iv) = &self.init_vector {
            map.insert(IV_KEY, BASE64_URL.encode(iv));
        }
        if let Some(size) = self.original_size {
            map.insert(UNENCRYPTED_SIZE_KEY, size.to_string());
        }
        if let Some(digest) = self.original_digest {
            map.insert(UNENCRYPTED_SHA1_KEY, hex::encode(digest));
        }
        if let Some(signature) = &self.signature {
            map.insert(SIGNATURE_KEY, signature.clone());
        }
        map
    }

    /// Keys this metadata writes into the flat map.
    pub fn field_keys() -> &'static [&'static str] {
        FIELD_KEYS
    }

    /// Renders the signed fields as sorted `key:value` lines.
    pub fn canonical_string(&self) -> String {
        let mut fields: Vec<(&str, String)> = self
            .to_map()
            .into_iter()
            .filter(|(key, _)| key.starts_with(ENCRYPTION_PREFIX) && *key != SIGNATURE_KEY)
            .collect();
        fields.sort_by_cached_key(|(key, _)| key.to_lowercase());
        let mut canonical = String::new();
        for (key, value) in fields {
            canonical.push_str(&key.to_lowercase());
            canonical.push(':');
            canonical.push_str(&value);
            canonical.push('\n');
        }
        log::trace!("canonical string: {canonical:?}");
        canonical
    }

    fn generate_signature(&self, key: &RsaPrivateKey) -> Result<String> {
        let hashed = Sha256::digest(self.canonical_string().as_bytes());
        let signature = key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &hashed)
            .map_err(|e| crypto_error("signing failed", e))?;
        Ok(BASE64_URL.encode(signature))
    }

    /// Signs the other fields with `key`.
    pub fn sign(&mut self, key: &RsaPrivateKey) -> Result<()> {
        self.signature = Some(self.generate_signature(key)?);
        Ok(())
    }

    /// Re-signs with `key` and compares against the stored signature.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SignatureMismatch`] if they differ or no signature
    /// is stored.
    pub fn verify_signature(&self, key: &RsaPrivateKey) -> Result<()> {
        let generated = self.generate_signature(key)?;
        match &self.signature {
            Some(stored) if *stored == generated => Ok(()),
            _ => {
                log::debug!("signature mismatch for key {:?}", self.master_key_fingerprint);
                Err(Error::SignatureMismatch)
            }
        }
    }

    /// Wraps `object_key` under `master` with RSA-OAEP (SHA-1).
    pub fn wrap_key(&mut self, object_key: &[u8], master: &RsaPublicKey) -> Result<()> {
        let wrapped = master
            .encrypt(&mut OsRng, Oaep::new::<sha1::Sha1>(), object_key)
            .map_err(|e| crypto_error("key wrap failed", e))?;
        self.encrypted_key = Some(wrapped);
        Ok(())
    }

    /// Recovers the object key with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IncompleteMetadata`] if no wrapped key is stored and
    /// [`Error::CryptoError`] if `key` cannot unwrap it.
    pub fn unwrap_key(&self, key: &RsaPrivateKey) -> Result<Zeroizing<Vec<u8>>> {
        let wrapped = self.encrypted_key.as_ref().ok_or(Error::IncompleteMetadata {
            codec: CODEC,
            field: OBJECT_KEY_KEY,
        })?;
        key.decrypt(Oaep::new::<sha1::Sha1>(), wrapped)
            .map(Zeroizing::new)
            .map_err(|e| crypto_error("key unwrap failed", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> EncodeSpec {
        EncodeSpec::parse("ENC:AES/CBC/PKCS5Padding").unwrap()
    }

    fn populated() -> EncryptionMetadata {
        let mut metadata = EncryptionMetadata::new(spec()).unwrap();
        metadata.set_payload(2516125, [0x02; 20], [0xFB; BLOCK_SIZE]);
        metadata.set_master_key_fingerprint("000317457b5645b7b5c4daf4cf6780c05438effd");
        metadata.encrypted_key = Some(vec![0xFF, 0xEE, 0x01]);
        metadata
    }

    #[test]
    fn test_canonical_string() {
        let canonical = populated().canonical_string();
        let lines: Vec<&str> = canonical.lines().collect();
        assert_eq!(
            lines,
            vec![
                "x-emc-enc-iv:-_v7-_v7-_v7-_v7-_v7-w==",
                "x-emc-enc-key-id:000317457b5645b7b5c4daf4cf6780c05438effd",
                "x-emc-enc-object-key:_-4B",
                "x-emc-enc-unencrypted-sha1:0202020202020202020202020202020202020202",
                "x-emc-enc-unencrypted-size:2516125",
            ]
        );
        assert!(canonical.ends_with('\n'));
    }

    #[test]
    fn test_to_map_only_set_fields() {
        let metadata = EncryptionMetadata::new(spec()).unwrap();
        assert!(metadata.to_map().is_empty());
        assert!(!metadata.is_complete());
        assert_eq!(populated().to_map().len(), 5);
    }

    #[test]
    fn test_from_map_roundtrip_and_missing() {
        let mut metadata = populated();
        metadata.signature = Some("c2ln".into());
        let map: MetadataMap = metadata.to_map().into_iter().collect();
        let parsed = EncryptionMetadata::from_map(spec(), &map).unwrap();
        assert_eq!(parsed, metadata);
        assert!(parsed.is_complete());

        let mut partial = map.clone();
        partial.remove(SIGNATURE_KEY).unwrap();
        assert!(matches!(
            EncryptionMetadata::from_map(spec(), &partial),
            Err(Error::IncompleteMetadata {
                field: SIGNATURE_KEY,
                ..
            })
        ));
    }

    #[test]
    fn test_from_map_rejects_short_iv() {
        let mut map: MetadataMap = populated().to_map().into_iter().collect();
        map.insert(IV_KEY, "AAEC").unwrap();
        assert!(matches!(
            EncryptionMetadata::from_map(spec(), &map),
            Err(Error::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn test_base64_accepts_unpadded() {
        assert_eq!(BASE64_URL.decode("-_v7").unwrap(), vec![0xFB, 0xFB, 0xFB]);
        assert_eq!(BASE64_URL.decode("_-4").unwrap(), vec![0xFF, 0xEE]);
        assert_eq!(BASE64_URL.decode("_-4=").unwrap(), vec![0xFF, 0xEE]);
    }

    #[test]
    fn test_rejects_compression_spec() {
        assert!(EncryptionMetadata::new(EncodeSpec::parse("COMP:LZMA/5").unwrap()).is_err());
    }
}
