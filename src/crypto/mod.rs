//! Envelope encryption (`ENC:AES/CBC/PKCS5Padding`).
//!
//! Each object is encrypted with a fresh AES key. That key is wrapped with
//! RSA-OAEP under the key provider's master public key and stored, together
//! with the IV and the plaintext size and SHA-1, in [`EncryptionMetadata`].
//! The metadata is signed with the master private key once the stream has
//! closed. Rotating the master key ([`EncryptionCodec::rekey`]) rewraps the
//! object key without touching the ciphertext.

mod aes_cbc;
mod keys;
mod metadata;
mod properties;

use std::io::{self, Read, Write};
use std::sync::Arc;

pub use keys::{BasicKeyProvider, KeyPair, KeyProvider, MIN_KEY_BITS, fingerprint};
pub use metadata::{
    ENCRYPTION_PREFIX, EncryptionMetadata, IV_KEY, KEY_ID_KEY, OBJECT_KEY_KEY, SIGNATURE_KEY,
    UNENCRYPTED_SHA1_KEY, UNENCRYPTED_SIZE_KEY,
};
pub use properties::NoncePolicy;

use aes_cbc::{
    CbcDecryptReader, CbcDecryptWriter, CbcEncryptReader, CbcEncryptWriter, CbcState, padded_len,
};

use crate::checksum::{DigestReader, DigestWriter};
use crate::codec::{
    Codec, CodecProperties, ENCRYPTION_PRIORITY, ensure_decodable, ensure_encodable,
};
use crate::encode_spec::{EncodeSpec, TYPE_ENCRYPTION};
use crate::metadata::{Metadata, MetadataMap};
use crate::stream::{
    DecodeReader, DecodeWriter, EncodeListener, EncodeRead, EncodeReader, EncodeWrite,
    EncodeWriter, ReadFilter, Source, Target, WriteFilter, expected_payload,
};
use crate::{Error, Result};

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// The only supported cipher transformation.
pub const AES_CBC_PKCS5: &str = "AES/CBC/PKCS5Padding";

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "encryption stream is closed")
}

fn encryption_mut(metadata: &mut Metadata) -> Result<&mut EncryptionMetadata> {
    let spec = metadata.encode_spec().to_string();
    metadata.as_encryption_mut().ok_or(Error::InvalidSpec {
        spec,
        reason: "not an encryption spec",
    })
}

fn encryption(metadata: &Metadata) -> Result<&EncryptionMetadata> {
    metadata.as_encryption().ok_or_else(|| Error::InvalidSpec {
        spec: metadata.encode_spec().to_string(),
        reason: "not an encryption spec",
    })
}

/// Stamps the master key fingerprint and signs once the payload fields are set.
struct SigningListener {
    master: KeyPair,
}

impl EncodeListener for SigningListener {
    fn encode_complete(&self, metadata: &mut Metadata) -> Result<()> {
        let metadata = encryption_mut(metadata)?;
        metadata.set_master_key_fingerprint(self.master.fingerprint());
        metadata.sign(self.master.private_key())
    }
}

struct EncryptWriter {
    inner: Option<DigestWriter<CbcEncryptWriter<Target>>>,
    iv: [u8; BLOCK_SIZE],
}

impl Write for EncryptWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.as_mut().ok_or_else(closed_error)?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

impl EncodeWrite for EncryptWriter {
    fn finish(&mut self, metadata: &mut Metadata) -> Result<()> {
        let inner = self.inner.take().ok_or_else(closed_error)?;
        let (plaintext, cipher) = inner.into_parts();
        let mut target = Box::new(cipher).finish_filter()?;
        target.close()?;
        encryption_mut(metadata)?.set_payload(plaintext.bytes, plaintext.digest, self.iv);
        Ok(())
    }
}

struct EncryptReader {
    inner: Option<CbcEncryptReader<DigestReader<Source>>>,
    iv: [u8; BLOCK_SIZE],
}

impl Read for EncryptReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.as_mut().ok_or_else(closed_error)?.read(buf)
    }
}

impl EncodeRead for EncryptReader {
    fn finish(&mut self, metadata: &mut Metadata) -> Result<()> {
        let inner = self.inner.take().ok_or_else(closed_error)?;
        let (plaintext, mut source) = Box::new(inner).finish_filter()?.into_parts();
        source.close()?;
        encryption_mut(metadata)?.set_payload(plaintext.bytes, plaintext.digest, self.iv);
        Ok(())
    }
}

/// The envelope encryption codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncryptionCodec;

impl EncryptionCodec {
    /// Creates the codec.
    pub fn new() -> Self {
        Self
    }

    /// Generates the object key, wraps it and prepares the metadata.
    fn prepare(
        spec: &EncodeSpec,
        properties: &CodecProperties,
    ) -> Result<(CbcState, [u8; BLOCK_SIZE], EncryptionMetadata, KeyPair)> {
        let master = properties.require_key_provider()?.master_key();
        let (key, iv) = properties
            .nonce_policy
            .generate(properties.key_size as usize / 8)?;
        let mut metadata = EncryptionMetadata::new(spec.clone())?;
        metadata.wrap_key(&key, master.public_key())?;
        Ok((CbcState::new(key, iv)?, iv, metadata, master))
    }

    /// Resolves the wrapping key, checks the signature and recovers the cipher state.
    fn open(metadata: &Metadata, properties: &CodecProperties) -> Result<CbcState> {
        let metadata = encryption(metadata)?;
        let provider = properties.require_key_provider()?;
        let fingerprint = metadata
            .master_key_fingerprint()
            .ok_or(Error::IncompleteMetadata {
                codec: "encryption",
                field: KEY_ID_KEY,
            })?;
        let pair = provider
            .key(fingerprint)
            .ok_or_else(|| Error::KeyNotFound {
                fingerprint: fingerprint.to_string(),
            })?;
        metadata.verify_signature(pair.private_key())?;
        let key = metadata.unwrap_key(pair.private_key())?;
        let iv = metadata.init_vector().ok_or(Error::IncompleteMetadata {
            codec: "encryption",
            field: IV_KEY,
        })?;
        CbcState::new(key, iv)
    }

    /// Rewraps the object key of `metadata` under the current master key
    /// and re-signs it.
    ///
    /// # Errors
    ///
    /// - [`Error::NoRekeyNeeded`] if the metadata already uses the master key.
    /// - [`Error::KeyNotFound`] if the provider lacks the old key.
    /// - [`Error::SignatureMismatch`] if the existing signature does not verify.
    pub fn rekey_metadata(
        &self,
        metadata: &mut EncryptionMetadata,
        properties: &CodecProperties,
    ) -> Result<()> {
        let provider = properties.require_key_provider()?;
        let master = provider.master_key();
        let current = metadata
            .master_key_fingerprint()
            .ok_or(Error::IncompleteMetadata {
                codec: "encryption",
                field: KEY_ID_KEY,
            })?
            .to_string();
        if current == master.fingerprint() {
            return Err(Error::NoRekeyNeeded);
        }
        let old = provider.key(&current).ok_or_else(|| Error::KeyNotFound {
            fingerprint: current.clone(),
        })?;

        metadata.verify_signature(old.private_key())?;
        let object_key = metadata.unwrap_key(old.private_key())?;
        metadata.wrap_key(&object_key, master.public_key())?;
        metadata.set_master_key_fingerprint(master.fingerprint());
        metadata.sign(master.private_key())?;
        log::debug!("rekeyed object from {current} to {}", master.fingerprint());
        Ok(())
    }

    /// Rekeys the encryption entry of a persisted metadata map in place.
    ///
    /// The `ENC:` spec is located anywhere in the transform-mode list; other
    /// entries and caller keys are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotEncrypted`] if the list has no encryption spec,
    /// plus everything [`rekey_metadata`](Self::rekey_metadata) returns.
    pub fn rekey(&self, map: &mut MetadataMap, properties: &CodecProperties) -> Result<()> {
        let spec = map
            .transform_mode()
            .into_iter()
            .filter_map(|s| EncodeSpec::parse(s).ok())
            .find(|s| self.can_decode(s))
            .ok_or(Error::NotEncrypted)?;
        let mut metadata = EncryptionMetadata::from_map(spec, map)?;
        self.rekey_metadata(&mut metadata, properties)?;
        map.apply(&Metadata::Encryption(metadata));
        Ok(())
    }
}

impl Codec for EncryptionCodec {
    fn name(&self) -> &'static str {
        "encryption"
    }

    fn can_encode(&self, spec: &EncodeSpec) -> bool {
        spec.spec_type() == TYPE_ENCRYPTION && spec.algorithm() == AES_CBC_PKCS5
    }

    fn default_spec(&self) -> EncodeSpec {
        EncodeSpec::from_trusted(TYPE_ENCRYPTION, AES_CBC_PKCS5)
    }

    fn priority(&self) -> i32 {
        ENCRYPTION_PRIORITY
    }

    fn is_size_predictable(&self) -> bool {
        true
    }

    fn encoded_size(
        &self,
        original_size: u64,
        spec: &EncodeSpec,
        _properties: &CodecProperties,
    ) -> Result<u64> {
        ensure_encodable(self, spec)?;
        Ok(padded_len(original_size))
    }

    fn create_metadata(&self, spec: &EncodeSpec, map: &MetadataMap) -> Result<Metadata> {
        ensure_decodable(self, spec)?;
        Ok(Metadata::Encryption(EncryptionMetadata::from_map(
            spec.clone(),
            map,
        )?))
    }

    fn encode_writer(
        &self,
        target: Target,
        spec: &EncodeSpec,
        properties: &CodecProperties,
    ) -> Result<EncodeWriter> {
        ensure_encodable(self, spec)?;
        let (state, iv, metadata, master) = Self::prepare(spec, properties)?;
        let link = target.stage().cloned();
        let engine = EncryptWriter {
            iv,
            inner: Some(DigestWriter::new(CbcEncryptWriter::new(target, state))),
        };
        let mut writer = EncodeWriter::new(
            Box::new(engine),
            Metadata::Encryption(metadata),
            link.as_ref(),
        );
        writer.add_listener(Arc::new(SigningListener { master }));
        log::debug!("opened encode writer {spec}");
        Ok(writer)
    }

    fn encode_reader(
        &self,
        source: Source,
        spec: &EncodeSpec,
        properties: &CodecProperties,
    ) -> Result<EncodeReader> {
        ensure_encodable(self, spec)?;
        let (state, iv, metadata, master) = Self::prepare(spec, properties)?;
        let link = source.stage().cloned();
        let engine = EncryptReader {
            iv,
            inner: Some(CbcEncryptReader::new(DigestReader::new(source), state)),
        };
        let mut reader = EncodeReader::new(
            Box::new(engine),
            Metadata::Encryption(metadata),
            link.as_ref(),
        );
        reader.add_listener(Arc::new(SigningListener { master }));
        log::debug!("opened encode reader {spec}");
        Ok(reader)
    }

    fn decode_writer(
        &self,
        target: Target,
        metadata: &Metadata,
        properties: &CodecProperties,
    ) -> Result<DecodeWriter> {
        ensure_decodable(self, metadata.encode_spec())?;
        let expected = expected_payload(metadata)?;
        let state = Self::open(metadata, properties)?;
        log::debug!("opened decode writer {}", metadata.encode_spec());
        Ok(DecodeWriter::new(
            Box::new(CbcDecryptWriter::new(DigestWriter::new(target), state)),
            expected,
        ))
    }

    fn decode_reader(
        &self,
        source: Source,
        metadata: &Metadata,
        properties: &CodecProperties,
    ) -> Result<DecodeReader> {
        ensure_decodable(self, metadata.encode_spec())?;
        let expected = expected_payload(metadata)?;
        let state = Self::open(metadata, properties)?;
        log::debug!("opened decode reader {}", metadata.encode_spec());
        Ok(DecodeReader::new(
            Box::new(CbcDecryptReader::new(source, state)),
            expected,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{TransformRead, TransformWrite};
    use crate::test_util::{SharedBuffer, sample_payload, source};
    use std::sync::OnceLock;

    fn key(slot: usize) -> KeyPair {
        static KEYS: OnceLock<Vec<KeyPair>> = OnceLock::new();
        let keys = KEYS.get_or_init(|| (0..2).map(|_| KeyPair::generate(1024).unwrap()).collect());
        keys[slot].clone()
    }

    fn properties(master: KeyPair, others: Vec<KeyPair>) -> CodecProperties {
        let provider = BasicKeyProvider::with_keys(master, others).unwrap();
        CodecProperties::new().key_provider(Arc::new(provider))
    }

    fn spec() -> EncodeSpec {
        EncryptionCodec::new().default_spec()
    }

    fn encrypt(payload: &[u8], properties: &CodecProperties) -> (Vec<u8>, Metadata) {
        let encoded = SharedBuffer::default();
        let mut writer = EncryptionCodec::new()
            .encode_writer(encoded.target(), &spec(), properties)
            .unwrap();
        writer.write_all(payload).unwrap();
        writer.close().unwrap();
        (encoded.contents(), writer.metadata().unwrap().clone())
    }

    fn decrypt(data: &[u8], metadata: &Metadata, properties: &CodecProperties) -> Result<Vec<u8>> {
        let mut reader = EncryptionCodec::new().decode_reader(source(data), metadata, properties)?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        reader.close()?;
        Ok(out)
    }

    #[test]
    fn test_classify() {
        let codec = EncryptionCodec::new();
        assert_eq!(codec.default_spec().as_str(), "ENC:AES/CBC/PKCS5Padding");
        assert!(codec.can_encode(&spec()));
        assert!(!codec.can_encode(&EncodeSpec::parse("ENC:AES/GCM/NoPadding").unwrap()));
        assert!(!codec.can_encode(&EncodeSpec::parse("COMP:AES/CBC/PKCS5Padding").unwrap()));
        assert_eq!(codec.priority(), 1000);
    }

    #[test]
    fn test_encoded_size() {
        let codec = EncryptionCodec::new();
        let properties = CodecProperties::default();
        assert!(codec.is_size_predictable());
        assert_eq!(codec.encoded_size(2516125, &spec(), &properties).unwrap(), 2516128);
        assert_eq!(codec.encoded_size(0, &spec(), &properties).unwrap(), 16);
        assert_eq!(codec.encoded_size(32, &spec(), &properties).unwrap(), 48);
    }

    #[test]
    fn test_writer_roundtrip_and_metadata() {
        let properties = properties(key(0), vec![]);
        let payload = sample_payload(10_000);
        let (encrypted, metadata) = encrypt(&payload, &properties);

        assert_eq!(encrypted.len() as u64, padded_len(payload.len() as u64));
        assert!(metadata.is_complete());
        let enc = metadata.as_encryption().unwrap();
        assert_eq!(enc.master_key_fingerprint(), Some(key(0).fingerprint()));
        assert_eq!(enc.original_size(), Some(10_000));
        assert_eq!(decrypt(&encrypted, &metadata, &properties).unwrap(), payload);
    }

    #[test]
    fn test_reader_matches_writer_with_fixed_nonce() {
        let properties = properties(key(0), vec![])
            .nonce_policy(NoncePolicy::Deterministic { seed: [3; 32] })
            .key_size(256)
            .unwrap();
        let payload = sample_payload(5_000);
        let (from_writer, _) = encrypt(&payload, &properties);

        let mut reader = EncryptionCodec::new()
            .encode_reader(source(&payload), &spec(), &properties)
            .unwrap();
        let mut from_reader = Vec::new();
        reader.read_to_end(&mut from_reader).unwrap();
        reader.close().unwrap();
        assert_eq!(from_reader, from_writer);
        assert!(reader.metadata().unwrap().is_complete());
    }

    #[test]
    fn test_decode_writer() {
        let properties = properties(key(0), vec![]);
        let payload = sample_payload(3_333);
        let (encrypted, metadata) = encrypt(&payload, &properties);

        let decoded = SharedBuffer::default();
        let mut writer = EncryptionCodec::new()
            .decode_writer(decoded.target(), &metadata, &properties)
            .unwrap();
        writer.write_all(&encrypted).unwrap();
        writer.close().unwrap();
        assert_eq!(decoded.contents(), payload);
    }

    #[test]
    fn test_tampered_field_detected() {
        let properties = properties(key(0), vec![]);
        let (encrypted, metadata) = encrypt(b"secret", &properties);
        let mut map: MetadataMap = metadata.to_map().into_iter().collect();
        map.insert(UNENCRYPTED_SIZE_KEY, "7").unwrap();
        let tampered = EncryptionCodec::new().create_metadata(&spec(), &map).unwrap();
        assert!(matches!(
            decrypt(&encrypted, &tampered, &properties),
            Err(Error::SignatureMismatch)
        ));
    }

    #[test]
    fn test_unknown_key() {
        let (encrypted, metadata) = encrypt(b"secret", &properties(key(0), vec![]));
        assert!(matches!(
            decrypt(&encrypted, &metadata, &properties(key(1), vec![])),
            Err(Error::KeyNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_provider() {
        let result = EncryptionCodec::new().encode_writer(
            SharedBuffer::default().target(),
            &spec(),
            &CodecProperties::default(),
        );
        assert!(matches!(result, Err(Error::KeyProviderMissing)));
    }

    #[test]
    fn test_rekey_metadata() {
        let codec = EncryptionCodec::new();
        let (encrypted, metadata) = encrypt(b"rotate me", &properties(key(0), vec![]));
        let mut enc = metadata.as_encryption().unwrap().clone();
        let before = enc.clone();

        let rotated = properties(key(1), vec![key(0)]);
        codec.rekey_metadata(&mut enc, &rotated).unwrap();
        assert_eq!(enc.master_key_fingerprint(), Some(key(1).fingerprint()));
        assert_ne!(enc.encrypted_key(), before.encrypted_key());
        assert_ne!(enc.signature(), before.signature());

        let rekeyed = Metadata::Encryption(enc.clone());
        assert_eq!(
            decrypt(&encrypted, &rekeyed, &properties(key(1), vec![])).unwrap(),
            b"rotate me"
        );
        assert!(matches!(
            codec.rekey_metadata(&mut enc, &rotated),
            Err(Error::NoRekeyNeeded)
        ));
    }

    #[test]
    fn test_rekey_requires_old_key() {
        let (_, metadata) = encrypt(b"x", &properties(key(0), vec![]));
        let mut enc = metadata.as_encryption().unwrap().clone();
        assert!(matches!(
            EncryptionCodec::new().rekey_metadata(&mut enc, &properties(key(1), vec![])),
            Err(Error::KeyNotFound { .. })
        ));
    }

    #[test]
    fn test_rekey_unencrypted_map() {
        let mut map = MetadataMap::new();
        map.push_transform(&EncodeSpec::parse("COMP:LZMA/5").unwrap());
        assert!(matches!(
            EncryptionCodec::new().rekey(&mut map, &properties(key(0), vec![])),
            Err(Error::NotEncrypted)
        ));
    }
}
