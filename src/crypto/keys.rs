//! RSA key pairs, fingerprints and key providers.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};

use crate::{Error, Result};

/// Smallest RSA modulus accepted by [`BasicKeyProvider`].
pub const MIN_KEY_BITS: usize = 1024;

/// An RSA key pair with its precomputed fingerprint.
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
    fingerprint: String,
}

impl KeyPair {
    /// Wraps a private key.
    pub fn new(private: RsaPrivateKey) -> Self {
        let public = private.to_public_key();
        let fingerprint = fingerprint(&public);
        Self {
            private,
            public,
            fingerprint,
        }
    }

    /// Generates a fresh key pair with a `bits`-bit modulus.
    pub fn generate(bits: usize) -> Result<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| Error::CryptoError(format!("RSA key generation failed: {e}")))?;
        Ok(Self::new(private))
    }

    /// Loads a PKCS#8 DER private key.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        RsaPrivateKey::from_pkcs8_der(der)
            .map(Self::new)
            .map_err(|e| Error::CryptoError(format!("invalid PKCS#8 key: {e}")))
    }

    /// Loads a PKCS#8 PEM private key.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        RsaPrivateKey::from_pkcs8_pem(pem)
            .map(Self::new)
            .map_err(|e| Error::CryptoError(format!("invalid PKCS#8 key: {e}")))
    }

    /// Loads a key pair from base64 X.509 SubjectPublicKeyInfo and PKCS#8
    /// private key material, checking that the two halves match.
    pub fn from_base64(public_key: &str, private_key: &str) -> Result<Self> {
        let decode = |text: &str| {
            STANDARD
                .decode(text.trim())
                .map_err(|e| Error::CryptoError(format!("invalid base64 key material: {e}")))
        };
        let public = RsaPublicKey::from_public_key_der(&decode(public_key)?)
            .map_err(|e| Error::CryptoError(format!("invalid public key: {e}")))?;
        let pair = Self::from_pkcs8_der(&decode(private_key)?)?;
        if pair.public != public {
            return Err(Error::CryptoError(
                "public key does not match private key".into(),
            ));
        }
        Ok(pair)
    }

    /// Returns the private key.
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// Returns the public key.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Returns the 40-digit lowercase hex fingerprint of the public key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Returns the modulus size in bits.
    pub fn bits(&self) -> usize {
        self.public.n().bits()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.bits())
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Computes the SHA-1 fingerprint of an RSA public key.
///
/// The key is DER-encoded as `SEQUENCE { INTEGER modulus, INTEGER exponent }`
/// with minimal lengths; this matches the X.509 subject key identifier.
pub fn fingerprint(key: &RsaPublicKey) -> String {
    let mut body = der_integer(&key.n().to_bytes_be());
    body.extend(der_integer(&key.e().to_bytes_be()));
    let encoded = der_tlv(0x30, &body);
    hex::encode(Sha1::digest(&encoded))
}

fn der_integer(magnitude: &[u8]) -> Vec<u8> {
    let start = magnitude
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(magnitude.len().saturating_sub(1));
    let trimmed = &magnitude[start.min(magnitude.len())..];
    let mut content = Vec::with_capacity(trimmed.len() + 1);
    if trimmed.first().is_none_or(|&b| b & 0x80 != 0) {
        content.push(0);
    }
    content.extend_from_slice(trimmed);
    der_tlv(0x02, &content)
}

fn der_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(content);
    out
}

/// Resolves RSA key pairs by fingerprint.
///
/// One pair is the master key used to wrap new object keys; any number of
/// older pairs may be kept so existing objects can still be decrypted or
/// rekeyed.
pub trait KeyProvider: Send + Sync + fmt::Debug {
    /// Returns the current master key pair.
    fn master_key(&self) -> KeyPair;

    /// Returns the master key fingerprint.
    fn master_key_fingerprint(&self) -> String {
        self.master_key().fingerprint().to_string()
    }

    /// Returns the key pair with `fingerprint`, if known.
    fn key(&self, fingerprint: &str) -> Option<KeyPair>;
}

#[derive(Debug)]
struct Keys {
    master: KeyPair,
    others: HashMap<String, KeyPair>,
}

/// An in-memory [`KeyProvider`].
///
/// # Example
///
/// ```rust,no_run
/// use objcodec::{BasicKeyProvider, KeyPair};
///
/// let master = KeyPair::generate(2048)?;
/// let provider = BasicKeyProvider::new(master)?;
/// assert!(!provider.is_weak());
/// # Ok::<(), objcodec::Error>(())
/// ```
#[derive(Debug)]
pub struct BasicKeyProvider {
    keys: RwLock<Keys>,
    weak: bool,
}

fn check_key_length(pair: &KeyPair) -> Result<bool> {
    let bits = pair.bits();
    if bits < MIN_KEY_BITS {
        return Err(Error::WeakKeyRejected {
            bits,
            minimum: MIN_KEY_BITS,
        });
    }
    if bits == MIN_KEY_BITS {
        log::warn!(
            "accepting {bits}-bit RSA key {}; use at least 2048 bits",
            pair.fingerprint()
        );
        return Ok(true);
    }
    Ok(false)
}

impl BasicKeyProvider {
    /// Creates a provider with `master` as the current master key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WeakKeyRejected`] for moduli under 1024 bits.
    pub fn new(master: KeyPair) -> Result<Self> {
        let weak = check_key_length(&master)?;
        log::debug!("master key {}", master.fingerprint());
        Ok(Self {
            keys: RwLock::new(Keys {
                master,
                others: HashMap::new(),
            }),
            weak,
        })
    }

    /// Creates a provider that also holds older decryption keys.
    pub fn with_keys(
        master: KeyPair,
        decryption_keys: impl IntoIterator<Item = KeyPair>,
    ) -> Result<Self> {
        let provider = Self::new(master)?;
        for pair in decryption_keys {
            provider.add_key(pair)?;
        }
        Ok(provider)
    }

    /// Returns `true` if the master key is exactly 1024 bits.
    pub fn is_weak(&self) -> bool {
        self.weak
    }

    fn read(&self) -> RwLockReadGuard<'_, Keys> {
        self.keys.read().unwrap_or_else(|poisoned| {
            log::warn!("key provider lock was poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Keys> {
        self.keys.write().unwrap_or_else(|poisoned| {
            log::warn!("key provider lock was poisoned; recovering");
            poisoned.into_inner()
        })
    }

    /// Adds a decryption key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WeakKeyRejected`] for moduli under 1024 bits.
    pub fn add_key(&self, pair: KeyPair) -> Result<()> {
        check_key_length(&pair)?;
        log::debug!("adding decryption key {}", pair.fingerprint());
        let mut keys = self.write();
        if pair.fingerprint() != keys.master.fingerprint() {
            keys.others.insert(pair.fingerprint().to_string(), pair);
        }
        Ok(())
    }

    /// Removes a decryption key. The master key cannot be removed.
    pub fn remove_key(&self, fingerprint: &str) -> Option<KeyPair> {
        self.write().others.remove(fingerprint)
    }

    /// Returns the fingerprints of all known keys, master first.
    pub fn fingerprints(&self) -> Vec<String> {
        let keys = self.read();
        let mut out = vec![keys.master.fingerprint().to_string()];
        out.extend(keys.others.keys().cloned());
        out
    }

    /// Wraps the provider for use in [`CodecProperties`](crate::CodecProperties).
    pub fn into_shared(self) -> Arc<dyn KeyProvider> {
        Arc::new(self)
    }
}

impl KeyProvider for BasicKeyProvider {
    fn master_key(&self) -> KeyPair {
        self.read().master.clone()
    }

    fn master_key_fingerprint(&self) -> String {
        self.read().master.fingerprint().to_string()
    }

    fn key(&self, fingerprint: &str) -> Option<KeyPair> {
        let keys = self.read();
        if keys.master.fingerprint() == fingerprint {
            return Some(keys.master.clone());
        }
        keys.others.get(fingerprint).cloned()
    }
}
