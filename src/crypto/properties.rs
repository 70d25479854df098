//! Symmetric key and IV generation policy.

use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::BLOCK_SIZE;
use crate::{Error, Result};

/// Where the per-object symmetric key and IV come from.
///
/// | Use case | Policy |
/// |----------|--------|
/// | Production | [`Random`][Self::Random] (default) |
/// | Reproducible test vectors | [`Deterministic`][Self::Deterministic] |
/// | Externally managed key material | [`Explicit`][Self::Explicit] |
///
/// `Deterministic` and `Explicit` reuse the same key and IV for every
/// object and must not be used to protect real data.
#[derive(Clone, Default)]
pub enum NoncePolicy {
    /// Draw the key and IV from the operating system CSPRNG.
    #[default]
    Random,
    /// Derive the key and IV from a seed with SHA-256.
    Deterministic {
        /// Seed for deterministic generation.
        seed: [u8; 32],
    },
    /// Use caller-supplied key material.
    Explicit {
        /// Symmetric key; its length must match the configured key size.
        key: Zeroizing<Vec<u8>>,
        /// Initialization vector.
        iv: [u8; BLOCK_SIZE],
    },
}

impl std::fmt::Debug for NoncePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Random => f.write_str("Random"),
            Self::Deterministic { .. } => f.write_str("Deterministic"),
            Self::Explicit { key, .. } => f
                .debug_struct("Explicit")
                .field("key_bits", &(key.len() * 8))
                .finish_non_exhaustive(),
        }
    }
}

impl NoncePolicy {
    /// Creates an explicit policy.
    pub fn explicit(key: Vec<u8>, iv: [u8; BLOCK_SIZE]) -> Self {
        Self::Explicit {
            key: Zeroizing::new(key),
            iv,
        }
    }

    /// Generates a key of `key_len` bytes and an IV according to the policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKeySize`] if an explicit key has the wrong
    /// length and [`Error::CryptoError`] if the OS RNG fails.
    pub fn generate(&self, key_len: usize) -> Result<(Zeroizing<Vec<u8>>, [u8; BLOCK_SIZE])> {
        match self {
            Self::Random => {
                let mut key = Zeroizing::new(vec![0u8; key_len]);
                let mut iv = [0u8; BLOCK_SIZE];
                OsRng
                    .try_fill_bytes(&mut key)
                    .and_then(|()| OsRng.try_fill_bytes(&mut iv))
                    .map_err(|e| Error::CryptoError(format!("OS RNG failed: {e}")))?;
                Ok((key, iv))
            }
            Self::Deterministic { seed } => {
                let mut hasher = Sha256::new();
                hasher.update(seed);
                hasher.update(b"key");
                let key_hash = hasher.finalize();

                let mut hasher = Sha256::new();
                hasher.update(seed);
                hasher.update(b"iv");
                let iv_hash = hasher.finalize();

                let mut iv = [0u8; BLOCK_SIZE];
                iv.copy_from_slice(&iv_hash[..BLOCK_SIZE]);
                Ok((Zeroizing::new(key_hash[..key_len.min(32)].to_vec()), iv))
            }
            Self::Explicit { key, iv } => {
                if key.len() != key_len {
                    return Err(Error::InvalidKeySize {
                        bits: (key.len() * 8) as u32,
                    });
                }
                Ok((key.clone(), *iv))
            }
        }
    }
}
