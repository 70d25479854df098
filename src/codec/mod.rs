//! Codec abstraction, properties and per-thread registry.
//!
//! A [`Codec`] is one reversible transform (a compression algorithm or the
//! envelope encryption scheme). Chains look codecs up by encode spec in the
//! [`registry`], sort them by [`Codec::priority`] and ask each one for a
//! stream wrapping the previous one.

pub mod compression;

#[cfg(feature = "lzma")]
pub mod lzma;

#[cfg(feature = "deflate")]
pub mod deflate;

pub mod registry;

use std::fmt;
use std::sync::Arc;

use crate::crypto::{KeyProvider, NoncePolicy};
use crate::encode_spec::EncodeSpec;
use crate::metadata::{Metadata, MetadataMap};
use crate::stream::{DecodeReader, DecodeWriter, EncodeReader, EncodeWriter, Source, Target};
use crate::{Error, Result};

#[cfg(feature = "lzma")]
use lzma::LzmaProfile;

/// Priority of compression codecs; they wrap closest to the raw payload.
pub const COMPRESSION_PRIORITY: i32 = 100;

/// Priority of the encryption codec; it wraps outermost.
pub const ENCRYPTION_PRIORITY: i32 = 1000;

/// Default symmetric key size in bits.
pub const DEFAULT_KEY_SIZE: u32 = 128;

/// Default capacity of the pipe feeding blocking bulk codecs (64 KiB).
pub const DEFAULT_PIPE_BUFFER_SIZE: usize = 64 * 1024;

/// A reversible transform usable in a [`CodecChain`](crate::CodecChain).
///
/// Implementations are stateless and shared between chains; all per-object
/// state lives in the streams they open and the [`Metadata`] they produce.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Short codec name for logs.
    fn name(&self) -> &'static str;

    /// Returns `true` if this codec can produce `spec`.
    fn can_encode(&self, spec: &EncodeSpec) -> bool;

    /// Returns `true` if this codec can reverse `spec`.
    fn can_decode(&self, spec: &EncodeSpec) -> bool {
        self.can_encode(spec)
    }

    /// Spec used when a chain does not override it.
    fn default_spec(&self) -> EncodeSpec;

    /// Chain ordering key; lower priorities wrap closer to the raw payload.
    fn priority(&self) -> i32;

    /// Returns `true` if [`encoded_size`](Self::encoded_size) can be
    /// computed without processing the data.
    fn is_size_predictable(&self) -> bool;

    /// Computes the encoded size of a payload of `original_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SizeNotPredictable`] for codecs whose output size
    /// depends on the data.
    fn encoded_size(
        &self,
        original_size: u64,
        spec: &EncodeSpec,
        properties: &CodecProperties,
    ) -> Result<u64>;

    /// Returns the payload size before this codec was applied.
    fn decoded_size(&self, metadata: &Metadata) -> Result<u64> {
        metadata.original_size().ok_or(Error::StreamNotClosed)
    }

    /// Rebuilds this codec's metadata for `spec` from a persisted map.
    fn create_metadata(&self, spec: &EncodeSpec, map: &MetadataMap) -> Result<Metadata>;

    /// Opens a writer that encodes into `target`.
    fn encode_writer(
        &self,
        target: Target,
        spec: &EncodeSpec,
        properties: &CodecProperties,
    ) -> Result<EncodeWriter>;

    /// Opens a reader that yields the encoded form of `source`.
    fn encode_reader(
        &self,
        source: Source,
        spec: &EncodeSpec,
        properties: &CodecProperties,
    ) -> Result<EncodeReader>;

    /// Opens a writer that decodes into `target`.
    fn decode_writer(
        &self,
        target: Target,
        metadata: &Metadata,
        properties: &CodecProperties,
    ) -> Result<DecodeWriter>;

    /// Opens a reader that yields the decoded form of `source`.
    fn decode_reader(
        &self,
        source: Source,
        metadata: &Metadata,
        properties: &CodecProperties,
    ) -> Result<DecodeReader>;
}

/// Fails unless `codec` claims `spec` for encoding.
pub(crate) fn ensure_encodable(codec: &dyn Codec, spec: &EncodeSpec) -> Result<()> {
    if codec.can_encode(spec) {
        Ok(())
    } else {
        Err(Error::UnsupportedSpec {
            spec: spec.to_string(),
        })
    }
}

/// Fails unless `codec` claims `spec` for decoding.
pub(crate) fn ensure_decodable(codec: &dyn Codec, spec: &EncodeSpec) -> Result<()> {
    if codec.can_decode(spec) {
        Ok(())
    } else {
        Err(Error::UnsupportedSpec {
            spec: spec.to_string(),
        })
    }
}

/// Options passed to every codec in a chain.
///
/// # Example
///
/// ```rust
/// use objcodec::CodecProperties;
///
/// let properties = CodecProperties::new()
///     .key_size(256)?
///     .pipe_buffer_size(128 * 1024);
/// assert_eq!(properties.key_size, 256);
/// # Ok::<(), objcodec::Error>(())
/// ```
#[derive(Clone)]
pub struct CodecProperties {
    /// Symmetric key size in bits (128, 192 or 256).
    pub key_size: u32,
    /// Source of the master key and older decryption keys.
    pub key_provider: Option<Arc<dyn KeyProvider>>,
    /// Where symmetric keys and IVs come from.
    pub nonce_policy: NoncePolicy,
    /// Capacity of the pipe feeding blocking bulk codecs.
    pub pipe_buffer_size: usize,
    /// Overrides the LZMA level table.
    #[cfg(feature = "lzma")]
    pub lzma_profile: Option<LzmaProfile>,
}

impl Default for CodecProperties {
    fn default() -> Self {
        Self {
            key_size: DEFAULT_KEY_SIZE,
            key_provider: None,
            nonce_policy: NoncePolicy::default(),
            pipe_buffer_size: DEFAULT_PIPE_BUFFER_SIZE,
            #[cfg(feature = "lzma")]
            lzma_profile: None,
        }
    }
}

impl fmt::Debug for CodecProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("CodecProperties");
        s.field("key_size", &self.key_size)
            .field(
                "master_key",
                &self
                    .key_provider
                    .as_ref()
                    .map(|p| p.master_key_fingerprint().to_string()),
            )
            .field("nonce_policy", &self.nonce_policy)
            .field("pipe_buffer_size", &self.pipe_buffer_size);
        #[cfg(feature = "lzma")]
        s.field("lzma_profile", &self.lzma_profile);
        s.finish()
    }
}

impl CodecProperties {
    /// Creates properties with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the symmetric key size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKeySize`] unless `bits` is 128, 192 or 256.
    pub fn key_size(mut self, bits: u32) -> Result<Self> {
        if !matches!(bits, 128 | 192 | 256) {
            return Err(Error::InvalidKeySize { bits });
        }
        self.key_size = bits;
        Ok(self)
    }

    /// Sets the key provider.
    pub fn key_provider(mut self, provider: Arc<dyn KeyProvider>) -> Self {
        self.key_provider = Some(provider);
        self
    }

    /// Sets the key and IV generation policy.
    pub fn nonce_policy(mut self, policy: NoncePolicy) -> Self {
        self.nonce_policy = policy;
        self
    }

    /// Sets the pipe capacity for blocking bulk codecs. Zero is clamped to one.
    pub fn pipe_buffer_size(mut self, bytes: usize) -> Self {
        self.pipe_buffer_size = bytes.max(1);
        self
    }

    /// Overrides the LZMA level table with a fixed profile.
    #[cfg(feature = "lzma")]
    pub fn lzma_profile(mut self, profile: LzmaProfile) -> Self {
        self.lzma_profile = Some(profile);
        self
    }

    /// Returns the key provider or fails if none is configured.
    pub(crate) fn require_key_provider(&self) -> Result<&Arc<dyn KeyProvider>> {
        self.key_provider.as_ref().ok_or(Error::KeyProviderMissing)
    }
}
