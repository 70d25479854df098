//! Error types for codec chain operations.
//!
//! This module provides the [`Error`] enum which represents all possible
//! failure modes when encoding or decoding object payloads, along with a
//! convenient [`Result<T>`] type alias.
//!
//! # Error Handling
//!
//! All fallible operations in this crate return `Result<T, Error>`. Stream
//! types implement [`std::io::Read`] and [`std::io::Write`], so failures that
//! happen inside a `read` or `write` call travel as an [`io::Error`] carrying
//! the typed [`Error`]. Converting that `io::Error` back with `?` or
//! [`From`] recovers the original variant:
//!
//! ```rust,no_run
//! use std::io::Write;
//! use objcodec::{CodecChain, Error, MetadataMap};
//!
//! fn encode(payload: &[u8]) -> objcodec::Result<(Vec<u8>, MetadataMap)> {
//!     let chain = CodecChain::from_specs(["COMP:Deflate/5"])?;
//!     let mut metadata = MetadataMap::new();
//!     let mut writer = chain.encode_writer(Vec::new(), &mut metadata)?;
//!     writer.write_all(payload)?;
//!     let encoded = writer.finish()?;
//!     Ok((encoded, metadata))
//! }
//!
//! match encode(b"payload") {
//!     Ok(_) => {}
//!     Err(Error::UnsupportedSpec { spec }) => eprintln!("no codec for {spec}"),
//!     Err(e) => eprintln!("encode failed: {e}"),
//! }
//! ```

use std::io;

/// The main error type for codec chain operations.
///
/// # Error Categories
///
/// | Category | Variants | Typical Cause |
/// |----------|----------|---------------|
/// | I/O | [`Io`][Self::Io] | Sink or source failures |
/// | Configuration | [`UnsupportedSpec`][Self::UnsupportedSpec], [`InvalidSpec`][Self::InvalidSpec], [`InvalidKeySize`][Self::InvalidKeySize], [`InvalidLiteralBits`][Self::InvalidLiteralBits] | Bad chain setup |
/// | Metadata | [`IncompleteMetadata`][Self::IncompleteMetadata], [`InvalidMetadata`][Self::InvalidMetadata], [`ChainMismatch`][Self::ChainMismatch] | Persisted metadata does not fit the chain |
/// | Keys | [`KeyNotFound`][Self::KeyNotFound], [`WeakKeyRejected`][Self::WeakKeyRejected], [`NoRekeyNeeded`][Self::NoRekeyNeeded] | Key provider state |
/// | Integrity | [`SignatureMismatch`][Self::SignatureMismatch], [`DigestMismatch`][Self::DigestMismatch], [`SizeMismatch`][Self::SizeMismatch] | Tampering or corruption |
/// | Workers | [`AdapterWorkerFailure`][Self::AdapterWorkerFailure] | Background codec thread failed |
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred on the underlying sink or source.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// No codec claims the given encode spec.
    #[error("unsupported encoder: {spec}")]
    UnsupportedSpec {
        /// The spec that could not be resolved.
        spec: String,
    },

    /// The transform-mode list names specs this chain's codecs cannot decode.
    #[error("this codec chain cannot decode the following encode list: {}", specs.join(","))]
    ChainMismatch {
        /// The tail of the transform-mode list the chain was asked to decode.
        specs: Vec<String>,
    },

    /// An encode spec string is malformed.
    #[error("invalid encode spec '{spec}': {reason}")]
    InvalidSpec {
        /// The offending spec.
        spec: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A compression level outside 0-9 was requested.
    #[error("invalid compression level {level}: must be 0-9")]
    InvalidCompressionLevel {
        /// The requested level.
        level: u32,
    },

    /// A symmetric key size other than 128, 192 or 256 bits was requested.
    #[error("invalid key size {bits}: must be 128, 192 or 256 bits")]
    InvalidKeySize {
        /// The requested size in bits.
        bits: u32,
    },

    /// LZMA literal-context, literal-position or position bits out of range.
    #[error("invalid LZMA bits lc={lc} lp={lp} pb={pb}: need lc <= 8, lp <= 4, pb <= 4")]
    InvalidLiteralBits {
        /// Literal context bits.
        lc: u32,
        /// Literal position bits.
        lp: u32,
        /// Position bits.
        pb: u32,
    },

    /// A metadata field required to rebuild a codec's metadata is missing.
    #[error("incomplete {codec} metadata: no {field} set on object")]
    IncompleteMetadata {
        /// Codec family that needed the field.
        codec: &'static str,
        /// The missing field.
        field: &'static str,
    },

    /// A metadata field is present but cannot be parsed.
    #[error("invalid metadata value for {key}: {reason}")]
    InvalidMetadata {
        /// The map key holding the bad value.
        key: String,
        /// Parse failure detail.
        reason: String,
    },

    /// A reserved metadata key was written through the caller-facing API.
    #[error("metadata key '{0}' is reserved")]
    ReservedKey(String),

    /// Metadata was requested from a stream that has not been closed yet.
    #[error("metadata is not available until the stream is closed")]
    StreamNotClosed,

    /// [`CodecChain::encoded_size`](crate::CodecChain::encoded_size) was
    /// called on a chain containing a codec with unpredictable output size.
    #[error("encoded size of {spec} cannot be predicted without processing the data")]
    SizeNotPredictable {
        /// Spec of the first unpredictable codec.
        spec: String,
    },

    /// The encryption codec was used without a key provider.
    #[error("no key provider configured for encryption")]
    KeyProviderMissing,

    /// The metadata references a master key the provider does not hold.
    #[error("master key with fingerprint {fingerprint} not found")]
    KeyNotFound {
        /// Fingerprint recorded in the metadata.
        fingerprint: String,
    },

    /// The recomputed metadata signature differs from the persisted one.
    #[error("metadata signature does not match")]
    SignatureMismatch,

    /// The master key's modulus is shorter than the accepted minimum.
    #[error("RSA key of {bits} bits rejected: minimum is {minimum} bits")]
    WeakKeyRejected {
        /// Modulus size of the rejected key.
        bits: usize,
        /// Smallest accepted modulus size.
        minimum: usize,
    },

    /// The object's payload key is already wrapped under the current master key.
    #[error("object is already using the current master key and does not need rekey")]
    NoRekeyNeeded,

    /// The object's transform-mode list has no encryption entry.
    #[error("object is not encrypted")]
    NotEncrypted,

    /// A cryptographic primitive failed.
    #[error("cryptographic error: {0}")]
    CryptoError(String),

    /// The decoded bytes do not hash to the digest recorded at encode time.
    #[error("{codec} digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Spec of the codec that detected the mismatch.
        codec: String,
        /// Digest recorded in the metadata.
        expected: String,
        /// Digest of the decoded bytes.
        actual: String,
    },

    /// The decoded byte count differs from the size recorded at encode time.
    #[error("{codec} size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Spec of the codec that detected the mismatch.
        codec: String,
        /// Size recorded in the metadata.
        expected: u64,
        /// Number of bytes decoded.
        actual: u64,
    },

    /// A background worker driving a blocking codec failed.
    ///
    /// Typed failures raised by the worker are surfaced as-is; this variant
    /// carries plain I/O failures and worker panics.
    #[error("{codec} worker failed: {source}")]
    AdapterWorkerFailure {
        /// Name of the bulk codec the worker was running.
        codec: &'static str,
        /// The underlying failure.
        #[source]
        source: io::Error,
    },
}

impl From<io::Error> for Error {
    /// Recovers a crate error that crossed a `Read`/`Write` boundary, or
    /// wraps a plain I/O error.
    fn from(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return Error::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(typed)) => *typed,
            Some(Err(other)) => Error::Io(io::Error::new(kind, other)),
            None => Error::Io(io::Error::from(kind)),
        }
    }
}

impl Error {
    /// Wraps this error for transport through `Read`/`Write` signatures.
    ///
    /// Plain I/O errors are returned unchanged.
    pub fn into_io(self) -> io::Error {
        match self {
            Error::Io(e) => e,
            other => io::Error::other(other),
        }
    }

    /// Returns `true` if the caller can act on this error and try again.
    ///
    /// A missing key can be supplied through another provider, and
    /// [`NoRekeyNeeded`][Self::NoRekeyNeeded] only reports that nothing
    /// had to be done.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::KeyNotFound { .. } | Error::NoRekeyNeeded => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Returns `true` if this error is related to encryption or keys.
    pub fn is_encryption_error(&self) -> bool {
        matches!(
            self,
            Error::KeyProviderMissing
                | Error::KeyNotFound { .. }
                | Error::SignatureMismatch
                | Error::WeakKeyRejected { .. }
                | Error::NoRekeyNeeded
                | Error::NotEncrypted
                | Error::InvalidKeySize { .. }
                | Error::CryptoError(_)
        )
    }

    /// Returns `true` if decoded data or metadata failed an integrity check.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            Error::SignatureMismatch | Error::DigestMismatch { .. } | Error::SizeMismatch { .. }
        )
    }

    /// Returns `true` if this error is due to a spec or chain no codec supports.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedSpec { .. } | Error::ChainMismatch { .. }
        )
    }
}

/// A specialized Result type for codec chain operations.
pub type Result<T> = std::result::Result<T, Error>;
