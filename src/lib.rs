//! # objcodec
//!
//! Chainable compression and envelope-encryption transforms for object
//! payloads.
//!
//! A [`CodecChain`] pushes or pulls bytes through a stack of codecs while
//! recording, in a flat string map, everything needed to reverse them later
//! from another process. The map is meant to travel with the object (as
//! HTTP headers or in a key/value store); its `x-emc-transform-mode` entry
//! lists the applied encode specs, outermost last.
//!
//! ## Quick Start
//!
//! ### Compress and Encrypt
//!
//! ```rust,no_run
//! use std::io::Write;
//! use std::sync::Arc;
//! use objcodec::{BasicKeyProvider, CodecChain, CodecProperties, KeyPair, MetadataMap, Result};
//!
//! fn main() -> Result<()> {
//!     let provider = BasicKeyProvider::new(KeyPair::generate(2048)?)?;
//!     let properties = CodecProperties::new().key_provider(Arc::new(provider));
//!
//!     // Order of specs does not matter: compression always runs first.
//!     let chain = CodecChain::from_specs(["ENC:AES/CBC/PKCS5Padding", "COMP:LZMA/5"])?
//!         .with_properties(properties);
//!
//!     let mut metadata = MetadataMap::new();
//!     let mut writer = chain.encode_writer(Vec::new(), &mut metadata)?;
//!     writer.write_all(b"object payload")?;
//!     let encoded = writer.finish()?;
//!
//!     assert_eq!(
//!         metadata.transform_mode(),
//!         ["COMP:LZMA/5", "ENC:AES/CBC/PKCS5Padding"]
//!     );
//!     println!("{} encoded bytes", encoded.len());
//!     Ok(())
//! }
//! ```
//!
//! ### Rotate the Master Key
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use objcodec::{BasicKeyProvider, CodecProperties, EncryptionCodec, KeyPair, MetadataMap, Result};
//!
//! fn rotate(metadata: &mut MetadataMap, old: KeyPair) -> Result<()> {
//!     let provider = BasicKeyProvider::with_keys(KeyPair::generate(2048)?, [old])?;
//!     let properties = CodecProperties::new().key_provider(Arc::new(provider));
//!     EncryptionCodec::new().rekey(metadata, &properties)
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `lzma` | Yes | LZMA compression (`COMP:LZMA/<level>`) |
//! | `deflate` | Yes | Deflate/zlib compression (`COMP:Deflate/<level>`) |
//!
//! Envelope encryption (`ENC:AES/CBC/PKCS5Padding`) is always available.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`], an alias for
//! `std::result::Result<T, Error>`. Errors raised inside a stream's `read`
//! or `write` come back as [`std::io::Error`]; converting them with `?` into
//! [`Error`] restores the original variant.
//!
//! ## Minimum Supported Rust Version (MSRV)
//!
//! This crate requires **Rust 1.85** or later.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

/// Default buffer size for read operations (8 KiB).
pub(crate) const READ_BUFFER_SIZE: usize = 8192;

pub mod adapter;
pub mod chain;
pub mod checksum;
pub mod codec;
pub mod crypto;
pub mod encode_spec;
pub mod error;
pub mod metadata;
pub mod pipe;
pub mod stream;

#[cfg(test)]
mod test_util;

pub use chain::{ChainReader, ChainWriter, CodecChain};
pub use codec::{Codec, CodecProperties};
pub use encode_spec::EncodeSpec;
pub use error::{Error, Result};
pub use metadata::{CompressionMetadata, Metadata, MetadataMap, TRANSFORM_MODE_KEY};

pub use crypto::{
    BasicKeyProvider, EncryptionCodec, EncryptionMetadata, KeyPair, KeyProvider, NoncePolicy,
};

#[cfg(feature = "lzma")]
#[cfg_attr(docsrs, doc(cfg(feature = "lzma")))]
pub use codec::lzma::{LzmaCodec, LzmaProfile, MatchFinder};

#[cfg(feature = "deflate")]
#[cfg_attr(docsrs, doc(cfg(feature = "deflate")))]
pub use codec::deflate::DeflateCodec;
