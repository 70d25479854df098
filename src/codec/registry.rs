//! Per-thread codec registry.
//!
//! Each thread lazily builds its own registry the first time a codec is
//! looked up, so registration never races with lookups on other threads.
//! Codecs registered by the caller are consulted before the built-in ones.

use std::cell::RefCell;
use std::sync::Arc;

use super::Codec;
use crate::crypto::EncryptionCodec;
use crate::encode_spec::EncodeSpec;

#[derive(Debug)]
struct Registry {
    codecs: Vec<Arc<dyn Codec>>,
}

impl Registry {
    fn builtin() -> Self {
        let mut codecs: Vec<Arc<dyn Codec>> = Vec::new();
        #[cfg(feature = "deflate")]
        codecs.push(Arc::new(super::deflate::DeflateCodec::new()));
        #[cfg(feature = "lzma")]
        codecs.push(Arc::new(super::lzma::LzmaCodec::new()));
        codecs.push(Arc::new(EncryptionCodec::new()));
        log::debug!("initialized codec registry with {} codecs", codecs.len());
        Self { codecs }
    }
}

thread_local! {
    static REGISTRY: RefCell<Registry> = RefCell::new(Registry::builtin());
}

/// Returns the codec that can encode `spec`, if any.
pub fn find_encoder(spec: &EncodeSpec) -> Option<Arc<dyn Codec>> {
    REGISTRY.with(|registry| {
        registry
            .borrow()
            .codecs
            .iter()
            .find(|codec| codec.can_encode(spec))
            .cloned()
    })
}

/// Returns the codec that can decode `spec`, if any.
pub fn find_decoder(spec: &EncodeSpec) -> Option<Arc<dyn Codec>> {
    REGISTRY.with(|registry| {
        registry
            .borrow()
            .codecs
            .iter()
            .find(|codec| codec.can_decode(spec))
            .cloned()
    })
}

/// Registers a codec on the current thread ahead of the built-in codecs.
pub fn register(codec: Arc<dyn Codec>) {
    REGISTRY.with(|registry| {
        log::debug!("registering codec {}", codec.name());
        registry.borrow_mut().codecs.insert(0, codec);
    });
}

/// Returns the codecs visible to the current thread, in lookup order.
pub fn registered_codecs() -> Vec<Arc<dyn Codec>> {
    REGISTRY.with(|registry| registry.borrow().codecs.clone())
}
