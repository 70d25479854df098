//! Codec chain orchestration.
//!
//! A [`CodecChain`] holds an ordered list of codecs, each paired with the
//! encode spec it applies. Codecs are sorted by [`Codec::priority`] (stable,
//! so equal priorities keep the caller's order); lower priorities sit closer
//! to the raw payload.
//!
//! # Stream construction
//!
//! | Direction | Stream | Wrap order |
//! |-----------|--------|------------|
//! | Encode | [`ChainWriter`] | highest priority first, around the sink |
//! | Encode | [`ChainReader`] | lowest priority first, around the source |
//! | Decode | [`ChainWriter`] | lowest priority first, around the sink |
//! | Decode | [`ChainReader`] | highest priority first, around the source |
//!
//! Closing an encode stream merges every codec's metadata into the caller's
//! [`MetadataMap`] and appends each spec to the transform-mode list, walking
//! the linked stages from head to tail. Closing a decode stream removes the
//! consumed tail of the list and the fields those codecs own, tail first.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::io::{Read, Write};
//! use objcodec::{CodecChain, MetadataMap};
//!
//! # fn main() -> objcodec::Result<()> {
//! let chain = CodecChain::from_specs(["COMP:LZMA/5"])?;
//!
//! let mut metadata = MetadataMap::new();
//! let mut writer = chain.encode_writer(Vec::new(), &mut metadata)?;
//! writer.write_all(b"hello hello hello")?;
//! let encoded = writer.finish()?;
//! assert_eq!(metadata.transform_mode(), ["COMP:LZMA/5"]);
//!
//! let mut reader = chain.decode_reader(std::io::Cursor::new(encoded), &mut metadata)?;
//! let mut decoded = Vec::new();
//! reader.read_to_end(&mut decoded)?;
//! reader.finish()?;
//! assert_eq!(decoded, b"hello hello hello");
//! assert!(metadata.is_empty());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::codec::{Codec, CodecProperties, registry};
use crate::encode_spec::EncodeSpec;
use crate::metadata::{Metadata, MetadataMap};
use crate::stream::{RawReader, RawWriter, Source, StageHandle, Target};
use crate::{Error, Result};

#[derive(Clone)]
struct ChainLink {
    codec: Arc<dyn Codec>,
    spec: EncodeSpec,
}

/// An ordered set of codecs applied to one object payload.
#[derive(Clone)]
pub struct CodecChain {
    links: Vec<ChainLink>,
    properties: CodecProperties,
}

impl fmt::Debug for CodecChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecChain")
            .field("specs", &self.specs())
            .field("properties", &self.properties)
            .finish()
    }
}

impl CodecChain {
    /// Sorts `links` by priority.
    ///
    /// Codecs of one spec type write the same metadata fields, so a second
    /// codec of a type already in the chain is rejected.
    fn from_links(mut links: Vec<ChainLink>) -> Result<Self> {
        for (i, link) in links.iter().enumerate() {
            let spec_type = link.spec.spec_type();
            if links[..i].iter().any(|l| l.spec.spec_type() == spec_type) {
                return Err(Error::UnsupportedSpec {
                    spec: link.spec.to_string(),
                });
            }
        }
        links.sort_by_key(|link| link.codec.priority());
        let chain = Self {
            links,
            properties: CodecProperties::default(),
        };
        log::debug!("built codec chain [{}]", chain.spec_list());
        Ok(chain)
    }

    /// Builds a chain from encode spec strings, resolving each one against
    /// the current thread's registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] for malformed strings and
    /// [`Error::UnsupportedSpec`] if no registered codec can encode a spec
    /// or two specs share a type.
    pub fn from_specs<I, S>(specs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let links = specs
            .into_iter()
            .map(|raw| {
                let spec = EncodeSpec::parse(raw.as_ref())?;
                let codec = registry::find_encoder(&spec).ok_or_else(|| Error::UnsupportedSpec {
                    spec: spec.to_string(),
                })?;
                Ok(ChainLink { codec, spec })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_links(links)
    }

    /// Builds a chain from codec instances using their default specs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedSpec`] if two codecs share a spec type.
    pub fn new(codecs: impl IntoIterator<Item = Arc<dyn Codec>>) -> Result<Self> {
        let links = codecs
            .into_iter()
            .map(|codec| ChainLink {
                spec: codec.default_spec(),
                codec,
            })
            .collect();
        Self::from_links(links)
    }

    /// Builds a chain from codec instances with optional spec overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedSpec`] if an override is not one the
    /// paired codec can encode, or if two specs share a type.
    pub fn with_specs(
        codecs: impl IntoIterator<Item = (Arc<dyn Codec>, Option<EncodeSpec>)>,
    ) -> Result<Self> {
        let links = codecs
            .into_iter()
            .map(|(codec, spec)| {
                let spec = spec.unwrap_or_else(|| codec.default_spec());
                if !codec.can_encode(&spec) {
                    return Err(Error::UnsupportedSpec {
                        spec: spec.to_string(),
                    });
                }
                Ok(ChainLink { codec, spec })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_links(links)
    }

    /// Replaces the properties passed to every codec.
    pub fn with_properties(mut self, properties: CodecProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Returns the properties passed to every codec.
    pub fn properties(&self) -> &CodecProperties {
        &self.properties
    }

    /// Returns the chain's specs in priority order.
    pub fn specs(&self) -> Vec<&EncodeSpec> {
        self.links.iter().map(|link| &link.spec).collect()
    }

    fn spec_list(&self) -> String {
        self.links
            .iter()
            .map(|link| link.spec.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Returns the number of codecs.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Returns `true` if the chain has no codecs.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Returns `true` if every codec's output size is predictable.
    pub fn is_size_predictable(&self) -> bool {
        self.links.iter().all(|link| link.codec.is_size_predictable())
    }

    /// Predicts the encoded size of a payload of `original_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SizeNotPredictable`] if any codec's output size
    /// depends on the data.
    pub fn encoded_size(&self, original_size: u64) -> Result<u64> {
        self.links.iter().try_fold(original_size, |size, link| {
            if !link.codec.is_size_predictable() {
                return Err(Error::SizeNotPredictable {
                    spec: link.spec.to_string(),
                });
            }
            link.codec.encoded_size(size, &link.spec, &self.properties)
        })
    }

    /// Rebuilds the metadata records this chain would decode from `map`,
    /// innermost first, without opening a stream.
    ///
    /// Only the last [`len`](Self::len) entries of the transform-mode list
    /// are considered; older entries stay encoded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChainMismatch`] if the tail of the list does not
    /// match the chain's codecs, and [`Error::IncompleteMetadata`] if a
    /// codec's fields are missing.
    pub fn encode_metadata(&self, map: &MetadataMap) -> Result<Vec<Metadata>> {
        let list = map.transform_mode();
        let mismatch = |specs: &[&str]| Error::ChainMismatch {
            specs: specs.iter().map(|s| s.to_string()).collect(),
        };
        let Some(start) = list.len().checked_sub(self.links.len()) else {
            return Err(mismatch(&list));
        };
        let tail = &list[start..];

        self.links
            .iter()
            .zip(tail)
            .map(|(link, raw)| {
                let spec = EncodeSpec::parse(*raw).map_err(|_| mismatch(tail))?;
                if !link.codec.can_decode(&spec) {
                    return Err(mismatch(tail));
                }
                link.codec.create_metadata(&spec, map)
            })
            .collect()
    }

    /// Opens a writer that encodes into `sink`. The metadata is merged into
    /// `map` when the writer closes.
    pub fn encode_writer<'m, W>(
        &self,
        sink: W,
        map: &'m mut MetadataMap,
    ) -> Result<ChainWriter<'m, W>>
    where
        W: Write + Send + 'static,
    {
        let shared = Arc::new(Mutex::new(Some(sink)));
        let mut target: Target = Box::new(RawWriter::new(SharedSink(Arc::clone(&shared))));
        for link in self.links.iter().rev() {
            target = Box::new(link.codec.encode_writer(target, &link.spec, &self.properties)?);
        }
        log::debug!("opened chain encode writer [{}]", self.spec_list());
        Ok(ChainWriter {
            stack: Some(target),
            sink: shared,
            map,
            completion: Completion::Encode,
        })
    }

    /// Opens a reader that yields the encoded form of `source`. The metadata
    /// is merged into `map` when the reader closes.
    pub fn encode_reader<'m, R>(
        &self,
        source: R,
        map: &'m mut MetadataMap,
    ) -> Result<ChainReader<'m, R>>
    where
        R: Read + Send + 'static,
    {
        let shared = Arc::new(Mutex::new(Some(source)));
        let mut stack: Source = Box::new(RawReader::new(SharedSource(Arc::clone(&shared))));
        for link in &self.links {
            stack = Box::new(link.codec.encode_reader(stack, &link.spec, &self.properties)?);
        }
        log::debug!("opened chain encode reader [{}]", self.spec_list());
        Ok(ChainReader {
            stack: Some(stack),
            source: shared,
            map,
            completion: Completion::Encode,
        })
    }

    /// Opens a writer that decodes into `sink`. The consumed metadata is
    /// removed from `map` when the writer closes.
    ///
    /// # Errors
    ///
    /// Everything [`encode_metadata`](Self::encode_metadata) returns, plus
    /// codec failures such as [`Error::KeyNotFound`].
    pub fn decode_writer<'m, W>(
        &self,
        sink: W,
        map: &'m mut MetadataMap,
    ) -> Result<ChainWriter<'m, W>>
    where
        W: Write + Send + 'static,
    {
        let records = self.encode_metadata(map)?;
        let shared = Arc::new(Mutex::new(Some(sink)));
        let mut target: Target = Box::new(RawWriter::new(SharedSink(Arc::clone(&shared))));
        for (link, metadata) in self.links.iter().zip(&records) {
            target = Box::new(link.codec.decode_writer(target, metadata, &self.properties)?);
        }
        log::debug!("opened chain decode writer [{}]", self.spec_list());
        Ok(ChainWriter {
            stack: Some(target),
            sink: shared,
            map,
            completion: Completion::Decode(records),
        })
    }

    /// Opens a reader that yields the decoded form of `source`. The consumed
    /// metadata is removed from `map` when the reader closes.
    ///
    /// # Errors
    ///
    /// Same as [`decode_writer`](Self::decode_writer).
    pub fn decode_reader<'m, R>(
        &self,
        source: R,
        map: &'m mut MetadataMap,
    ) -> Result<ChainReader<'m, R>>
    where
        R: Read + Send + 'static,
    {
        let records = self.encode_metadata(map)?;
        let shared = Arc::new(Mutex::new(Some(source)));
        let mut stack: Source = Box::new(RawReader::new(SharedSource(Arc::clone(&shared))));
        for (link, metadata) in self.links.iter().zip(&records).rev() {
            stack = Box::new(link.codec.decode_reader(stack, metadata, &self.properties)?);
        }
        log::debug!("opened chain decode reader [{}]", self.spec_list());
        Ok(ChainReader {
            stack: Some(stack),
            source: shared,
            map,
            completion: Completion::Decode(records),
        })
    }
}

fn lock<T>(shared: &Mutex<T>) -> MutexGuard<'_, T> {
    shared.lock().unwrap_or_else(|poisoned| {
        log::warn!("chain endpoint mutex was poisoned; recovering");
        poisoned.into_inner()
    })
}

fn released_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "chain endpoint already released")
}

/// The caller's sink, shared so [`ChainWriter::finish`] can hand it back.
struct SharedSink<W>(Arc<Mutex<Option<W>>>);

impl<W: Write> Write for SharedSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.0).as_mut().ok_or_else(released_error)?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match lock(&self.0).as_mut() {
            Some(sink) => sink.flush(),
            None => Ok(()),
        }
    }
}

/// The caller's source, shared so [`ChainReader::finish`] can hand it back.
struct SharedSource<R>(Arc<Mutex<Option<R>>>);

impl<R: Read> Read for SharedSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        lock(&self.0).as_mut().ok_or_else(released_error)?.read(buf)
    }
}

fn take_endpoint<T>(shared: &Mutex<Option<T>>) -> Result<T> {
    lock(shared).take().ok_or_else(|| Error::Io(released_error()))
}

/// What closing a chain stream does to the caller's map.
enum Completion {
    Encode,
    Decode(Vec<Metadata>),
}

impl Completion {
    fn apply(&self, stage: Option<&StageHandle>, map: &mut MetadataMap) -> Result<()> {
        match self {
            Self::Encode => {
                let Some(stage) = stage else {
                    return Ok(());
                };
                for metadata in stage.chain_metadata()? {
                    map.apply(&metadata);
                    map.push_transform(metadata.encode_spec());
                    log::debug!("merged metadata for {}", metadata.encode_spec());
                }
            }
            Self::Decode(records) => {
                for metadata in records.iter().rev() {
                    map.pop_transform(metadata.encode_spec())?;
                    map.retract(metadata);
                    log::debug!("removed metadata for {}", metadata.encode_spec());
                }
            }
        }
        Ok(())
    }
}

/// A writer returned by [`CodecChain`]; see the module docs.
pub struct ChainWriter<'m, W> {
    stack: Option<Target>,
    sink: Arc<Mutex<Option<W>>>,
    map: &'m mut MetadataMap,
    completion: Completion,
}

impl<W> ChainWriter<'_, W> {
    /// Closes every stage and updates the metadata map. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut stack) = self.stack.take() else {
            return Ok(());
        };
        stack.close()?;
        self.completion.apply(stack.stage(), self.map)
    }

    /// Closes the chain and returns the sink.
    pub fn finish(mut self) -> Result<W> {
        self.close()?;
        take_endpoint(&self.sink)
    }
}

impl<W> Write for ChainWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stack.as_mut().ok_or_else(released_error)?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stack.as_mut() {
            Some(stack) => stack.flush(),
            None => Ok(()),
        }
    }
}

/// A reader returned by [`CodecChain`]; see the module docs.
pub struct ChainReader<'m, R> {
    stack: Option<Source>,
    source: Arc<Mutex<Option<R>>>,
    map: &'m mut MetadataMap,
    completion: Completion,
}

impl<R> ChainReader<'_, R> {
    /// Closes every stage and updates the metadata map. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut stack) = self.stack.take() else {
            return Ok(());
        };
        stack.close()?;
        self.completion.apply(stack.stage(), self.map)
    }

    /// Closes the chain and returns the source.
    pub fn finish(mut self) -> Result<R> {
        self.close()?;
        take_endpoint(&self.source)
    }
}

impl<R> Read for ChainReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stack.as_mut().ok_or_else(released_error)?.read(buf)
    }
}
