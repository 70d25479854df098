//! Transform streams.
//!
//! Codecs expose their transforms as streams that wrap one another:
//!
//! - [`EncodeWriter`] / [`EncodeReader`] apply a codec and produce one
//!   [`Metadata`] record when closed. Each one notes whether the stream it
//!   wraps is itself an encode stream and, if so, links to it through a
//!   shared stage table. The chain later walks that table from head to tail
//!   to collect every record in a fixed order.
//! - [`DecodeWriter`] / [`DecodeReader`] reverse a codec and verify the
//!   recovered payload against the size and digest in its metadata.
//!
//! Everything that can sit underneath a transform implements
//! [`TransformWrite`] or [`TransformRead`]: a `Write`/`Read` with an
//! explicit, idempotent `close` that releases the layer below.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::checksum::{DigestReader, DigestWriter, Expected};
use crate::encode_spec::EncodeSpec;
use crate::metadata::Metadata;
use crate::{Error, Result};

/// A writer with an explicit close that also closes what it wraps.
pub trait TransformWrite: Write + Send {
    /// Flushes pending output and closes the stream. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Returns the stage handle if this is an encode stream.
    fn stage(&self) -> Option<&StageHandle> {
        None
    }
}

/// A reader with an explicit close that also closes what it wraps.
pub trait TransformRead: Read + Send {
    /// Closes the stream. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Returns the stage handle if this is an encode stream.
    fn stage(&self) -> Option<&StageHandle> {
        None
    }
}

/// The writer a transform writes its output into.
pub type Target = Box<dyn TransformWrite>;

/// The reader a transform reads its input from.
pub type Source = Box<dyn TransformRead>;

/// A write-side filter that hands back its inner writer when finished.
pub trait WriteFilter<W>: Write + Send {
    /// Writes any buffered or trailing output and returns the inner writer.
    fn finish_filter(self: Box<Self>) -> Result<W>;
}

/// A read-side filter that hands back its inner reader when finished.
pub trait ReadFilter<R>: Read + Send {
    /// Stops filtering and returns the inner reader.
    fn finish_filter(self: Box<Self>) -> Result<R>;
}

/// Adapts a plain writer as the innermost [`TransformWrite`].
///
/// Closing flushes the writer.
pub struct RawWriter<W> {
    inner: W,
}

impl<W: Write + Send> RawWriter<W> {
    /// Wraps `inner`.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Send> Write for RawWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + Send> TransformWrite for RawWriter<W> {
    fn close(&mut self) -> Result<()> {
        Ok(self.inner.flush()?)
    }
}

/// Adapts a plain reader as the innermost [`TransformRead`].
pub struct RawReader<R> {
    inner: R,
}

impl<R: Read + Send> RawReader<R> {
    /// Wraps `inner`.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read + Send> Read for RawReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Send> TransformRead for RawReader<R> {
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct Stage {
    spec: EncodeSpec,
    metadata: Option<Metadata>,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Default)]
struct StageTable {
    stages: Vec<Stage>,
}

impl StageTable {
    fn head_of(&self, mut index: usize) -> usize {
        while let Some(prev) = self.stages[index].prev {
            index = prev;
        }
        index
    }
}

/// Position of one encode stream in the stage table it shares with the
/// encode streams it is linked to.
#[derive(Clone)]
pub struct StageHandle {
    table: Arc<Mutex<StageTable>>,
    index: usize,
}

impl StageHandle {
    fn lock(&self) -> MutexGuard<'_, StageTable> {
        self.table.lock().unwrap_or_else(|poisoned| {
            log::warn!("stage table mutex was poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn standalone(spec: EncodeSpec) -> Self {
        let table = StageTable {
            stages: vec![Stage {
                spec,
                metadata: None,
                prev: None,
                next: None,
            }],
        };
        Self {
            table: Arc::new(Mutex::new(table)),
            index: 0,
        }
    }

    /// Registers a writer wrapping `wrapped`: the new stage becomes the
    /// predecessor of the wrapped one.
    fn attach_writer(spec: EncodeSpec, wrapped: Option<&StageHandle>) -> Self {
        let Some(wrapped) = wrapped else {
            return Self::standalone(spec);
        };
        let mut table = wrapped.lock();
        let index = table.stages.len();
        table.stages.push(Stage {
            spec,
            metadata: None,
            prev: None,
            next: Some(wrapped.index),
        });
        table.stages[wrapped.index].prev = Some(index);
        drop(table);
        Self {
            table: Arc::clone(&wrapped.table),
            index,
        }
    }

    /// Registers a reader wrapping `wrapped`: the new stage becomes the
    /// successor of the wrapped one.
    fn attach_reader(spec: EncodeSpec, wrapped: Option<&StageHandle>) -> Self {
        let Some(wrapped) = wrapped else {
            return Self::standalone(spec);
        };
        let mut table = wrapped.lock();
        let index = table.stages.len();
        table.stages.push(Stage {
            spec,
            metadata: None,
            prev: Some(wrapped.index),
            next: None,
        });
        table.stages[wrapped.index].next = Some(index);
        drop(table);
        Self {
            table: Arc::clone(&wrapped.table),
            index,
        }
    }

    fn publish(&self, metadata: Metadata) {
        self.lock().stages[self.index].metadata = Some(metadata);
    }

    /// Returns the specs of all linked stages from head to tail.
    pub fn chain_specs(&self) -> Vec<EncodeSpec> {
        let table = self.lock();
        let mut specs = Vec::new();
        let mut cursor = Some(table.head_of(self.index));
        while let Some(index) = cursor {
            specs.push(table.stages[index].spec.clone());
            cursor = table.stages[index].next;
        }
        specs
    }

    /// Returns the metadata of all linked stages from head to tail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamNotClosed`] if any stage has not closed yet.
    pub fn chain_metadata(&self) -> Result<Vec<Metadata>> {
        let table = self.lock();
        let mut records = Vec::new();
        let mut cursor = Some(table.head_of(self.index));
        while let Some(index) = cursor {
            let stage = &table.stages[index];
            records.push(stage.metadata.clone().ok_or(Error::StreamNotClosed)?);
            cursor = stage.next;
        }
        Ok(records)
    }
}

impl std::fmt::Debug for StageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageHandle")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// Receives an encode stream's metadata once its payload is complete.
///
/// Listeners run after the codec has filled in its own fields and before
/// the record is published to the chain, so they may add to it.
pub trait EncodeListener: Send + Sync {
    /// Called exactly once when the owning stream closes.
    fn encode_complete(&self, metadata: &mut Metadata) -> Result<()>;
}

/// Codec-specific write side of an [`EncodeWriter`].
pub trait EncodeWrite: Write + Send {
    /// Finishes the transform, closes the target and records the results.
    fn finish(&mut self, metadata: &mut Metadata) -> Result<()>;
}

/// Codec-specific read side of an [`EncodeReader`].
pub trait EncodeRead: Read + Send {
    /// Stops reading, closes the source and records the results.
    fn finish(&mut self, metadata: &mut Metadata) -> Result<()>;
}

/// A writer that encodes everything written to it into its target.
pub struct EncodeWriter {
    engine: Box<dyn EncodeWrite>,
    metadata: Metadata,
    stage: StageHandle,
    listeners: Vec<Arc<dyn EncodeListener>>,
    closed: bool,
    complete: bool,
}

impl EncodeWriter {
    /// Creates an encode writer. `wrapped` is the stage handle of the
    /// target, taken before the target moved into `engine`.
    pub fn new(
        engine: Box<dyn EncodeWrite>,
        metadata: Metadata,
        wrapped: Option<&StageHandle>,
    ) -> Self {
        let stage = StageHandle::attach_writer(metadata.encode_spec().clone(), wrapped);
        Self {
            engine,
            metadata,
            stage,
            listeners: Vec::new(),
            closed: false,
            complete: false,
        }
    }

    /// Registers a listener notified when the stream closes.
    pub fn add_listener(&mut self, listener: Arc<dyn EncodeListener>) {
        self.listeners.push(listener);
    }

    /// Returns the encode spec.
    pub fn encode_spec(&self) -> &EncodeSpec {
        self.metadata.encode_spec()
    }

    /// Returns the metadata recorded at close.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamNotClosed`] before the stream has closed successfully.
    pub fn metadata(&self) -> Result<&Metadata> {
        if self.complete {
            Ok(&self.metadata)
        } else {
            Err(Error::StreamNotClosed)
        }
    }

    /// Finishes encoding, closes the target and notifies listeners.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.engine.finish(&mut self.metadata)?;
        for listener in &self.listeners {
            listener.encode_complete(&mut self.metadata)?;
        }
        self.stage.publish(self.metadata.clone());
        self.complete = true;
        log::debug!("closed encode writer {}", self.encode_spec());
        Ok(())
    }
}

impl Write for EncodeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write to closed encode stream",
            ));
        }
        self.engine.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.engine.flush()
    }
}

impl TransformWrite for EncodeWriter {
    fn close(&mut self) -> Result<()> {
        EncodeWriter::close(self)
    }

    fn stage(&self) -> Option<&StageHandle> {
        Some(&self.stage)
    }
}

/// A reader that yields the encoded form of its source.
pub struct EncodeReader {
    engine: Box<dyn EncodeRead>,
    metadata: Metadata,
    stage: StageHandle,
    listeners: Vec<Arc<dyn EncodeListener>>,
    closed: bool,
    complete: bool,
}

impl EncodeReader {
    /// Creates an encode reader. `wrapped` is the stage handle of the
    /// source, taken before the source moved into `engine`.
    pub fn new(
        engine: Box<dyn EncodeRead>,
        metadata: Metadata,
        wrapped: Option<&StageHandle>,
    ) -> Self {
        let stage = StageHandle::attach_reader(metadata.encode_spec().clone(), wrapped);
        Self {
            engine,
            metadata,
            stage,
            listeners: Vec::new(),
            closed: false,
            complete: false,
        }
    }

    /// Registers a listener notified when the stream closes.
    pub fn add_listener(&mut self, listener: Arc<dyn EncodeListener>) {
        self.listeners.push(listener);
    }

    /// Returns the encode spec.
    pub fn encode_spec(&self) -> &EncodeSpec {
        self.metadata.encode_spec()
    }

    /// Returns the metadata recorded at close.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamNotClosed`] before the stream has closed successfully.
    pub fn metadata(&self) -> Result<&Metadata> {
        if self.complete {
            Ok(&self.metadata)
        } else {
            Err(Error::StreamNotClosed)
        }
    }

    /// Stops reading, closes the source and notifies listeners.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.engine.finish(&mut self.metadata)?;
        for listener in &self.listeners {
            listener.encode_complete(&mut self.metadata)?;
        }
        self.stage.publish(self.metadata.clone());
        self.complete = true;
        log::debug!("closed encode reader {}", self.encode_spec());
        Ok(())
    }
}

impl Read for EncodeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "read from closed encode stream",
            ));
        }
        self.engine.read(buf)
    }
}

impl TransformRead for EncodeReader {
    fn close(&mut self) -> Result<()> {
        EncodeReader::close(self)
    }

    fn stage(&self) -> Option<&StageHandle> {
        Some(&self.stage)
    }
}

/// Builds the payload check for a decode stream from its metadata.
///
/// # Errors
///
/// Returns [`Error::StreamNotClosed`] if the record has no original size.
pub(crate) fn expected_payload(metadata: &Metadata) -> Result<Expected> {
    Ok(Expected {
        codec: metadata.encode_spec().to_string(),
        bytes: metadata.original_size().ok_or(Error::StreamNotClosed)?,
        digest: metadata.original_digest(),
    })
}

/// A writer that decodes everything written to it into its target and
/// verifies the result on close.
pub struct DecodeWriter {
    filter: Option<Box<dyn WriteFilter<DigestWriter<Target>>>>,
    expected: Expected,
}

impl DecodeWriter {
    /// Creates a decode writer around a filter whose output is digested
    /// before reaching the target.
    pub fn new(filter: Box<dyn WriteFilter<DigestWriter<Target>>>, expected: Expected) -> Self {
        Self {
            filter: Some(filter),
            expected,
        }
    }
}

impl Write for DecodeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.filter.as_mut() {
            Some(filter) => filter.write(buf),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write to closed decode stream",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.filter.as_mut() {
            Some(filter) => filter.flush(),
            None => Ok(()),
        }
    }
}

impl TransformWrite for DecodeWriter {
    fn close(&mut self) -> Result<()> {
        let Some(filter) = self.filter.take() else {
            return Ok(());
        };
        let (tally, mut target) = filter.finish_filter()?.into_parts();
        let closed = target.close();
        self.expected.verify(&tally)?;
        log::debug!("closed decode writer {}", self.expected.codec);
        closed
    }
}

/// A reader that yields the decoded form of its source and verifies the
/// result when it reaches the end of data. Closing it before then drains
/// the rest and verifies.
pub struct DecodeReader {
    inner: Option<DigestReader<Box<dyn ReadFilter<Source>>>>,
    expected: Expected,
    verified: bool,
}

impl DecodeReader {
    /// Creates a decode reader around a filter whose output is digested
    /// before reaching the caller.
    pub fn new(filter: Box<dyn ReadFilter<Source>>, expected: Expected) -> Self {
        Self {
            inner: Some(DigestReader::new(filter)),
            expected,
            verified: false,
        }
    }
}

impl Read for DecodeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let inner = self.inner.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "read from closed decode stream")
        })?;
        let n = inner.read(buf)?;
        if n == 0 && !buf.is_empty() && !self.verified {
            self.verified = true;
            self.expected
                .verify(&inner.tally())
                .map_err(Error::into_io)?;
        }
        Ok(n)
    }
}

impl TransformRead for DecodeReader {
    fn close(&mut self) -> Result<()> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(());
        };
        // An outer decoder may stop at its own end marker without reading
        // this layer to EOF, so the check runs here on whatever is left.
        let verified = if self.verified {
            Ok(())
        } else {
            self.verified = true;
            io::copy(&mut inner, &mut io::sink())
                .map_err(Error::from)
                .and_then(|_| self.expected.verify(&inner.tally()))
        };
        let (_, filter) = inner.into_parts();
        let closed = filter.finish_filter().and_then(|mut source| source.close());
        verified?;
        closed?;
        log::debug!("closed decode reader {}", self.expected.codec);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::CompressionMetadata;

    fn metadata(spec: &str) -> Metadata {
        Metadata::Compression(CompressionMetadata::new(EncodeSpec::parse(spec).unwrap()).unwrap())
    }

    #[test]
    fn test_writer_links_make_outermost_head() {
        let inner = StageHandle::attach_writer(EncodeSpec::parse("COMP:A").unwrap(), None);
        let outer = StageHandle::attach_writer(EncodeSpec::parse("COMP:B").unwrap(), Some(&inner));
        let order: Vec<String> = inner.chain_specs().iter().map(|s| s.to_string()).collect();
        assert_eq!(order, vec!["COMP:B", "COMP:A"]);
        assert_eq!(outer.chain_specs().len(), 2);
    }

    #[test]
    fn test_reader_links_make_innermost_head() {
        let inner = StageHandle::attach_reader(EncodeSpec::parse("COMP:A").unwrap(), None);
        let outer = StageHandle::attach_reader(EncodeSpec::parse("COMP:B").unwrap(), Some(&inner));
        let order: Vec<String> = outer.chain_specs().iter().map(|s| s.to_string()).collect();
        assert_eq!(order, vec!["COMP:A", "COMP:B"]);
    }

    #[test]
    fn test_chain_metadata_requires_all_closed() {
        let inner = StageHandle::attach_writer(EncodeSpec::parse("COMP:A").unwrap(), None);
        let outer = StageHandle::attach_writer(EncodeSpec::parse("COMP:B").unwrap(), Some(&inner));
        outer.publish(metadata("COMP:B"));
        assert!(matches!(outer.chain_metadata(), Err(Error::StreamNotClosed)));
        inner.publish(metadata("COMP:A"));
        assert_eq!(outer.chain_metadata().unwrap().len(), 2);
    }

    struct Passthrough {
        target: Option<Target>,
    }

    impl Write for Passthrough {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.target.as_mut() {
                Some(target) => target.write(buf),
                None => Ok(0),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl EncodeWrite for Passthrough {
        fn finish(&mut self, _metadata: &mut Metadata) -> Result<()> {
            if let Some(mut target) = self.target.take() {
                target.close()?;
            }
            Ok(())
        }
    }

    struct Counter(Arc<Mutex<u32>>);

    impl EncodeListener for Counter {
        fn encode_complete(&self, _metadata: &mut Metadata) -> Result<()> {
            *self.0.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[test]
    fn test_close_is_idempotent_and_notifies_once() {
        let calls = Arc::new(Mutex::new(0));
        let engine = Passthrough {
            target: Some(Box::new(RawWriter::new(Vec::new()))),
        };
        let mut writer = EncodeWriter::new(Box::new(engine), metadata("COMP:A"), None);
        writer.add_listener(Arc::new(Counter(Arc::clone(&calls))));

        writer.write_all(b"abc").unwrap();
        assert!(matches!(writer.metadata(), Err(Error::StreamNotClosed)));
        writer.close().unwrap();
        writer.close().unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(writer.metadata().is_ok());
        assert!(writer.write(b"more").is_err());
    }
}
