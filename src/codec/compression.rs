//! Stream plumbing shared by the compression codecs.
//!
//! Encoding writes pass through an uncompressed-side digest and counter, the
//! compression filter, and a compressed-side counter before reaching the
//! target. Encoding reads run the same stages in the pull direction. When the
//! stream closes the collected figures become the [`CompressionMetadata`].

use std::io::{self, Read, Write};

use crate::checksum::{CountingReader, CountingWriter, DigestReader, DigestWriter};
use crate::encode_spec::EncodeSpec;
use crate::metadata::{CompressionMetadata, Metadata, MetadataMap};
use crate::stream::{
    DecodeReader, DecodeWriter, EncodeRead, EncodeReader, EncodeWrite, EncodeWriter, ReadFilter,
    Source, Target, WriteFilter, expected_payload,
};
use crate::{Error, Result};

/// Level used when a compression spec has no parameter.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 5;

/// Compression filter for the push direction.
pub type CompressFilter = Box<dyn WriteFilter<CountingWriter<Target>>>;

/// Compression filter for the pull direction.
pub type CompressSourceFilter = Box<dyn ReadFilter<DigestReader<Source>>>;

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "compression stream is closed")
}

fn compression_mut(metadata: &mut Metadata) -> Result<&mut CompressionMetadata> {
    let spec = metadata.encode_spec().to_string();
    metadata.as_compression_mut().ok_or(Error::InvalidSpec {
        spec,
        reason: "not a compression spec",
    })
}

struct CompressWriter {
    inner: Option<DigestWriter<CompressFilter>>,
}

impl Write for CompressWriter {
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

impl EncodeWrite for CompressWriter {
    fn finish(&mut self, metadata: &mut Metadata) -> Result<()> {
        let inner = self.inner.take().ok_or_else(closed_error)?;
        let (uncompressed, filter) = inner.into_parts();
        let counted = filter.finish_filter()?;
        let compressed_size = counted.bytes_written();
        let mut target = counted.into_inner();
        target.close()?;
        compression_mut(metadata)?.complete(uncompressed, compressed_size);
        Ok(())
    }
}

struct CompressReader {
    inner: Option<CountingReader<CompressSourceFilter>>,
}

impl Read for CompressReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.as_mut().ok_or_else(closed_error)?.read(buf)
    }
}

impl EncodeRead for CompressReader {
    fn finish(&mut self, metadata: &mut Metadata) -> Result<()> {
        let inner = self.inner.take().ok_or_else(closed_error)?;
        let compressed_size = inner.bytes_read();
        let digested = inner.into_inner().finish_filter()?;
        let (uncompressed, mut source) = digested.into_parts();
        source.close()?;
        compression_mut(metadata)?.complete(uncompressed, compressed_size);
        Ok(())
    }
}

/// Opens a compressing writer; `filter` wraps the counted target.
pub fn encode_writer<F>(target: Target, spec: &EncodeSpec, filter: F) -> Result<EncodeWriter>
where
    F: FnOnce(CountingWriter<Target>) -> Result<CompressFilter>,
{
    let metadata = Metadata::Compression(CompressionMetadata::new(spec.clone())?);
    let link = target.stage().cloned();
    let filter = filter(CountingWriter::new(target))?;
    let engine = CompressWriter {
        inner: Some(DigestWriter::new(filter)),
    };
    log::debug!("opened encode writer {spec}");
    Ok(EncodeWriter::new(Box::new(engine), metadata, link.as_ref()))
}

/// Opens a compressing reader; `filter` wraps the digested source.
pub fn encode_reader<F>(source: Source, spec: &EncodeSpec, filter: F) -> Result<EncodeReader>
where
    F: FnOnce(DigestReader<Source>) -> Result<CompressSourceFilter>,
{
    let metadata = Metadata::Compression(CompressionMetadata::new(spec.clone())?);
    let link = source.stage().cloned();
    let filter = filter(DigestReader::new(source))?;
    let engine = CompressReader {
        inner: Some(CountingReader::new(filter)),
    };
    log::debug!("opened encode reader {spec}");
    Ok(EncodeReader::new(Box::new(engine), metadata, link.as_ref()))
}

/// Opens a decompressing writer; `filter` wraps the digested target.
pub fn decode_writer<F>(target: Target, metadata: &Metadata, filter: F) -> Result<DecodeWriter>
where
    F: FnOnce(DigestWriter<Target>) -> Result<Box<dyn WriteFilter<DigestWriter<Target>>>>,
{
    let expected = expected_payload(metadata)?;
    let filter = filter(DigestWriter::new(target))?;
    log::debug!("opened decode writer {}", metadata.encode_spec());
    Ok(DecodeWriter::new(filter, expected))
}

/// Opens a decompressing reader; `filter` wraps the source.
pub fn decode_reader<F>(source: Source, metadata: &Metadata, filter: F) -> Result<DecodeReader>
where
    F: FnOnce(Source) -> Result<Box<dyn ReadFilter<Source>>>,
{
    let expected = expected_payload(metadata)?;
    let filter = filter(source)?;
    log::debug!("opened decode reader {}", metadata.encode_spec());
    Ok(DecodeReader::new(filter, expected))
}

/// Rebuilds compression metadata from the map.
pub fn create_metadata(spec: &EncodeSpec, map: &MetadataMap) -> Result<Metadata> {
    Ok(Metadata::Compression(CompressionMetadata::from_map(
        spec.clone(),
        map,
    )?))
}
