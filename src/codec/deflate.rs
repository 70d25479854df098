//! Deflate codec (`COMP:Deflate/<level>`).
//!
//! Output is a zlib stream, so it can be inflated by any zlib implementation.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::{ZlibDecoder as ZlibReadDecoder, ZlibEncoder as ZlibReadEncoder};
use flate2::write::{ZlibDecoder as ZlibWriteDecoder, ZlibEncoder as ZlibWriteEncoder};

use super::compression::{self, DEFAULT_COMPRESSION_LEVEL};
use super::{COMPRESSION_PRIORITY, Codec, CodecProperties, ensure_decodable, ensure_encodable};
use crate::encode_spec::{EncodeSpec, TYPE_COMPRESSION};
use crate::metadata::{Metadata, MetadataMap};
use crate::stream::{
    DecodeReader, DecodeWriter, EncodeReader, EncodeWriter, ReadFilter, Source, Target,
    WriteFilter,
};
use crate::{Error, Result};

/// Algorithm name in `COMP:Deflate/<level>` specs.
pub const DEFLATE_ALGORITHM: &str = "Deflate";

impl<W: Write + Send> WriteFilter<W> for ZlibWriteEncoder<W> {
    fn finish_filter(self: Box<Self>) -> Result<W> {
        Ok(self.finish()?)
    }
}

impl<W: Write + Send> WriteFilter<W> for ZlibWriteDecoder<W> {
    fn finish_filter(self: Box<Self>) -> Result<W> {
        Ok(self.finish()?)
    }
}

impl<R: Read + Send> ReadFilter<R> for ZlibReadEncoder<R> {
    fn finish_filter(self: Box<Self>) -> Result<R> {
        Ok(self.into_inner())
    }
}

impl<R: Read + Send> ReadFilter<R> for ZlibReadDecoder<R> {
    fn finish_filter(self: Box<Self>) -> Result<R> {
        Ok(self.into_inner())
    }
}

/// Deflate compression codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeflateCodec;

impl DeflateCodec {
    /// Creates the codec.
    pub fn new() -> Self {
        Self
    }
}

impl Codec for DeflateCodec {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn can_encode(&self, spec: &EncodeSpec) -> bool {
        spec.is(TYPE_COMPRESSION, DEFLATE_ALGORITHM)
    }

    fn default_spec(&self) -> EncodeSpec {
        EncodeSpec::from_trusted(
            TYPE_COMPRESSION,
            &format!("{DEFLATE_ALGORITHM}/{DEFAULT_COMPRESSION_LEVEL}"),
        )
    }

    fn priority(&self) -> i32 {
        COMPRESSION_PRIORITY
    }

    fn is_size_predictable(&self) -> bool {
        false
    }

    fn encoded_size(&self, _: u64, spec: &EncodeSpec, _: &CodecProperties) -> Result<u64> {
        Err(Error::SizeNotPredictable {
            spec: spec.to_string(),
        })
    }

    fn create_metadata(&self, spec: &EncodeSpec, map: &MetadataMap) -> Result<Metadata> {
        ensure_decodable(self, spec)?;
        compression::create_metadata(spec, map)
    }

    fn encode_writer(
        &self,
        target: Target,
        spec: &EncodeSpec,
        _properties: &CodecProperties,
    ) -> Result<EncodeWriter> {
        ensure_encodable(self, spec)?;
        let level = Compression::new(spec.compression_level(DEFAULT_COMPRESSION_LEVEL)?);
        compression::encode_writer(target, spec, |counted| {
            Ok(Box::new(ZlibWriteEncoder::new(counted, level)))
        })
    }

    fn encode_reader(
        &self,
        source: Source,
        spec: &EncodeSpec,
        _properties: &CodecProperties,
    ) -> Result<EncodeReader> {
        ensure_encodable(self, spec)?;
        let level = Compression::new(spec.compression_level(DEFAULT_COMPRESSION_LEVEL)?);
        compression::encode_reader(source, spec, |digested| {
            Ok(Box::new(ZlibReadEncoder::new(digested, level)))
        })
    }

    fn decode_writer(
        &self,
        target: Target,
        metadata: &Metadata,
        _properties: &CodecProperties,
    ) -> Result<DecodeWriter> {
        ensure_decodable(self, metadata.encode_spec())?;
        compression::decode_writer(target, metadata, |digested| {
            Ok(Box::new(ZlibWriteDecoder::new(digested)))
        })
    }

    fn decode_reader(
        &self,
        source: Source,
        metadata: &Metadata,
        _properties: &CodecProperties,
    ) -> Result<DecodeReader> {
        ensure_decodable(self, metadata.encode_spec())?;
        compression::decode_reader(source, metadata, |source| {
            Ok(Box::new(ZlibReadDecoder::new(source)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{TransformRead, TransformWrite};
    use crate::test_util::{SharedBuffer, sample_payload, source};

    fn spec() -> EncodeSpec {
        EncodeSpec::parse("COMP:Deflate/5").unwrap()
    }

    #[test]
    fn test_classify() {
        let codec = DeflateCodec::new();
        assert!(codec.can_encode(&spec()));
        assert!(codec.can_decode(&EncodeSpec::parse("COMP:Deflate").unwrap()));
        assert!(!codec.can_encode(&EncodeSpec::parse("COMP:LZMA/5").unwrap()));
        assert!(!codec.can_encode(&EncodeSpec::parse("ENC:Deflate").unwrap()));
        assert_eq!(codec.default_spec().as_str(), "COMP:Deflate/5");
    }

    #[test]
    fn test_size_not_predictable() {
        let codec = DeflateCodec::new();
        assert!(!codec.is_size_predictable());
        assert!(matches!(
            codec.encoded_size(10, &spec(), &CodecProperties::default()),
            Err(Error::SizeNotPredictable { .. })
        ));
    }

    #[test]
    fn test_writer_roundtrip() {
        let codec = DeflateCodec::new();
        let properties = CodecProperties::default();
        let payload = sample_payload(100_000);

        let encoded = SharedBuffer::default();
        let mut writer = codec
            .encode_writer(encoded.target(), &spec(), &properties)
            .unwrap();
        writer.write_all(&payload).unwrap();
        writer.close().unwrap();

        let metadata = writer.metadata().unwrap().clone();
        let compression = metadata.as_compression().unwrap();
        assert_eq!(compression.original_size(), payload.len() as u64);
        assert_eq!(compression.compressed_size(), encoded.contents().len() as u64);
        assert!(compression.compression_ratio() > 0.0);

        let decoded = SharedBuffer::default();
        let mut decoder = codec
            .decode_writer(decoded.target(), &metadata, &properties)
            .unwrap();
        decoder.write_all(&encoded.contents()).unwrap();
        decoder.close().unwrap();
        assert_eq!(decoded.contents(), payload);
    }

    #[test]
    fn test_reader_roundtrip() {
        let codec = DeflateCodec::new();
        let properties = CodecProperties::default();
        let payload = sample_payload(50_000);

        let mut reader = codec
            .encode_reader(source(&payload), &spec(), &properties)
            .unwrap();
        let mut encoded = Vec::new();
        reader.read_to_end(&mut encoded).unwrap();
        reader.close().unwrap();
        let metadata = reader.metadata().unwrap().clone();
        assert_eq!(
            metadata.as_compression().unwrap().compressed_size(),
            encoded.len() as u64
        );

        let mut decoder = codec
            .decode_reader(source(&encoded), &metadata, &properties)
            .unwrap();
        let mut decoded = Vec::new();
        decoder.read_to_end(&mut decoded).unwrap();
        decoder.close().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_rejects_foreign_spec() {
        let codec = DeflateCodec::new();
        let result = codec.encode_writer(
            SharedBuffer::default().target(),
            &EncodeSpec::parse("COMP:LZMA/5").unwrap(),
            &CodecProperties::default(),
        );
        assert!(matches!(result, Err(Error::UnsupportedSpec { .. })));
    }

    #[test]
    fn test_corrupt_digest_detected() {
        let codec = DeflateCodec::new();
        let properties = CodecProperties::default();
        let payload = sample_payload(1000);

        let encoded = SharedBuffer::default();
        let mut writer = codec
            .encode_writer(encoded.target(), &spec(), &properties)
            .unwrap();
        writer.write_all(&payload).unwrap();
        writer.close().unwrap();

        let mut map = MetadataMap::new();
        map.apply(writer.metadata().unwrap());
        map.insert(
            crate::metadata::UNCOMPRESSED_SHA1_KEY,
            "0000000000000000000000000000000000000000",
        )
        .unwrap();
        let metadata = codec.create_metadata(&spec(), &map).unwrap();

        let mut decoder = codec
            .decode_reader(source(&encoded.contents()), &metadata, &properties)
            .unwrap();
        let mut decoded = Vec::new();
        let err = Error::from(decoder.read_to_end(&mut decoded).unwrap_err());
        assert!(matches!(err, Error::DigestMismatch { .. }));
    }
}
