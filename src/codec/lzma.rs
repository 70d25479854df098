//! LZMA codec (`COMP:LZMA/<level>`).
//!
//! The encoded form is a 5-byte properties header (literal/position bits
//! byte followed by the little-endian dictionary size) and a raw LZMA
//! stream terminated by an end marker. Both directions run as bulk engines
//! on a worker thread behind the [pipe adapter](crate::adapter).

use std::io::{self, Read, Write};

use lzma_rust2::{LzmaOptions, LzmaReader, LzmaWriter};

use super::compression::{self, DEFAULT_COMPRESSION_LEVEL};
use super::{COMPRESSION_PRIORITY, Codec, CodecProperties, ensure_decodable, ensure_encodable};
use crate::adapter::{BulkCodec, PipedReader, PipedWriter};
use crate::encode_spec::{EncodeSpec, TYPE_COMPRESSION};
use crate::metadata::{Metadata, MetadataMap};
use crate::stream::{DecodeReader, DecodeWriter, EncodeReader, EncodeWriter, Source, Target};
use crate::{Error, Result};

/// Algorithm name in `COMP:LZMA/<level>` specs.
pub const LZMA_ALGORITHM: &str = "LZMA";

/// Length of the properties header preceding the LZMA stream.
pub const HEADER_SIZE: usize = 5;

const LITERAL_CONTEXT_BITS: u32 = 3;
const LITERAL_POSITION_BITS: u32 = 0;
const POSITION_BITS: u32 = 2;
const MAX_LITERAL_CONTEXT_BITS: u32 = 8;
const MAX_POSITION_BITS: u32 = 4;
const MIN_NICE_LEN: u32 = 8;

/// Largest dictionary a decoder accepts from a stream header unless a
/// larger custom profile is configured. This is the level 9 dictionary.
pub const MAX_DICT_SIZE: u32 = 64 * 1024 * 1024;

/// Match finder family used by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchFinder {
    /// Two-byte hashing; fast, used by the lower levels.
    Bt2,
    /// Four-byte binary tree; slower with better ratios.
    Bt4,
}

/// Encoder settings for one compression level.
///
/// The level table trades speed for ratio by growing the dictionary and
/// the number of fast bytes. A custom profile can be supplied through
/// [`CodecProperties::lzma_profile`] to override the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LzmaProfile {
    /// Dictionary size in bytes.
    pub dict_size: u32,
    /// Match length considered good enough to stop searching.
    pub fast_bytes: u32,
    /// Match finder family.
    pub match_finder: MatchFinder,
    /// Literal context bits (lc), 0-8.
    pub literal_context_bits: u32,
    /// Literal position bits (lp), 0-4.
    pub literal_position_bits: u32,
    /// Position bits (pb), 0-4.
    pub position_bits: u32,
}

const KIB: u32 = 1024;
const MIB: u32 = 1024 * KIB;

const LEVELS: [LzmaProfile; 10] = [
    LzmaProfile::new(16 * KIB, 5, MatchFinder::Bt2),
    LzmaProfile::new(64 * KIB, 64, MatchFinder::Bt2),
    LzmaProfile::new(512 * KIB, 128, MatchFinder::Bt2),
    LzmaProfile::new(MIB, 128, MatchFinder::Bt2),
    LzmaProfile::new(8 * MIB, 128, MatchFinder::Bt2),
    LzmaProfile::new(16 * MIB, 128, MatchFinder::Bt2),
    LzmaProfile::new(24 * MIB, 192, MatchFinder::Bt2),
    LzmaProfile::new(32 * MIB, 224, MatchFinder::Bt4),
    LzmaProfile::new(48 * MIB, 256, MatchFinder::Bt4),
    LzmaProfile::new(64 * MIB, 273, MatchFinder::Bt4),
];

impl LzmaProfile {
    /// Creates a profile with the default literal and position bits
    /// (lc=3, lp=0, pb=2).
    pub const fn new(dict_size: u32, fast_bytes: u32, match_finder: MatchFinder) -> Self {
        Self {
            dict_size,
            fast_bytes,
            match_finder,
            literal_context_bits: LITERAL_CONTEXT_BITS,
            literal_position_bits: LITERAL_POSITION_BITS,
            position_bits: POSITION_BITS,
        }
    }

    /// Replaces the literal context, literal position and position bits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLiteralBits`] if `lc` exceeds 8 or `lp` or
    /// `pb` exceed 4.
    pub fn with_literal_bits(mut self, lc: u32, lp: u32, pb: u32) -> Result<Self> {
        self.literal_context_bits = lc;
        self.literal_position_bits = lp;
        self.position_bits = pb;
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.literal_context_bits > MAX_LITERAL_CONTEXT_BITS
            || self.literal_position_bits > MAX_POSITION_BITS
            || self.position_bits > MAX_POSITION_BITS
        {
            return Err(Error::InvalidLiteralBits {
                lc: self.literal_context_bits,
                lp: self.literal_position_bits,
                pb: self.position_bits,
            });
        }
        Ok(())
    }

    /// Returns the packed `(pb * 5 + lp) * 9 + lc` properties byte.
    pub fn properties_byte(&self) -> u8 {
        ((self.position_bits * 5 + self.literal_position_bits) * 9 + self.literal_context_bits)
            as u8
    }

    /// Returns the profile for compression level `level` (0-9).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCompressionLevel`] for levels above 9.
    pub fn from_level(level: u32) -> Result<Self> {
        LEVELS
            .get(level as usize)
            .copied()
            .ok_or(Error::InvalidCompressionLevel { level })
    }

    /// Approximate encoder memory use in bytes.
    pub fn memory_required(&self) -> u64 {
        u64::from(self.dict_size) * 25 / 2
    }

    /// Returns the properties header written before the stream.
    pub fn header(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[0] = self.properties_byte();
        header[1..].copy_from_slice(&self.dict_size.to_le_bytes());
        header
    }

    fn options(&self) -> LzmaOptions {
        // Presets up to 3 select the fast hash-chain mode, higher ones the
        // binary-tree normal mode.
        let preset = match self.match_finder {
            MatchFinder::Bt2 => 3,
            MatchFinder::Bt4 => 6,
        };
        let mut opts = LzmaOptions::with_preset(preset);
        opts.dict_size = self.dict_size;
        opts.lc = self.literal_context_bits;
        opts.lp = self.literal_position_bits;
        opts.pb = self.position_bits;
        opts.nice_len = self.fast_bytes.max(MIN_NICE_LEN);
        opts
    }
}

fn parse_header(header: &[u8; HEADER_SIZE], max_dict_size: u32) -> Result<(u8, u32)> {
    let props = header[0];
    if props >= 9 * 5 * 5 {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid LZMA properties byte 0x{props:02x}"),
        )));
    }
    let mut dict = [0u8; 4];
    dict.copy_from_slice(&header[1..]);
    let dict_size = u32::from_le_bytes(dict);
    if dict_size > max_dict_size {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("LZMA dictionary of {dict_size} bytes exceeds the {max_dict_size} byte limit"),
        )));
    }
    Ok((props, dict_size))
}

fn engine_error(e: impl std::fmt::Display) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

struct LzmaEncode {
    profile: LzmaProfile,
}

impl BulkCodec for LzmaEncode {
    fn name(&self) -> &'static str {
        "lzma-encode"
    }

    fn process(&mut self, input: &mut dyn Read, output: &mut dyn Write) -> Result<()> {
        output.write_all(&self.profile.header())?;
        let mut encoder =
            LzmaWriter::new_no_header(output, &self.profile.options(), true).map_err(engine_error)?;
        io::copy(input, &mut encoder)?;
        encoder.finish().map_err(engine_error)?;
        Ok(())
    }
}

struct LzmaDecode {
    max_dict_size: u32,
}

impl LzmaDecode {
    fn new(properties: &CodecProperties) -> Self {
        let custom = properties.lzma_profile.map_or(0, |profile| profile.dict_size);
        Self {
            max_dict_size: MAX_DICT_SIZE.max(custom),
        }
    }
}

impl BulkCodec for LzmaDecode {
    fn name(&self) -> &'static str {
        "lzma-decode"
    }

    fn process(&mut self, input: &mut dyn Read, output: &mut dyn Write) -> Result<()> {
        let mut header = [0u8; HEADER_SIZE];
        input.read_exact(&mut header)?;
        let (props, dict_size) = parse_header(&header, self.max_dict_size)?;
        let mut decoder = LzmaReader::new_with_props(input, u64::MAX, props, dict_size, None)
            .map_err(engine_error)?;
        io::copy(&mut decoder, output)?;
        Ok(())
    }
}

/// LZMA compression codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct LzmaCodec;

impl LzmaCodec {
    /// Creates the codec.
    pub fn new() -> Self {
        Self
    }

    fn profile(spec: &EncodeSpec, properties: &CodecProperties) -> Result<LzmaProfile> {
        let level = spec.compression_level(DEFAULT_COMPRESSION_LEVEL)?;
        match properties.lzma_profile {
            Some(profile) => Ok(profile),
            None => LzmaProfile::from_level(level),
        }
    }

    fn encoder(spec: &EncodeSpec, properties: &CodecProperties) -> Result<LzmaEncode> {
        let profile = Self::profile(spec, properties)?;
        profile.validate()?;
        log::trace!(
            "LZMA {spec}: dictionary {} bytes, ~{} bytes of encoder memory",
            profile.dict_size,
            profile.memory_required()
        );
        Ok(LzmaEncode { profile })
    }
}

impl Codec for LzmaCodec {
    fn name(&self) -> &'static str {
        "lzma"
    }

    fn can_encode(&self, spec: &EncodeSpec) -> bool {
        spec.is(TYPE_COMPRESSION, LZMA_ALGORITHM)
    }

    fn default_spec(&self) -> EncodeSpec {
        EncodeSpec::from_trusted(
            TYPE_COMPRESSION,
            &format!("{LZMA_ALGORITHM}/{DEFAULT_COMPRESSION_LEVEL}"),
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
        properties: &CodecProperties,
    ) -> Result<EncodeWriter> {
        ensure_encodable(self, spec)?;
        let engine = Self::encoder(spec, properties)?;
        compression::encode_writer(target, spec, |counted| {
            Ok(Box::new(PipedWriter::spawn(
                engine,
                counted,
                properties.pipe_buffer_size,
            )?))
        })
    }

    fn encode_reader(
        &self,
        source: Source,
        spec: &EncodeSpec,
        properties: &CodecProperties,
    ) -> Result<EncodeReader> {
        ensure_encodable(self, spec)?;
        let engine = Self::encoder(spec, properties)?;
        compression::encode_reader(source, spec, |digested| {
            Ok(Box::new(PipedReader::spawn(
                engine,
                digested,
                properties.pipe_buffer_size,
            )?))
        })
    }

    fn decode_writer(
        &self,
        target: Target,
        metadata: &Metadata,
        properties: &CodecProperties,
    ) -> Result<DecodeWriter> {
        ensure_decodable(self, metadata.encode_spec())?;
        compression::decode_writer(target, metadata, |digested| {
            Ok(Box::new(PipedWriter::spawn(
                LzmaDecode::new(properties),
                digested,
                properties.pipe_buffer_size,
            )?))
        })
    }

    fn decode_reader(
        &self,
        source: Source,
        metadata: &Metadata,
        properties: &CodecProperties,
    ) -> Result<DecodeReader> {
        ensure_decodable(self, metadata.encode_spec())?;
        compression::decode_reader(source, metadata, |source| {
            Ok(Box::new(PipedReader::spawn(
                LzmaDecode::new(properties),
                source,
                properties.pipe_buffer_size,
            )?))
        })
    }
}
