//! Byte counting and SHA-1 digest utilities.
//!
//! Codecs record the size and SHA-1 digest of the untransformed payload in
//! their metadata. The pass-through wrappers in this module collect both
//! while bytes flow through a stream, and decode streams use them to verify
//! the recovered payload against the recorded values.
//!
//! # Example
//!
//! ```rust
//! use objcodec::checksum::{Checksum, Sha1};
//!
//! let mut sha1 = Sha1::new();
//! sha1.update(b"Hello, ");
//! sha1.update(b"World!");
//! assert_eq!(sha1.finalize(), Sha1::compute(b"Hello, World!"));
//! ```

use std::io::{self, Read, Write};

use sha1::Digest;

use crate::READ_BUFFER_SIZE;

/// Common trait for checksum computation.
pub trait Checksum: Default + Clone {
    /// The output type of this checksum.
    type Output: Copy + Eq + std::fmt::Debug;

    /// Creates a new checksum calculator.
    fn new() -> Self;

    /// Updates the checksum with additional data.
    fn update(&mut self, data: &[u8]);

    /// Finishes the checksum computation and returns the value.
    fn finalize(&self) -> Self::Output;

    /// Resets the checksum to its initial state.
    fn reset(&mut self);

    /// Computes the checksum of a single slice in one call.
    fn compute(data: &[u8]) -> Self::Output {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Computes the checksum by reading from a reader.
    fn compute_reader<R: Read>(reader: &mut R) -> io::Result<Self::Output> {
        let mut hasher = Self::new();
        let mut buffer = [0u8; READ_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(hasher.finalize())
    }
}

/// SHA-1 digest calculator.
///
/// # Example
///
/// ```rust
/// use objcodec::checksum::{Checksum, Sha1};
///
/// let digest = Sha1::compute(b"Hello, World!");
/// assert_eq!(hex::encode(digest), "0a0a9f2a6772942557ab5355d76af442f8f65e01");
/// ```
#[derive(Clone, Default)]
pub struct Sha1 {
    hasher: sha1::Sha1,
}

impl std::fmt::Debug for Sha1 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sha1")
            .field("current", &hex::encode(self.finalize()))
            .finish()
    }
}

impl Checksum for Sha1 {
    type Output = [u8; 20];

    fn new() -> Self {
        Self::default()
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(&self) -> [u8; 20] {
        self.hasher.clone().finalize().into()
    }

    fn reset(&mut self) {
        Digest::reset(&mut self.hasher);
    }
}

/// Size and SHA-1 digest collected from a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    /// Number of bytes that passed through.
    pub bytes: u64,
    /// SHA-1 of those bytes.
    pub digest: [u8; 20],
}

impl Tally {
    /// Returns the digest as 40 lowercase hex characters.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

/// A writer wrapper that counts the bytes it forwards.
pub struct CountingWriter<W> {
    inner: W,
    bytes_written: u64,
}

impl<W> CountingWriter<W> {
    /// Creates a new counting writer wrapping the given writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            bytes_written: 0,
        }
    }

    /// Returns the number of bytes written.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Consumes the wrapper and returns the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Returns a mutable reference to the inner writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A writer wrapper that counts and SHA-1 hashes the bytes it forwards.
///
/// # Example
///
/// ```rust
/// use objcodec::checksum::DigestWriter;
/// use std::io::Write;
///
/// let mut buffer = Vec::new();
/// let mut writer = DigestWriter::new(&mut buffer);
/// writer.write_all(b"Hello, World!").unwrap();
///
/// let tally = writer.tally();
/// assert_eq!(tally.bytes, 13);
/// assert_eq!(tally.digest_hex(), "0a0a9f2a6772942557ab5355d76af442f8f65e01");
/// ```
pub struct DigestWriter<W> {
    inner: W,
    sha1: Sha1,
    bytes_written: u64,
}

impl<W> DigestWriter<W> {
    /// Creates a new digest writer wrapping the given writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            sha1: Sha1::new(),
            bytes_written: 0,
        }
    }

    /// Returns the size and digest of everything written so far.
    pub fn tally(&self) -> Tally {
        Tally {
            bytes: self.bytes_written,
            digest: self.sha1.finalize(),
        }
    }

    /// Consumes the wrapper, returning the final tally and the inner writer.
    pub fn into_parts(self) -> (Tally, W) {
        (self.tally(), self.inner)
    }

    /// Returns a mutable reference to the inner writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.sha1.update(&buf[..n]);
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A reader wrapper that counts the bytes it returns.
pub struct CountingReader<R> {
    inner: R,
    bytes_read: u64,
}

impl<R> CountingReader<R> {
    /// Creates a new counting reader wrapping the given reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            bytes_read: 0,
        }
    }

    /// Returns the number of bytes read.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Consumes the wrapper and returns the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Returns a mutable reference to the inner reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes_read += n as u64;
        Ok(n)
    }
}

/// A reader wrapper that counts and SHA-1 hashes the bytes it returns.
pub struct DigestReader<R> {
    inner: R,
    sha1: Sha1,
    bytes_read: u64,
}

impl<R> DigestReader<R> {
    /// Creates a new digest reader wrapping the given reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            sha1: Sha1::new(),
            bytes_read: 0,
        }
    }

    /// Returns the size and digest of everything read so far.
    pub fn tally(&self) -> Tally {
        Tally {
            bytes: self.bytes_read,
            digest: self.sha1.finalize(),
        }
    }

    /// Consumes the wrapper, returning the final tally and the inner reader.
    pub fn into_parts(self) -> (Tally, R) {
        (self.tally(), self.inner)
    }

    /// Returns a mutable reference to the inner reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.sha1.update(&buf[..n]);
        self.bytes_read += n as u64;
        Ok(n)
    }
}

/// Expected size and digest of a decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expected {
    /// Spec of the codec that recorded the values, used in error messages.
    pub codec: String,
    /// Recorded payload size.
    pub bytes: u64,
    /// Recorded payload digest, if the codec records one.
    pub digest: Option<[u8; 20]>,
}

impl Expected {
    /// Compares a collected tally against the recorded values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SizeMismatch`](crate::Error::SizeMismatch) or
    /// [`Error::DigestMismatch`](crate::Error::DigestMismatch).
    pub fn verify(&self, tally: &Tally) -> crate::Result<()> {
        if tally.bytes != self.bytes {
            return Err(crate::Error::SizeMismatch {
                codec: self.codec.clone(),
                expected: self.bytes,
                actual: tally.bytes,
            });
        }
        match self.digest {
            Some(expected) if expected != tally.digest => Err(crate::Error::DigestMismatch {
                codec: self.codec.clone(),
                expected: hex::encode(expected),
                actual: tally.digest_hex(),
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_sha1_known_values() {
        assert_eq!(
            hex::encode(Sha1::compute(b"")),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert_eq!(
            hex::encode(Sha1::compute(b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_sha1_reset() {
        let mut hasher = Sha1::new();
        hasher.update(b"junk");
        hasher.reset();
        hasher.update(b"abc");
        assert_eq!(hasher.finalize(), Sha1::compute(b"abc"));
    }

    #[test]
    fn test_sha1_compute_reader() {
        let data = vec![0x5Au8; READ_BUFFER_SIZE * 3 + 17];
        let mut cursor = Cursor::new(&data);
        assert_eq!(
            Sha1::compute_reader(&mut cursor).unwrap(),
            Sha1::compute(&data)
        );
    }

    #[test]
    fn test_digest_writer_tally() {
        let mut writer = DigestWriter::new(Vec::new());
        writer.write_all(b"Hello, ").unwrap();
        writer.write_all(b"World!").unwrap();
        let (tally, inner) = writer.into_parts();
        assert_eq!(inner, b"Hello, World!");
        assert_eq!(tally.bytes, 13);
        assert_eq!(tally.digest, Sha1::compute(b"Hello, World!"));
    }

    #[test]
    fn test_digest_reader_tally() {
        let mut reader = DigestReader::new(Cursor::new(b"abc".to_vec()));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
        assert_eq!(reader.tally().digest_hex(), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_counting_wrappers() {
        let mut writer = CountingWriter::new(Vec::new());
        writer.write_all(&[1, 2, 3, 4]).unwrap();
        assert_eq!(writer.bytes_written(), 4);

        let mut reader = CountingReader::new(Cursor::new(vec![0u8; 9]));
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(reader.bytes_read(), 4);
    }

    #[test]
    fn test_expected_verify() {
        let tally = Tally {
            bytes: 3,
            digest: Sha1::compute(b"abc"),
        };
        let expected = Expected {
            codec: "COMP:Deflate/5".into(),
            bytes: 3,
            digest: Some(Sha1::compute(b"abc")),
        };
        assert!(expected.verify(&tally).is_ok());

        let wrong_size = Expected { bytes: 4, ..expected.clone() };
        assert!(matches!(
            wrong_size.verify(&tally),
            Err(crate::Error::SizeMismatch { expected: 4, actual: 3, .. })
        ));

        let wrong_digest = Expected {
            digest: Some(Sha1::compute(b"abd")),
            ..expected
        };
        assert!(matches!(
            wrong_digest.verify(&tally),
            Err(crate::Error::DigestMismatch { .. })
        ));
    }
}
