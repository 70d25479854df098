//! Streaming AES-CBC filters with PKCS#7 padding.
//!
//! The filters buffer at most one chunk of input. The encrypting side pads
//! the tail on finish; the decrypting side always holds back the last
//! ciphertext block because only the final block carries the padding.

use std::io::{self, Read, Write};

use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use zeroize::Zeroizing;

use super::BLOCK_SIZE;
use crate::stream::{ReadFilter, WriteFilter};
use crate::{Error, Result};

/// Bytes encrypted per batch.
const CHUNK_SIZE: usize = 4096;

fn cipher_error(e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

fn encrypt_with<C>(key: &[u8], iv: &[u8], blocks: &mut [u8]) -> io::Result<()>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
    cbc::Encryptor<C>: KeyIvInit + BlockEncryptMut,
{
    let len = blocks.len();
    cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(cipher_error)?
        .encrypt_padded_mut::<NoPadding>(blocks, len)
        .map_err(cipher_error)?;
    Ok(())
}

fn decrypt_with<C>(key: &[u8], iv: &[u8], blocks: &mut [u8]) -> io::Result<()>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
    cbc::Decryptor<C>: KeyIvInit + BlockDecryptMut,
{
    cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(cipher_error)?
        .decrypt_padded_mut::<NoPadding>(blocks)
        .map_err(cipher_error)?;
    Ok(())
}

/// Key and chaining state shared by the four filters.
pub(crate) struct CbcState {
    key: Zeroizing<Vec<u8>>,
    iv: [u8; BLOCK_SIZE],
}

impl CbcState {
    pub(crate) fn new(key: Zeroizing<Vec<u8>>, iv: [u8; BLOCK_SIZE]) -> Result<Self> {
        match key.len() {
            16 | 24 | 32 => Ok(Self { key, iv }),
            n => Err(Error::InvalidKeySize {
                bits: (n * 8) as u32,
            }),
        }
    }

    /// Encrypts whole blocks in place and chains the IV.
    fn encrypt(&mut self, blocks: &mut [u8]) -> io::Result<()> {
        if blocks.is_empty() {
            return Ok(());
        }
        match self.key.len() {
            16 => encrypt_with::<Aes128>(&self.key, &self.iv, blocks)?,
            24 => encrypt_with::<Aes192>(&self.key, &self.iv, blocks)?,
            _ => encrypt_with::<Aes256>(&self.key, &self.iv, blocks)?,
        }
        self.iv.copy_from_slice(&blocks[blocks.len() - BLOCK_SIZE..]);
        Ok(())
    }

    /// Decrypts whole blocks in place and chains the IV.
    fn decrypt(&mut self, blocks: &mut [u8]) -> io::Result<()> {
        if blocks.is_empty() {
            return Ok(());
        }
        let mut next_iv = [0u8; BLOCK_SIZE];
        next_iv.copy_from_slice(&blocks[blocks.len() - BLOCK_SIZE..]);
        match self.key.len() {
            16 => decrypt_with::<Aes128>(&self.key, &self.iv, blocks)?,
            24 => decrypt_with::<Aes192>(&self.key, &self.iv, blocks)?,
            _ => decrypt_with::<Aes256>(&self.key, &self.iv, blocks)?,
        }
        self.iv = next_iv;
        Ok(())
    }

    /// Pads and encrypts the final partial block.
    fn encrypt_final(&mut self, mut tail: Vec<u8>) -> io::Result<Vec<u8>> {
        let pad = BLOCK_SIZE - tail.len() % BLOCK_SIZE;
        tail.extend(std::iter::repeat_n(pad as u8, pad));
        self.encrypt(&mut tail)?;
        Ok(tail)
    }

    /// Decrypts the held-back final block and strips its padding.
    fn decrypt_final(&mut self, mut last: Vec<u8>) -> io::Result<Vec<u8>> {
        if last.len() != BLOCK_SIZE {
            return Err(cipher_error(format!(
                "ciphertext is not a whole number of blocks ({} trailing bytes)",
                last.len() % BLOCK_SIZE
            )));
        }
        self.decrypt(&mut last)?;
        let pad = usize::from(last[BLOCK_SIZE - 1]);
        let valid = (1..=BLOCK_SIZE).contains(&pad)
            && last[BLOCK_SIZE - pad..].iter().all(|&b| usize::from(b) == pad);
        if !valid {
            return Err(cipher_error("invalid PKCS#7 padding"));
        }
        last.truncate(BLOCK_SIZE - pad);
        Ok(last)
    }
}

/// Length of the prefix of `pending` that can be decrypted now, keeping at
/// least one whole block back.
fn releasable(pending: usize) -> usize {
    if pending <= BLOCK_SIZE {
        return 0;
    }
    let keep = match pending % BLOCK_SIZE {
        0 => BLOCK_SIZE,
        rem => rem + BLOCK_SIZE,
    };
    pending.saturating_sub(keep) / BLOCK_SIZE * BLOCK_SIZE
}

/// Encrypts everything written to it into `W`.
pub(crate) struct CbcEncryptWriter<W> {
    inner: W,
    state: CbcState,
    pending: Vec<u8>,
}

impl<W: Write> CbcEncryptWriter<W> {
    pub(crate) fn new(inner: W, state: CbcState) -> Self {
        Self {
            inner,
            state,
            pending: Vec::with_capacity(CHUNK_SIZE + BLOCK_SIZE),
        }
    }

    fn flush_blocks(&mut self) -> io::Result<()> {
        let whole = self.pending.len() / BLOCK_SIZE * BLOCK_SIZE;
        if whole == 0 {
            return Ok(());
        }
        self.state.encrypt(&mut self.pending[..whole])?;
        self.inner.write_all(&self.pending[..whole])?;
        self.pending.drain(..whole);
        Ok(())
    }
}

impl<W: Write> Write for CbcEncryptWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        if self.pending.len() >= CHUNK_SIZE {
            self.flush_blocks()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_blocks()?;
        self.inner.flush()
    }
}

impl<W: Write + Send> WriteFilter<W> for CbcEncryptWriter<W> {
    fn finish_filter(mut self: Box<Self>) -> Result<W> {
        self.flush_blocks()?;
        let tail = std::mem::take(&mut self.pending);
        let last = self.state.encrypt_final(tail)?;
        self.inner.write_all(&last)?;
        Ok(self.inner)
    }
}

/// Decrypts everything written to it into `W`.
pub(crate) struct CbcDecryptWriter<W> {
    inner: W,
    state: CbcState,
    pending: Vec<u8>,
}

impl<W: Write> CbcDecryptWriter<W> {
    pub(crate) fn new(inner: W, state: CbcState) -> Self {
        Self {
            inner,
            state,
            pending: Vec::with_capacity(CHUNK_SIZE + 2 * BLOCK_SIZE),
        }
    }

    fn flush_blocks(&mut self) -> io::Result<()> {
        let ready = releasable(self.pending.len());
        if ready == 0 {
            return Ok(());
        }
        self.state.decrypt(&mut self.pending[..ready])?;
        self.inner.write_all(&self.pending[..ready])?;
        self.pending.drain(..ready);
        Ok(())
    }
}

impl<W: Write> Write for CbcDecryptWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        if self.pending.len() >= CHUNK_SIZE {
            self.flush_blocks()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_blocks()?;
        self.inner.flush()
    }
}

impl<W: Write + Send> WriteFilter<W> for CbcDecryptWriter<W> {
    fn finish_filter(mut self: Box<Self>) -> Result<W> {
        self.flush_blocks()?;
        let last = std::mem::take(&mut self.pending);
        let plain = self.state.decrypt_final(last)?;
        self.inner.write_all(&plain)?;
        Ok(self.inner)
    }
}

/// Yields the encrypted form of `R`.
pub(crate) struct CbcEncryptReader<R> {
    inner: R,
    state: CbcState,
    pending: Vec<u8>,
    ready: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl<R: Read> CbcEncryptReader<R> {
    pub(crate) fn new(inner: R, state: CbcState) -> Self {
        Self {
            inner,
            state,
            pending: Vec::new(),
            ready: Vec::new(),
            pos: 0,
            finished: false,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; CHUNK_SIZE];
        loop {
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                let tail = std::mem::take(&mut self.pending);
                self.ready = self.state.encrypt_final(tail)?;
                self.finished = true;
                break;
            }
            self.pending.extend_from_slice(&chunk[..n]);
            let whole = self.pending.len() / BLOCK_SIZE * BLOCK_SIZE;
            if whole > 0 {
                self.state.encrypt(&mut self.pending[..whole])?;
                self.ready = self.pending.drain(..whole).collect();
                break;
            }
        }
        self.pos = 0;
        Ok(())
    }
}

impl<R: Read> Read for CbcEncryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.ready.len() {
            if self.finished {
                return Ok(0);
            }
            self.fill()?;
        }
        let n = (self.ready.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.ready[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl<R: Read + Send> ReadFilter<R> for CbcEncryptReader<R> {
    fn finish_filter(self: Box<Self>) -> Result<R> {
        Ok(self.inner)
    }
}

/// Yields the decrypted form of `R`.
pub(crate) struct CbcDecryptReader<R> {
    inner: R,
    state: CbcState,
    pending: Vec<u8>,
    ready: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl<R: Read> CbcDecryptReader<R> {
    pub(crate) fn new(inner: R, state: CbcState) -> Self {
        Self {
            inner,
            state,
            pending: Vec::new(),
            ready: Vec::new(),
            pos: 0,
            finished: false,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; CHUNK_SIZE];
        loop {
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                let last = std::mem::take(&mut self.pending);
                self.ready = self.state.decrypt_final(last)?;
                self.finished = true;
                break;
            }
            self.pending.extend_from_slice(&chunk[..n]);
            let ready = releasable(self.pending.len());
            if ready > 0 {
                self.state.decrypt(&mut self.pending[..ready])?;
                self.ready = self.pending.drain(..ready).collect();
                break;
            }
        }
        self.pos = 0;
        Ok(())
    }
}

impl<R: Read> Read for CbcDecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.ready.len() {
            if self.finished {
                return Ok(0);
            }
            self.fill()?;
        }
        let n = (self.ready.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.ready[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl<R: Read + Send> ReadFilter<R> for CbcDecryptReader<R> {
    fn finish_filter(self: Box<Self>) -> Result<R> {
        Ok(self.inner)
    }
}

/// Size of `plain_len` bytes after padding and encryption.
pub(crate) fn padded_len(plain_len: u64) -> u64 {
    plain_len - plain_len % BLOCK_SIZE as u64 + BLOCK_SIZE as u64
}
