//! Helpers shared by unit tests.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::stream::{RawReader, RawWriter, Source, Target};

/// A cloneable in-memory sink whose contents survive the writer stack.
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub(crate) fn target(&self) -> Target {
        Box::new(RawWriter::new(self.clone()))
    }

    pub(crate) fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) fn source(data: &[u8]) -> Source {
    Box::new(RawReader::new(io::Cursor::new(data.to_vec())))
}

/// Mixed text and binary payload that compresses moderately.
pub(crate) fn sample_payload(len: usize) -> Vec<u8> {
    let text = b"The quick brown fox jumps over the lazy dog. ";
    (0..len)
        .map(|i| {
            if i % 97 < 80 {
                text[i % text.len()]
            } else {
                (i.wrapping_mul(2654435761) >> 7) as u8
            }
        })
        .collect()
}
