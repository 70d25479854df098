//! Bounded in-memory byte pipe.
//!
//! [`pipe`] returns a connected reader/writer pair sharing a fixed-capacity
//! buffer. Writes block while the buffer is full and reads block while it is
//! empty, which gives producer and consumer threads natural backpressure.
//!
//! Dropping either end closes it: the reader sees end of data once the
//! writer is gone and the buffer drains, and the writer gets
//! [`io::ErrorKind::BrokenPipe`] once the reader is gone.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

struct State {
    buffer: VecDeque<u8>,
    capacity: usize,
    reader_closed: bool,
    writer_closed: bool,
}

struct Shared {
    state: Mutex<State>,
    readable: Condvar,
    writable: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| {
            log::warn!("pipe mutex was poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn wait<'a>(&self, condvar: &Condvar, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        condvar
            .wait(guard)
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Creates a pipe holding at most `capacity` bytes in flight.
///
/// A capacity of zero is treated as one.
///
/// # Example
///
/// ```rust
/// use std::io::{Read, Write};
///
/// let (mut reader, mut writer) = objcodec::pipe::pipe(16);
/// let producer = std::thread::spawn(move || writer.write_all(&[7u8; 100]));
///
/// let mut received = Vec::new();
/// reader.read_to_end(&mut received).unwrap();
/// producer.join().unwrap().unwrap();
/// assert_eq!(received, vec![7u8; 100]);
/// ```
pub fn pipe(capacity: usize) -> (PipeReader, PipeWriter) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            reader_closed: false,
            writer_closed: false,
        }),
        readable: Condvar::new(),
        writable: Condvar::new(),
    });
    (
        PipeReader {
            shared: Arc::clone(&shared),
        },
        PipeWriter { shared },
    )
}

/// The reading end of a [`pipe`].
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl PipeReader {
    /// Closes the reading end; further writes fail with a broken pipe.
    pub fn close(&mut self) {
        let mut state = self.shared.lock();
        if !state.reader_closed {
            state.reader_closed = true;
            state.buffer.clear();
            self.shared.writable.notify_all();
        }
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.shared.lock();
        loop {
            if state.reader_closed {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "read from closed pipe",
                ));
            }
            if !state.buffer.is_empty() {
                break;
            }
            if state.writer_closed {
                return Ok(0);
            }
            state = self.shared.wait(&self.shared.readable, state);
        }

        let n = buf.len().min(state.buffer.len());
        for (dst, src) in buf.iter_mut().zip(state.buffer.drain(..n)) {
            *dst = src;
        }
        self.shared.writable.notify_all();
        Ok(n)
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeReader").finish_non_exhaustive()
    }
}

/// The writing end of a [`pipe`].
pub struct PipeWriter {
    shared: Arc<Shared>,
}

impl PipeWriter {
    /// Closes the writing end; the reader sees end of data after draining.
    pub fn close(&mut self) {
        let mut state = self.shared.lock();
        if !state.writer_closed {
            state.writer_closed = true;
            self.shared.readable.notify_all();
        }
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.shared.lock();
        loop {
            if state.reader_closed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"));
            }
            if state.writer_closed {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "write to closed pipe",
                ));
            }
            if state.buffer.len() < state.capacity {
                break;
            }
            state = self.shared.wait(&self.shared.writable, state);
        }

        let n = buf.len().min(state.capacity - state.buffer.len());
        state.buffer.extend(&buf[..n]);
        self.shared.readable.notify_all();
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeWriter").finish_non_exhaustive()
    }
}
