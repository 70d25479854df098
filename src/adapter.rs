//! Pipe/thread adapter for blocking bulk codecs.
//!
//! Some compression engines only offer a single blocking call that consumes
//! a whole input stream and produces a whole output stream. The adapters in
//! this module run such a call on a background worker thread connected to
//! the caller through a bounded [`pipe`](crate::pipe::pipe), so the engine
//! can sit inside a codec chain like any incremental filter.
//!
//! - [`PipedWriter`]: the caller writes into the pipe, the worker reads it
//!   and writes its output to a downstream writer.
//! - [`PipedReader`]: the worker reads an upstream source and writes its
//!   output into the pipe, the caller reads the other end.
//!
//! Every read or write first checks whether the worker has recorded a
//! failure and re-raises it. Closing stops the feed, joins the worker and
//! only then hands the downstream writer or upstream reader back to the
//! caller, so nothing is closed while the worker still holds it.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::pipe::{PipeReader, PipeWriter, pipe};
use crate::stream::{ReadFilter, WriteFilter};
use crate::{Error, Result};

/// A codec that can only process a complete stream in one blocking call.
pub trait BulkCodec: Send + 'static {
    /// Short name used for worker threads and error messages.
    fn name(&self) -> &'static str;

    /// Reads `input` to its end and writes the complete result to `output`.
    fn process(&mut self, input: &mut dyn Read, output: &mut dyn Write) -> Result<()>;
}

/// Failure recorded by a worker, surfaced on the next adapter operation.
struct WorkerFailure {
    codec: &'static str,
    slot: Mutex<Option<Error>>,
    reported: AtomicBool,
}

impl WorkerFailure {
    fn new(codec: &'static str) -> Self {
        Self {
            codec,
            slot: Mutex::new(None),
            reported: AtomicBool::new(false),
        }
    }

    fn record(&self, err: Error) {
        log::error!("{} worker failed: {}", self.codec, err);
        let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        slot.get_or_insert(err);
    }

    fn take(&self) -> Option<Error> {
        self.slot.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    /// Re-raises a recorded failure. Typed failures keep their variant;
    /// plain I/O failures are wrapped with the codec name.
    fn check(&self) -> Result<()> {
        if let Some(err) = self.take() {
            self.reported.store(true, Ordering::Release);
            return Err(match err {
                Error::Io(source) => Error::AdapterWorkerFailure {
                    codec: self.codec,
                    source,
                },
                typed => typed,
            });
        }
        if self.reported.load(Ordering::Acquire) {
            return Err(self.failure("worker failed earlier"));
        }
        Ok(())
    }

    fn failure(&self, message: &'static str) -> Error {
        Error::AdapterWorkerFailure {
            codec: self.codec,
            source: io::Error::other(message),
        }
    }
}

fn spawn_worker<T, F>(name: &'static str, work: F) -> Result<JoinHandle<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    Ok(thread::Builder::new()
        .name(format!("{name}-worker"))
        .spawn(work)?)
}

/// Push-direction adapter: writes go to a worker that feeds `D`.
pub struct PipedWriter<D: Send + 'static> {
    pipe: Option<PipeWriter>,
    worker: Option<JoinHandle<D>>,
    failure: Arc<WorkerFailure>,
}

impl<D: Write + Send + 'static> PipedWriter<D> {
    /// Starts a worker running `codec` with the pipe as input and
    /// `downstream` as output.
    pub fn spawn<B: BulkCodec>(mut codec: B, downstream: D, buffer_size: usize) -> Result<Self> {
        let name = codec.name();
        let (mut reader, writer) = pipe(buffer_size);
        let failure = Arc::new(WorkerFailure::new(name));
        let recorder = Arc::clone(&failure);

        let worker = spawn_worker(name, move || {
            let mut downstream = downstream;
            if let Err(err) = codec.process(&mut reader, &mut downstream) {
                recorder.record(err);
            }
            // Unblock a caller stuck on a full pipe.
            reader.close();
            downstream
        })?;
        log::debug!("started {name} writer worker (buffer {buffer_size} bytes)");

        Ok(Self {
            pipe: Some(writer),
            worker: Some(worker),
            failure,
        })
    }

    /// Closes the pipe, joins the worker and returns the downstream writer.
    ///
    /// The downstream writer is only handed back after the worker has
    /// exited, so the caller can close it safely.
    pub fn finish(&mut self) -> Result<D> {
        if let Some(mut pipe) = self.pipe.take() {
            pipe.close();
        }
        let worker = self
            .worker
            .take()
            .ok_or_else(|| self.failure.failure("adapter already finished"))?;
        let downstream = worker
            .join()
            .map_err(|_| self.failure.failure("worker panicked"))?;
        self.failure.check()?;
        Ok(downstream)
    }
}

impl<D: Write + Send + 'static> Write for PipedWriter<D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.failure.check().map_err(Error::into_io)?;
        let pipe = self
            .pipe
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "adapter is closed"))?;
        match pipe.write(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.failure.check().map_err(Error::into_io)?;
                Err(e)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.failure.check().map_err(Error::into_io)
    }
}

impl<D: Send + 'static> Drop for PipedWriter<D> {
    fn drop(&mut self) {
        if let Some(mut pipe) = self.pipe.take() {
            pipe.close();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Pull-direction adapter: a worker reads `S` and the caller reads its output.
pub struct PipedReader<S: Send + 'static> {
    pipe: Option<PipeReader>,
    worker: Option<JoinHandle<S>>,
    failure: Arc<WorkerFailure>,
    reached_end: bool,
}

impl<S: Read + Send + 'static> PipedReader<S> {
    /// Starts a worker running `codec` with `source` as input and the pipe
    /// as output.
    pub fn spawn<B: BulkCodec>(mut codec: B, source: S, buffer_size: usize) -> Result<Self> {
        let name = codec.name();
        let (reader, mut writer) = pipe(buffer_size);
        let failure = Arc::new(WorkerFailure::new(name));
        let recorder = Arc::clone(&failure);

        let worker = spawn_worker(name, move || {
            let mut source = source;
            if let Err(err) = codec.process(&mut source, &mut writer) {
                recorder.record(err);
            }
            // Recorded before closing so the reader sees the failure at end of data.
            writer.close();
            source
        })?;
        log::debug!("started {name} reader worker (buffer {buffer_size} bytes)");

        Ok(Self {
            pipe: Some(reader),
            worker: Some(worker),
            failure,
            reached_end: false,
        })
    }

    /// Closes the pipe, joins the worker and returns the upstream source.
    ///
    /// Closing before the end of data makes the worker fail on its next
    /// write into the pipe; that failure is expected and not reported.
    pub fn finish(&mut self) -> Result<S> {
        if let Some(mut pipe) = self.pipe.take() {
            pipe.close();
        }
        let worker = self
            .worker
            .take()
            .ok_or_else(|| self.failure.failure("adapter already finished"))?;
        let source = worker
            .join()
            .map_err(|_| self.failure.failure("worker panicked"))?;
        if self.reached_end {
            self.failure.check()?;
        } else if let Some(err) = self.failure.take() {
            log::debug!("ignoring worker failure after early close: {err}");
        }
        Ok(source)
    }
}

impl<S: Read + Send + 'static> Read for PipedReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.failure.check().map_err(Error::into_io)?;
        let pipe = self
            .pipe
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "adapter is closed"))?;
        match pipe.read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.reached_end = true;
                self.failure.check().map_err(Error::into_io)?;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                self.failure.check().map_err(Error::into_io)?;
                Err(e)
            }
        }
    }
}

impl<D: Write + Send + 'static> WriteFilter<D> for PipedWriter<D> {
    fn finish_filter(mut self: Box<Self>) -> Result<D> {
        self.finish()
    }
}

impl<S: Read + Send + 'static> ReadFilter<S> for PipedReader<S> {
    fn finish_filter(mut self: Box<Self>) -> Result<S> {
        self.finish()
    }
}

impl<S: Send + 'static> Drop for PipedReader<S> {
    fn drop(&mut self) {
        if let Some(mut pipe) = self.pipe.take() {
            pipe.close();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Uppercases its whole input in one call.
    struct Upper;

    impl BulkCodec for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }

        fn process(&mut self, input: &mut dyn Read, output: &mut dyn Write) -> Result<()> {
            let mut all = Vec::new();
            input.read_to_end(&mut all)?;
            output.write_all(&all.to_ascii_uppercase())?;
            Ok(())
        }
    }

    /// Fails with a typed error after consuming its input.
    struct Rejecting;

    impl BulkCodec for Rejecting {
        fn name(&self) -> &'static str {
            "rejecting"
        }

        fn process(&mut self, input: &mut dyn Read, _output: &mut dyn Write) -> Result<()> {
            io::copy(input, &mut io::sink())?;
            Err(Error::SignatureMismatch)
        }
    }

    /// Fails with a plain I/O error immediately.
    struct Broken;

    impl BulkCodec for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn process(&mut self, _input: &mut dyn Read, _output: &mut dyn Write) -> Result<()> {
            Err(io::Error::new(io::ErrorKind::InvalidData, "corrupt stream").into())
        }
    }

    #[test]
    fn test_piped_writer_roundtrip() {
        let mut writer = PipedWriter::spawn(Upper, Vec::new(), 16).unwrap();
        writer.write_all(&b"hello pipe ".repeat(100)).unwrap();
        let output = writer.finish().unwrap();
        assert_eq!(output, b"HELLO PIPE ".repeat(100));
    }

    #[test]
    fn test_piped_reader_roundtrip() {
        let source = Cursor::new(b"stream me".repeat(50));
        let mut reader = PipedReader::spawn(Upper, source, 8).unwrap();
        let mut output = Vec::new();
        reader.read_to_end(&mut output).unwrap();
        reader.finish().unwrap();
        assert_eq!(output, b"STREAM ME".repeat(50));
    }

    #[test]
    fn test_typed_failure_preserved() {
        let mut writer = PipedWriter::spawn(Rejecting, Vec::new(), 16).unwrap();
        writer.write_all(b"data").unwrap();
        assert!(matches!(writer.finish(), Err(Error::SignatureMismatch)));
    }

    #[test]
    fn test_io_failure_wrapped() {
        let source = Cursor::new(vec![0u8; 10]);
        let mut reader = PipedReader::spawn(Broken, source, 16).unwrap();
        let mut output = Vec::new();
        let err = reader.read_to_end(&mut output).unwrap_err();
        let err = Error::from(err);
        assert!(matches!(
            err,
            Error::AdapterWorkerFailure { codec: "broken", .. }
        ));
    }

    #[test]
    fn test_write_surfaces_failure() {
        let mut writer = PipedWriter::spawn(Broken, Vec::new(), 4).unwrap();
        let result = writer.write_all(&[0u8; 4096]);
        let err = Error::from(result.unwrap_err());
        assert!(matches!(err, Error::AdapterWorkerFailure { .. }));
        assert!(writer.finish().is_err());
    }

    #[test]
    fn test_early_close_of_reader() {
        let source = Cursor::new(vec![b'a'; 100_000]);
        let mut reader = PipedReader::spawn(Upper, source, 16).unwrap();
        let mut first = [0u8; 10];
        reader.read_exact(&mut first).unwrap();
        assert_eq!(&first, b"AAAAAAAAAA");
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_drop_without_finish_joins_worker() {
        let mut writer = PipedWriter::spawn(Upper, Vec::new(), 4).unwrap();
        writer.write_all(b"abc").unwrap();
        drop(writer);
    }
}
