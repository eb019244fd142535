//! Buffered adapters over non-blocking byte streams.
//!
//! [`Source`] and [`Sink`] are the capability contracts every awaitable
//! byte stream in this crate satisfies: a non-suspending `try_` variant
//! that reports "would block" without suspending, and an awaitable variant
//! that retries the system call until it completes. [`BufReader`] and
//! [`BufWriter`] are generic over those contracts, not over any concrete
//! socket type.

use std::future::Future;
use std::io;

use crate::buffer::Buffer;
use crate::{Error, Result};

/// Default capacity for buffered readers and writers.
const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// A non-blocking byte source.
pub trait Source {
    /// Performs one read system call.
    ///
    /// Returns `Ok(None)` when the call would block, `Ok(Some(0))` at end
    /// of stream and `Ok(Some(n))` for `n` transferred bytes.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;

    /// Reads at least one byte, suspending on readiness as needed.
    ///
    /// Returns 0 at end of stream. A canceled wait surfaces as
    /// [`Error::Canceled`].
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize>>;
}

/// A non-blocking byte sink.
pub trait Sink {
    /// Performs one write system call; `Ok(None)` when it would block.
    fn try_write(&mut self, buf: &[u8]) -> io::Result<Option<usize>>;

    /// Writes at least one byte, suspending on readiness as needed.
    fn write(&mut self, buf: &[u8]) -> impl Future<Output = Result<usize>>;
}

/// Buffers reads from a [`Source`].
///
/// Reads prefer buffered bytes over fresh system calls, which also upholds
/// the edge-triggered contract: the source is drained until it reports
/// "would block" before any suspension.
pub struct BufReader<S> {
    buffer: Buffer,
    source: S,
}

impl<S: Source> BufReader<S> {
    pub fn new(source: S) -> BufReader<S> {
        BufReader::with_capacity(DEFAULT_BUFFER_SIZE, source)
    }

    pub fn with_capacity(capacity: usize, source: S) -> BufReader<S> {
        BufReader {
            buffer: Buffer::new(capacity),
            source,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.source
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    /// Drops any buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Advances past `len` buffered bytes.
    pub fn consume(&mut self, len: usize) {
        self.buffer.consume(len);
    }

    /// Refills the buffer with one awaited read.
    ///
    /// Returns false when the source reached end of stream.
    pub async fn fill(&mut self) -> Result<bool> {
        let read = self.source.read(self.buffer.unfilled()).await?;
        self.buffer.add(read);

        Ok(read > 0)
    }

    /// Probes whether the stream is exhausted without suspending.
    ///
    /// Bytes pulled in by the probe stay buffered. `Ok(false)` means data
    /// is available or the source simply has nothing to say right now.
    pub fn done(&mut self) -> io::Result<bool> {
        if !self.buffer.is_empty() {
            return Ok(false);
        }

        match self.source.try_read(self.buffer.unfilled())? {
            Some(0) => Ok(true),
            Some(read) => {
                self.buffer.add(read);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Returns whatever is buffered, refilling once when empty.
    ///
    /// An empty slice means end of stream.
    pub async fn read_some(&mut self) -> Result<&[u8]> {
        if self.buffer.is_empty() {
            self.fill().await?;
        }

        Ok(self.buffer.read_all())
    }

    /// Returns up to `len` bytes, refilling once when empty.
    ///
    /// Fails with [`Error::Eof`] when the stream ends first.
    pub async fn read_at_most(&mut self, len: usize) -> Result<&[u8]> {
        if self.buffer.is_empty() && !self.fill().await? {
            return Err(Error::Eof);
        }

        Ok(self.buffer.read_slice(len))
    }

    /// Fills `dest` completely.
    ///
    /// Requests of at least the buffer capacity drain the buffer and then
    /// read straight into `dest`; smaller requests go through the buffer.
    /// Fails with [`Error::Eof`] when the stream ends short, after having
    /// copied what was available.
    pub async fn read_exact(&mut self, dest: &mut [u8]) -> Result<()> {
        let mut dest = dest;

        if dest.len() >= self.buffer.capacity() {
            if !self.buffer.is_empty() {
                let copied = self.buffer.read(dest);
                let rest = dest;
                dest = &mut rest[copied..];
            }

            while !dest.is_empty() {
                let read = self.source.read(dest).await?;
                if read == 0 {
                    return Err(Error::Eof);
                }

                let rest = dest;
                dest = &mut rest[read..];
            }

            return Ok(());
        }

        while !dest.is_empty() {
            if self.buffer.is_empty() && !self.fill().await? {
                return Err(Error::Eof);
            }

            let copied = self.buffer.read(dest);
            let rest = dest;
            dest = &mut rest[copied..];
        }

        Ok(())
    }
}

impl<S> std::fmt::Debug for BufReader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufReader").field("buffer", &self.buffer).finish()
    }
}

/// Buffers writes to a [`Sink`].
pub struct BufWriter<S> {
    buffer: Buffer,
    sink: S,
}

impl<S: Sink> BufWriter<S> {
    pub fn new(sink: S) -> BufWriter<S> {
        BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, sink)
    }

    pub fn with_capacity(capacity: usize, sink: S) -> BufWriter<S> {
        BufWriter {
            buffer: Buffer::new(capacity),
            sink,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.sink
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_inner(self) -> S {
        self.sink
    }

    /// Drops any buffered bytes without writing them.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Appends `src`, flushing as the buffer fills.
    ///
    /// Writes of at least the buffer capacity flush the buffer and then
    /// write straight from `src`.
    pub async fn write(&mut self, src: &[u8]) -> Result<()> {
        let mut src = src;

        if src.len() >= self.buffer.capacity() {
            self.flush().await?;

            while !src.is_empty() {
                let written = self.sink.write(src).await?;
                src = &src[written..];
            }

            return Ok(());
        }

        while !src.is_empty() {
            if self.buffer.is_full() {
                self.flush().await?;
            }

            let written = self.buffer.write(src);
            src = &src[written..];
        }

        Ok(())
    }

    /// Writes out every buffered byte.
    pub async fn flush(&mut self) -> Result<()> {
        while !self.buffer.is_empty() {
            let written = self.sink.write(self.buffer.data()).await?;
            self.buffer.consume(written);
        }

        Ok(())
    }

    /// Flushes as much as possible without suspending.
    ///
    /// Returns true when buffered bytes remain and the caller should await
    /// writability before trying again.
    pub fn try_flush(&mut self) -> io::Result<bool> {
        while !self.buffer.is_empty() {
            match self.sink.try_write(self.buffer.data())? {
                Some(written) => self.buffer.consume(written),
                None => return Ok(true),
            }
        }

        Ok(false)
    }
}

impl<S> std::fmt::Debug for BufWriter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufWriter").field("buffer", &self.buffer).finish()
    }
}
