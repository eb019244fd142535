use std::cell::Cell;
use std::io;
use std::net::Shutdown;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::path::Path;

use log::debug;

use crate::io::{Sink, Source};
use crate::net::{addr, Endpoint};
use crate::runtime::Registration;
use crate::sys::socket::{self as sock, SockAddr};
use crate::{error, Error, Interest, Result};

/// A non-blocking stream socket driven by the runtime.
///
/// Every awaitable operation follows the edge-triggered contract: the
/// system call is retried until the kernel reports "would block", and only
/// then does the operation suspend on readiness. At most one operation per
/// readiness direction may be suspended at a time.
///
/// A system call failing unrecoverably sets a sticky `failed` flag; the
/// connection pool consults it to avoid recycling broken connections.
pub struct Stream {
    // Deregisters before the descriptor closes.
    registration: Registration,
    fd: OwnedFd,
    failed: Cell<bool>,
}

impl Stream {
    /// Wraps an already-connected descriptor.
    ///
    /// The descriptor must be non-blocking; ownership transfers to the
    /// stream.
    pub(crate) fn from_owned(fd: OwnedFd, interest: Interest) -> Result<Stream> {
        let registration = Registration::new(fd.as_raw_fd(), interest)?;

        Ok(Stream {
            fd,
            registration,
            failed: Cell::new(false),
        })
    }

    /// Creates a connected pair of Unix stream sockets.
    pub fn pair() -> Result<(Stream, Stream)> {
        let (a, b) = sock::pair()?;

        // SAFETY: `socketpair` returned two fresh, valid descriptors.
        let (a, b) = unsafe { (OwnedFd::from_raw_fd(a), OwnedFd::from_raw_fd(b)) };

        Ok((
            Stream::from_owned(a, Interest::READABLE)?,
            Stream::from_owned(b, Interest::READABLE)?,
        ))
    }

    /// Connects to `endpoint`.
    pub async fn connect<E>(endpoint: E) -> Result<Stream>
    where
        E: Into<Endpoint>,
    {
        match endpoint.into() {
            Endpoint::Inet(inet) => Stream::connect_inet(&inet.host, &inet.port).await,
            Endpoint::Unix(unix) => Stream::connect_unix(&unix.path).await,
        }
    }

    /// Connects to `host:port`, trying each resolved address in order.
    pub async fn connect_inet(host: &str, port: &str) -> Result<Stream> {
        let addrs = addr::resolve(host, port)?;
        let mut last_error = None;

        for addr in &addrs {
            match Stream::connect_addr(addr).await {
                Ok(stream) => {
                    debug!("{:?} connected to {}:{}", stream, host, port);
                    return Ok(stream);
                }
                Err(err @ Error::Canceled) => return Err(err),
                Err(err) => last_error = Some(err),
            }
        }

        Err(last_error.expect("resolver produced no addresses"))
    }

    /// Connects to the Unix socket at `path`.
    pub async fn connect_unix(path: impl AsRef<Path>) -> Result<Stream> {
        let path = path.as_ref();
        let addr = SockAddr::unix(path)?;

        let stream = Stream::connect_addr(&addr).await?;
        debug!("{:?} connected to {:?}", stream, path);

        Ok(stream)
    }

    async fn connect_addr(addr: &SockAddr) -> Result<Stream> {
        let fd = sock::new_socket(addr.family(), libc::SOCK_STREAM)?;
        // SAFETY: `new_socket` returned a fresh, valid descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let stream = Stream::from_owned(fd, Interest::WRITABLE)?;

        match sock::connect(stream.as_raw_fd(), addr) {
            Ok(()) => return Ok(stream),
            Err(err) if err.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(err) => return Err(err.into()),
        }

        if !stream.registration.writable().await? {
            return Err(Error::Canceled);
        }

        // The connection attempt finished; its outcome is in `SO_ERROR`.
        match sock::take_error(stream.as_raw_fd())? {
            None => Ok(stream),
            Some(err) => Err(err.into()),
        }
    }

    /// Performs one `recv`.
    ///
    /// `Ok(None)` means the call would block; `Ok(Some(0))` is end of
    /// stream.
    pub fn try_read(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        self.check(error::would_block(sock::recv(self.as_raw_fd(), buf, 0)))
    }

    /// Reads up to `buf.len()` bytes, suspending until the socket is
    /// readable. Returns 0 at end of stream.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if let Some(read) = self.try_read(buf)? {
                return Ok(read);
            }

            if !self.registration.readable().await? {
                return Err(Error::Canceled);
            }
        }
    }

    /// Performs one `send`; `SIGPIPE` is suppressed.
    pub fn try_write(&self, buf: &[u8]) -> io::Result<Option<usize>> {
        self.check(error::would_block(sock::send(self.as_raw_fd(), buf)))
    }

    /// Writes some of `buf`, suspending until the socket is writable.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        loop {
            if let Some(written) = self.try_write(buf)? {
                return Ok(written);
            }

            if !self.registration.writable().await? {
                return Err(Error::Canceled);
            }
        }
    }

    /// Writes all of `buf`.
    pub async fn write_all(&self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let written = self.write(buf).await?;
            buf = &buf[written..];
        }

        Ok(())
    }

    /// Transfers `count` bytes from `file` into the socket with
    /// `sendfile(2)`, suspending on writability as needed.
    pub async fn sendfile(&self, file: BorrowedFd<'_>, count: usize) -> Result<()> {
        let mut remaining = count;

        while remaining > 0 {
            let sent = self.check(error::would_block(sock::sendfile(
                self.as_raw_fd(),
                file.as_raw_fd(),
                remaining,
            )))?;

            match sent {
                Some(sent) => remaining -= sent,
                None => {
                    if !self.registration.writable().await? {
                        return Err(Error::Canceled);
                    }
                }
            }
        }

        Ok(())
    }

    /// Shuts down the read, write, or both halves of the connection.
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        sock::shutdown(self.as_raw_fd(), how)
    }

    /// Probes, without consuming data or suspending, whether the peer has
    /// closed the connection.
    pub fn peer_closed(&self) -> io::Result<bool> {
        let mut byte = [0u8; 1];

        match sock::recv(self.as_raw_fd(), &mut byte, libc::MSG_PEEK | libc::MSG_DONTWAIT) {
            Ok(0) => Ok(true),
            Ok(_) => Ok(false),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Returns the pending `SO_ERROR` value, clearing it.
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        sock::take_error(self.as_raw_fd())
    }

    /// True once a system call on this socket has failed unrecoverably.
    pub fn failed(&self) -> bool {
        self.failed.get()
    }

    /// Cancels suspended operations on this socket; they resume with
    /// [`Error::Canceled`].
    pub fn cancel(&self) {
        self.registration.cancel();
    }

    fn check<T>(&self, result: io::Result<T>) -> io::Result<T> {
        if let Err(err) = &result {
            debug!("{:?} failed: {}", self, err);
            self.failed.set(true);
        }

        result
    }
}

impl AsRawFd for Stream {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for Stream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl IntoRawFd for Stream {
    /// Releases the descriptor, deregistering it from the runtime. Any
    /// suspended operations resume canceled.
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socket ({})", self.fd.as_raw_fd())
    }
}

impl Source for Stream {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        Stream::try_read(self, buf)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Stream::read(self, buf).await
    }
}

impl Source for &Stream {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        Stream::try_read(*self, buf)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Stream::read(*self, buf).await
    }
}

impl Sink for Stream {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<Option<usize>> {
        Stream::try_write(self, buf)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Stream::write(self, buf).await
    }
}

impl Sink for &Stream {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<Option<usize>> {
        Stream::try_write(*self, buf)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Stream::write(*self, buf).await
    }
}

/// Connects to `endpoint`; shorthand for [`Stream::connect`].
pub async fn connect<E>(endpoint: E) -> Result<Stream>
where
    E: Into<Endpoint>,
{
    Stream::connect(endpoint).await
}
