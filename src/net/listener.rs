use std::cell::Cell;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;

use log::{debug, warn};

use crate::net::{addr, Endpoint, Stream};
use crate::runtime::Registration;
use crate::sys::socket::{self as sock, SockAddr};
use crate::{error, Interest, Result};

/// The address a listener ended up bound to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoundAddr {
    Inet(SocketAddr),
    Unix(PathBuf),
}

impl std::fmt::Display for BoundAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundAddr::Inet(addr) => write!(f, "{}", addr),
            BoundAddr::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A bound, listening stream socket.
pub struct Listener {
    // Deregisters before the descriptor closes.
    registration: Registration,
    fd: OwnedFd,
    addr: BoundAddr,
    closed: Cell<bool>,
}

impl Listener {
    /// Binds to `endpoint` and starts listening.
    ///
    /// Internet endpoints get `SO_REUSEADDR`; Unix endpoints have their
    /// configured mode and ownership applied after the bind.
    pub fn bind(endpoint: &Endpoint, backlog: i32) -> Result<Listener> {
        let (fd, addr) = match endpoint {
            Endpoint::Inet(inet) => Listener::bind_inet(&inet.host, &inet.port)?,
            Endpoint::Unix(unix) => {
                let fd = Listener::bind_unix(unix)?;
                (fd, BoundAddr::Unix(unix.path.clone()))
            }
        };

        sock::listen(fd.as_raw_fd(), backlog)?;
        debug!("listener ({}) bound to {}", fd.as_raw_fd(), addr);

        let registration = Registration::new(fd.as_raw_fd(), Interest::READABLE)?;

        Ok(Listener {
            fd,
            registration,
            addr,
            closed: Cell::new(false),
        })
    }

    fn bind_inet(host: &str, port: &str) -> Result<(OwnedFd, BoundAddr)> {
        let addrs = addr::resolve(host, port)?;
        let mut last_error = None;

        for candidate in &addrs {
            match Listener::try_bind(candidate) {
                Ok(fd) => {
                    let local = sock::local_addr(fd.as_raw_fd())?;
                    // SAFETY: `getsockname` on an inet socket fills in a
                    // `sockaddr_in` or `sockaddr_in6`.
                    let local = unsafe { sock::to_socket_addr(&local.storage)? };

                    return Ok((fd, BoundAddr::Inet(local)));
                }
                Err(err) => last_error = Some(err),
            }
        }

        Err(last_error.expect("resolver produced no addresses").into())
    }

    fn try_bind(addr: &SockAddr) -> io::Result<OwnedFd> {
        let fd = sock::new_socket(addr.family(), libc::SOCK_STREAM)?;
        // SAFETY: `new_socket` returned a fresh, valid descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        sock::set_reuseaddr(fd.as_raw_fd())?;
        sock::bind(fd.as_raw_fd(), addr)?;

        Ok(fd)
    }

    fn bind_unix(unix: &crate::net::UnixEndpoint) -> Result<OwnedFd> {
        let addr = SockAddr::unix(&unix.path)?;

        let fd = sock::new_socket(libc::AF_UNIX, libc::SOCK_STREAM)?;
        // SAFETY: `new_socket` returned a fresh, valid descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        sock::bind(fd.as_raw_fd(), &addr)?;
        unix.apply_permissions()?;

        Ok(fd)
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> &BoundAddr {
        &self.addr
    }

    /// Accepts the next connection.
    ///
    /// Returns `Ok(None)` once the listener was closed or canceled.
    /// Aborted handshakes (`ECONNABORTED`) and firewalled clients
    /// (`EPERM`) are logged and skipped.
    pub async fn accept(&self) -> Result<Option<Stream>> {
        loop {
            if self.closed.get() {
                return Ok(None);
            }

            match error::would_block(sock::accept(self.as_raw_fd())) {
                Ok(Some(client)) => {
                    // SAFETY: `accept4` returned a fresh, valid descriptor.
                    let client = unsafe { OwnedFd::from_raw_fd(client) };
                    return Ok(Some(Stream::from_owned(client, Interest::READABLE)?));
                }
                Ok(None) => {
                    if !self.registration.readable().await? {
                        return Ok(None);
                    }
                }
                Err(err)
                    if matches!(
                        err.raw_os_error(),
                        Some(libc::ECONNABORTED) | Some(libc::EPERM)
                    ) =>
                {
                    warn!("listener ({}) dropped a client: {}", self.as_raw_fd(), err);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Stops the accept loop: pending and future [`accept`](Listener::accept)
    /// calls resolve to `Ok(None)`.
    pub fn close(&self) {
        self.closed.set(true);
        self.registration.cancel();
    }

    /// True once [`close`](Listener::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener ({})", self.fd.as_raw_fd())
    }
}
