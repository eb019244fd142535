use std::io;
use std::mem::{self, MaybeUninit};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;
use std::path::Path;

/// A raw socket address paired with its length, as produced by the resolver
/// or by `sockaddr_un` construction.
#[derive(Clone)]
pub(crate) struct SockAddr {
    pub(crate) storage: libc::sockaddr_storage,
    pub(crate) len: libc::socklen_t,
}

impl SockAddr {
    pub(crate) fn family(&self) -> libc::c_int {
        self.storage.ss_family as libc::c_int
    }

    pub(crate) fn as_ptr(&self) -> *const libc::sockaddr {
        &self.storage as *const _ as *const libc::sockaddr
    }

    /// Builds a `sockaddr_un` for `path`.
    ///
    /// Fails with `InvalidInput` if the path does not fit in `sun_path`.
    pub(crate) fn unix(path: &Path) -> io::Result<SockAddr> {
        use std::os::unix::ffi::OsStrExt;

        let bytes = path.as_os_str().as_bytes();

        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let addr = &mut storage as *mut _ as *mut libc::sockaddr_un;
        let addr = unsafe { &mut *addr };
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

        // Leave room for the trailing nul byte.
        if bytes.len() >= addr.sun_path.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "socket path must be shorter than SUN_LEN",
            ));
        }

        for (dst, src) in addr.sun_path.iter_mut().zip(bytes.iter()) {
            *dst = *src as libc::c_char;
        }

        let offset = memoffset_sun_path();
        let len = (offset + bytes.len() + 1) as libc::socklen_t;

        Ok(SockAddr { storage, len })
    }
}

fn memoffset_sun_path() -> usize {
    let addr: MaybeUninit<libc::sockaddr_un> = MaybeUninit::uninit();
    let base = addr.as_ptr() as usize;
    // SAFETY: only the address of the field is taken, it is never read.
    let path = unsafe { std::ptr::addr_of!((*addr.as_ptr()).sun_path) } as usize;
    path - base
}

/// `storage` must hold a `sockaddr_in` or `sockaddr_in6`.
pub(crate) unsafe fn to_socket_addr(
    storage: *const libc::sockaddr_storage,
) -> io::Result<SocketAddr> {
    match (*storage).ss_family as libc::c_int {
        libc::AF_INET => {
            let addr = &*(storage as *const libc::sockaddr_in);
            let ip = Ipv4Addr::from(addr.sin_addr.s_addr.to_ne_bytes());
            let port = u16::from_be(addr.sin_port);
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        libc::AF_INET6 => {
            let addr = &*(storage as *const libc::sockaddr_in6);
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let port = u16::from_be(addr.sin6_port);
            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }
        _ => Err(io::ErrorKind::InvalidInput.into()),
    }
}

/// Creates a non-blocking, close-on-exec stream socket for `family`.
pub(crate) fn new_socket(family: libc::c_int, ty: libc::c_int) -> io::Result<RawFd> {
    syscall!(socket(
        family,
        ty | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        0
    ))
}

/// Creates a connected pair of non-blocking Unix stream sockets.
pub(crate) fn pair() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0; 2];

    syscall!(socketpair(
        libc::AF_UNIX,
        libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        0,
        fds.as_mut_ptr(),
    ))?;

    Ok((fds[0], fds[1]))
}

pub(crate) fn set_reuseaddr(fd: RawFd) -> io::Result<()> {
    let yes: libc::c_int = 1;
    syscall!(setsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_REUSEADDR,
        &yes as *const _ as *const libc::c_void,
        mem::size_of::<libc::c_int>() as libc::socklen_t,
    ))
    .map(|_| ())
}

pub(crate) fn bind(fd: RawFd, addr: &SockAddr) -> io::Result<()> {
    syscall!(bind(fd, addr.as_ptr(), addr.len)).map(|_| ())
}

pub(crate) fn listen(fd: RawFd, backlog: libc::c_int) -> io::Result<()> {
    syscall!(listen(fd, backlog)).map(|_| ())
}

pub(crate) fn connect(fd: RawFd, addr: &SockAddr) -> io::Result<()> {
    syscall!(connect(fd, addr.as_ptr(), addr.len)).map(|_| ())
}

/// Accepts one pending connection; the returned descriptor is non-blocking
/// and close-on-exec.
pub(crate) fn accept(fd: RawFd) -> io::Result<RawFd> {
    syscall!(accept4(
        fd,
        std::ptr::null_mut(),
        std::ptr::null_mut(),
        libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
    ))
}

pub(crate) fn recv(fd: RawFd, buf: &mut [u8], flags: libc::c_int) -> io::Result<usize> {
    syscall!(recv(
        fd,
        buf.as_mut_ptr() as *mut libc::c_void,
        buf.len(),
        flags,
    ))
    .map(|n| n as usize)
}

/// Sends with `MSG_NOSIGNAL` so a closed peer surfaces as `EPIPE` rather
/// than `SIGPIPE`.
pub(crate) fn send(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    syscall!(send(
        fd,
        buf.as_ptr() as *const libc::c_void,
        buf.len(),
        libc::MSG_NOSIGNAL,
    ))
    .map(|n| n as usize)
}

pub(crate) fn sendfile(out_fd: RawFd, in_fd: RawFd, count: usize) -> io::Result<usize> {
    syscall!(sendfile(out_fd, in_fd, std::ptr::null_mut(), count)).map(|n| n as usize)
}

pub(crate) fn shutdown(fd: RawFd, how: std::net::Shutdown) -> io::Result<()> {
    let how = match how {
        std::net::Shutdown::Read => libc::SHUT_RD,
        std::net::Shutdown::Write => libc::SHUT_WR,
        std::net::Shutdown::Both => libc::SHUT_RDWR,
    };
    syscall!(shutdown(fd, how)).map(|_| ())
}

/// Returns the pending `SO_ERROR` value, clearing it.
pub(crate) fn take_error(fd: RawFd) -> io::Result<Option<io::Error>> {
    let mut err: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;

    syscall!(getsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_ERROR,
        &mut err as *mut _ as *mut libc::c_void,
        &mut len,
    ))?;

    if err == 0 {
        Ok(None)
    } else {
        Ok(Some(io::Error::from_raw_os_error(err)))
    }
}

pub(crate) fn local_addr(fd: RawFd) -> io::Result<SockAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

    syscall!(getsockname(
        fd,
        &mut storage as *mut _ as *mut libc::sockaddr,
        &mut len,
    ))?;

    Ok(SockAddr { storage, len })
}
