use std::ffi::CString;
use std::io;
use std::mem;
use std::ptr;

use crate::sys::socket::SockAddr;
use crate::{Error, Result};

/// Resolves `host:port` into candidate socket addresses.
///
/// An empty host resolves as passive (wildcard), suitable for listeners.
/// Resolution failures preserve the `EAI_*` code; `EAI_SYSTEM` surfaces the
/// underlying OS error instead.
pub(crate) fn resolve(host: &str, port: &str) -> Result<Vec<SockAddr>> {
    let host = CString::new(host).map_err(|_| invalid("host contains a nul byte"))?;
    let port = CString::new(port).map_err(|_| invalid("port contains a nul byte"))?;

    let mut hints: libc::addrinfo = unsafe { mem::zeroed() };
    hints.ai_family = libc::AF_UNSPEC;
    hints.ai_socktype = libc::SOCK_STREAM;

    let host_ptr = if host.as_bytes().is_empty() {
        hints.ai_flags = libc::AI_PASSIVE;
        ptr::null()
    } else {
        host.as_ptr()
    };

    let mut info: *mut libc::addrinfo = ptr::null_mut();

    let code = unsafe { libc::getaddrinfo(host_ptr, port.as_ptr(), &hints, &mut info) };
    if code != 0 {
        return Err(if code == libc::EAI_SYSTEM {
            Error::Io(io::Error::last_os_error())
        } else {
            Error::resolve(code)
        });
    }

    let mut addrs = Vec::new();
    let mut current = info;

    while !current.is_null() {
        // SAFETY: the resolver hands out a well-formed list; each entry's
        // `ai_addr` points at `ai_addrlen` valid bytes.
        unsafe {
            let entry = &*current;

            let mut storage: libc::sockaddr_storage = mem::zeroed();
            ptr::copy_nonoverlapping(
                entry.ai_addr as *const u8,
                &mut storage as *mut _ as *mut u8,
                entry.ai_addrlen as usize,
            );

            addrs.push(SockAddr {
                storage,
                len: entry.ai_addrlen,
            });

            current = entry.ai_next;
        }
    }

    unsafe { libc::freeaddrinfo(info) };

    if addrs.is_empty() {
        return Err(Error::resolve(libc::EAI_NONAME));
    }

    Ok(addrs)
}

fn invalid(message: &str) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidInput, message))
}
