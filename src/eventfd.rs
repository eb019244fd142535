use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use log::trace;

use crate::runtime::Registration;
use crate::{Error, Interest, Result};

/// An awaitable 64-bit kernel counter.
///
/// `eventfd` holds a counter; writes add to it and a read returns the
/// accumulated value, resetting it to 0. [`EventFd::wait`] suspends until
/// the counter is non-zero. The detached [`EventFdHandle`] only writes the
/// descriptor, so another thread may use it to nudge the runtime out of
/// its kernel wait.
pub struct EventFd {
    // Deregisters before the descriptor closes.
    registration: Registration,
    fd: OwnedFd,
}

impl EventFd {
    pub fn new() -> Result<EventFd> {
        let fd = syscall!(eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC))?;
        // SAFETY: `eventfd` returned a fresh, valid descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let registration = Registration::new(fd.as_raw_fd(), Interest::READABLE)?;

        trace!("eventfd ({}) created", fd.as_raw_fd());
        Ok(EventFd { fd, registration })
    }

    /// A handle for setting the counter without owning the descriptor.
    pub fn handle(&self) -> EventFdHandle {
        EventFdHandle {
            fd: self.fd.as_raw_fd(),
        }
    }

    /// Adds `value` to the counter.
    pub fn set(&self, value: u64) -> io::Result<()> {
        self.handle().set(value)
    }

    /// Waits for the counter to become non-zero and returns its
    /// accumulated value, resetting it. Returns 0 when canceled.
    pub async fn wait(&self) -> Result<u64> {
        loop {
            let mut buf = [0u8; 8];

            match syscall!(read(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )) {
                Ok(_) => {
                    let value = u64::from_ne_bytes(buf);
                    trace!("eventfd ({}) read {}", self.fd.as_raw_fd(), value);
                    return Ok(value);
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    if !self.registration.readable().await? {
                        return Ok(0);
                    }
                }
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }

    /// Cancels a waiting task; it resumes with 0.
    pub fn cancel(&self) {
        self.registration.cancel();
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl std::fmt::Debug for EventFd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "eventfd ({})", self.fd.as_raw_fd())
    }
}

/// Writes to an [`EventFd`] it does not own.
///
/// The handle is a plain descriptor number; it must not outlive the
/// `EventFd` it came from.
#[derive(Clone, Copy, Debug)]
pub struct EventFdHandle {
    fd: RawFd,
}

impl EventFdHandle {
    /// Adds `value` to the counter, waking a waiting task.
    pub fn set(&self, value: u64) -> io::Result<()> {
        let buf = value.to_ne_bytes();

        match syscall!(write(
            self.fd,
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
        )) {
            Ok(_) => Ok(()),
            // The counter would overflow; the waiter is overdue anyway.
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(err),
        }
    }
}
