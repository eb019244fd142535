//! Signal delivery through a descriptor.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use log::trace;

use crate::runtime::Registration;
use crate::{Error, Interest, Result};

/// An awaitable signal receiver.
///
/// Creating one blocks the given signals in the process mask and routes
/// them to a `signalfd`, one `signalfd_siginfo` record per delivery.
///
/// ```no_run
/// use netio::signal::SignalFd;
/// use netio::runtime::Handle;
///
/// netio::run(async {
///     let signals = SignalFd::new(&[libc::SIGINT, libc::SIGTERM])?;
///
///     let signal = signals.wait_for_signal().await?;
///     log::info!("received signal {signal}, shutting down");
///
///     Handle::current().shutdown();
///     Ok::<_, netio::Error>(())
/// })
/// .unwrap()
/// .unwrap();
/// ```
pub struct SignalFd {
    // Deregisters before the descriptor closes.
    registration: Registration,
    fd: OwnedFd,
}

impl SignalFd {
    /// Blocks `signals` for the process and creates a descriptor
    /// receiving them.
    pub fn new(signals: &[libc::c_int]) -> Result<SignalFd> {
        let mut mask: libc::sigset_t = unsafe { mem::zeroed() };

        unsafe {
            libc::sigemptyset(&mut mask);
            for signal in signals {
                libc::sigaddset(&mut mask, *signal);
            }
        }

        syscall!(sigprocmask(libc::SIG_BLOCK, &mask, std::ptr::null_mut()))?;

        let fd = syscall!(signalfd(-1, &mask, libc::SFD_NONBLOCK | libc::SFD_CLOEXEC))?;
        // SAFETY: `signalfd` returned a fresh, valid descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let registration = Registration::new(fd.as_raw_fd(), Interest::READABLE)?;

        trace!("signalfd ({}) created", fd.as_raw_fd());
        Ok(SignalFd { fd, registration })
    }

    /// Waits for the next signal and returns its number; 0 when canceled.
    pub async fn wait_for_signal(&self) -> Result<libc::c_int> {
        loop {
            let mut info: libc::signalfd_siginfo = unsafe { mem::zeroed() };

            match syscall!(read(
                self.fd.as_raw_fd(),
                &mut info as *mut _ as *mut libc::c_void,
                mem::size_of::<libc::signalfd_siginfo>(),
            )) {
                Ok(read) => {
                    if read as usize != mem::size_of::<libc::signalfd_siginfo>() {
                        return Err(Error::Io(io::Error::other(
                            "short read of signal info record",
                        )));
                    }

                    trace!("signalfd ({}) received {}", self.fd.as_raw_fd(), info.ssi_signo);
                    return Ok(info.ssi_signo as libc::c_int);
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

impl AsRawFd for SignalFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl std::fmt::Debug for SignalFd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "signalfd ({})", self.fd.as_raw_fd())
    }
}
