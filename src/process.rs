//! Awaitable child-process handles backed by `pidfd`.

use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use log::{trace, warn};

use crate::runtime::Registration;
use crate::{Error, Interest, Result};

/// Why a waited-on process changed state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitCause {
    Exited,
    Killed,
    Dumped,
    Trapped,
    Stopped,
    Continued,
    Unknown,
}

impl ExitCause {
    fn from_code(code: libc::c_int) -> ExitCause {
        match code {
            libc::CLD_EXITED => ExitCause::Exited,
            libc::CLD_KILLED => ExitCause::Killed,
            libc::CLD_DUMPED => ExitCause::Dumped,
            libc::CLD_TRAPPED => ExitCause::Trapped,
            libc::CLD_STOPPED => ExitCause::Stopped,
            libc::CLD_CONTINUED => ExitCause::Continued,
            other => {
                warn!("unknown process state code: {}", other);
                ExitCause::Unknown
            }
        }
    }
}

/// The outcome reported by [`Process::wait`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitStatus {
    pub cause: ExitCause,
    /// Exit code for [`ExitCause::Exited`], signal number otherwise.
    pub status: i32,
}

impl WaitStatus {
    /// True for a clean zero exit.
    pub fn success(&self) -> bool {
        self.cause == ExitCause::Exited && self.status == 0
    }
}

/// A process handle awaiting state changes through a `pidfd`.
pub struct Process {
    pid: libc::pid_t,
    // Deregisters before the descriptor closes.
    registration: Registration,
    fd: OwnedFd,
}

impl Process {
    /// Opens a pidfd for an existing process, typically a child spawned
    /// with [`std::process::Command`].
    pub fn from_pid(pid: libc::pid_t) -> Result<Process> {
        let fd = syscall!(syscall(libc::SYS_pidfd_open, pid, libc::PIDFD_NONBLOCK))?;
        // SAFETY: `pidfd_open` returned a fresh, valid descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(fd as RawFd) };

        let registration = Registration::new(fd.as_raw_fd(), Interest::READABLE)?;

        trace!("process[{}] ({}) created", pid, fd.as_raw_fd());
        Ok(Process {
            pid,
            fd,
            registration,
        })
    }

    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    /// Sends `signal` to the process.
    pub fn kill(&self, signal: libc::c_int) -> Result<()> {
        syscall!(kill(self.pid, signal))?;
        Ok(())
    }

    /// Waits for the process to reach one of `states` (`WEXITED` by
    /// default semantics of [`Process::wait`]).
    pub async fn wait_for(&self, states: libc::c_int) -> Result<WaitStatus> {
        loop {
            let mut info: libc::siginfo_t = unsafe { mem::zeroed() };

            let result = syscall!(waitid(
                libc::P_PIDFD,
                self.fd.as_raw_fd() as libc::id_t,
                &mut info,
                states,
            ));

            match result {
                Ok(_) => {
                    // SAFETY: `waitid` filled in a `CLD_*` record; the pid
                    // and status fields of the union are valid.
                    let (pid, status) = unsafe { (info.si_pid(), info.si_status()) };

                    if pid == 0 {
                        // Spurious wakeup without a state change.
                        continue;
                    }

                    return Ok(WaitStatus {
                        cause: ExitCause::from_code(info.si_code),
                        status,
                    });
                }
                Err(ref err) if err.raw_os_error() == Some(libc::EAGAIN) => {
                    if !self.registration.readable().await? {
                        return Err(Error::Canceled);
                    }
                }
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }

    /// Waits for the process to terminate.
    pub async fn wait(&self) -> Result<WaitStatus> {
        self.wait_for(libc::WEXITED).await
    }

    /// Waits for termination and requires a clean zero exit; anything
    /// else is an [`Error::Subprocess`].
    pub async fn wait_checked(&self) -> Result<()> {
        let status = self.wait().await?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::Subprocess {
                pid: self.pid,
                cause: status.cause,
                status: status.status,
            })
        }
    }
}

impl AsRawFd for Process {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "process[{}] ({})", self.pid, self.fd.as_raw_fd())
    }
}
