use std::ffi::CStr;
use std::io;

use thiserror::Error;

use crate::process::ExitCause;

/// A specialized `Result` type for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The errors surfaced by runtime operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The stream was closed before the requested number of bytes arrived.
    #[error("unexpected end of stream")]
    Eof,

    /// The operation was terminated by runtime shutdown, an explicit cancel,
    /// or the drop of the primitive it was waiting on.
    #[error("task canceled")]
    Canceled,

    /// A system call failed unrecoverably. The platform error code is
    /// preserved in the wrapped [`io::Error`].
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Address resolution failed.
    #[error("failed to resolve address: {message}")]
    Resolve {
        /// The `EAI_*` code returned by the resolver.
        code: i32,
        message: String,
    },

    /// A child process terminated abnormally.
    #[error("process {pid} did not exit cleanly: {cause:?} ({status})")]
    Subprocess {
        pid: libc::pid_t,
        cause: ExitCause,
        status: i32,
    },
}

impl Error {
    /// Returns true if the error represents a canceled operation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    /// Returns the raw OS error code, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Io(err) => err.raw_os_error(),
            _ => None,
        }
    }

    pub(crate) fn resolve(code: i32) -> Error {
        // SAFETY: `gai_strerror` returns a pointer to a static string.
        let message = unsafe { CStr::from_ptr(libc::gai_strerror(code)) }
            .to_string_lossy()
            .into_owned();

        Error::Resolve { code, message }
    }
}

/// Maps an `io::Result` into `Ok(None)` when the operation would block.
///
/// This is the non-blocking calling convention used throughout the crate:
/// `Ok(Some(n))` is a completed transfer, `Ok(None)` means the kernel
/// reported `EAGAIN`/`EWOULDBLOCK` and the caller should await readiness.
pub(crate) fn would_block<T>(result: io::Result<T>) -> io::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(err) => Err(err),
    }
}
