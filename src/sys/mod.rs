//! Raw system-call wrappers.
//!
//! Everything in this module is a thin, safe-ish veneer over `libc`; the
//! readiness and ownership bookkeeping lives with the callers.

mod epoll;
pub(crate) mod socket;

pub(crate) use epoll::{Event, Events, Selector};

/// Readable-class bits as delivered by the kernel.
///
/// `EPOLLHUP` and `EPOLLERR` are always reported and must wake readers so
/// the next system call can observe the failure.
pub(crate) fn is_readable(events: u32) -> bool {
    let events = events as libc::c_int;
    events & (libc::EPOLLIN | libc::EPOLLPRI | libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR)
        != 0
}

/// Writable-class bits as delivered by the kernel.
pub(crate) fn is_writable(events: u32) -> bool {
    let events = events as libc::c_int;
    events & (libc::EPOLLOUT | libc::EPOLLHUP | libc::EPOLLERR) != 0
}
