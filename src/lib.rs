//! A single-threaded asynchronous I/O runtime for Linux.
//!
//! netio drives coroutines with the kernel's readiness poller: descriptors
//! are registered edge-triggered with one epoll set per [`Runtime`], every
//! I/O operation retries its system call until the kernel reports "would
//! block", and only then suspends until readiness is delivered.
//!
//! The crate provides the runtime itself plus the awaitable primitives
//! layered on it: stream sockets and servers ([`net`]), timers ([`time`]),
//! event counters ([`EventFd`]), signal receivers ([`signal`]), process
//! handles ([`process`]), buffered readers and writers ([`io`]),
//! coroutine-aware synchronization ([`sync`]) and a connection pool
//! ([`pool`]).
//!
//! # Getting started
//!
//! ```
//! use netio::time::Timer;
//! use std::time::Duration;
//!
//! let out = netio::run(async {
//!     let timer = Timer::monotonic()?;
//!     timer.set(Duration::from_millis(1), None)?;
//!     timer.wait().await
//! })
//! .unwrap();
//!
//! assert_eq!(out.unwrap(), 1);
//! ```
//!
//! # Threading model
//!
//! A runtime is bound to the thread that created it and none of the
//! primitives are `Send`: sockets created under one runtime must be
//! awaited on that runtime. The only supported cross-thread signal is
//! [`EventFdHandle`](crate::EventFdHandle), which writes a descriptor the
//! owning runtime is waiting on.

#![cfg(target_os = "linux")]
#![warn(missing_debug_implementations)]

#[macro_use]
mod macros;

mod buffer;
mod error;
mod eventfd;
mod interest;
mod sys;

pub mod io;
pub mod net;
pub mod pool;
pub mod process;
pub mod runtime;
pub mod signal;
pub mod sync;
pub mod time;

pub use buffer::Buffer;
pub use error::{Error, Result};
pub use eventfd::{EventFd, EventFdHandle};
pub use interest::Interest;
pub use runtime::{spawn, yield_now, JoinHandle, Runtime, RuntimeOptions};

use std::future::Future;

/// Creates a default runtime and drives `root` to completion on it.
///
/// Shorthand for [`Runtime::new`] + [`Runtime::run`] with default
/// [`RuntimeOptions`].
pub fn run<F>(root: F) -> Result<F::Output>
where
    F: Future + 'static,
    F::Output: 'static,
{
    let mut runtime = Runtime::new(RuntimeOptions::default())?;
    runtime.run(root)
}
