//! The single-threaded coroutine runtime.
//!
//! A [`Runtime`] owns one epoll set and drives every coroutine spawned on
//! its thread. Exactly one runtime may be installed per OS thread; it is
//! discoverable through [`Handle::current`] while installed. I/O primitives
//! register their descriptors with the running runtime and suspend on
//! readiness; the loop resumes them when the kernel reports events.
//!
//! ```
//! use netio::time::Timer;
//! use std::time::Duration;
//!
//! let expirations = netio::run(async {
//!     let timer = Timer::monotonic()?;
//!     timer.set(Duration::from_millis(10), None)?;
//!     timer.wait().await
//! })
//! .unwrap()
//! .unwrap();
//!
//! assert_eq!(expirations, 1);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{debug, trace};
use slab::Slab;

use crate::sys::{self, Selector};
use crate::{Error, Interest, Result};

mod event;
mod task;

pub(crate) use event::Registration;
pub use task::JoinHandle;

use event::EventState;
use task::{JoinState, Task};

thread_local! {
    static CURRENT: RefCell<Option<Rc<Inner>>> = const { RefCell::new(None) };
}

/// The lifecycle of a runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// The loop is not running.
    Stopped,
    /// The loop is running normally.
    Running,
    /// A shutdown was requested; outstanding work may finish within the
    /// configured window.
    GracefulShutdown,
    /// The shutdown window expired or a stop was requested; all suspended
    /// operations are canceled.
    ForceShutdown,
}

/// Configuration for a [`Runtime`].
#[derive(Clone, Debug)]
pub struct RuntimeOptions {
    /// Capacity of the readiness event buffer handed to the kernel.
    pub max_events: usize,
    /// How long a graceful shutdown may take before outstanding operations
    /// are canceled.
    pub shutdown_timeout: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> RuntimeOptions {
        RuntimeOptions {
            max_events: libc::SOMAXCONN as usize,
            shutdown_timeout: Duration::ZERO,
        }
    }
}

pub(crate) struct Inner {
    selector: Selector,
    max_events: usize,
    shutdown_timeout: Duration,
    status: Cell<Status>,
    /// Remaining graceful-shutdown budget; runs down monotonically.
    graceful_remaining: Cell<Duration>,
    /// Registered descriptor events, keyed by the token submitted to epoll.
    events: RefCell<Slab<Rc<EventState>>>,
    /// Coroutines to resume on the next loop turn without consulting the
    /// kernel.
    ready: RefCell<VecDeque<Rc<Task>>>,
}

impl Inner {
    pub(crate) fn current() -> Option<Rc<Inner>> {
        CURRENT.with(|current| current.borrow().clone())
    }

    pub(crate) fn is_current(runtime: &Rc<Inner>) -> bool {
        CURRENT.with(|current| {
            current
                .borrow()
                .as_ref()
                .is_some_and(|installed| Rc::ptr_eq(installed, runtime))
        })
    }

    pub(crate) fn selector(&self) -> &Selector {
        &self.selector
    }

    pub(crate) fn status(&self) -> Status {
        self.status.get()
    }

    pub(crate) fn schedule(&self, task: Rc<Task>) {
        if task.is_finished() || task.set_queued(true) {
            return;
        }

        self.ready.borrow_mut().push_back(task);
    }

    pub(crate) fn spawn<F>(self: &Rc<Inner>, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let state = JoinState::new();
        let handle = JoinHandle::new(Rc::clone(&state));

        let task = Task::new(
            {
                let state = Rc::clone(&state);
                async move {
                    let value = future.await;
                    JoinState::complete(&state, value);
                }
            },
            Rc::downgrade(self),
        );

        self.schedule(task);
        handle
    }

    /// Adds `fd` to the interest list and hands back the shared event.
    pub(crate) fn register_event(
        self: &Rc<Inner>,
        fd: RawFd,
        initial: Option<Interest>,
    ) -> Result<Rc<EventState>> {
        if self.status.get() == Status::ForceShutdown {
            return Err(Error::Canceled);
        }

        let mut events = self.events.borrow_mut();
        let entry = events.vacant_entry();
        let key = entry.key();

        self.selector.register(fd, key, initial)?;

        let state = Rc::new(EventState::new(fd, key, initial, Rc::downgrade(self)));
        entry.insert(Rc::clone(&state));

        trace!("runtime added entry ({})", fd);
        Ok(state)
    }

    pub(crate) fn deregister_event(&self, state: &EventState) {
        if self.events.borrow_mut().try_remove(state.key()).is_none() {
            return;
        }

        // The descriptor may already be closed; the kernel then removed it
        // from the interest list on its own.
        let _ = self.selector.deregister(state.fd());
        trace!("runtime removed entry ({})", state.fd());
    }

    fn registered(&self) -> usize {
        self.events.borrow().len()
    }

    /// Resumes one snapshot of the ready queue. Tasks enqueued while the
    /// snapshot runs are observed by the next pass, not this one.
    fn tick(&self) {
        let queued = self.ready.borrow().len();

        for _ in 0..queued {
            let task = self.ready.borrow_mut().pop_front();
            let Some(task) = task else { break };

            task.set_queued(false);
            task.poll();
        }
    }

    fn has_ready(&self) -> bool {
        !self.ready.borrow().is_empty()
    }

    /// Wakes every suspended operation without delivering readiness.
    fn resume_all(&self) {
        trace!("runtime resuming all");

        let events: Vec<_> = self.events.borrow().iter().map(|(_, e)| Rc::clone(e)).collect();
        for event in events {
            event.resume();
        }
    }

    /// Cancels every suspended operation.
    fn cancel_all(&self) {
        trace!("runtime canceling tasks");

        let events: Vec<_> = self.events.borrow().iter().map(|(_, e)| Rc::clone(e)).collect();
        for event in events {
            event.cancel();
        }
    }

    pub(crate) fn shutdown(&self) {
        match self.status.get() {
            Status::Stopped => {
                debug!("shutdown request ignored: already stopped");
            }
            Status::ForceShutdown => {
                debug!("shutdown request ignored: force shutdown in progress");
            }
            Status::GracefulShutdown => {}
            Status::Running => {
                trace!("runtime received shutdown request");
                self.status.set(Status::GracefulShutdown);
                self.graceful_remaining.set(self.shutdown_timeout);
                self.resume_all();
            }
        }
    }

    pub(crate) fn stop(&self) {
        if self.status.get() == Status::Stopped {
            return;
        }

        trace!("runtime received stop request");
        self.status.set(Status::ForceShutdown);
        self.cancel_all();
    }
}

/// The single-threaded event-loop runtime.
///
/// Constructing a runtime installs it on the current thread; dropping it
/// uninstalls it. Constructing a second runtime on the same thread is an
/// error.
pub struct Runtime {
    inner: Rc<Inner>,
}

impl Runtime {
    /// Creates a runtime and installs it on the current thread.
    pub fn new(options: RuntimeOptions) -> Result<Runtime> {
        let installed = CURRENT.with(|current| current.borrow().is_some());
        if installed {
            return Err(Error::Io(io::Error::other(
                "a runtime is already installed on this thread",
            )));
        }

        let inner = Rc::new(Inner {
            selector: Selector::new()?,
            max_events: options.max_events.max(1),
            shutdown_timeout: options.shutdown_timeout,
            status: Cell::new(Status::Stopped),
            graceful_remaining: Cell::new(Duration::ZERO),
            events: RefCell::new(Slab::new()),
            ready: RefCell::new(VecDeque::new()),
        });

        CURRENT.with(|current| *current.borrow_mut() = Some(Rc::clone(&inner)));

        trace!("runtime ({}) created", inner.selector.as_raw_fd());
        Ok(Runtime { inner })
    }

    /// Returns a cheap handle to this runtime.
    pub fn handle(&self) -> Handle {
        Handle {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Drives `root` and every task spawned from it to completion.
    ///
    /// Returns the root future's output once it has completed and no
    /// spawned work remains runnable. Detached tasks still awaiting
    /// descriptors keep the loop alive after the root completes.
    ///
    /// # Panics
    ///
    /// Panics if the root future is still pending while no descriptor is
    /// registered and no task is runnable: nothing could ever resume it.
    pub fn run<F>(&mut self, root: F) -> Result<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let inner = Rc::clone(&self.inner);

        inner.status.set(Status::Running);
        trace!("runtime starting up");

        let handle = inner.spawn(root);
        let mut events = sys::Events::with_capacity(inner.max_events);

        loop {
            inner.tick();

            if !inner.has_ready() && inner.registered() == 0 {
                if handle.is_finished() {
                    break;
                }

                panic!("deadlock: root task is suspended but nothing can resume it");
            }

            let timeout = if inner.has_ready() {
                // Runnable work exists; only collect what is already ready.
                Some(Duration::ZERO)
            } else if inner.status.get() == Status::GracefulShutdown {
                Some(inner.graceful_remaining.get())
            } else {
                None
            };

            trace!("runtime waiting for events");
            let wait_started = Instant::now();
            let result = inner.selector.select(&mut events, timeout);
            let wait_time = wait_started.elapsed();

            if inner.status.get() == Status::GracefulShutdown {
                let remaining = inner.graceful_remaining.get().saturating_sub(wait_time);
                inner.graceful_remaining.set(remaining);

                if remaining.is_zero() {
                    debug!("graceful timeout reached: stopping");
                    inner.stop();
                }
            }

            match result {
                Ok(()) => {}
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.inner.status.set(Status::Stopped);
                    return Err(err.into());
                }
            }

            trace!("runtime waited {}ms ({} ready)", wait_time.as_millis(), events.len());

            for event in &events {
                // Copy out of the packed struct; references into it are
                // not allowed.
                let key = event.u64 as usize;
                let revents = event.events;

                // The event may have been deregistered by an earlier
                // dispatch in this same batch.
                let state = inner.events.borrow().get(key).map(Rc::clone);
                if let Some(state) = state {
                    state.dispatch(revents);
                }
            }
        }

        self.inner.status.set(Status::Stopped);
        trace!("runtime stopped");

        Ok(handle
            .take_output()
            .expect("root task finished without producing output"))
    }

    /// Requests a graceful shutdown; idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Forces a shutdown, canceling all suspended operations.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// The current lifecycle status.
    pub fn status(&self) -> Status {
        self.inner.status.get()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if current
                .as_ref()
                .is_some_and(|installed| Rc::ptr_eq(installed, &self.inner))
            {
                *current = None;
            }
        });
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("status", &self.inner.status.get())
            .field("registered", &self.inner.registered())
            .finish()
    }
}

/// A cheap, cloneable reference to the runtime installed on this thread.
#[derive(Clone)]
pub struct Handle {
    inner: Rc<Inner>,
}

impl Handle {
    /// Returns a handle to the runtime installed on the current thread.
    ///
    /// # Panics
    ///
    /// Panics if no runtime is installed.
    pub fn current() -> Handle {
        Handle::try_current().expect("no runtime running on this thread")
    }

    /// Like [`Handle::current`], returning `None` instead of panicking.
    pub fn try_current() -> Option<Handle> {
        Inner::current().map(|inner| Handle { inner })
    }

    /// The runtime's lifecycle status.
    pub fn status(&self) -> Status {
        self.inner.status.get()
    }

    /// True once a graceful or forced shutdown has begun.
    pub fn shutting_down(&self) -> bool {
        matches!(
            self.inner.status.get(),
            Status::GracefulShutdown | Status::ForceShutdown
        )
    }

    /// Requests a graceful shutdown; idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Forces a shutdown, canceling all suspended operations.
    pub fn stop(&self) {
        self.inner.stop();
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("status", &self.inner.status.get())
            .finish()
    }
}

/// Spawns a detached task on the current thread's runtime.
///
/// The task runs to completion even if the returned [`JoinHandle`] is
/// dropped. Tasks must not outlive their runtime; when the runtime is
/// force-shut down, suspended operations inside the task report
/// cancellation.
///
/// # Panics
///
/// Panics if no runtime is installed on this thread.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + 'static,
    F::Output: 'static,
{
    Inner::current()
        .expect("no runtime running on this thread")
        .spawn(future)
}

/// Suspends the current task until the next loop turn.
///
/// The task resumes behind every task already queued; the kernel is not
/// consulted in between.
pub async fn yield_now() {
    struct YieldNow {
        yielded: bool,
    }

    impl Future for YieldNow {
        type Output = ();

        fn poll(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<()> {
            if self.yielded {
                std::task::Poll::Ready(())
            } else {
                self.yielded = true;
                cx.waker().wake_by_ref();
                std::task::Poll::Pending
            }
        }
    }

    YieldNow { yielded: false }.await
}
