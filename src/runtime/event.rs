use std::cell::{Cell, RefCell};
use std::future::Future;
use std::io;
use std::os::fd::RawFd;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

use log::{trace, warn};

use crate::{sys, Error, Interest, Result};

use super::{Inner, Status};

/// One continuation slot of an event: at most one suspended operation per
/// readiness direction.
#[derive(Default)]
pub(crate) enum Slot {
    #[default]
    Empty,
    Waiting(Waker),
    /// The kernel delivered matching readiness; the waiter has been woken
    /// but not yet polled.
    Notified,
    /// The event was canceled while the waiter was installed.
    Canceled,
}

impl Slot {
    fn is_waiting(&self) -> bool {
        matches!(self, Slot::Waiting(_))
    }

    /// Wakes an installed waiter, leaving the slot in `to`.
    fn fire(&mut self, to: Slot) {
        match std::mem::replace(self, Slot::Empty) {
            Slot::Waiting(waker) => {
                *self = to;
                waker.wake();
            }
            // A wake is already in flight; a cancellation overrides it so
            // the waiter observes it on its next poll.
            Slot::Notified => {
                *self = match to {
                    Slot::Canceled => Slot::Canceled,
                    _ => Slot::Notified,
                }
            }
            Slot::Canceled => *self = Slot::Canceled,
            // No waiter installed; with edge-triggered registration there
            // is nothing to remember.
            Slot::Empty => {}
        }
    }
}

/// Per-descriptor readiness state, shared between the owning primitive and
/// any in-flight [`Readiness`] future.
pub(crate) struct EventState {
    fd: RawFd,
    key: usize,
    /// The interest last pushed to the kernel; kept equal to the union of
    /// the installed continuation slots.
    submitted: Cell<Option<Interest>>,
    received: Cell<u32>,
    reader: RefCell<Slot>,
    writer: RefCell<Slot>,
    runtime: Weak<Inner>,
}

impl EventState {
    pub(crate) fn new(
        fd: RawFd,
        key: usize,
        initial: Option<Interest>,
        runtime: Weak<Inner>,
    ) -> EventState {
        EventState {
            fd,
            key,
            submitted: Cell::new(initial),
            received: Cell::new(0),
            reader: RefCell::new(Slot::Empty),
            writer: RefCell::new(Slot::Empty),
            runtime,
        }
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn key(&self) -> usize {
        self.key
    }

    fn slot(&self, interest: Interest) -> &RefCell<Slot> {
        if interest.is_readable() {
            &self.reader
        } else {
            &self.writer
        }
    }

    /// Records delivered readiness and wakes the matching continuations.
    pub(crate) fn dispatch(&self, revents: u32) {
        self.received.set(revents);
        trace!("event ({}) readiness {:#x}", self.fd, revents);

        if sys::is_readable(revents) {
            self.reader.borrow_mut().fire(Slot::Notified);
        }

        if sys::is_writable(revents) {
            self.writer.borrow_mut().fire(Slot::Notified);
        }
    }

    /// Wakes both continuations without readiness, leaving the waiters to
    /// re-examine the world. Used when a graceful shutdown begins.
    pub(crate) fn resume(&self) {
        self.reader.borrow_mut().fire(Slot::Notified);
        self.writer.borrow_mut().fire(Slot::Notified);
    }

    /// Cancels both continuations: each resumes observing no readiness.
    pub(crate) fn cancel(&self) {
        self.received.set(0);
        self.reader.borrow_mut().fire(Slot::Canceled);
        self.writer.borrow_mut().fire(Slot::Canceled);
    }

    /// Recomputes the submitted interest from the installed slots and pushes
    /// it to the kernel when it changed.
    fn update_submitted(&self) -> io::Result<()> {
        let mut interest = None;

        if self.reader.borrow().is_waiting() {
            interest = Some(Interest::READABLE);
        }

        if self.writer.borrow().is_waiting() {
            interest = Some(match interest {
                Some(interest) => interest | Interest::WRITABLE,
                None => Interest::WRITABLE,
            });
        }

        if interest == self.submitted.get() {
            return Ok(());
        }

        let runtime = match self.runtime.upgrade() {
            Some(runtime) => runtime,
            None => return Ok(()),
        };

        runtime.selector().reregister(self.fd, self.key, interest)?;
        self.submitted.set(interest);
        Ok(())
    }
}

/// Owns the epoll membership of one descriptor.
///
/// Dropping the registration cancels any suspended operations and removes
/// the descriptor from the runtime's interest list; in-flight waiters hold
/// their own reference to the shared state and resume observing the
/// cancellation.
pub(crate) struct Registration {
    state: Rc<EventState>,
}

impl Registration {
    /// Registers `fd` with the current runtime.
    ///
    /// Fails if no runtime is installed on this thread or the runtime is
    /// force-shutting down.
    pub(crate) fn new(fd: RawFd, initial: Interest) -> Result<Registration> {
        let runtime = Inner::current().ok_or_else(|| {
            Error::Io(io::Error::other("no runtime running on this thread"))
        })?;

        let state = runtime.register_event(fd, Some(initial))?;
        Ok(Registration { state })
    }

    /// Waits for `interest`-class readiness on the descriptor.
    ///
    /// Resolves to `Ok(true)` when the kernel reported readiness (or the
    /// runtime nudged all waiters during shutdown; callers retry their
    /// system call either way) and `Ok(false)` when the event was canceled.
    pub(crate) fn readiness(&self, interest: Interest) -> Readiness {
        Readiness {
            state: Rc::clone(&self.state),
            interest,
            installed: false,
        }
    }

    pub(crate) async fn readable(&self) -> Result<bool> {
        self.readiness(Interest::READABLE).await
    }

    pub(crate) async fn writable(&self) -> Result<bool> {
        self.readiness(Interest::WRITABLE).await
    }

    /// Cancels suspended operations; they resume observing no readiness.
    pub(crate) fn cancel(&self) {
        self.state.cancel();
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.state.cancel();

        if let Some(runtime) = self.state.runtime.upgrade() {
            runtime.deregister_event(&self.state);
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("fd", &self.state.fd)
            .field("submitted", &self.state.submitted.get())
            .field("received", &self.state.received.get())
            .finish()
    }
}

/// Future returned by [`Registration::readiness`].
pub(crate) struct Readiness {
    state: Rc<EventState>,
    interest: Interest,
    installed: bool,
}

impl Future for Readiness {
    type Output = Result<bool>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let state = Rc::clone(&self.state);

        match state.runtime.upgrade() {
            // The whole runtime went away while we were suspended.
            None => return Poll::Ready(Ok(false)),
            Some(runtime) => {
                if runtime.status() == Status::ForceShutdown {
                    return Poll::Ready(Ok(false));
                }

                if !Inner::is_current(&runtime) {
                    return Poll::Ready(Err(Error::Io(io::Error::other(
                        "descriptor is registered with a different runtime",
                    ))));
                }
            }
        }

        let mut slot = state.slot(self.interest).borrow_mut();

        if !self.installed {
            debug_assert!(
                matches!(*slot, Slot::Empty),
                "concurrent waiters for one readiness direction"
            );
            *slot = Slot::Waiting(cx.waker().clone());
            drop(slot);

            self.installed = true;
            state.update_submitted()?;
            return Poll::Pending;
        }

        match &mut *slot {
            Slot::Notified => {
                *slot = Slot::Empty;
                drop(slot);
                self.installed = false;
                state.update_submitted()?;
                Poll::Ready(Ok(true))
            }
            Slot::Canceled => {
                *slot = Slot::Empty;
                drop(slot);
                self.installed = false;
                state.update_submitted()?;
                Poll::Ready(Ok(false))
            }
            Slot::Waiting(waker) => {
                waker.clone_from(cx.waker());
                Poll::Pending
            }
            Slot::Empty => {
                // The slot was cleared externally; re-install.
                *slot = Slot::Waiting(cx.waker().clone());
                drop(slot);
                state.update_submitted()?;
                Poll::Pending
            }
        }
    }
}

impl Drop for Readiness {
    fn drop(&mut self) {
        if !self.installed {
            return;
        }

        // The operation was abandoned mid-suspension (e.g. it lost a race
        // against a timer). Clear the slot so the interest mask shrinks and
        // a later wakeup does not fire a dead waker.
        *self.state.slot(self.interest).borrow_mut() = Slot::Empty;

        if let Err(err) = self.state.update_submitted() {
            warn!("event ({}) failed to shed interest: {}", self.state.fd, err);
        }
    }
}
