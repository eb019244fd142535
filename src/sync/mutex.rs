use std::cell::{Cell, RefCell, UnsafeCell};
use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// A coroutine-aware mutual-exclusion lock.
///
/// Contended locks are granted in the order `lock` was called; the
/// releasing guard hands the lock directly to the next waiter and schedules
/// it through the runtime's ready queue.
///
/// ```
/// use netio::sync::Mutex;
///
/// netio::run(async {
///     let mutex = Mutex::new(0);
///
///     {
///         let mut value = mutex.lock().await;
///         *value += 1;
///     }
///
///     assert_eq!(*mutex.lock().await, 1);
/// })
/// .unwrap();
/// ```
pub struct Mutex<T> {
    locked: Cell<bool>,
    waiters: RefCell<VecDeque<Rc<LockWaiter>>>,
    value: UnsafeCell<T>,
}

struct LockWaiter {
    state: Cell<LockState>,
    waker: RefCell<Option<Waker>>,
}

#[derive(Clone, Copy, PartialEq)]
enum LockState {
    Waiting,
    /// The previous holder handed the lock to this waiter.
    Granted,
    Abandoned,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Mutex<T> {
        Mutex {
            locked: Cell::new(false),
            waiters: RefCell::new(VecDeque::new()),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, suspending while another guard is live.
    pub fn lock(&self) -> Lock<'_, T> {
        Lock {
            mutex: self,
            waiter: None,
        }
    }

    /// Accesses the value without locking; safe because it requires
    /// exclusive access to the mutex itself.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    /// Hands the lock to the oldest live waiter, or releases it.
    fn unlock(&self) {
        loop {
            let next = self.waiters.borrow_mut().pop_front();

            match next {
                Some(waiter) => {
                    if waiter.state.get() == LockState::Abandoned {
                        continue;
                    }

                    waiter.state.set(LockState::Granted);
                    if let Some(waker) = waiter.waker.borrow_mut().take() {
                        waker.wake();
                    }

                    // The lock transfers: `locked` stays set.
                    return;
                }
                None => {
                    self.locked.set(false);
                    return;
                }
            }
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Mutex<T> {
        Mutex::new(T::default())
    }
}

impl<T> std::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.locked.get())
            .finish()
    }
}

/// Future returned by [`Mutex::lock`].
pub struct Lock<'a, T> {
    mutex: &'a Mutex<T>,
    waiter: Option<Rc<LockWaiter>>,
}

impl<'a, T> Future for Lock<'a, T> {
    type Output = MutexGuard<'a, T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match &this.waiter {
            None => {
                if !this.mutex.locked.get() {
                    this.mutex.locked.set(true);
                    return Poll::Ready(MutexGuard { mutex: this.mutex });
                }

                let waiter = Rc::new(LockWaiter {
                    state: Cell::new(LockState::Waiting),
                    waker: RefCell::new(Some(cx.waker().clone())),
                });

                this.mutex.waiters.borrow_mut().push_back(Rc::clone(&waiter));
                this.waiter = Some(waiter);

                Poll::Pending
            }
            Some(waiter) => {
                if waiter.state.get() == LockState::Granted {
                    // Consume the grant so dropping the future afterwards
                    // does not release twice.
                    this.waiter = None;
                    return Poll::Ready(MutexGuard { mutex: this.mutex });
                }

                *waiter.waker.borrow_mut() = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for Lock<'_, T> {
    fn drop(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            match waiter.state.get() {
                // The lock was handed to us but never picked up; pass it
                // on so it is not lost.
                LockState::Granted => self.mutex.unlock(),
                _ => waiter.state.set(LockState::Abandoned),
            }
        }
    }
}

impl<T> std::fmt::Debug for Lock<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock").finish_non_exhaustive()
    }
}

/// Grants access to the value guarded by a [`Mutex`].
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&**self, f)
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the `locked` flag guarantees this is the only guard.
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the `locked` flag guarantees this is the only guard.
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
