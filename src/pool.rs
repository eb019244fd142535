//! A bounded cache of reusable asynchronous resources.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::debug;

use crate::sync::waiters::WaiterQueue;
use crate::Result;

/// Builds and vets the items a [`Pool`] manages.
pub trait Provide {
    type Item;

    /// Builds a fresh item; called when the cache is empty and the pool is
    /// under capacity.
    fn provide(&self) -> impl Future<Output = Result<Self::Item>>;

    /// Vets an item on its way back into the cache. Rejected items are
    /// dropped.
    fn checkin(&self, item: &mut Self::Item) -> bool {
        let _ = item;
        true
    }

    /// Vets a cached item on its way out. Rejected items are dropped and
    /// the next candidate is tried.
    fn checkout(&self, item: &mut Self::Item) -> bool {
        let _ = item;
        true
    }
}

/// Pool configuration.
#[derive(Clone, Debug)]
pub struct PoolOptions {
    /// Maximum number of items alive at once, cached or checked out.
    pub max_size: usize,
    /// Cached items idle for longer are dropped at the next checkout.
    pub max_idle: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> PoolOptions {
        PoolOptions {
            max_size: 16,
            max_idle: None,
        }
    }
}

/// A bounded cache of reusable items.
///
/// `checkout` hands out a cached item that passes the provider's
/// `checkout` predicate, suspends when the pool is at capacity, and
/// otherwise asks the provider for a fresh item. Dropping the returned
/// [`PoolItem`] runs the `checkin` predicate and either recycles or
/// discards the item.
pub struct Pool<P: Provide> {
    inner: Rc<PoolInner<P>>,
}

struct PoolInner<P: Provide> {
    provider: P,
    options: PoolOptions,
    cached: RefCell<VecDeque<Idle<P::Item>>>,
    /// Items alive: cached plus checked out plus being provided.
    live: Cell<usize>,
    returned: WaiterQueue<()>,
}

struct Idle<T> {
    item: T,
    since: Instant,
}

impl<P: Provide> Pool<P> {
    pub fn new(provider: P, options: PoolOptions) -> Pool<P> {
        assert!(options.max_size > 0, "pool capacity must be non-zero");

        Pool {
            inner: Rc::new(PoolInner {
                provider,
                options,
                cached: RefCell::new(VecDeque::new()),
                live: Cell::new(0),
                returned: WaiterQueue::new(),
            }),
        }
    }

    pub fn provider(&self) -> &P {
        &self.inner.provider
    }

    /// Items alive: cached plus checked out.
    pub fn size(&self) -> usize {
        self.inner.live.get()
    }

    /// Items sitting in the cache.
    pub fn idle(&self) -> usize {
        self.inner.cached.borrow().len()
    }

    /// Acquires an item, suspending while the pool is at capacity.
    pub async fn checkout(&self) -> Result<PoolItem<P>> {
        let inner = &self.inner;

        loop {
            inner.evict_idle();

            // Most recently returned first; stale entries age out at the
            // front.
            loop {
                let idle = inner.cached.borrow_mut().pop_back();
                let Some(idle) = idle else { break };
                let mut item = idle.item;

                if inner.provider.checkout(&mut item) {
                    return Ok(PoolItem::new(Rc::clone(inner), item));
                }

                debug!("discarding pool item rejected at checkout");
                inner.discard();
            }

            if inner.live.get() < inner.options.max_size {
                // Reserve the slot before suspending in `provide` so
                // concurrent checkouts cannot overshoot the capacity.
                inner.live.set(inner.live.get() + 1);
                let mut reservation = Reservation {
                    inner: Rc::clone(inner),
                    kept: false,
                };

                let item = inner.provider.provide().await?;
                reservation.kept = true;

                return Ok(PoolItem::new(Rc::clone(inner), item));
            }

            inner.returned.wait().await?;
        }
    }
}

impl<P: Provide> Clone for Pool<P> {
    fn clone(&self) -> Pool<P> {
        Pool {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: Provide> std::fmt::Debug for Pool<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("size", &self.inner.live.get())
            .field("idle", &self.inner.cached.borrow().len())
            .field("max_size", &self.inner.options.max_size)
            .finish()
    }
}

impl<P: Provide> PoolInner<P> {
    /// Drops one live item and wakes capacity waiters.
    fn discard(&self) {
        self.live.set(self.live.get() - 1);
        self.returned.emit_all(());
    }

    fn evict_idle(&self) {
        let Some(max_idle) = self.options.max_idle else {
            return;
        };

        loop {
            let expired = {
                let cached = self.cached.borrow();
                matches!(cached.front(), Some(idle) if idle.since.elapsed() > max_idle)
            };

            if !expired {
                return;
            }

            let idle = self.cached.borrow_mut().pop_front();
            drop(idle);
            debug!("evicted an idle pool item");
            self.discard();
        }
    }
}

/// Undoes a capacity reservation if `provide` fails or is abandoned.
struct Reservation<P: Provide> {
    inner: Rc<PoolInner<P>>,
    kept: bool,
}

impl<P: Provide> Drop for Reservation<P> {
    fn drop(&mut self) {
        if !self.kept {
            self.inner.discard();
        }
    }
}

/// An item checked out of a [`Pool`]; returns to the pool on drop.
pub struct PoolItem<P: Provide> {
    inner: Rc<PoolInner<P>>,
    item: Option<P::Item>,
}

impl<P: Provide> PoolItem<P> {
    fn new(inner: Rc<PoolInner<P>>, item: P::Item) -> PoolItem<P> {
        PoolItem {
            inner,
            item: Some(item),
        }
    }

    /// Removes the item from pool management entirely.
    pub fn take(mut self) -> P::Item {
        let item = self.item.take().expect("pool item already taken");
        self.inner.discard();
        item
    }
}

impl<P: Provide> Deref for PoolItem<P> {
    type Target = P::Item;

    fn deref(&self) -> &P::Item {
        self.item.as_ref().expect("pool item already taken")
    }
}

impl<P: Provide> DerefMut for PoolItem<P> {
    fn deref_mut(&mut self) -> &mut P::Item {
        self.item.as_mut().expect("pool item already taken")
    }
}

impl<P: Provide> std::fmt::Debug for PoolItem<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolItem").finish_non_exhaustive()
    }
}

impl<P: Provide> Drop for PoolItem<P> {
    fn drop(&mut self) {
        let Some(mut item) = self.item.take() else {
            return;
        };

        if self.inner.provider.checkin(&mut item) {
            self.inner.cached.borrow_mut().push_back(Idle {
                item,
                since: Instant::now(),
            });
            self.inner.returned.emit_all(());
        } else {
            debug!("discarding pool item rejected at checkin");
            self.inner.discard();
        }
    }
}
