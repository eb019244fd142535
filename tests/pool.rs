use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use netio::pool::{Pool, PoolOptions, Provide};

mod util;
use util::run;

/// Hands out numbered items and records how many were ever built.
struct Numbered {
    built: Rc<Cell<u32>>,
    reject_checkin: Cell<bool>,
    reject_checkout: Cell<bool>,
}

struct Item {
    id: u32,
}

impl Numbered {
    fn new() -> Numbered {
        Numbered {
            built: Rc::new(Cell::new(0)),
            reject_checkin: Cell::new(false),
            reject_checkout: Cell::new(false),
        }
    }
}

impl Provide for Numbered {
    type Item = Item;

    async fn provide(&self) -> netio::Result<Item> {
        let id = self.built.get();
        self.built.set(id + 1);
        Ok(Item { id })
    }

    fn checkin(&self, _item: &mut Item) -> bool {
        !self.reject_checkin.get()
    }

    fn checkout(&self, _item: &mut Item) -> bool {
        !self.reject_checkout.get()
    }
}

#[test]
fn checkout_reuses_cached_items() {
    run(async {
        let pool = Pool::new(Numbered::new(), PoolOptions::default());

        let first_id = {
            let item = pool.checkout().await.unwrap();
            item.id
        };

        let item = pool.checkout().await.unwrap();
        assert_eq!(item.id, first_id);
        assert_eq!(pool.provider().built.get(), 1);
    });
}

#[test]
fn capacity_blocks_third_checkout() {
    run(async {
        let pool = Pool::new(
            Numbered::new(),
            PoolOptions {
                max_size: 2,
                max_idle: None,
            },
        );

        let first = pool.checkout().await.unwrap();
        let second = pool.checkout().await.unwrap();
        assert_eq!(pool.size(), 2);

        let third = netio::spawn({
            let pool = pool.clone();
            async move {
                let item = pool.checkout().await.unwrap();
                item.id
            }
        });

        netio::yield_now().await;
        netio::yield_now().await;
        assert!(!third.is_finished());

        let first_id = first.id;
        drop(first);

        // The blocked checkout receives the recycled item, not a new one.
        assert_eq!(third.await, first_id);
        assert_eq!(pool.provider().built.get(), 2);
        assert_eq!(pool.size(), 2);

        drop(second);
    });
}

#[test]
fn rejected_checkin_discards_the_item() {
    run(async {
        let pool = Pool::new(Numbered::new(), PoolOptions::default());

        {
            let _item = pool.checkout().await.unwrap();
            pool.provider().reject_checkin.set(true);
        }

        assert_eq!(pool.size(), 0);
        assert_eq!(pool.idle(), 0);

        pool.provider().reject_checkin.set(false);
        let item = pool.checkout().await.unwrap();

        // A fresh item was built to replace the discarded one.
        assert_eq!(item.id, 1);
    });
}

#[test]
fn rejected_checkout_discards_and_rebuilds() {
    run(async {
        let pool = Pool::new(Numbered::new(), PoolOptions::default());

        drop(pool.checkout().await.unwrap());
        assert_eq!(pool.idle(), 1);

        pool.provider().reject_checkout.set(true);
        let item = pool.checkout().await.unwrap();

        assert_eq!(item.id, 1);
        assert_eq!(pool.provider().built.get(), 2);
    });
}

#[test]
fn idle_items_are_evicted() {
    run(async {
        let pool = Pool::new(
            Numbered::new(),
            PoolOptions {
                max_size: 4,
                max_idle: Some(Duration::ZERO),
            },
        );

        drop(pool.checkout().await.unwrap());
        assert_eq!(pool.idle(), 1);

        std::thread::sleep(Duration::from_millis(2));

        let item = pool.checkout().await.unwrap();
        assert_eq!(item.id, 1, "the idle item should have aged out");
    });
}

#[test]
fn take_removes_from_pool_management() {
    run(async {
        let pool = Pool::new(Numbered::new(), PoolOptions::default());

        let item = pool.checkout().await.unwrap();
        let raw = item.take();

        assert_eq!(raw.id, 0);
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.idle(), 0);
    });
}

#[test]
fn failed_provide_releases_the_slot() {
    struct Flaky {
        fail: Cell<bool>,
    }

    impl Provide for Flaky {
        type Item = ();

        async fn provide(&self) -> netio::Result<()> {
            if self.fail.get() {
                Err(netio::Error::Io(std::io::Error::other("no luck")))
            } else {
                Ok(())
            }
        }
    }

    run(async {
        let pool = Pool::new(
            Flaky {
                fail: Cell::new(true),
            },
            PoolOptions {
                max_size: 1,
                max_idle: None,
            },
        );

        assert!(pool.checkout().await.is_err());
        assert_eq!(pool.size(), 0);

        pool.provider().fail.set(false);
        assert!(pool.checkout().await.is_ok());
    });
}
