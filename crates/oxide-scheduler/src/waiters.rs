//! Suspended `request` calls, keyed by the filter they poll with.

use crate::matcher::FilterMatcher;
use oxide_core::filter::Filter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Registry of suspended pollers.
///
/// A poller registers before it looks at the queue. A wake that lands
/// between the look and the wait is stored as a permit on its `Notify`,
/// so it is never lost.
#[derive(Debug, Default)]
pub struct WaitList {
    waiters: Mutex<HashMap<u64, Waiter>>,
    next_id: AtomicU64,
    matcher: FilterMatcher,
}

#[derive(Debug)]
struct Waiter {
    filter: Filter,
    notify: Arc<Notify>,
}

impl WaitList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a poller. It stays registered until the ticket drops.
    pub fn register(&self, filter: &Filter) -> WaitTicket<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let notify = Arc::new(Notify::new());
        self.lock().insert(
            id,
            Waiter {
                filter: filter.clone(),
                notify: Arc::clone(&notify),
            },
        );
        WaitTicket {
            list: self,
            id,
            notify,
        }
    }

    /// Wake every poller whose filter would accept a stage requiring
    /// `stage_filter`. Returns how many were woken.
    pub fn wake_matching(&self, stage_filter: &Filter) -> usize {
        let waiters = self.lock();
        let mut woken = 0;
        for waiter in waiters.values() {
            if self.matcher.matches(stage_filter, &waiter.filter) {
                waiter.notify.notify_one();
                woken += 1;
            }
        }
        woken
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Nothing panics while holding the lock, so a poisoned map is still sound.
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Waiter>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A registered poller. Dropping it deregisters.
#[derive(Debug)]
pub struct WaitTicket<'a> {
    list: &'a WaitList,
    id: u64,
    notify: Arc<Notify>,
}

impl WaitTicket<'_> {
    /// Resolve on the next wake, or immediately if one is already stored.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        self.list.lock().remove(&self.id);
    }
}
