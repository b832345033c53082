//! Work queue keyed by [`ResourceKey`].
//!
//! A key is queued at most once while it waits, and a key handed to a worker is not handed
//! out again until that worker calls [`WorkQueue::done`]. Keys added while in flight are
//! parked and re-queued on `done`, so reconciles of one resource never overlap while
//! different resources are processed concurrently.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::sync::Notify;
use tracing::trace;

use crate::crd::ResourceKey;
use crate::telemetry::QUEUE_DEPTH;

/// Per-key exponential retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self { Self { base: Duration::from_millis(500), max: Duration::from_secs(300) } }
}

impl Backoff {
    /// Delay before retry number `failures` (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exp).min(self.max)
    }
}

#[derive(Default)]
struct State {
    queue: VecDeque<ResourceKey>,
    /// Keys waiting to be processed, whether queued or parked behind an in-flight run.
    dirty: HashSet<ResourceKey>,
    processing: HashSet<ResourceKey>,
    failures: HashMap<ResourceKey, u32>,
    shutting_down: bool,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
    backoff: Backoff,
}

#[derive(Clone)]
pub struct WorkQueue { inner: Arc<Inner> }

impl Default for WorkQueue {
    fn default() -> Self { Self::new(Backoff::default()) }
}

impl WorkQueue {
    pub fn new(backoff: Backoff) -> Self {
        Self { inner: Arc::new(Inner { state: Mutex::new(State::default()), notify: Notify::new(), backoff }) }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means another thread panicked mid-update; the sets stay consistent.
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, key: ResourceKey) {
        let mut st = self.lock();
        if st.shutting_down || st.dirty.contains(&key) { return; }
        st.dirty.insert(key.clone());
        if st.processing.contains(&key) {
            trace!(%key, "queue.park");
            return;
        }
        trace!(%key, "queue.add");
        st.queue.push_back(key);
        QUEUE_DEPTH.set(st.queue.len() as i64);
        drop(st);
        self.inner.notify.notify_one();
    }

    /// Adds `key` once `delay` has elapsed.
    pub fn add_after(&self, key: ResourceKey, delay: Duration) {
        if delay.is_zero() { return self.add(key); }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Waits for the next key. `None` once the queue is shut down.
    pub async fn get(&self) -> Option<ResourceKey> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut st = self.lock();
                if st.shutting_down { return None; }
                if let Some(key) = st.queue.pop_front() {
                    st.dirty.remove(&key);
                    st.processing.insert(key.clone());
                    QUEUE_DEPTH.set(st.queue.len() as i64);
                    let more = !st.queue.is_empty();
                    drop(st);
                    if more { self.inner.notify.notify_one(); }
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Marks `key` as finished; a parked re-add is queued now.
    pub fn done(&self, key: &ResourceKey) {
        let mut st = self.lock();
        st.processing.remove(key);
        if st.dirty.contains(key) && !st.shutting_down {
            st.queue.push_back(key.clone());
            QUEUE_DEPTH.set(st.queue.len() as i64);
            drop(st);
            self.inner.notify.notify_one();
        }
    }

    /// Records a failure for `key` and returns how long to wait before retrying it.
    pub fn retry_delay(&self, key: &ResourceKey) -> Duration {
        let mut st = self.lock();
        let failures = st.failures.entry(key.clone()).or_insert(0);
        *failures = failures.saturating_add(1);
        self.inner.backoff.delay(*failures)
    }

    /// Clears the failure history of `key` after a successful run.
    pub fn forget(&self, key: &ResourceKey) { self.lock().failures.remove(key); }

    pub fn len(&self) -> usize { self.lock().queue.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn shutdown(&self) {
        self.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }
}
