//! # TTL Cache — Blocking Regime
//!
//! The same state machine as [`TtlCache`](crate::TtlCache) for callers on
//! plain OS threads. The pending slot is a flag guarded by a
//! `parking_lot::Mutex`; callers that must wait park on a `Condvar` until
//! the refresh thread publishes its outcome. Background refreshes from the
//! stale state run on a spawned thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chorizo_core::CacheFetchError;
use parking_lot::{Condvar, Mutex};

use crate::ttl::{CacheState, FailurePolicy};

/// Produces fresh cache data on the calling thread.
pub trait BlockingFetch<T>: Send + Sync {
    fn fetch(&self) -> Result<T, CacheFetchError>;
}

impl<T, F> BlockingFetch<T> for F
where
    F: Fn() -> Result<T, CacheFetchError> + Send + Sync,
{
    fn fetch(&self) -> Result<T, CacheFetchError> {
        self()
    }
}

type Outcome<T> = Result<Arc<T>, CacheFetchError>;

struct Slot<T> {
    data: Option<(Arc<T>, Instant)>,
    refreshing: bool,
    /// Bumped each time a refresh finishes.
    generation: u64,
    last: Option<Outcome<T>>,
}

struct Inner<T> {
    name: String,
    ttl: Duration,
    policy: FailurePolicy,
    fetcher: Box<dyn BlockingFetch<T>>,
    slot: Mutex<Slot<T>>,
    done: Condvar,
}

/// Thread-based single-flight stale-while-revalidate cache.
pub struct BlockingTtlCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BlockingTtlCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> BlockingTtlCache<T> {
    pub fn new(
        name: impl Into<String>,
        ttl: Duration,
        policy: FailurePolicy,
        fetcher: impl BlockingFetch<T> + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                ttl,
                policy,
                fetcher: Box::new(fetcher),
                slot: Mutex::new(Slot {
                    data: None,
                    refreshing: false,
                    generation: 0,
                    last: None,
                }),
                done: Condvar::new(),
            }),
        }
    }

    pub fn state(&self) -> CacheState {
        let slot = self.inner.slot.lock();
        match (&slot.data, slot.refreshing) {
            (None, _) => CacheState::Empty,
            (Some(_), true) => CacheState::Refreshing,
            (Some((_, at)), false) if at.elapsed() < self.inner.ttl => CacheState::Fresh,
            (Some(_), false) => CacheState::Stale,
        }
    }

    pub fn peek(&self) -> Option<Arc<T>> {
        self.inner.slot.lock().data.as_ref().map(|(d, _)| d.clone())
    }

    /// Current data. Blocks only while the cache is empty.
    pub fn get(&self) -> Result<Arc<T>, CacheFetchError> {
        let mut slot = self.inner.slot.lock();
        if let Some((data, at)) = &slot.data {
            let data = data.clone();
            if at.elapsed() >= self.inner.ttl && !slot.refreshing {
                slot.refreshing = true;
                drop(slot);
                tracing::debug!(cache = %self.inner.name, "serving stale data; refreshing in background");
                let inner = self.inner.clone();
                std::thread::spawn(move || run_refresh(&inner));
            }
            return Ok(data);
        }
        drop(slot);
        self.join_or_run()
    }

    /// Join the in-flight refresh, or run one on this thread.
    pub fn refresh(&self) -> Result<Arc<T>, CacheFetchError> {
        match self.join_or_run() {
            Ok(data) => Ok(data),
            Err(e) => match (self.inner.policy, self.peek()) {
                (FailurePolicy::ServeStale, Some(stale)) => Ok(stale),
                _ => Err(e),
            },
        }
    }

    fn join_or_run(&self) -> Outcome<T> {
        let mut slot = self.inner.slot.lock();
        if slot.refreshing {
            let generation = slot.generation;
            while slot.generation == generation {
                self.inner.done.wait(&mut slot);
            }
            return slot.last.clone().unwrap_or(Err(CacheFetchError::Abandoned));
        }
        slot.refreshing = true;
        drop(slot);
        run_refresh(&self.inner)
    }
}

fn run_refresh<T>(inner: &Inner<T>) -> Outcome<T> {
    let guard = PublishGuard { inner, published: false };
    let outcome = inner.fetcher.fetch().map(Arc::new);
    match &outcome {
        Ok(_) => tracing::debug!(cache = %inner.name, "refresh succeeded"),
        Err(e) => tracing::warn!(cache = %inner.name, error = %e, "refresh failed; keeping previous data"),
    }
    let label = if outcome.is_ok() { "success" } else { "failure" };
    metrics::counter!("chorizo_cache_refresh_total", "cache" => inner.name.clone(), "outcome" => label)
        .increment(1);
    guard.publish(outcome.clone());
    outcome
}

/// Ends the refresh and wakes waiters, with `Abandoned` if the fetch
/// unwound before producing an outcome.
struct PublishGuard<'a, T> {
    inner: &'a Inner<T>,
    published: bool,
}

impl<T> PublishGuard<'_, T> {
    fn publish(mut self, outcome: Outcome<T>) {
        self.published = true;
        finish(self.inner, outcome);
    }
}

impl<T> Drop for PublishGuard<'_, T> {
    fn drop(&mut self) {
        if !self.published {
            tracing::error!(cache = %self.inner.name, "refresh ended without an outcome");
            finish(self.inner, Err(CacheFetchError::Abandoned));
        }
    }
}

fn finish<T>(inner: &Inner<T>, outcome: Outcome<T>) {
    let mut slot = inner.slot.lock();
    if let Ok(data) = &outcome {
        slot.data = Some((data.clone(), Instant::now()));
    }
    slot.refreshing = false;
    slot.generation = slot.generation.wrapping_add(1);
    slot.last = Some(outcome);
    inner.done.notify_all();
}
