//! # TTL Cache — Cooperative Regime
//!
//! Stale-while-revalidate cache with single-flight refresh, for use inside a
//! tokio runtime.
//!
//! ## States
//!
//! ```text
//! Empty ──get()──▶ (refresh, callers wait) ──▶ Fresh
//!                                                │ ttl elapses
//!                                                ▼
//!        Fresh ◀── refresh done ── Refreshing ◀── Stale
//!                                 (stale served)
//! ```
//!
//! - **Empty**: callers wait for the first fetch; there is nothing to serve.
//! - **Fresh**: data is returned immediately.
//! - **Stale**: data is returned immediately and a background refresh starts.
//! - **Refreshing**: data is returned immediately; no second refresh starts.
//!
//! ## Single flight
//!
//! The pending slot holds a `watch` receiver for the one in-flight refresh.
//! Every caller that needs the result clones that receiver, so N concurrent
//! callers cause one upstream fetch and all see the same outcome. The fetch
//! runs in a spawned task: dropping a waiting caller never cancels it.
//!
//! ## Failures
//!
//! A failed refresh clears the pending slot, keeps prior data, logs, and
//! counts `chorizo_cache_refresh_total{outcome="failure"}`. What a joined
//! caller sees is set by [`FailurePolicy`].

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chorizo_core::CacheFetchError;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

/// Produces fresh cache data.
#[async_trait]
pub trait Fetch<T>: Send + Sync {
    async fn fetch(&self) -> Result<T, CacheFetchError>;
}

/// What a caller joined on a failed refresh receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Keep serving the previous data. Only a cache with no data at all
    /// reports the error.
    #[default]
    ServeStale,
    /// Report the refresh error to every caller joined on it, even when
    /// stale data exists.
    Propagate,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serve-stale" => Ok(Self::ServeStale),
            "propagate" => Ok(Self::Propagate),
            other => Err(format!(
                "unknown cache failure policy '{other}' (expected serve-stale or propagate)"
            )),
        }
    }
}

/// Observable cache state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Fresh,
    Stale,
    Refreshing,
}

type Outcome<T> = Result<Arc<T>, CacheFetchError>;

struct Entry<T> {
    data: Arc<T>,
    fetched_at: Instant,
}

struct Slot<T> {
    entry: Option<Entry<T>>,
    pending: Option<watch::Receiver<Option<Outcome<T>>>>,
}

struct Inner<T> {
    name: String,
    ttl: Duration,
    policy: FailurePolicy,
    fetcher: Box<dyn Fetch<T>>,
    slot: Mutex<Slot<T>>,
}

/// Single-flight stale-while-revalidate cache.
pub struct TtlCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for TtlCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for TtlCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.inner.name)
            .field("ttl", &self.inner.ttl)
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> TtlCache<T> {
    /// A cache named `name` (used in logs and metrics).
    pub fn new(
        name: impl Into<String>,
        ttl: Duration,
        policy: FailurePolicy,
        fetcher: impl Fetch<T> + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                ttl,
                policy,
                fetcher: Box::new(fetcher),
                slot: Mutex::new(Slot {
                    entry: None,
                    pending: None,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn policy(&self) -> FailurePolicy {
        self.inner.policy
    }

    /// Current state, without side effects.
    pub fn state(&self) -> CacheState {
        let slot = self.inner.slot.lock();
        match (&slot.entry, &slot.pending) {
            (None, _) => CacheState::Empty,
            (Some(_), Some(_)) => CacheState::Refreshing,
            (Some(entry), None) if entry.fetched_at.elapsed() < self.inner.ttl => CacheState::Fresh,
            (Some(_), None) => CacheState::Stale,
        }
    }

    /// Cached data, if any, without triggering a fetch.
    pub fn peek(&self) -> Option<Arc<T>> {
        self.inner.slot.lock().entry.as_ref().map(|e| e.data.clone())
    }

    /// Current data.
    ///
    /// Waits only when the cache is empty. Stale data is returned at once,
    /// starting a background refresh if none is in flight.
    ///
    /// # Errors
    ///
    /// Only from an empty cache whose first fetch failed.
    pub async fn get(&self) -> Result<Arc<T>, CacheFetchError> {
        let waiter = {
            let mut slot = self.inner.slot.lock();
            match &slot.entry {
                Some(entry) if entry.fetched_at.elapsed() < self.inner.ttl => {
                    return Ok(entry.data.clone());
                }
                Some(entry) => {
                    let data = entry.data.clone();
                    if slot.pending.is_none() {
                        tracing::debug!(cache = %self.inner.name, "serving stale data; refreshing in background");
                        self.start_refresh(&mut slot);
                    }
                    return Ok(data);
                }
                None => match &slot.pending {
                    Some(pending) => pending.clone(),
                    None => self.start_refresh(&mut slot),
                },
            }
        };
        wait(waiter).await
    }

    /// Join the in-flight refresh, or start one, and wait for it.
    ///
    /// On failure, [`FailurePolicy::ServeStale`] returns the previous data
    /// when there is any; [`FailurePolicy::Propagate`] returns the error.
    pub async fn refresh(&self) -> Result<Arc<T>, CacheFetchError> {
        let waiter = {
            let mut slot = self.inner.slot.lock();
            match &slot.pending {
                Some(pending) => pending.clone(),
                None => self.start_refresh(&mut slot),
            }
        };
        match wait(waiter).await {
            Ok(data) => Ok(data),
            Err(e) => match (self.inner.policy, self.peek()) {
                (FailurePolicy::ServeStale, Some(stale)) => Ok(stale),
                _ => Err(e),
            },
        }
    }

    fn start_refresh(&self, slot: &mut Slot<T>) -> watch::Receiver<Option<Outcome<T>>> {
        let (tx, rx) = watch::channel(None);
        slot.pending = Some(rx.clone());

        let guard = RefreshGuard {
            inner: self.inner.clone(),
            tx: Some(tx),
        };
        tokio::spawn(async move {
            tracing::debug!(cache = %guard.inner.name, "refresh started");
            let outcome = guard.inner.fetcher.fetch().await.map(Arc::new);
            guard.finish(outcome);
        });
        rx
    }
}

/// Owns the in-flight refresh. Clears the pending slot and wakes waiters
/// even when the fetch panics.
struct RefreshGuard<T> {
    inner: Arc<Inner<T>>,
    tx: Option<watch::Sender<Option<Outcome<T>>>>,
}

impl<T> RefreshGuard<T> {
    fn finish(mut self, outcome: Outcome<T>) {
        {
            let mut slot = self.inner.slot.lock();
            slot.pending = None;
            if let Ok(data) = &outcome {
                slot.entry = Some(Entry {
                    data: data.clone(),
                    fetched_at: Instant::now(),
                });
            }
        }
        let label = match &outcome {
            Ok(_) => {
                tracing::debug!(cache = %self.inner.name, "refresh succeeded");
                "success"
            }
            Err(e) => {
                tracing::warn!(cache = %self.inner.name, error = %e, "refresh failed; keeping previous data");
                "failure"
            }
        };
        metrics::counter!("chorizo_cache_refresh_total", "cache" => self.inner.name.clone(), "outcome" => label)
            .increment(1);
        if let Some(tx) = self.tx.take() {
            // Waiters may all be gone; the slot is already updated.
            let _ = tx.send(Some(outcome));
        }
    }
}

impl<T> Drop for RefreshGuard<T> {
    fn drop(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        self.inner.slot.lock().pending = None;
        tracing::error!(cache = %self.inner.name, "refresh ended without an outcome");
        metrics::counter!("chorizo_cache_refresh_total", "cache" => self.inner.name.clone(), "outcome" => "abandoned")
            .increment(1);
        let _ = tx.send(Some(Err(CacheFetchError::Abandoned)));
    }
}

async fn wait<T>(mut rx: watch::Receiver<Option<Outcome<T>>>) -> Outcome<T> {
    loop {
        let current = rx.borrow_and_update().clone();
        if let Some(outcome) = current {
            return outcome;
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone().unwrap_or(Err(CacheFetchError::Abandoned));
        }
    }
}
