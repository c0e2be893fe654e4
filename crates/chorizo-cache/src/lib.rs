//! # chorizo-cache — Single-Flight TTL Caches
//!
//! Stale-while-revalidate caches with at most one in-flight refresh per
//! cache instance, in two execution regimes:
//!
//! - [`TtlCache`]: tokio tasks; the pending refresh is a shared `watch`
//!   handle in a mutex-guarded slot.
//! - [`BlockingTtlCache`]: OS threads; the pending refresh is a flag plus a
//!   `Condvar`.
//!
//! Specializations:
//!
//! - [`KeySetCache`] decodes a remote key set into a [`KeyTable`] of
//!   Ed25519 verification keys, replaced wholesale on each refresh.
//! - [`RevocationCache`] holds an opaque revocation payload.
//!
//! ## Crate Policy
//!
//! - Refresh failures never reach `get()` callers while data exists. The
//!   [`FailurePolicy`] decides what an explicit `refresh()` caller sees.
//! - Caches are created once per process and passed in explicitly; there
//!   are no global instances.

pub mod blocking;
pub mod http;
pub mod keyset;
pub mod revocation;
pub mod ttl;

pub use blocking::{BlockingFetch, BlockingTtlCache};
pub use http::HttpJsonFetcher;
pub use keyset::{KeySetCache, KeyTable};
pub use revocation::RevocationCache;
pub use ttl::{CacheState, FailurePolicy, Fetch, TtlCache};
