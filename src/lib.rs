//! # rt-cache
//!
//! `rt-cache` stands for a simple read-through cache. It materializes rows
//! from a replicated SQL backend into an in-memory lookup structure and
//! keeps it fresh with periodic full and incremental refreshes:
//!
//! - Serve point lookups against a consistent, immutable snapshot
//! - Offer a generic interface to integrate with any sharded SQL driver
//! - Refresh the snapshot in the background without ever blocking readers
//!
//! The crate is designed for use in asynchronous contexts on top of
//! [`tokio`](https://crates.io/crates/tokio).
//!
//! ## Vocabulary
//!
//! - **Policy**: the compile-time description of one cached table — the row
//!   type, its key, the base query, and the update column. A policy
//!   implements the [`RTPolicy`](crate::policy::RTPolicy) trait.
//! - **Snapshot**: an immutable mapping from key to value, published
//!   atomically by one update cycle.
//! - **Watermark**: the timestamp bound as `$1` of a delta query; rows whose
//!   update column reached it are re-fetched and merged.
//!
//! ## Basic Principles
//!
//! `rt-cache` is not an ORM in any way. It operates on whole rows as the
//! backend driver decodes them, keyed by a projection the policy supplies.
//! The cache is read-only from the caller's perspective: all writes go to
//! the backend through other channels, and the cache picks them up on its
//! next refresh. Each process caches independently; there is no
//! cross-instance coherence and none is needed, since the backend remains
//! the source of truth and the snapshot is reconstructable at any time.
//!
//! A full refresh rebuilds the snapshot from scratch. An incremental
//! refresh copies the current snapshot and merges in only the rows whose
//! update column reached the watermark, which keeps refresh cost
//! proportional to churn rather than table size. The watermark comparison
//! is deliberately inclusive: sources with coarse timestamp resolution may
//! otherwise miss contemporaneous writes, and re-delivered rows are
//! absorbed by the upsert.
//!
//! ## Architecture
//!
//! The central part of the cache is the [`RTCache`](crate::cache::RTCache)
//! object. It owns the shard cluster handles resolved at construction, the
//! published snapshot, and the background updater task.
//!
//! The backend driver is abstracted behind the traits in
//! [`backend`](crate::backend): a provider fans out to per-shard cluster
//! handles, each of which executes queries either in a single round-trip or
//! through a server-side cursor when a chunk size is configured. The driver
//! decodes rows into the policy's raw type; a row that fails to decode or
//! convert is counted, logged and skipped without disturbing the cycle.
//!
//! Update cycles run on a task owned by the cache at the configured
//! cadence, or are driven directly by an embedder with its own scheduler.
//! While a cycle parses a large result set it periodically yields to the
//! runtime; the yield cadence is measured from the previous cycle rather
//! than fixed, so small result sets are not penalized.
//!
//! ## Caveats
//!
//! Incremental refresh deep-copies the current snapshot before merging, so
//! its cost has a floor of O(snapshot size). Tables where every cycle
//! rewrites most rows gain little from deltas and may prefer
//! `only-full` scheduling.

pub mod backend;
pub mod cache;
pub mod config;
pub mod policy;
pub mod query;
pub(crate) mod relax;
pub mod stats;
pub mod types;

pub use cache::RTCache;
pub use policy::RTPolicy;

pub mod prelude {
    pub use crate::backend::BackendResolver;
    pub use crate::backend::CommandControl;
    pub use crate::backend::HostRoles;
    pub use crate::backend::RTCluster;
    pub use crate::backend::RTClusterProvider;
    pub use crate::backend::RTTransaction;
    pub use crate::backend::RowBatch;
    pub use crate::backend::TransactionMode;
    pub use crate::cache::RTCache;
    pub use crate::config::AllowedUpdateTypes;
    pub use crate::config::CacheConfig;
    pub use crate::policy::CacheContainer;
    pub use crate::policy::RTPolicy;
    pub use crate::policy::WatermarkTime;
    pub use crate::query::Query;
    pub use crate::stats::UpdateStatsScope;
    pub use crate::types::*;
}
