use std::collections::HashMap;
use std::fmt::Debug;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::query::Query;
use crate::types::RowError;

/// Which replica role a query is routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostRoles {
    Primary,
    Secondary,
    /// Any host, regardless of role.
    Any,
}

/// Transaction access mode. The fetch pipeline only ever opens read-only
/// transactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// Per-request execution limits handed to the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandControl {
    /// Overall command timeout for the round-trip.
    pub execute_timeout: Duration,
    /// Server-side statement timeout; `None` leaves it disabled.
    pub statement_timeout: Option<Duration>,
}

/// One result set (or cursor batch) decoded into the policy's raw row type.
///
/// Decoding is the driver's job; a row it could not decode is delivered as
/// an `Err` so the cache can count and skip it. [`size`](Self::size) counts
/// every delivered row, failed or not, and therefore matches the driver's
/// result-set size.
#[derive(Clone, Debug)]
pub struct RowBatch<R> {
    rows: Vec<Result<R, RowError>>,
}

impl<R> RowBatch<R> {
    pub fn new(rows: Vec<Result<R, RowError>>) -> Self {
        Self { rows }
    }

    pub fn from_values(values: impl IntoIterator<Item = R>) -> Self {
        Self {
            rows: values.into_iter().map(Ok).collect(),
        }
    }

    pub fn size(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<Result<R, RowError>> {
        self.rows
    }
}

impl<R> Default for RowBatch<R> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

/// A sharded backend component: the object a cache resolves by its
/// configured name. `R` is the decoded row type, `U` the watermark type.
pub trait RTClusterProvider<R, U>: Send + Sync + 'static
where
    R: Send + 'static,
    U: Send + Sync + 'static,
{
    type Cluster: RTCluster<R, U>;

    /// Number of independently addressed partitions. A cache iterates all
    /// of them each cycle; zero shards is a configuration error.
    fn shard_count(&self) -> usize;

    fn cluster_for_shard(&self, shard: usize) -> Arc<Self::Cluster>;
}

/// One shard's connection handle.
#[async_trait]
pub trait RTCluster<R, U>: Send + Sync + 'static
where
    R: Send + 'static,
    U: Send + Sync + 'static,
{
    type Error: Display + Debug + Send + Sync + 'static;
    type Transaction: RTTransaction<R, U, Error = Self::Error>;

    /// Single round-trip execution of `query` with the watermark bound as
    /// `$1` when present.
    async fn execute(
        &self,
        roles: HostRoles,
        control: CommandControl,
        query: &Query,
        watermark: Option<&U>,
    ) -> Result<RowBatch<R>, Self::Error>;

    /// Opens a transaction pinned to the given role for cursor-based
    /// fetching.
    async fn begin(
        &self,
        roles: HostRoles,
        mode: TransactionMode,
        control: CommandControl,
    ) -> Result<Self::Transaction, Self::Error>;
}

/// A transaction with at most one server-side cursor over the update query.
#[async_trait]
pub trait RTTransaction<R, U>: Send
where
    R: Send + 'static,
    U: Send + Sync + 'static,
{
    type Error: Display + Debug + Send + Sync + 'static;

    /// Declares the cursor. Must be called once before [`fetch`](Self::fetch).
    async fn make_portal(
        &mut self,
        query: &Query,
        watermark: Option<&U>,
    ) -> Result<(), Self::Error>;

    /// Fetches up to `limit` rows from the cursor. An empty batch means the
    /// cursor is exhausted.
    async fn fetch(&mut self, limit: usize) -> Result<RowBatch<R>, Self::Error>;

    async fn commit(self) -> Result<(), Self::Error>;
}

/// Resolves shared backend components by their configuration name.
///
/// Embedders with a component registry implement this over it; a plain
/// [`HashMap`] works for simpler wiring.
pub trait BackendResolver<B> {
    fn resolve(&self, name: &str) -> Option<Arc<B>>;
}

impl<B> BackendResolver<B> for HashMap<String, Arc<B>> {
    fn resolve(&self, name: &str) -> Option<Arc<B>> {
        self.get(name).cloned()
    }
}
