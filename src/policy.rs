use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::SystemTime;

use chrono::DateTime;
use chrono::NaiveDateTime;
use chrono::Utc;
use thiserror::Error;

use crate::backend::HostRoles;
use crate::config::AllowedUpdateTypes;
use crate::config::CacheConfig;
use crate::query::Query;
use crate::types::RowError;

/// The [cache policy](crate#policy) implementation.
///
/// Use of [`RTCache`](crate::cache::RTCache) must start with a type that
/// implements this trait. The policy is a pure compile-time descriptor: it
/// carries no state and its hooks are associated functions, so a unit struct
/// is the usual carrier.
///
/// The required members name the cached table: the materialized row type,
/// the key projection, the base query, and the update column. The optional
/// members — [`WHERE_CLAUSE`](Self::WHERE_CLAUSE),
/// [`HOST_ROLES`](Self::HOST_ROLES) and
/// [`last_known_updated`](Self::last_known_updated) — default to the most
/// common configuration and are overridden per policy.
pub trait RTPolicy: Sized + Send + Sync + 'static {
    /// Stable cache identifier, used in logs, statistics, and derived query
    /// names. Must not be empty.
    const NAME: &'static str;

    /// Extra predicate appended to the base query: as `where <clause>` for
    /// full updates and as an `and`-joined condition for delta queries.
    const WHERE_CLAUSE: Option<&'static str> = None;

    /// Column used for incremental watermarking. `None` disables incremental
    /// updates for this policy; every cycle is then a full refresh.
    const UPDATED_FIELD: Option<&'static str>;

    /// Which replica role the fetch pipeline reads from.
    const HOST_ROLES: HostRoles = HostRoles::Secondary;

    /// The record type stored in the cache container.
    type Value: Clone + Debug + Send + Sync + 'static;

    /// The wire representation rows are decoded into by the driver. Policies
    /// without a wire/materialized split set this to [`Value`](Self::Value)
    /// and make [`extract`](Self::extract) the identity.
    type Raw: Send + 'static;

    /// The lookup key type produced by [`key_of`](Self::key_of).
    type Key: Clone + Debug + Eq + Send + Sync + 'static;

    /// The watermark timestamp type of the update column: one of the
    /// [`WatermarkTime`] kinds. Policies with incremental updates disabled
    /// set `()`.
    type Updated: WatermarkTime;

    /// The snapshot container. [`HashMap`] unless the policy needs ordering
    /// or another map-like structure.
    type Container: CacheContainer<Self::Key, Self::Value>;

    /// The base `select` statement. Returned from a function rather than
    /// held in a constant so policies can assemble it from parts.
    fn query() -> Query;

    /// Converts one decoded row into the cached value. The identity for
    /// policies where [`Raw`](Self::Raw) is [`Value`](Self::Value). A
    /// returned error skips the row without aborting the cycle.
    fn extract(raw: Self::Raw) -> Result<Self::Value, RowError>;

    /// Projects the lookup key out of a cached value.
    fn key_of(value: &Self::Value) -> Self::Key;

    /// Computes the delta watermark from the cached data itself, for
    /// policies where the update column is a revision or another value not
    /// correlated with the scheduler's clock. The default `None` selects
    /// the `last_update - correction` baseline.
    fn last_known_updated(_data: &Self::Container) -> Option<Self::Updated> {
        None
    }
}

/// Map-like storage for one snapshot.
///
/// Duplicate keys within one update cycle resolve to the newest value, so
/// `upsert` must replace. Cloning must produce an independent container:
/// incremental cycles deep-copy the current snapshot before merging.
pub trait CacheContainer<K, V>: Clone + Default + Send + Sync + 'static {
    fn upsert(&mut self, key: K, value: V);
    fn get(&self, key: &K) -> Option<&V>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> CacheContainer<K, V> for HashMap<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn upsert(&mut self, key: K, value: V) {
        self.insert(key, value);
    }

    fn get(&self, key: &K) -> Option<&V> {
        HashMap::get(self, key)
    }

    fn len(&self) -> usize {
        HashMap::len(self)
    }
}

impl<K, V> CacheContainer<K, V> for BTreeMap<K, V>
where
    K: Clone + Ord + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn upsert(&mut self, key: K, value: V) {
        self.insert(key, value);
    }

    fn get(&self, key: &K) -> Option<&V> {
        BTreeMap::get(self, key)
    }

    fn len(&self) -> usize {
        BTreeMap::len(self)
    }
}

/// A timestamp kind usable as a delta watermark.
///
/// The conversion defines the default watermark: the scheduler's
/// last-update time, minus the configured correction, expressed in the
/// update column's type.
pub trait WatermarkTime: Clone + Debug + Send + Sync + 'static {
    fn from_system_time(at: SystemTime) -> Self;
}

impl WatermarkTime for DateTime<Utc> {
    fn from_system_time(at: SystemTime) -> Self {
        at.into()
    }
}

impl WatermarkTime for NaiveDateTime {
    fn from_system_time(at: SystemTime) -> Self {
        DateTime::<Utc>::from(at).naive_utc()
    }
}

// Placeholder for policies with incremental updates disabled; never bound
// as a query parameter.
impl WatermarkTime for () {
    fn from_system_time(_at: SystemTime) -> Self {}
}

/// A policy that cannot be served with the given configuration.
#[derive(Clone, Debug, Error)]
#[error("cache policy violation in `{name}`: {reason}")]
pub struct PolicyError {
    pub name: &'static str,
    pub reason: String,
}

impl PolicyError {
    fn new(name: &'static str, reason: impl Into<String>) -> Self {
        Self { name, reason: reason.into() }
    }
}

/// Construction-time checks of a policy against the runtime configuration.
/// Everything the type system cannot rule out ends up here; a violation is
/// fatal to the embedder.
pub fn validate<P: RTPolicy>(config: &CacheConfig) -> Result<(), PolicyError> {
    if P::NAME.is_empty() {
        return Err(PolicyError::new(P::NAME, "cache name must not be empty"));
    }
    match P::UPDATED_FIELD {
        Some(field) if field.is_empty() => {
            return Err(PolicyError::new(
                P::NAME,
                "updated field must name a column; use None to disable incremental updates",
            ));
        }
        None if config.allowed_update_types != AllowedUpdateTypes::OnlyFull => {
            return Err(PolicyError::new(
                P::NAME,
                "incremental updates are requested in config but the policy names no updated field",
            ));
        }
        _ => (),
    }
    Ok(())
}
