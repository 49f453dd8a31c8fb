use std::fmt::Debug;
use std::fmt::Display;

use thiserror::Error;

use crate::policy::PolicyError;

/// The kind of refresh requested for one update cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    /// Re-fetch every row matching the base query and replace the snapshot.
    Full,
    /// Fetch only rows whose update column reached the watermark and merge
    /// them into a copy of the current snapshot.
    Incremental,
}

/// What one update cycle did to the published snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A new snapshot was published.
    Published {
        /// Number of entries in the published container.
        size: usize,
        /// Number of rows delivered by the backend during the cycle.
        changes: usize,
    },
    /// An incremental cycle observed no rows; the previous snapshot stays
    /// current.
    NoChanges,
}

/// An error affecting a single row of a result set.
///
/// Row errors are accounted for and logged by the cache but never abort an
/// update cycle; the offending row is skipped.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct RowError {
    message: String,
}

impl RowError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl From<&str> for RowError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for RowError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

/// Errors produced by [`RTCache`](crate::cache::RTCache). `E` is the error
/// type of the backend driver the cache was compiled against.
///
/// Configuration and policy violations are construction-time and fatal.
/// Backend errors abort a single update cycle without touching the published
/// snapshot; the embedder (or the built-in periodic loop) decides when to
/// retry.
#[derive(Debug, Error)]
pub enum RTError<E>
where
    E: Debug + Display,
{
    #[error("invalid configuration of cache `{name}`: {reason}")]
    Config { name: &'static str, reason: String },

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("backend request of cache `{name}` failed: {error}")]
    Backend { name: &'static str, error: E },
}
