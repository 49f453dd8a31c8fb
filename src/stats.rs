use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

/// Lock-free counter registry of one cache instance, shared with the
/// embedder's metrics sink via [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct CacheStatistics {
    documents_read: AtomicU64,
    documents_parse_failures: AtomicU64,
    current_size: AtomicU64,
    updates_published: AtomicU64,
    updates_no_changes: AtomicU64,
    updates_failed: AtomicU64,
}

/// Point-in-time copy of [`CacheStatistics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStatisticsSnapshot {
    /// Rows delivered by the backend, including rows that failed to parse.
    pub documents_read: u64,
    /// Rows skipped because decoding or conversion failed.
    pub documents_parse_failures: u64,
    /// Size of the snapshot recorded at the last publish.
    pub current_size: u64,
    /// Cycles that published a snapshot.
    pub updates_published: u64,
    /// Incremental cycles that observed no rows.
    pub updates_no_changes: u64,
    /// Cycles aborted by a backend error or cancellation.
    pub updates_failed: u64,
}

impl CacheStatistics {
    pub fn snapshot(&self) -> CacheStatisticsSnapshot {
        CacheStatisticsSnapshot {
            documents_read: self.documents_read.load(Ordering::Relaxed),
            documents_parse_failures: self.documents_parse_failures.load(Ordering::Relaxed),
            current_size: self.current_size.load(Ordering::Relaxed),
            updates_published: self.updates_published.load(Ordering::Relaxed),
            updates_no_changes: self.updates_no_changes.load(Ordering::Relaxed),
            updates_failed: self.updates_failed.load(Ordering::Relaxed),
        }
    }
}

/// Per-cycle statistics accumulator.
///
/// Counts are buffered locally and flushed into the shared registry by
/// [`finish`](Self::finish) or [`finish_no_changes`](Self::finish_no_changes).
/// A scope dropped without either call flushes what it saw and records the
/// cycle as failed, which covers both error returns and task cancellation.
#[derive(Debug)]
pub struct UpdateStatsScope {
    stats: Arc<CacheStatistics>,
    documents_read: u64,
    parse_failures: u64,
    finished: bool,
}

impl UpdateStatsScope {
    pub fn new(stats: Arc<CacheStatistics>) -> Self {
        Self {
            stats,
            documents_read: 0,
            parse_failures: 0,
            finished: false,
        }
    }

    pub fn increase_documents_read(&mut self, count: usize) {
        self.documents_read += count as u64;
    }

    pub fn increase_parse_failures(&mut self, count: usize) {
        self.parse_failures += count as u64;
    }

    /// Records a publish of `size` entries.
    pub fn finish(&mut self, size: usize) {
        self.flush();
        self.stats.current_size.store(size as u64, Ordering::Relaxed);
        self.stats.updates_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a cycle that left the previous snapshot current.
    pub fn finish_no_changes(&mut self) {
        self.flush();
        self.stats.updates_no_changes.fetch_add(1, Ordering::Relaxed);
    }

    fn flush(&mut self) {
        self.finished = true;
        self.stats
            .documents_read
            .fetch_add(self.documents_read, Ordering::Relaxed);
        self.stats
            .documents_parse_failures
            .fetch_add(self.parse_failures, Ordering::Relaxed);
        self.documents_read = 0;
        self.parse_failures = 0;
    }
}

impl Drop for UpdateStatsScope {
    fn drop(&mut self) {
        if !self.finished {
            self.flush();
            self.stats.updates_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Wall-clock accounting of the named stages of one update cycle.
///
/// Exactly one stage runs at a time; [`reset`](Self::reset) closes the
/// running stage and opens the next, so stages can never overlap.
#[derive(Debug, Default)]
pub struct ScopeTime {
    current: Option<(&'static str, Instant)>,
    totals: HashMap<&'static str, Duration>,
}

impl ScopeTime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches accounting to `stage`.
    pub fn reset(&mut self, stage: &'static str) {
        self.stop();
        self.current = Some((stage, Instant::now()));
    }

    /// Closes the running stage, if any.
    pub fn stop(&mut self) {
        if let Some((stage, started)) = self.current.take() {
            *self.totals.entry(stage).or_default() += started.elapsed();
        }
    }

    pub(crate) fn active(&self) -> Option<&'static str> {
        self.current.map(|(stage, _)| stage)
    }

    /// Accumulated time of `stage` across all of its runs. Only closed runs
    /// count; call [`stop`](Self::stop) first for a final figure.
    pub fn elapsed_total(&self, stage: &'static str) -> Duration {
        self.totals.get(stage).copied().unwrap_or_default()
    }
}
