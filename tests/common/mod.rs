#![allow(dead_code)]

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::TimeZone;
use chrono::Utc;
use thiserror::Error;

use rt_cache::prelude::*;
use rt_cache::RTCache;

#[derive(Clone, Debug, Error)]
#[error("mock backend failure: {0}")]
pub struct MockError(pub String);

// One scripted reaction per update cycle and shard. An exhausted script
// serves empty result sets, which models an idle table.
enum Step<R> {
    Rows(Vec<Result<R, RowError>>),
    Fail(String),
    Hang,
}

struct Recorder<R, U> {
    script: Mutex<VecDeque<Step<R>>>,
    watermarks: Mutex<Vec<Option<U>>>,
    queries: Mutex<Vec<String>>,
    commits: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl<R, U> Default for Recorder<R, U> {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            watermarks: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            commits: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }
}

impl<R, U> Recorder<R, U>
where
    U: Clone,
{
    fn record(&self, query: &Query, watermark: Option<&U>) {
        self.queries.lock().unwrap().push(query.statement().to_owned());
        self.watermarks.lock().unwrap().push(watermark.cloned());
    }

    async fn next_step(&self) -> Result<Vec<Result<R, RowError>>, MockError> {
        let step = self.script.lock().unwrap().pop_front();
        match step {
            None => Ok(Vec::new()),
            Some(Step::Rows(rows)) => Ok(rows),
            Some(Step::Fail(message)) => Err(MockError(message)),
            Some(Step::Hang) => std::future::pending().await,
        }
    }
}

/// One scripted shard.
pub struct MockCluster<R, U> {
    recorder: Arc<Recorder<R, U>>,
}

impl<R, U> Default for MockCluster<R, U> {
    fn default() -> Self {
        Self {
            recorder: Arc::new(Recorder::default()),
        }
    }
}

impl<R, U> MockCluster<R, U>
where
    U: Clone,
{
    pub fn push_rows(&self, rows: Vec<R>) {
        self.push_row_results(rows.into_iter().map(Ok).collect());
    }

    pub fn push_row_results(&self, rows: Vec<Result<R, RowError>>) {
        self.recorder.script.lock().unwrap().push_back(Step::Rows(rows));
    }

    pub fn push_failure(&self, message: &str) {
        self.recorder
            .script
            .lock()
            .unwrap()
            .push_back(Step::Fail(message.to_owned()));
    }

    /// The next cycle touching this shard suspends forever; for cancellation
    /// tests.
    pub fn push_hang(&self) {
        self.recorder.script.lock().unwrap().push_back(Step::Hang);
    }

    pub fn watermarks(&self) -> Vec<Option<U>> {
        self.recorder.watermarks.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.recorder.queries.lock().unwrap().clone()
    }

    pub fn commits(&self) -> usize {
        self.recorder.commits.load(Ordering::Relaxed)
    }

    pub fn fetch_calls(&self) -> usize {
        self.recorder.fetch_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<R, U> RTCluster<R, U> for MockCluster<R, U>
where
    R: Send + 'static,
    U: Clone + Send + Sync + 'static,
{
    type Error = MockError;
    type Transaction = MockTransaction<R, U>;

    async fn execute(
        &self,
        _roles: HostRoles,
        _control: CommandControl,
        query: &Query,
        watermark: Option<&U>,
    ) -> Result<RowBatch<R>, MockError> {
        self.recorder.record(query, watermark);
        Ok(RowBatch::new(self.recorder.next_step().await?))
    }

    async fn begin(
        &self,
        _roles: HostRoles,
        _mode: TransactionMode,
        _control: CommandControl,
    ) -> Result<MockTransaction<R, U>, MockError> {
        Ok(MockTransaction {
            recorder: Arc::clone(&self.recorder),
            rows: None,
        })
    }
}

pub struct MockTransaction<R, U> {
    recorder: Arc<Recorder<R, U>>,
    rows: Option<VecDeque<Result<R, RowError>>>,
}

#[async_trait]
impl<R, U> RTTransaction<R, U> for MockTransaction<R, U>
where
    R: Send + 'static,
    U: Clone + Send + Sync + 'static,
{
    type Error = MockError;

    async fn make_portal(
        &mut self,
        query: &Query,
        watermark: Option<&U>,
    ) -> Result<(), MockError> {
        self.recorder.record(query, watermark);
        self.rows = Some(self.recorder.next_step().await?.into());
        Ok(())
    }

    async fn fetch(&mut self, limit: usize) -> Result<RowBatch<R>, MockError> {
        self.recorder.fetch_calls.fetch_add(1, Ordering::Relaxed);
        let rows = self
            .rows
            .as_mut()
            .ok_or_else(|| MockError("fetch before make_portal".into()))?;
        let take = limit.min(rows.len());
        Ok(RowBatch::new(rows.drain(..take).collect()))
    }

    async fn commit(self) -> Result<(), MockError> {
        self.recorder.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

pub struct MockProvider<R, U> {
    clusters: Vec<Arc<MockCluster<R, U>>>,
}

impl<R, U> MockProvider<R, U> {
    pub fn new(shards: usize) -> Self {
        Self {
            clusters: (0..shards).map(|_| Arc::new(MockCluster::default())).collect(),
        }
    }

    pub fn shard(&self, shard: usize) -> Arc<MockCluster<R, U>> {
        Arc::clone(&self.clusters[shard])
    }
}

impl<R, U> RTClusterProvider<R, U> for MockProvider<R, U>
where
    R: Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
{
    type Cluster = MockCluster<R, U>;

    fn shard_count(&self) -> usize {
        self.clusters.len()
    }

    fn cluster_for_shard(&self, shard: usize) -> Arc<Self::Cluster> {
        Arc::clone(&self.clusters[shard])
    }
}

// ---- policies under test ----

#[derive(Clone, Debug, PartialEq)]
pub struct Movie {
    pub id: i64,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

pub fn movie(id: i64, title: &str, updated_secs: i64) -> Movie {
    Movie {
        id,
        title: title.to_owned(),
        updated_at: Utc.timestamp_opt(updated_secs, 0).unwrap(),
    }
}

pub struct MoviesPolicy;

impl RTPolicy for MoviesPolicy {
    const NAME: &'static str = "movies";
    const UPDATED_FIELD: Option<&'static str> = Some("updated_at");

    type Value = Movie;
    type Raw = Movie;
    type Key = i64;
    type Updated = DateTime<Utc>;
    type Container = HashMap<i64, Movie>;

    fn query() -> Query {
        Query::new("select id, title, updated_at from movies", Self::NAME)
    }

    fn extract(raw: Self::Raw) -> Result<Self::Value, RowError> {
        Ok(raw)
    }

    fn key_of(value: &Self::Value) -> Self::Key {
        value.id
    }
}

/// Same table, but the delta watermark is derived from the cached data
/// instead of the scheduler's clock.
pub struct MoviesByRevision;

impl RTPolicy for MoviesByRevision {
    const NAME: &'static str = "movies-by-revision";
    const UPDATED_FIELD: Option<&'static str> = Some("updated_at");

    type Value = Movie;
    type Raw = Movie;
    type Key = i64;
    type Updated = DateTime<Utc>;
    type Container = HashMap<i64, Movie>;

    fn query() -> Query {
        Query::new("select id, title, updated_at from movies", Self::NAME)
    }

    fn extract(raw: Self::Raw) -> Result<Self::Value, RowError> {
        Ok(raw)
    }

    fn key_of(value: &Self::Value) -> Self::Key {
        value.id
    }

    fn last_known_updated(data: &Self::Container) -> Option<Self::Updated> {
        data.values().map(|movie| movie.updated_at).max()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

/// Full-only policy with a wire/materialized split: rows arrive as tuples
/// and conversion rejects empty names.
pub struct TagsPolicy;

impl RTPolicy for TagsPolicy {
    const NAME: &'static str = "tags";
    const UPDATED_FIELD: Option<&'static str> = None;

    type Value = Tag;
    type Raw = (i64, String);
    type Key = i64;
    type Updated = ();
    type Container = HashMap<i64, Tag>;

    fn query() -> Query {
        Query::new("select id, name from tags", Self::NAME)
    }

    fn extract(raw: Self::Raw) -> Result<Self::Value, RowError> {
        let (id, name) = raw;
        if name.is_empty() {
            return Err(RowError::new(format!("tag {id} has an empty name")));
        }
        Ok(Tag { id, name })
    }

    fn key_of(value: &Self::Value) -> Self::Key {
        value.id
    }
}

/// Conversion is artificially slow so one cycle reliably crosses the
/// relax threshold.
pub struct SlowMoviesPolicy;

impl RTPolicy for SlowMoviesPolicy {
    const NAME: &'static str = "slow-movies";
    const UPDATED_FIELD: Option<&'static str> = Some("updated_at");

    type Value = Movie;
    type Raw = Movie;
    type Key = i64;
    type Updated = DateTime<Utc>;
    type Container = HashMap<i64, Movie>;

    fn query() -> Query {
        Query::new("select id, title, updated_at from movies", Self::NAME)
    }

    fn extract(raw: Self::Raw) -> Result<Self::Value, RowError> {
        std::thread::sleep(Duration::from_micros(500));
        Ok(raw)
    }

    fn key_of(value: &Self::Value) -> Self::Key {
        value.id
    }
}

// ---- wiring helpers ----

pub const BACKEND_NAME: &str = "pg-test";

/// Config for tests driving update cycles by hand: the periodic loop is off.
pub fn manual_config() -> CacheConfig {
    CacheConfig {
        pgcomponent: BACKEND_NAME.to_owned(),
        update_interval: Duration::ZERO,
        ..CacheConfig::default()
    }
}

pub fn open_cache<P>(
    provider: MockProvider<P::Raw, P::Updated>,
    config: CacheConfig,
) -> Arc<RTCache<P, MockProvider<P::Raw, P::Updated>>>
where
    P: RTPolicy,
    MockProvider<P::Raw, P::Updated>: RTClusterProvider<P::Raw, P::Updated>,
{
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut backends: HashMap<String, Arc<MockProvider<P::Raw, P::Updated>>> = HashMap::new();
    backends.insert(BACKEND_NAME.to_owned(), Arc::new(provider));
    RTCache::<P, _>::open(config, &backends).expect("cache must open")
}

pub fn at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}
