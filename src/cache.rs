use std::any;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;

use fieldx_plus::fx_plus;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::backend::BackendResolver;
use crate::backend::CommandControl;
use crate::backend::RTCluster;
use crate::backend::RTClusterProvider;
use crate::backend::RTTransaction;
use crate::backend::RowBatch;
use crate::backend::TransactionMode;
use crate::config::AllowedUpdateTypes;
use crate::config::CacheConfig;
use crate::policy;
use crate::policy::CacheContainer;
use crate::policy::RTPolicy;
use crate::policy::WatermarkTime;
use crate::query;
use crate::relax::relax_iterations_for;
use crate::relax::CpuRelax;
use crate::relax::CPU_RELAX_THRESHOLD;
use crate::stats::CacheStatistics;
use crate::stats::ScopeTime;
use crate::stats::UpdateStatsScope;
use crate::types::RTError;
use crate::types::UpdateKind;
use crate::types::UpdateOutcome;

const COPY_STAGE: &str = "copy_data";
const FETCH_STAGE: &str = "fetch";
const PARSE_STAGE: &str = "parse";

type RTClusters<P, B> = Vec<
    Arc<<B as RTClusterProvider<<P as RTPolicy>::Raw, <P as RTPolicy>::Updated>>::Cluster>,
>;

/// Error type of the backend driver a cache is compiled against.
pub type RTBackendError<P, B> =
    <<B as RTClusterProvider<<P as RTPolicy>::Raw, <P as RTPolicy>::Updated>>::Cluster as RTCluster<
        <P as RTPolicy>::Raw,
        <P as RTPolicy>::Updated,
    >>::Error;

pub type RTResult<T, P, B> = Result<T, RTError<RTBackendError<P, B>>>;

/// The read-through cache of one logical table.
///
/// ```ignore
/// let mut backends = HashMap::new();
/// backends.insert("pg-movies".to_string(), Arc::new(pg_component));
///
/// let cache = RTCache::<MoviesPolicy, _>::open(config, &backends)?;
///
/// // Point lookups against the current snapshot; never suspends.
/// if let Some(movie) = cache.get(&42) {
///     println!("{}", movie.title);
/// }
/// ```
///
/// Readers observe immutable snapshots: [`get`](RTCache::get) and
/// [`snapshot`](RTCache::snapshot) hand out the container published by the
/// last completed update cycle, while the next cycle assembles its working
/// container off to the side. Publishing swaps an `Arc`, so an in-flight
/// reader keeps the snapshot it started with.
#[fx_plus(
    parent,
    new(off),
    // Need explicit `default(off)` because the field defaults are for the builder type only.
    default(off),
    sync,
    builder(
        doc("Builder object of [`RTCache`].", "", "See [`RTCache::builder()`] method."),
        method_doc("Implement builder pattern for [`RTCache`]."),
    )
)]
pub struct RTCache<P, B>
where
    P: RTPolicy,
    B: RTClusterProvider<P::Raw, P::Updated>,
{
    // Shard cluster handles; immutable after construction, walked
    // sequentially by every cycle.
    #[fieldx(private, builder(required), get)]
    clusters: RTClusters<P, B>,

    #[fieldx(get(copy), default(Duration::from_secs(60)))]
    full_update_timeout: Duration,

    #[fieldx(get(copy), default(Duration::from_secs(1)))]
    incremental_update_timeout: Duration,

    /// Subtracted from the last-update time to widen the delta window.
    #[fieldx(get(copy), default(Duration::ZERO))]
    correction: Duration,

    /// Cursor batch size; zero fetches each shard in a single round-trip.
    #[fieldx(get(copy), default(0))]
    chunk_size: usize,

    #[fieldx(get(copy), default(AllowedUpdateTypes::FullAndIncremental))]
    allowed_update_types: AllowedUpdateTypes,

    /// Cadence of the periodic loop; zero leaves driving updates to the
    /// embedder.
    #[fieldx(get(copy), default(Duration::from_secs(60)))]
    update_interval: Duration,

    #[fieldx(get(copy), default(Duration::ZERO))]
    full_update_interval: Duration,

    // The published snapshot. Readers clone the Arc out; the write lock is
    // held only for the swap.
    #[fieldx(lock, optional, private, clearer, set, get(clone), builder(off))]
    data: Arc<<P as RTPolicy>::Container>,

    #[fieldx(lock, private, get(copy), set, builder(off), default(0))]
    relax_iterations: usize,

    #[fieldx(get(clone), builder(off), default(Arc::new(CacheStatistics::default())))]
    stats: Arc<CacheStatistics>,

    #[fieldx(private, clearer, lock, get, set, builder(off))]
    updater_task: JoinHandle<()>,
}

impl<P, B> std::fmt::Debug for RTCache<P, B>
where
    P: RTPolicy,
    B: RTClusterProvider<P::Raw, P::Updated>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RTCache")
            .field("full_update_timeout", &self.full_update_timeout)
            .field("incremental_update_timeout", &self.incremental_update_timeout)
            .field("correction", &self.correction)
            .field("chunk_size", &self.chunk_size)
            .field("allowed_update_types", &self.allowed_update_types)
            .field("update_interval", &self.update_interval)
            .field("full_update_interval", &self.full_update_interval)
            .field("relax_iterations", &self.relax_iterations)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<P, B> RTCache<P, B>
where
    P: RTPolicy,
    B: RTClusterProvider<P::Raw, P::Updated>,
{
    /// Whether the policy supports delta queries at all.
    pub const INCREMENTAL_UPDATES: bool = P::UPDATED_FIELD.is_some();

    /// Builds a cache from configuration: validates the policy against the
    /// options, resolves the backend component by its configured name, fans
    /// out over its shards and starts the periodic updater. This is the
    /// entry point for service wiring; tests and embedders with their own
    /// scheduler may also assemble via [`RTCache::builder()`] directly.
    pub fn open(
        config: CacheConfig,
        resolver: &impl BackendResolver<B>,
    ) -> RTResult<Arc<Self>, P, B> {
        config.validate().map_err(|reason| RTError::Config {
            name: P::NAME,
            reason,
        })?;
        policy::validate::<P>(&config)?;

        let backend =
            resolver
                .resolve(&config.pgcomponent)
                .ok_or_else(|| RTError::Config {
                    name: P::NAME,
                    reason: format!(
                        "no backend component `{}` is registered",
                        config.pgcomponent
                    ),
                })?;
        let shard_count = backend.shard_count();
        if shard_count == 0 {
            return Err(RTError::Config {
                name: P::NAME,
                reason: format!("backend `{}` reports zero shards", config.pgcomponent),
            });
        }
        let clusters: RTClusters<P, B> = (0..shard_count)
            .map(|shard| backend.cluster_for_shard(shard))
            .collect();

        let full = query::full_query::<P>();
        let delta = query::delta_query::<P>();
        info!(
            cache = P::NAME,
            full_query = full.statement(),
            delta_query = delta.statement(),
            shards = shard_count,
            "opening cache"
        );

        let cache = Self::builder()
            .clusters(clusters)
            .full_update_timeout(config.full_update_op_timeout)
            .incremental_update_timeout(config.incremental_update_op_timeout)
            .correction(config.update_correction)
            .chunk_size(config.chunk_size)
            .allowed_update_types(config.allowed_update_types)
            .update_interval(config.update_interval)
            .full_update_interval(config.full_update_interval)
            .build()
            .map_err(|error| RTError::Config {
                name: P::NAME,
                reason: error.to_string(),
            })?;

        cache.start_periodic_updates();
        Ok(cache)
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        P::NAME
    }

    /// A shared handle to the current snapshot, or `None` before the first
    /// publish. The handle stays valid however many cycles publish after it
    /// was taken.
    #[inline]
    pub fn snapshot(&self) -> Option<Arc<P::Container>> {
        self.data()
    }

    /// Point lookup against the current snapshot. Never suspends.
    pub fn get(&self, key: &P::Key) -> Option<P::Value> {
        self.data().and_then(|data| data.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.data().map_or(0, |data| data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows between two cooperative yields of the parse stage. Zero until a
    /// measured cycle proves parsing runs long enough to warrant yielding.
    pub fn relax_cadence(&self) -> usize {
        self.relax_iterations()
    }

    /// Runs one update cycle.
    ///
    /// Called by the built-in periodic loop, or directly by an embedder
    /// driving its own schedule. `last_update` is the start time of the last
    /// *successful* cycle and feeds the delta watermark; `now` is the tick
    /// time. Cycles must not run concurrently for one instance; the caller
    /// serializes them.
    ///
    /// A backend error aborts the cycle before anything is published, so
    /// the previous snapshot stays current. Per-row failures are counted,
    /// logged and skipped.
    pub async fn update(
        &self,
        kind: UpdateKind,
        last_update: SystemTime,
        _now: SystemTime,
        scope: &mut UpdateStatsScope,
    ) -> RTResult<UpdateOutcome, P, B> {
        let kind = if Self::INCREMENTAL_UPDATES {
            kind
        } else {
            UpdateKind::Full
        };
        let query = match kind {
            UpdateKind::Full => query::full_query::<P>(),
            UpdateKind::Incremental => query::delta_query::<P>(),
        };
        let control = CommandControl {
            execute_timeout: match kind {
                UpdateKind::Full => self.full_update_timeout(),
                UpdateKind::Incremental => self.incremental_update_timeout(),
            },
            statement_timeout: None,
        };

        let mut timer = ScopeTime::new();

        // Copy current cached data: the working container starts empty for a
        // full refresh and as a deep copy of the snapshot for a delta.
        timer.reset(COPY_STAGE);
        let mut data = self.data_snapshot(kind);

        timer.reset(FETCH_STAGE);
        let mut changes = 0usize;
        for cluster in self.clusters().iter() {
            // The custom watermark hook sees the working container as merged
            // so far, so it is recomputed per shard.
            let watermark = match kind {
                UpdateKind::Full => None,
                UpdateKind::Incremental => Some(self.last_updated(last_update, &data)),
            };

            if self.chunk_size() > 0 {
                let mut trx = cluster
                    .begin(P::HOST_ROLES, TransactionMode::ReadOnly, control)
                    .await
                    .map_err(Self::backend_error)?;
                trx.make_portal(&query, watermark.as_ref())
                    .await
                    .map_err(Self::backend_error)?;
                loop {
                    timer.reset(FETCH_STAGE);
                    let batch = trx
                        .fetch(self.chunk_size())
                        .await
                        .map_err(Self::backend_error)?;
                    if batch.is_empty() {
                        break;
                    }
                    scope.increase_documents_read(batch.size());
                    changes += batch.size();

                    timer.reset(PARSE_STAGE);
                    self.cache_results(batch, &mut data, scope, &mut timer).await;
                }
                trx.commit().await.map_err(Self::backend_error)?;
            } else {
                let batch = cluster
                    .execute(P::HOST_ROLES, control, &query, watermark.as_ref())
                    .await
                    .map_err(Self::backend_error)?;
                scope.increase_documents_read(batch.size());
                changes += batch.size();

                timer.reset(PARSE_STAGE);
                self.cache_results(batch, &mut data, scope, &mut timer).await;
            }
        }
        timer.stop();

        if changes > 0 {
            let parse_elapsed = timer.elapsed_total(PARSE_STAGE);
            if parse_elapsed > CPU_RELAX_THRESHOLD {
                let iterations = relax_iterations_for(changes, parse_elapsed);
                self.set_relax_iterations(iterations);
                trace!(
                    cache = P::NAME,
                    ?parse_elapsed,
                    changes,
                    iterations,
                    "parse stage over threshold, will relax CPU"
                );
            }
        }

        if changes > 0 || kind == UpdateKind::Full {
            let size = data.len();
            self.set_data(Arc::new(data));
            scope.finish(size);
            debug!(cache = P::NAME, ?kind, size, changes, "published new snapshot");
            Ok(UpdateOutcome::Published { size, changes })
        } else {
            scope.finish_no_changes();
            debug!(cache = P::NAME, ?kind, "no changes observed");
            Ok(UpdateOutcome::NoChanges)
        }
    }

    /// Starts the periodic loop unless the update interval is zero.
    /// [`open`](RTCache::open) calls this; it only needs to be called
    /// explicitly after assembling the cache via the builder.
    pub fn start_periodic_updates(&self) {
        if self.update_interval() == Duration::ZERO {
            return;
        }
        let myself = self.myself().unwrap();
        self.set_updater_task(tokio::spawn(async move { myself.updater_loop().await }));
    }

    /// Stops the periodic loop and drops the snapshot. Aborting mid-cycle is
    /// safe: the working container and any open transaction are released
    /// unpublished.
    pub async fn close(&self) {
        if let Some(updater) = self.clear_updater_task() {
            updater.abort();
            let _ = updater.await;
        }
        self.clear_data();
    }

    fn backend_error(error: RTBackendError<P, B>) -> RTError<RTBackendError<P, B>> {
        RTError::Backend {
            name: P::NAME,
            error,
        }
    }

    // The working container for one cycle.
    fn data_snapshot(&self, kind: UpdateKind) -> P::Container {
        if kind == UpdateKind::Incremental {
            if let Some(data) = self.data() {
                return (*data).clone();
            }
        }
        P::Container::default()
    }

    fn last_updated(&self, last_update: SystemTime, data: &P::Container) -> P::Updated {
        P::last_known_updated(data)
            .unwrap_or_else(|| P::Updated::from_system_time(last_update - self.correction()))
    }

    async fn cache_results(
        &self,
        batch: RowBatch<P::Raw>,
        data: &mut P::Container,
        scope: &mut UpdateStatsScope,
        timer: &mut ScopeTime,
    ) {
        let mut relax = CpuRelax::new(self.relax_iterations());
        for row in batch.into_rows() {
            relax.relax(timer).await;
            match row.and_then(P::extract) {
                Ok(value) => {
                    let key = P::key_of(&value);
                    data.upsert(key, value);
                }
                Err(error) => {
                    scope.increase_parse_failures(1);
                    error!(
                        cache = P::NAME,
                        value_type = any::type_name::<P::Value>(),
                        %error,
                        "error parsing data row"
                    );
                }
            }
        }
    }

    async fn updater_loop(&self) {
        let mut last_update: Option<SystemTime> = None;
        let mut last_full: Option<Instant> = None;
        loop {
            tokio::time::sleep(self.update_interval()).await;

            let kind = self.next_update_kind(last_update, last_full);
            let now = SystemTime::now();
            let mut scope = UpdateStatsScope::new(self.stats());
            match self
                .update(
                    kind,
                    last_update.unwrap_or(SystemTime::UNIX_EPOCH),
                    now,
                    &mut scope,
                )
                .await
            {
                Ok(outcome) => {
                    // The watermark baseline moves only on success so a
                    // failed cycle is retried over the same window.
                    last_update = Some(now);
                    if kind == UpdateKind::Full {
                        last_full = Some(Instant::now());
                    }
                    debug!(cache = P::NAME, ?kind, ?outcome, "periodic update finished");
                }
                Err(error) => {
                    warn!(cache = P::NAME, ?kind, %error, "periodic update failed, will retry");
                }
            }
        }
    }

    fn next_update_kind(
        &self,
        last_update: Option<SystemTime>,
        last_full: Option<Instant>,
    ) -> UpdateKind {
        // The very first cycle has nothing to merge into.
        if last_update.is_none() {
            return UpdateKind::Full;
        }
        match self.allowed_update_types() {
            AllowedUpdateTypes::OnlyFull => UpdateKind::Full,
            AllowedUpdateTypes::OnlyIncremental => UpdateKind::Incremental,
            AllowedUpdateTypes::FullAndIncremental => {
                let full_every = self.full_update_interval();
                if full_every != Duration::ZERO
                    && last_full.map_or(true, |at| at.elapsed() >= full_every)
                {
                    UpdateKind::Full
                } else {
                    UpdateKind::Incremental
                }
            }
        }
    }
}
