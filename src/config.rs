use std::time::Duration;

use serde::Deserialize;

/// Which update kinds the periodic loop may schedule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllowedUpdateTypes {
    /// Every cycle is a full refresh.
    OnlyFull,
    /// Incremental after the initial full refresh.
    OnlyIncremental,
    /// Incremental on the regular interval, full on the full-update
    /// interval.
    #[default]
    FullAndIncremental,
}

/// Runtime options of one cache instance.
///
/// Durations deserialize from humantime strings (`"60s"`, `"250ms"`). All
/// keys are kebab-case; unknown keys are rejected so typos surface at load
/// time.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct CacheConfig {
    /// Name of the backend component to resolve. Required.
    pub pgcomponent: String,

    /// Command timeout for full-update queries.
    #[serde(with = "humantime_serde")]
    pub full_update_op_timeout: Duration,

    /// Command timeout for delta queries.
    #[serde(with = "humantime_serde")]
    pub incremental_update_op_timeout: Duration,

    /// Subtracted from the last-update time when forming the delta
    /// watermark, to tolerate clock skew between the scheduler and the
    /// backend. The watermark references the scheduler's clock.
    #[serde(with = "humantime_serde")]
    pub update_correction: Duration,

    /// Server-side cursor batch size; `0` fetches each shard's result in a
    /// single round-trip.
    pub chunk_size: usize,

    pub allowed_update_types: AllowedUpdateTypes,

    /// Cadence of the built-in periodic loop. `Duration::ZERO` disables the
    /// loop; the embedder then drives update cycles itself.
    #[serde(with = "humantime_serde")]
    pub update_interval: Duration,

    /// How often a full refresh replaces the incremental cadence.
    /// `Duration::ZERO` means only the initial refresh is full.
    #[serde(with = "humantime_serde")]
    pub full_update_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            pgcomponent: String::new(),
            full_update_op_timeout: Duration::from_secs(60),
            incremental_update_op_timeout: Duration::from_secs(1),
            update_correction: Duration::ZERO,
            chunk_size: 0,
            allowed_update_types: AllowedUpdateTypes::default(),
            update_interval: Duration::from_secs(60),
            full_update_interval: Duration::ZERO,
        }
    }
}

impl CacheConfig {
    /// Checks the options that cannot be enforced by their types. Violations
    /// are fatal at construction.
    pub fn validate(&self) -> Result<(), String> {
        if self.pgcomponent.is_empty() {
            return Err("no `pgcomponent` entry in configuration".into());
        }
        if self.full_update_op_timeout.is_zero() {
            return Err("`full-update-op-timeout` must be positive".into());
        }
        if self.incremental_update_op_timeout.is_zero() {
            return Err("`incremental-update-op-timeout` must be positive".into());
        }
        Ok(())
    }
}
