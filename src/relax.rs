use std::time::Duration;

use crate::stats::ScopeTime;

/// Parse-stage duration beyond which the relax cadence is recalculated.
pub(crate) const CPU_RELAX_THRESHOLD: Duration = Duration::from_millis(10);
/// Target spacing between two cooperative yields.
pub(crate) const CPU_RELAX_INTERVAL: Duration = Duration::from_millis(2);

/// Iteration-counted cooperative yield.
///
/// Parsing a large result set on one task would otherwise starve co-tenant
/// tasks of the runtime; yielding every `every` rows keeps the scheduler
/// responsive. `every == 0` disables yielding, which is where every cache
/// starts until a measured cycle proves it parses long enough to matter.
#[derive(Debug)]
pub(crate) struct CpuRelax {
    every: usize,
    count: usize,
}

impl CpuRelax {
    pub(crate) fn new(every: usize) -> Self {
        Self { every, count: 0 }
    }

    /// Called once per row. Yields to the scheduler at the configured
    /// cadence, pausing the active stage so yield time is not billed to it.
    pub(crate) async fn relax(&mut self, timer: &mut ScopeTime) {
        if self.every == 0 {
            return;
        }
        self.count += 1;
        if self.count % self.every == 0 {
            let resume = timer.active();
            timer.stop();
            tokio::task::yield_now().await;
            if let Some(stage) = resume {
                timer.reset(stage);
            }
        }
    }
}

/// Yield cadence for the next cycle: how many rows fit into one relax
/// interval, given the measured per-row cost of this cycle.
pub(crate) fn relax_iterations_for(changes: usize, parse_elapsed: Duration) -> usize {
    let intervals = parse_elapsed.as_secs_f64() / CPU_RELAX_INTERVAL.as_secs_f64();
    if intervals <= 0.0 {
        return 0;
    }
    (changes as f64 / intervals) as usize
}
