//! Scheduled eviction of idle tenant state.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ConversationMemory, RateLimiter};
use crate::clock::Clock;

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub conversations_evicted: usize,
    pub rate_windows_dropped: usize,
}

/// Run a single sweep at the clock's current time.
pub fn run_sweep_once(
    memory: &ConversationMemory,
    limiter: &RateLimiter,
    clock: &dyn Clock,
) -> SweepReport {
    let now = clock.now();
    SweepReport {
        conversations_evicted: memory.sweep(now),
        rate_windows_dropped: limiter.sweep(now),
    }
}

/// Spawn the periodic sweep. Returns its handle for shutdown.
pub fn spawn_sweep_task(
    memory: ConversationMemory,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
    every: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = run_sweep_once(&memory, &limiter, clock.as_ref());
                    debug!(
                        conversations_evicted = report.conversations_evicted,
                        rate_windows_dropped = report.rate_windows_dropped,
                        "Tenant state sweep finished"
                    );
                }
                _ = shutdown.cancelled() => {
                    debug!("Tenant state sweep stopped");
                    break;
                }
            }
        }
    })
}
