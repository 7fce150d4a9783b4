// DP-LEARNER: EXECUTION-CORE TIMER TASKS
// Two periodic tasks run on cores separate from the hot loop, each driven by
// a lightweight expiration poller: the per-interval stats reporter and the
// primary-liveness failure detector. They share SharedStats with the hot
// loop under the single-writer discipline documented in context.rs; no locks
// anywhere.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::learner::context::SharedStats;

/// Poll quantum for the expiration loop. Cold cores, sleeping is fine here.
pub const TIMER_RESOLUTION: Duration = Duration::from_millis(10);

/// Default period for both tasks.
pub const REPORT_PERIOD: Duration = Duration::from_secs(1);

/// Expiration poller. Invokes `tick` every `period` until the cancellation
/// token is set or the callback breaks (one-shot tasks stop themselves).
pub fn run_periodic<F>(name: &str, period: Duration, shutdown: &AtomicBool, mut tick: F)
where
    F: FnMut() -> ControlFlow<()>,
{
    let mut next = Instant::now() + period;
    while !shutdown.load(Ordering::Relaxed) {
        if Instant::now() >= next {
            next += period;
            if tick().is_break() {
                tracing::debug!(task = name, "periodic task stopped");
                return;
            }
        }
        std::thread::sleep(TIMER_RESOLUTION);
    }
}

// ============================================================================
// STATS REPORTER
// ============================================================================

/// Per-interval throughput reporter. Swap-resets the counters atomically so
/// the hot loop's increments during the read land in the next interval, and
/// clears the liveness flag for the failure detector's next look.
pub struct StatsReporter {
    stats: Arc<SharedStats>,
    at_second: u32,
}

impl StatsReporter {
    pub fn new(stats: Arc<SharedStats>) -> Self {
        StatsReporter { stats, at_second: 0 }
    }

    /// One reporting interval. Returns the (tx, rx, dropped) snapshot.
    pub fn tick(&mut self) -> (u32, u32, u32) {
        let tx = self.stats.tx.swap(0, Ordering::Relaxed);
        let rx = self.stats.rx.swap(0, Ordering::Relaxed);
        let dropped = self.stats.dropped.swap(0, Ordering::Relaxed);
        info!(second = self.at_second, tx, rx, dropped, "interval stats");
        self.at_second += 1;
        self.stats.primary_alive.store(false, Ordering::Relaxed);
        (tx, rx, dropped)
    }

    pub fn run(mut self, shutdown: &AtomicBool) {
        run_periodic("stats-reporter", REPORT_PERIOD, shutdown, || {
            self.tick();
            ControlFlow::Continue(())
        });
    }
}

// ============================================================================
// FAILURE DETECTOR
// ============================================================================

/// Capability invoked when the primary is declared dead. The corrective
/// action (a replacement-PREPARE burst re-proposing from the watermark) is an
/// extension point; the default only raises the signal.
pub trait FailureAction: Send {
    fn on_primary_failure(&mut self, iid: u32);
}

/// Default action: log the failure, take no protocol action.
pub struct LogFailure;

impl FailureAction for LogFailure {
    fn on_primary_failure(&mut self, iid: u32) {
        warn!(iid, "primary failed: no receive activity for a full detection period");
    }
}

/// One-shot primary-liveness detector. If the liveness flag survived the
/// interval it no-ops; if not, and the node has seen accepted traffic, it
/// fires its action once and stops permanently.
pub struct FailureDetector<A: FailureAction> {
    stats: Arc<SharedStats>,
    action: A,
}

impl<A: FailureAction> FailureDetector<A> {
    pub fn new(stats: Arc<SharedStats>, action: A) -> Self {
        FailureDetector { stats, action }
    }

    pub fn tick(&mut self) -> ControlFlow<()> {
        if self.stats.primary_alive.load(Ordering::Relaxed) {
            return ControlFlow::Continue(());
        }
        let iid = self.stats.accepted_iid.load(Ordering::Relaxed);
        if iid == 0 {
            // Nothing accepted yet: silence is startup, not failure.
            return ControlFlow::Continue(());
        }
        self.action.on_primary_failure(iid);
        ControlFlow::Break(())
    }

    pub fn run(mut self, shutdown: &AtomicBool) {
        run_periodic("failure-detector", REPORT_PERIOD, shutdown, || self.tick());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporter_snapshots_and_resets() {
        let stats = Arc::new(SharedStats::new());
        stats.tx.fetch_add(1000, Ordering::Relaxed);
        stats.rx.fetch_add(200, Ordering::Relaxed);
        stats.primary_alive.store(true, Ordering::Relaxed);

        let mut rep = StatsReporter::new(stats.clone());
        assert_eq!(rep.tick(), (1000, 200, 0));
        assert_eq!(stats.tx.load(Ordering::Relaxed), 0);
        assert_eq!(stats.rx.load(Ordering::Relaxed), 0);
        assert!(!stats.primary_alive.load(Ordering::Relaxed));
        // Next interval starts from zero.
        assert_eq!(rep.tick(), (0, 0, 0));
    }

    struct CountingAction(u32);
    impl FailureAction for CountingAction {
        fn on_primary_failure(&mut self, _iid: u32) {
            self.0 += 1;
        }
    }

    #[test]
    fn detector_noop_while_alive_or_before_traffic() {
        let stats = Arc::new(SharedStats::new());
        let mut det = FailureDetector::new(stats.clone(), CountingAction(0));

        // Alive flag set: no-op.
        stats.primary_alive.store(true, Ordering::Relaxed);
        assert!(det.tick().is_continue());

        // Flag cleared but no accepted traffic yet: still no-op.
        stats.primary_alive.store(false, Ordering::Relaxed);
        assert!(det.tick().is_continue());
        assert_eq!(det.action.0, 0);
    }

    #[test]
    fn detector_fires_exactly_once() {
        let stats = Arc::new(SharedStats::new());
        stats.accepted_iid.store(42, Ordering::Relaxed);
        let mut det = FailureDetector::new(stats.clone(), CountingAction(0));

        // Silent interval with a nonzero watermark: fire and stop.
        assert!(det.tick().is_break());
        assert_eq!(det.action.0, 1);
        // One-shot: run_periodic would have exited; even a direct re-tick
        // does not observe a second detection period in practice, but the
        // Break return is what guarantees no re-arm.
    }
}
