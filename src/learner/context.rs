// DP-LEARNER: LEARNER CONTEXT
// Shared process state split by ownership. SharedStats crosses cores with a
// strict single-writer-per-field discipline instead of locks; everything in
// LearnerContext is owned exclusively by the hot loop and never leaves it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::engine::BURST_SIZE;
use crate::learner::tracker::{PaxosValue, QuorumTracker};

/// Consumed-only startup configuration.
#[derive(Debug, Clone)]
pub struct LearnerConfig {
    pub nb_acceptors: usize,
    pub nb_learners: usize,
    pub learner_id: usize,
    /// Gate for the pending-cache write on relayed ACCEPTs. The read-side
    /// piggyback fallback is always active; the write side is configurable
    /// and off by default.
    pub cache_accept_values: bool,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        LearnerConfig {
            nb_acceptors: 3,
            nb_learners: 1,
            learner_id: 0,
            cache_accept_values: false,
        }
    }
}

/// Cross-core counters and flags. Writer assignment, enforced by code
/// structure rather than locks:
///
///   tx, rx, dropped, unhandled,
///   cache_underflow   — incremented by the hot loop only; swap-reset by the
///                       stats reporter at interval boundaries. Monotone
///                       within an interval; the reset is the only point a
///                       reader may observe a decrease.
///   primary_alive     — set true by the hot loop on any receive activity;
///                       cleared by the stats reporter; read by the failure
///                       detector.
///   accepted_iid      — snapshot of the hot loop's accepted-iid watermark,
///                       stored by the hot loop, read by the failure
///                       detector.
///
/// Relaxed ordering throughout: every field is an independent monotone
/// counter or flag, no cross-field happens-before is needed.
#[derive(Debug, Default)]
pub struct SharedStats {
    pub tx: AtomicU32,
    pub rx: AtomicU32,
    pub dropped: AtomicU32,
    pub unhandled: AtomicU32,
    pub cache_underflow: AtomicU32,
    pub primary_alive: AtomicBool,
    pub accepted_iid: AtomicU32,
}

impl SharedStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn count_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Hot-loop-owned learner state. The pending-value cache and both watermarks
/// are logically process state but have exactly one writer and one reader:
/// the data core.
pub struct LearnerContext<T: QuorumTracker> {
    pub cfg: LearnerConfig,
    pub tracker: T,
    pending: Vec<PaxosValue>,
    pub latest_accepted_iid: u32,
    pub latest_prepare_iid: u32,
}

impl<T: QuorumTracker> LearnerContext<T> {
    pub fn new(cfg: LearnerConfig, mut tracker: T) -> Self {
        tracker.set_instance_id(0);
        LearnerContext {
            cfg,
            tracker,
            pending: Vec::with_capacity(BURST_SIZE),
            latest_accepted_iid: 0,
            latest_prepare_iid: 0,
        }
    }

    /// Stash a client value for piggybacking. Bounded by the batch size;
    /// returns false (value dropped) when full.
    pub fn cache_value(&mut self, value: PaxosValue) -> bool {
        if self.pending.len() >= BURST_SIZE {
            return false;
        }
        self.pending.push(value);
        true
    }

    /// Pop the most recently cached pending value (LIFO).
    pub fn pop_pending(&mut self) -> Option<PaxosValue> {
        self.pending.pop()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Allocate a fresh instance id for a relayed ACCEPT. Strictly
    /// increasing, no duplicates, no gaps.
    #[inline(always)]
    pub fn alloc_relay_iid(&mut self, stats: &SharedStats) -> u32 {
        let iid = self.latest_accepted_iid;
        self.latest_accepted_iid = self.latest_accepted_iid.wrapping_add(1);
        stats.accepted_iid.store(self.latest_accepted_iid, Ordering::Relaxed);
        iid
    }

    /// Advance the accepted-iid watermark by monotone maximum. An older iid
    /// never regresses it.
    #[inline(always)]
    pub fn note_accepted(&mut self, iid: u32, stats: &SharedStats) {
        if iid > self.latest_accepted_iid {
            self.latest_accepted_iid = iid;
            stats.accepted_iid.store(iid, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::tracker::{AcceptAction, Accepted, Promise};

    struct NullTracker;
    impl QuorumTracker for NullTracker {
        fn set_instance_id(&mut self, _iid: u32) {}
        fn receive_promise(&mut self, _p: Promise) -> Option<AcceptAction> {
            None
        }
        fn receive_accepted(&mut self, _a: Accepted) -> bool {
            false
        }
    }

    fn ctx() -> LearnerContext<NullTracker> {
        LearnerContext::new(LearnerConfig::default(), NullTracker)
    }

    #[test]
    fn relay_iids_strictly_increase_without_gaps() {
        let stats = SharedStats::new();
        let mut c = ctx();
        let ids: Vec<u32> = (0..64).map(|_| c.alloc_relay_iid(&stats)).collect();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(*id, i as u32);
        }
        assert_eq!(stats.accepted_iid.load(Ordering::Relaxed), 64);
    }

    #[test]
    fn accepted_watermark_is_monotone_max() {
        let stats = SharedStats::new();
        let mut c = ctx();
        c.note_accepted(5, &stats);
        c.note_accepted(3, &stats);
        assert_eq!(c.latest_accepted_iid, 5);
        assert_eq!(stats.accepted_iid.load(Ordering::Relaxed), 5);
        c.note_accepted(9, &stats);
        assert_eq!(c.latest_accepted_iid, 9);
    }

    #[test]
    fn pending_cache_is_bounded_lifo() {
        let mut c = ctx();
        for i in 0..BURST_SIZE {
            assert!(c.cache_value(PaxosValue::new(&[i as u8])));
        }
        assert!(!c.cache_value(PaxosValue::new(&[0xFF])));
        assert_eq!(c.pending_len(), BURST_SIZE);
        let top = c.pop_pending().unwrap();
        assert_eq!(top.as_bytes(), &[(BURST_SIZE - 1) as u8]);
        assert_eq!(c.pending_len(), BURST_SIZE - 1);
    }
}
