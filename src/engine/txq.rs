// DP-LEARNER: TX STAGING & DRAIN
// Bounded per-queue staging for outgoing buffers. Auto-flushes on batch-full;
// the hot loop additionally forces a flush once a small TSC time budget
// elapses, bounding tail latency for low-rate traffic. Buffers the port
// refuses are counted as drops and freed, never retried: retransmission is
// the consensus layer's job, no backpressure propagates upstream from here.

use crate::engine::pool::{FramePool, NetworkBuffer};
use crate::engine::BURST_SIZE;
use crate::learner::context::SharedStats;
use std::sync::atomic::Ordering;

/// Maximum time an outgoing buffer may sit staged before a forced flush.
pub const BURST_TX_DRAIN_NS: u64 = 100;

/// Seam to the NIC transmit queue. `send_burst` transmits a prefix of `bufs`
/// (possibly all), frees the transmitted buffers back into `pool`, removes
/// them from the vec, and returns the count sent. Anything left in `bufs`
/// was refused by the queue.
pub trait TxPort {
    fn send_burst(&mut self, pool: &mut FramePool, bufs: &mut Vec<NetworkBuffer>) -> usize;
}

/// Seam to the NIC receive queue. Fills `out` with up to `max` inbound
/// buffers allocated from `pool`, returns the count received. Zero means
/// nothing pending; the hot loop keeps polling.
pub trait RxPort {
    fn rx_burst(&mut self, pool: &mut FramePool, out: &mut Vec<NetworkBuffer>, max: usize) -> usize;
}

/// Bounded staging queue, owned exclusively by the hot loop's core.
pub struct TxBuffer {
    staged: Vec<NetworkBuffer>,
    cap: usize,
}

impl TxBuffer {
    pub fn new(cap: usize) -> Self {
        TxBuffer { staged: Vec::with_capacity(cap), cap }
    }

    pub fn with_burst_cap() -> Self {
        Self::new(BURST_SIZE)
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Stage one buffer. Auto-flushes when the batch fills and returns the
    /// count sent (0 while still buffering) so the caller can replenish its
    /// working set from the TX pool.
    pub fn buffer(
        &mut self,
        buf: NetworkBuffer,
        port: &mut impl TxPort,
        pool: &mut FramePool,
        stats: &SharedStats,
    ) -> usize {
        self.staged.push(buf);
        if self.staged.len() >= self.cap {
            self.flush(port, pool, stats)
        } else {
            0
        }
    }

    /// Drain everything staged. Sent buffers are counted on the tx counter;
    /// refused ones are counted as drops and freed.
    pub fn flush(
        &mut self,
        port: &mut impl TxPort,
        pool: &mut FramePool,
        stats: &SharedStats,
    ) -> usize {
        if self.staged.is_empty() {
            return 0;
        }
        let sent = port.send_burst(pool, &mut self.staged);
        stats.tx.fetch_add(sent as u32, Ordering::Relaxed);
        let refused = self.staged.len();
        if refused > 0 {
            stats.dropped.fetch_add(refused as u32, Ordering::Relaxed);
            for b in self.staged.drain(..) {
                pool.free(b);
            }
        }
        sent
    }
}
