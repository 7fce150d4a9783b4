// DP-LEARNER: RX CLASSIFIER & MESSAGE DISPATCH
// One pass per inbound buffer: structural classification (is this a Paxos
// frame for us at all), then per-msgtype handling. PROMISE evidence feeds the
// tracker and may produce an ACCEPT response; ACCEPT from the coordinator is
// relayed to the acceptor multicast group under a fresh instance id; ACCEPTED
// advances the watermark. Inbound buffers always return to the RX pool,
// whatever the verdict.

use std::sync::atomic::Ordering;

use tracing::debug;

use crate::engine::pool::{FramePool, NetworkBuffer, OL_IP_CKSUM, OL_UDP_CKSUM};
use crate::engine::txq::{TxBuffer, TxPort};
use crate::error::DropReason;
use crate::learner::context::{LearnerContext, SharedStats};
use crate::learner::tracker::{Accepted, PaxosValue, Promise, QuorumTracker};
use crate::net::{udp_phdr_sum, FrameBuilder};
use crate::protocol::wire::{
    mcast_mac, trace_hexdump, PaxosHeader, ACCEPTOR_MCAST_ADDR, ACCEPTOR_PORT, ETHERTYPE_IPV4,
    IPPROTO_UDP, LEARNER_PORT, PAXOS_ACCEPT, PAXOS_ACCEPTED, PAXOS_HDR_SIZE, PAXOS_OFF,
    PAXOS_PROMISE,
};

/// What the dispatcher did with a frame. Informational; drops are reported
/// through the error channel instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// PROMISE quorum reached, an ACCEPT response was staged.
    Responded,
    /// Coordinator ACCEPT cloned and staged toward the acceptor group.
    Relayed,
    /// ACCEPTED evidence advanced the watermark.
    Advanced,
    /// Valid frame, nothing for us to do.
    Ignored,
}

/// Structural filter ahead of any protocol work. A frame passes when it is
/// long enough to hold a Paxos header, is IPv4/UDP without IP options, and
/// is addressed to one of our ports. NIC-flagged tunnel frames skip the port
/// check: the inner destination is not at the standard offset.
fn classify(frame: &[u8], tunneled: bool) -> Result<(), DropReason> {
    if frame.len() < PAXOS_OFF + PAXOS_HDR_SIZE {
        return Err(DropReason::MalformedFrame);
    }
    if u16::from_be_bytes([frame[12], frame[13]]) != ETHERTYPE_IPV4 {
        return Err(DropReason::MalformedFrame);
    }
    if frame[14] != 0x45 || frame[23] != IPPROTO_UDP {
        return Err(DropReason::MalformedFrame);
    }
    if !tunneled {
        let dst_port = u16::from_be_bytes([frame[36], frame[37]]);
        // Learner and acceptor traffic share a port namespace; both land here.
        if dst_port != LEARNER_PORT && dst_port != ACCEPTOR_PORT {
            return Err(DropReason::MalformedFrame);
        }
    }
    Ok(())
}

/// Everything one burst's worth of dispatching needs, borrowed from the hot
/// loop. The fields are disjoint by construction so handlers can hold the
/// inbound frame while mutating the tracker or the TX side.
pub struct DispatchCtx<'a, T: QuorumTracker, P: TxPort> {
    pub learner: &'a mut LearnerContext<T>,
    pub builder: &'a mut FrameBuilder,
    pub rx_pool: &'a mut FramePool,
    pub tx_pool: &'a mut FramePool,
    pub txq: &'a mut TxBuffer,
    pub port: &'a mut P,
    pub stats: &'a SharedStats,
}

impl<'a, T: QuorumTracker, P: TxPort> DispatchCtx<'a, T, P> {
    /// Dispatch a full burst in arrival order, returning every inbound
    /// buffer to the RX pool. Drop accounting happens here so the handlers
    /// only report what went wrong.
    pub fn process_burst(&mut self, bufs: &mut Vec<NetworkBuffer>) {
        for buf in bufs.drain(..) {
            match Self::process_one(
                self.learner,
                self.builder,
                self.rx_pool,
                self.tx_pool,
                self.txq,
                self.port,
                self.stats,
                &buf,
            ) {
                Ok(_) => {}
                Err(reason) => {
                    self.stats.count_drop();
                    if reason == DropReason::CacheUnderflow {
                        self.stats.cache_underflow.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            self.rx_pool.free(buf);
        }
    }

    /// Single-frame dispatch. Split out with explicit borrows so the burst
    /// loop can keep the buffer alive across the call.
    #[allow(clippy::too_many_arguments)]
    fn process_one(
        learner: &mut LearnerContext<T>,
        builder: &mut FrameBuilder,
        rx_pool: &mut FramePool,
        tx_pool: &mut FramePool,
        txq: &mut TxBuffer,
        port: &mut P,
        stats: &SharedStats,
        buf: &NetworkBuffer,
    ) -> Result<Verdict, DropReason> {
        let frame = rx_pool.frame(buf);
        classify(frame, buf.tunneled)?;

        let (hdr, value) =
            PaxosHeader::decode(&frame[PAXOS_OFF..]).ok_or(DropReason::MalformedFrame)?;
        trace_hexdump("rx paxos", &frame[PAXOS_OFF..PAXOS_OFF + PAXOS_HDR_SIZE]);

        match hdr.msgtype {
            PAXOS_PROMISE => {
                let promise = Promise {
                    iid: hdr.inst,
                    ballot: hdr.rnd,
                    value_ballot: hdr.vrnd,
                    aid: hdr.acptid,
                    value: PaxosValue::new(value),
                };
                let Some(action) = learner.tracker.receive_promise(promise) else {
                    return Ok(Verdict::Ignored);
                };
                // A bare quorum carries no value of its own: piggyback a
                // pending client value. No value, no ACCEPT; sending an empty
                // one would burn the instance.
                let value = if action.value.is_empty() {
                    learner.pop_pending().ok_or(DropReason::CacheUnderflow)?
                } else {
                    action.value
                };
                let out_hdr = PaxosHeader {
                    msgtype: PAXOS_ACCEPT,
                    inst: action.iid,
                    rnd: action.ballot,
                    vrnd: action.ballot,
                    acptid: 0,
                    value_len: value.len() as u32,
                };
                let mut payload = vec![0u8; PAXOS_HDR_SIZE + value.len()];
                out_hdr
                    .encode(&mut payload, value.as_bytes())
                    .ok_or(DropReason::MalformedFrame)?;
                let out = builder.build(ACCEPTOR_MCAST_ADDR, ACCEPTOR_PORT, &payload, tx_pool)?;
                txq.buffer(out, port, tx_pool, stats);
                Ok(Verdict::Responded)
            }
            PAXOS_ACCEPT => {
                if learner.cfg.cache_accept_values {
                    // Best effort: a full cache just skips the stash.
                    learner.cache_value(PaxosValue::new(value));
                }
                let mut out = tx_pool
                    .clone_from(rx_pool, buf)
                    .ok_or(DropReason::PoolExhausted)?;
                let iid = learner.alloc_relay_iid(stats);
                Self::retarget_to_acceptors(tx_pool, &out, iid);
                out.ol_flags = OL_IP_CKSUM | OL_UDP_CKSUM;
                txq.buffer(out, port, tx_pool, stats);
                Ok(Verdict::Relayed)
            }
            PAXOS_ACCEPTED => {
                let accepted = Accepted {
                    iid: hdr.inst,
                    ballot: hdr.rnd,
                    value_ballot: hdr.vrnd,
                    aid: hdr.acptid,
                    value: PaxosValue::new(value),
                };
                if !learner.tracker.receive_accepted(accepted) {
                    return Ok(Verdict::Ignored);
                }
                // Watermark only; no traffic goes out for ACCEPTED. A
                // replacement PREPARE after primary failure is the detector
                // action's business, not the dispatcher's.
                learner.note_accepted(hdr.inst, stats);
                Ok(Verdict::Advanced)
            }
            other => {
                stats.unhandled.fetch_add(1, Ordering::Relaxed);
                debug!(msgtype = other, "unhandled paxos message type");
                Ok(Verdict::Ignored)
            }
        }
    }

    /// Rewrite a cloned coordinator ACCEPT in place for the acceptor group:
    /// multicast L2/L3 destination, acceptor port, fresh instance id, and
    /// checksums handed back to offload.
    fn retarget_to_acceptors(tx_pool: &mut FramePool, out: &NetworkBuffer, iid: u32) {
        let frame = tx_pool.frame_mut(out);
        frame[0..6].copy_from_slice(&mcast_mac(ACCEPTOR_MCAST_ADDR));
        frame[24..26].copy_from_slice(&[0, 0]);
        frame[30..34].copy_from_slice(&ACCEPTOR_MCAST_ADDR);
        frame[36..38].copy_from_slice(&ACCEPTOR_PORT.to_be_bytes());
        frame[PAXOS_OFF + 2..PAXOS_OFF + 6].copy_from_slice(&iid.to_be_bytes());
        let src_ip = [frame[26], frame[27], frame[28], frame[29]];
        let udp_len = u16::from_be_bytes([frame[38], frame[39]]);
        let psd = udp_phdr_sum(src_ip, ACCEPTOR_MCAST_ADDR, udp_len);
        frame[40..42].copy_from_slice(&psd.to_be_bytes());
    }
}
