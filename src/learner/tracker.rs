// DP-LEARNER: QUORUM TRACKER SEAM
// The Paxos safety bookkeeping (majority counting, value selection) is an
// external concern behind the QuorumTracker trait; the data plane feeds it
// evidence and acts on its verdicts without ever looking inside. Exactly one
// tracker instance exists per process, owned by the hot loop's context and
// dropped last during teardown.

use std::collections::HashMap;

/// Opaque value blob. Ownership is transferred into the tracker or retained
/// in the pending cache; dropping the handle releases it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaxosValue(Vec<u8>);

impl PaxosValue {
    pub fn new(bytes: &[u8]) -> Self {
        PaxosValue(bytes.to_vec())
    }

    pub fn empty() -> Self {
        PaxosValue(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for PaxosValue {
    fn default() -> Self {
        PaxosValue::empty()
    }
}

/// Evidence from a PROMISE message.
#[derive(Debug, Clone)]
pub struct Promise {
    pub iid: u32,
    pub ballot: u16,
    pub value_ballot: u16,
    pub aid: u16,
    pub value: PaxosValue,
}

/// Evidence from an ACCEPTED message.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub iid: u32,
    pub ballot: u16,
    pub value_ballot: u16,
    pub aid: u16,
    pub value: PaxosValue,
}

/// Tracker verdict on a promise quorum: build and send this ACCEPT. An empty
/// value asks the dispatcher to piggyback a pending client value.
#[derive(Debug, Clone)]
pub struct AcceptAction {
    pub iid: u32,
    pub ballot: u16,
    pub value: PaxosValue,
}

/// External collaborator contract. `receive_promise` returning Some means a
/// response is warranted; None covers duplicate, stale and rejected evidence
/// alike and callers drop silently. Same convention for `receive_accepted`.
pub trait QuorumTracker {
    /// Reset the tracker's instance-id base. Called once at startup.
    fn set_instance_id(&mut self, iid: u32);
    fn receive_promise(&mut self, promise: Promise) -> Option<AcceptAction>;
    fn receive_accepted(&mut self, accepted: Accepted) -> bool;
}

// ============================================================================
// BUNDLED TRACKER
// ============================================================================
// Minimal majority tracker so the node runs standalone. Counts distinct
// acceptors per instance against a simple majority and prefers the value
// carried at the highest value-ballot. Deployments with a full consensus
// library plug it in through the trait instead.

#[derive(Debug, Default)]
struct InstanceState {
    promise_voters: u64,
    accepted_voters: u64,
    value_ballot: u16,
    value: PaxosValue,
    responded: bool,
}

pub struct MajorityTracker {
    nb_acceptors: usize,
    base_iid: u32,
    instances: HashMap<u32, InstanceState>,
}

impl MajorityTracker {
    pub fn new(nb_acceptors: usize) -> Self {
        MajorityTracker {
            nb_acceptors,
            base_iid: 0,
            instances: HashMap::new(),
        }
    }

    fn majority(&self) -> u32 {
        (self.nb_acceptors as u32 / 2) + 1
    }
}

impl QuorumTracker for MajorityTracker {
    fn set_instance_id(&mut self, iid: u32) {
        self.base_iid = iid;
        self.instances.clear();
    }

    fn receive_promise(&mut self, promise: Promise) -> Option<AcceptAction> {
        if promise.iid < self.base_iid || promise.aid as usize >= 64 {
            return None;
        }
        let majority = self.majority();
        let st = self.instances.entry(promise.iid).or_default();
        let bit = 1u64 << promise.aid;
        if st.promise_voters & bit != 0 {
            return None; // duplicate acceptor
        }
        st.promise_voters |= bit;
        if !promise.value.is_empty() && promise.value_ballot >= st.value_ballot {
            st.value_ballot = promise.value_ballot;
            st.value = promise.value;
        }
        if st.responded || st.promise_voters.count_ones() < majority {
            return None;
        }
        st.responded = true;
        Some(AcceptAction {
            iid: promise.iid,
            ballot: promise.ballot,
            value: std::mem::take(&mut st.value),
        })
    }

    fn receive_accepted(&mut self, accepted: Accepted) -> bool {
        if accepted.iid < self.base_iid || accepted.aid as usize >= 64 {
            return false;
        }
        let st = self.instances.entry(accepted.iid).or_default();
        let bit = 1u64 << accepted.aid;
        if st.accepted_voters & bit != 0 {
            return false; // duplicate
        }
        st.accepted_voters |= bit;
        true
    }
}
