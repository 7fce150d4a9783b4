// DP-LEARNER: PACKET ENGINE
// Mechanisms under the protocol logic: buffer pools, TX staging, the TSC
// fast clock and the cold-core timer tasks. Nothing in here knows what a
// Paxos message is.

pub mod clock;
pub mod pool;
pub mod timer;
pub mod txq;

/// Batch size for RX polling and TX staging. One burst is the unit of work
/// for the hot loop.
pub const BURST_SIZE: usize = 32;
