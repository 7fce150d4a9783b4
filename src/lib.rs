// DP-LEARNER: CRATE ROOT
//
// Data-plane Paxos learner. One busy-polling core classifies raw
// Ethernet/IPv4/UDP frames, feeds promise and accepted evidence to a
// pluggable quorum tracker, relays coordinator ACCEPTs to the acceptor
// multicast group and delivers decided commands back to clients. Cold cores
// run the interval stats reporter and the one-shot primary failure detector
// against lock-free shared counters.
//
// Layering, bottom up:
//
//   protocol  wire formats, peer resolution table
//   engine    frame pools, TX staging, TSC clock, timer tasks
//   net       outgoing frame construction, checksum handling
//   learner   process state, quorum tracker seam, dispatch
//
// The binary in main.rs owns the port, the cores and the wiring.

pub mod engine;
pub mod error;
pub mod learner;
pub mod net;
pub mod protocol;
