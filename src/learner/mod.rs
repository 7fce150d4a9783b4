// DP-LEARNER: LEARNER ROLE
// The protocol half of the node: per-process state, the quorum tracker seam
// and the per-frame dispatch logic driven by the hot loop.

pub mod context;
pub mod dispatch;
pub mod tracker;
