// DP-LEARNER: PROTOCOL DEFINITIONS
// On-wire formats and the static peer resolution table.

pub mod peer;
pub mod wire;
