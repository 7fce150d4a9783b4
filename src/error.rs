// DP-LEARNER: ERROR TAXONOMY
// Two tiers, matching the propagation policy: SetupError escalates out of
// main and kills the process; DropReason is counted on the data path and
// never propagates further. Transport-level loss is masked by the consensus
// protocol's own retry semantics one layer up, not here.

use thiserror::Error;

/// Startup-time failures. Fatal.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("cannot create frame pool `{name}` ({nb_frames} frames)")]
    PoolCreate { name: &'static str, nb_frames: u32 },

    #[error("cannot open raw socket on `{iface}`: {source}")]
    RawSocket {
        iface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot spawn `{name}` thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Steady-state reasons a packet is dropped. Local, counted, non-fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DropReason {
    /// Wrong transport stack or port. Silent by design.
    #[error("malformed frame")]
    MalformedFrame,

    /// Mid-run buffer clone/enqueue failure.
    #[error("tx pool exhausted")]
    PoolExhausted,

    /// Piggyback fallback against an empty pending-value cache. Fails
    /// closed: no response is emitted.
    #[error("pending value cache empty")]
    CacheUnderflow,

    /// Destination IPv4 address missing from the resolution table. The
    /// packet is dropped rather than sent with an undefined MAC.
    #[error("no MAC entry for destination")]
    PeerUnresolved,
}
