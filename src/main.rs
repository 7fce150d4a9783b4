// DP-LEARNER: NODE BINARY
// Process wiring: CLI, logging, signal handling, core pinning, the raw
// packet port and the busy-poll hot loop. The library stays testable; every
// OS-facing piece lives here.

use std::ffi::CString;
use std::mem;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dplearner::engine::clock::{calibrate_tsc, prefetch_read_l1, rdtsc_ns};
use dplearner::engine::pool::{FramePool, NetworkBuffer};
use dplearner::engine::timer::{FailureDetector, LogFailure, StatsReporter};
use dplearner::engine::txq::{RxPort, TxBuffer, TxPort, BURST_TX_DRAIN_NS};
use dplearner::engine::BURST_SIZE;
use dplearner::error::SetupError;
use dplearner::learner::context::{LearnerConfig, LearnerContext, SharedStats};
use dplearner::learner::dispatch::DispatchCtx;
use dplearner::learner::tracker::MajorityTracker;
use dplearner::net::{detect_mac, finalize_checksums, FrameBuilder};
use dplearner::protocol::peer::{parse_peer_entry, PeerEntry, PeerMap};
use dplearner::protocol::wire::LEARNER_PORT;

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "dplearner", about = "Data-plane Paxos learner node")]
struct Args {
    /// Network interface to attach the raw packet port to.
    #[arg(short, long)]
    interface: String,

    /// Acceptor group size.
    #[arg(long, default_value_t = 3)]
    nb_acceptors: usize,

    /// Learner shard count for client delivery.
    #[arg(long, default_value_t = 1)]
    nb_learners: usize,

    /// This node's shard id, in 0..nb_learners.
    #[arg(long, default_value_t = 0)]
    learner_id: usize,

    /// Static peer MAC entry, `a.b.c.d=aa:bb:cc:dd:ee:ff`. Repeatable.
    #[arg(long = "peer", value_parser = parse_peer_entry)]
    peers: Vec<PeerEntry>,

    /// Source IPv4 address stamped on outgoing frames.
    #[arg(long, default_value = "192.168.4.198", value_parser = parse_ipv4)]
    src_ip: [u8; 4],

    /// Also stash relayed ACCEPT values in the pending cache.
    #[arg(long)]
    cache_accept_values: bool,

    /// Core for the busy-poll data loop.
    #[arg(long, default_value_t = 0)]
    data_core: usize,

    /// Core for the timer tasks.
    #[arg(long, default_value_t = 1)]
    timer_core: usize,

    /// Frames per pool (RX and TX each).
    #[arg(long, default_value_t = 2048)]
    nb_frames: u32,
}

fn parse_ipv4(s: &str) -> Result<[u8; 4], String> {
    let parts: Vec<u8> = s.split('.').filter_map(|o| o.parse::<u8>().ok()).collect();
    if parts.len() != 4 {
        return Err(format!("`{}` is not an IPv4 address", s));
    }
    Ok([parts[0], parts[1], parts[2], parts[3]])
}

// ============================================================================
// SIGNALS & CORE PINNING
// ============================================================================

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, on_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_signal as libc::sighandler_t);
    }
}

fn pin_to_core(core: usize) {
    unsafe {
        let mut set: libc::cpu_set_t = mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        if libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            warn!(core, "sched_setaffinity failed, running unpinned");
        }
    }
}

// ============================================================================
// RAW PACKET PORT
// ============================================================================

/// AF_PACKET port bound to one interface. Checksum offload is emulated in
/// software on transmit, honoring the offload flags the builder set.
struct RawSocketPort {
    fd: RawFd,
}

impl RawSocketPort {
    fn open(iface: &str) -> Result<Self, SetupError> {
        let raw_os = |iface: &str| SetupError::RawSocket {
            iface: iface.to_string(),
            source: std::io::Error::last_os_error(),
        };
        let c_iface = CString::new(iface)
            .map_err(|_| SetupError::Config(format!("bad interface name `{}`", iface)))?;
        let ifindex = unsafe { libc::if_nametoindex(c_iface.as_ptr()) };
        if ifindex == 0 {
            return Err(raw_os(iface));
        }
        let proto = (libc::ETH_P_ALL as u16).to_be() as libc::c_int;
        let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW | libc::SOCK_NONBLOCK, proto) };
        if fd < 0 {
            return Err(raw_os(iface));
        }
        let mut sll: libc::sockaddr_ll = unsafe { mem::zeroed() };
        sll.sll_family = libc::AF_PACKET as u16;
        sll.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
        sll.sll_ifindex = ifindex as libc::c_int;
        let rc = unsafe {
            libc::bind(
                fd,
                &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            let err = raw_os(iface);
            unsafe { libc::close(fd) };
            return Err(err);
        }
        info!(iface, ifindex, "raw packet port open");
        Ok(RawSocketPort { fd })
    }
}

impl Drop for RawSocketPort {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

impl RxPort for RawSocketPort {
    fn rx_burst(&mut self, pool: &mut FramePool, out: &mut Vec<NetworkBuffer>, max: usize) -> usize {
        let mut n = 0;
        while n < max {
            let Some(mut buf) = pool.alloc() else { break };
            let frame = pool.frame_mut(&buf);
            let r = unsafe {
                libc::recv(self.fd, frame.as_mut_ptr() as *mut libc::c_void, frame.len(), 0)
            };
            if r <= 0 {
                pool.free(buf);
                break;
            }
            buf.set_len(r as usize);
            // The plain socket path never reports tunnel encapsulation.
            buf.tunneled = false;
            out.push(buf);
            n += 1;
        }
        n
    }
}

impl TxPort for RawSocketPort {
    fn send_burst(&mut self, pool: &mut FramePool, bufs: &mut Vec<NetworkBuffer>) -> usize {
        let mut sent = 0;
        while sent < bufs.len() {
            if bufs[sent].ol_flags != 0 {
                let len = bufs[sent].len();
                let frame = pool.frame_mut(&bufs[sent]);
                finalize_checksums(&mut frame[..len]);
                bufs[sent].ol_flags = 0;
            }
            let data = pool.frame(&bufs[sent]);
            let r = unsafe {
                libc::send(self.fd, data.as_ptr() as *const libc::c_void, data.len(), 0)
            };
            if r < 0 {
                break;
            }
            sent += 1;
        }
        for b in bufs.drain(..sent) {
            pool.free(b);
        }
        sent
    }
}

// ============================================================================
// ENTRY POINT
// ============================================================================

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run(Args::parse()) {
        error!(%err, "startup failed");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), SetupError> {
    if args.nb_learners == 0 || args.learner_id >= args.nb_learners {
        return Err(SetupError::Config(format!(
            "learner id {} out of range for {} learners",
            args.learner_id, args.nb_learners
        )));
    }
    install_signal_handlers();

    let cal = calibrate_tsc();
    let src_mac = detect_mac(&args.interface);

    let mut rx_pool = FramePool::create("rx", args.nb_frames)?;
    let mut tx_pool = FramePool::create("tx", args.nb_frames)?;
    let mut port = RawSocketPort::open(&args.interface)?;

    let stats = Arc::new(SharedStats::new());

    let cfg = LearnerConfig {
        nb_acceptors: args.nb_acceptors,
        nb_learners: args.nb_learners,
        learner_id: args.learner_id,
        cache_accept_values: args.cache_accept_values,
    };
    let mut learner = LearnerContext::new(cfg, MajorityTracker::new(args.nb_acceptors));
    let mut builder = FrameBuilder::new(
        src_mac,
        args.src_ip,
        LEARNER_PORT,
        PeerMap::new(args.peers.clone()),
    );
    let mut txq = TxBuffer::with_burst_cap();

    let timer_core = args.timer_core;
    let reporter = {
        let stats = stats.clone();
        std::thread::Builder::new()
            .name("stats-reporter".into())
            .spawn(move || {
                pin_to_core(timer_core);
                StatsReporter::new(stats).run(&SHUTDOWN);
            })
            .map_err(|source| SetupError::ThreadSpawn { name: "stats-reporter", source })?
    };
    let detector = {
        let stats = stats.clone();
        std::thread::Builder::new()
            .name("failure-detector".into())
            .spawn(move || {
                pin_to_core(timer_core);
                FailureDetector::new(stats, LogFailure).run(&SHUTDOWN);
            })
            .map_err(|source| SetupError::ThreadSpawn { name: "failure-detector", source })?
    };

    pin_to_core(args.data_core);
    info!(
        iface = %args.interface,
        learner_id = args.learner_id,
        nb_learners = args.nb_learners,
        nb_acceptors = args.nb_acceptors,
        peers = args.peers.len(),
        "entering data loop"
    );

    let mut rx_bufs: Vec<NetworkBuffer> = Vec::with_capacity(BURST_SIZE);
    let mut prev_ns = rdtsc_ns(&cal);
    while !SHUTDOWN.load(Ordering::Relaxed) {
        let now = rdtsc_ns(&cal);
        if now.wrapping_sub(prev_ns) > BURST_TX_DRAIN_NS {
            txq.flush(&mut port, &mut tx_pool, &stats);
            prev_ns = now;
        }

        let n = port.rx_burst(&mut rx_pool, &mut rx_bufs, BURST_SIZE);
        if n == 0 {
            continue;
        }
        stats.primary_alive.store(true, Ordering::Relaxed);
        stats.rx.fetch_add(n as u32, Ordering::Relaxed);
        for buf in &rx_bufs {
            unsafe { prefetch_read_l1(rx_pool.frame(buf).as_ptr()) };
        }

        let mut ctx = DispatchCtx {
            learner: &mut learner,
            builder: &mut builder,
            rx_pool: &mut rx_pool,
            tx_pool: &mut tx_pool,
            txq: &mut txq,
            port: &mut port,
            stats: &stats,
        };
        ctx.process_burst(&mut rx_bufs);
    }

    // Drain anything still staged before the port closes.
    txq.flush(&mut port, &mut tx_pool, &stats);
    let _ = reporter.join();
    let _ = detector.join();
    info!(final_iid = learner.latest_accepted_iid, "shutdown complete");
    Ok(())
}
