// DP-LEARNER: OUTGOING FRAME BUILDER
// Materializes Ethernet + IPv4 + UDP headers around a payload, straight into
// a TX-pool slot. Checksums are left to hardware offload: the IPv4 checksum
// field is zeroed with the offload flag set, and the UDP checksum field is
// pre-seeded with the pseudo-header partial sum the offload engine expects.
// Ports without real offload call finalize_checksums() before the wire.

use tracing::warn;

use crate::engine::clock::read_tsc;
use crate::engine::pool::{FramePool, NetworkBuffer, FRAME_CAP, OL_IP_CKSUM, OL_UDP_CKSUM};
use crate::error::DropReason;
use crate::protocol::peer::PeerMap;
use crate::protocol::wire::{
    mcast_mac, ETHERTYPE_IPV4, ETH_HDR_SIZE, IPPROTO_UDP, IPV4_DF_FLAG, IP_HDR_SIZE, UDP_HDR_SIZE,
};

pub const RAW_HDR_LEN: usize = ETH_HDR_SIZE + IP_HDR_SIZE + UDP_HDR_SIZE; // 42

pub struct FrameBuilder {
    src_mac: [u8; 6],
    src_ip: [u8; 4],
    src_port: u16,
    peers: PeerMap,
    ip_id: u16,
}

impl FrameBuilder {
    /// `peers` is the immutable resolution table for unicast destinations.
    /// The IPv4 identifier sequence is seeded from the free-running cycle
    /// counter; with DF set, uniqueness across restarts is not load-bearing.
    pub fn new(src_mac: [u8; 6], src_ip: [u8; 4], src_port: u16, peers: PeerMap) -> Self {
        FrameBuilder {
            src_mac,
            src_ip,
            src_port,
            peers,
            ip_id: read_tsc() as u16,
        }
    }

    fn resolve_dst_mac(&self, dst_ip: [u8; 4]) -> Result<[u8; 6], DropReason> {
        if dst_ip[0] & 0xF0 == 0xE0 {
            // Multicast group: MAC is arithmetic, no table involved.
            return Ok(mcast_mac(dst_ip));
        }
        self.peers.resolve(dst_ip).ok_or_else(|| {
            warn!(
                dst = %format_args!("{}.{}.{}.{}", dst_ip[0], dst_ip[1], dst_ip[2], dst_ip[3]),
                "no MAC entry for destination, dropping"
            );
            DropReason::PeerUnresolved
        })
    }

    /// Build a complete frame carrying `payload` to `dst_ip:dst_port` in a
    /// buffer from `pool`. Precondition, not a runtime check: the payload
    /// fits one frame (client commands are capped well under MTU).
    pub fn build(
        &mut self,
        dst_ip: [u8; 4],
        dst_port: u16,
        payload: &[u8],
        pool: &mut FramePool,
    ) -> Result<NetworkBuffer, DropReason> {
        let dst_mac = self.resolve_dst_mac(dst_ip)?;
        let udp_len = UDP_HDR_SIZE + payload.len();
        let ip_total_len = IP_HDR_SIZE + udp_len;
        let frame_len = ETH_HDR_SIZE + ip_total_len;
        debug_assert!(frame_len <= FRAME_CAP, "payload exceeds frame budget");

        let mut out = pool.alloc().ok_or(DropReason::PoolExhausted)?;
        self.ip_id = self.ip_id.wrapping_add(1);
        let ip_id = self.ip_id;

        let buf = pool.frame_mut(&out);

        buf[0..6].copy_from_slice(&dst_mac);
        buf[6..12].copy_from_slice(&self.src_mac);
        buf[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

        let ip = &mut buf[14..34];
        ip[0] = 0x45; // version 4, IHL 5
        ip[1] = 0x00;
        ip[2..4].copy_from_slice(&(ip_total_len as u16).to_be_bytes());
        ip[4..6].copy_from_slice(&ip_id.to_be_bytes());
        ip[6..8].copy_from_slice(&IPV4_DF_FLAG.to_be_bytes());
        ip[8] = 64; // TTL
        ip[9] = IPPROTO_UDP;
        ip[10..12].copy_from_slice(&[0, 0]); // checksum: hardware
        ip[12..16].copy_from_slice(&self.src_ip);
        ip[16..20].copy_from_slice(&dst_ip);

        let udp = &mut buf[34..42];
        udp[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        udp[2..4].copy_from_slice(&dst_port.to_be_bytes());
        udp[4..6].copy_from_slice(&(udp_len as u16).to_be_bytes());
        // Pseudo-header partial sum for the checksum offload engine.
        let psd = udp_phdr_sum(self.src_ip, dst_ip, udp_len as u16);
        udp[6..8].copy_from_slice(&psd.to_be_bytes());

        buf[RAW_HDR_LEN..RAW_HDR_LEN + payload.len()].copy_from_slice(payload);

        out.set_len(frame_len);
        out.ol_flags = OL_IP_CKSUM | OL_UDP_CKSUM;
        Ok(out)
    }
}

// ============================================================================
// CHECKSUMS
// ============================================================================

/// RFC 1071: Internet checksum over `data` with the checksum field zeroed.
#[inline]
pub fn ip_checksum(data: &[u8]) -> u16 {
    !fold_sum(sum_bytes(0, data))
}

/// UDP pseudo-header partial sum (src, dst, protocol, UDP length), folded but
/// not complemented. This is what checksum-offload hardware wants pre-filled
/// in the UDP checksum field.
pub fn udp_phdr_sum(src_ip: [u8; 4], dst_ip: [u8; 4], udp_len: u16) -> u16 {
    let mut sum: u32 = 0;
    sum += u16::from_be_bytes([src_ip[0], src_ip[1]]) as u32;
    sum += u16::from_be_bytes([src_ip[2], src_ip[3]]) as u32;
    sum += u16::from_be_bytes([dst_ip[0], dst_ip[1]]) as u32;
    sum += u16::from_be_bytes([dst_ip[2], dst_ip[3]]) as u32;
    sum += IPPROTO_UDP as u32;
    sum += udp_len as u32;
    fold_sum(sum)
}

#[inline]
fn sum_bytes(mut sum: u32, data: &[u8]) -> u32 {
    let mut i = 0;
    while i + 1 < data.len() {
        sum += u16::from_be_bytes([data[i], data[i + 1]]) as u32;
        i += 2;
    }
    if i < data.len() {
        sum += (data[i] as u32) << 8;
    }
    sum
}

#[inline]
fn fold_sum(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// Software completion of the checksums a real NIC would offload. Ports
/// without hardware offload run this on each frame before transmit.
pub fn finalize_checksums(frame: &mut [u8]) {
    if frame.len() < RAW_HDR_LEN {
        return;
    }
    // IPv4 header checksum.
    frame[24] = 0;
    frame[25] = 0;
    let cksum = ip_checksum(&frame[14..34]);
    frame[24..26].copy_from_slice(&cksum.to_be_bytes());

    // Full UDP checksum: pseudo header + UDP segment.
    let src_ip = [frame[26], frame[27], frame[28], frame[29]];
    let dst_ip = [frame[30], frame[31], frame[32], frame[33]];
    let udp_len = u16::from_be_bytes([frame[38], frame[39]]);
    let seg_end = (34 + udp_len as usize).min(frame.len());
    frame[40] = 0;
    frame[41] = 0;
    let mut sum = udp_phdr_sum(src_ip, dst_ip, udp_len) as u32;
    sum = sum_bytes(sum, &frame[34..seg_end]);
    let mut cksum = !fold_sum(sum);
    if cksum == 0 {
        cksum = 0xFFFF; // RFC 768: zero means "no checksum"
    }
    frame[40..42].copy_from_slice(&cksum.to_be_bytes());
}

/// Read the hardware MAC address of a network interface from sysfs. Returns
/// a locally-administered fallback if sysfs is unavailable.
pub fn detect_mac(if_name: &str) -> [u8; 6] {
    let path = format!("/sys/class/net/{}/address", if_name);
    if let Ok(contents) = std::fs::read_to_string(&path) {
        let parts: Vec<u8> = contents
            .trim()
            .split(':')
            .filter_map(|h| u8::from_str_radix(h, 16).ok())
            .collect();
        if parts.len() == 6 {
            return [parts[0], parts[1], parts[2], parts[3], parts[4], parts[5]];
        }
    }
    warn!(%path, "could not read interface MAC from sysfs, using LAA fallback");
    [0x02, 0x00, 0x00, 0x00, 0x00, 0x01]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::peer::{PeerEntry, PeerMap};

    fn builder() -> FrameBuilder {
        let peers = PeerMap::new(vec![PeerEntry {
            ip: [192, 168, 4, 95],
            mac: [0x0c, 0xc4, 0x7a, 0xa3, 0x25, 0xd0],
        }]);
        FrameBuilder::new([0x02, 0, 0, 0, 0, 1], [192, 168, 4, 198], 34952, peers)
    }

    #[test]
    fn unresolved_destination_is_dropped_not_sent() {
        let mut pool = FramePool::create("tx", 4).unwrap();
        let mut b = builder();
        let err = b.build([10, 9, 9, 9], 9000, b"x", &mut pool).unwrap_err();
        assert_eq!(err, DropReason::PeerUnresolved);
        // No buffer leaked.
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn build_fills_every_header_field() {
        let mut pool = FramePool::create("tx", 4).unwrap();
        let mut b = builder();
        let payload = [0xAAu8; 10];
        let buf = b.build([192, 168, 4, 95], 34951, &payload, &mut pool).unwrap();
        assert_eq!(buf.len(), RAW_HDR_LEN + 10);
        assert_eq!(buf.ol_flags, OL_IP_CKSUM | OL_UDP_CKSUM);

        let f = pool.frame(&buf).to_vec();
        assert_eq!(&f[0..6], &[0x0c, 0xc4, 0x7a, 0xa3, 0x25, 0xd0]); // dst MAC
        assert_eq!(&f[6..12], &[0x02, 0, 0, 0, 0, 1]); // src MAC
        assert_eq!(u16::from_be_bytes([f[12], f[13]]), ETHERTYPE_IPV4);
        assert_eq!(f[14], 0x45);
        assert_eq!(u16::from_be_bytes([f[16], f[17]]), (IP_HDR_SIZE + UDP_HDR_SIZE + 10) as u16);
        assert_eq!(u16::from_be_bytes([f[20], f[21]]), IPV4_DF_FLAG);
        assert_eq!(f[22], 64); // TTL
        assert_eq!(f[23], IPPROTO_UDP);
        assert_eq!(&f[24..26], &[0, 0]); // checksum left to offload
        assert_eq!(&f[26..30], &[192, 168, 4, 198]);
        assert_eq!(&f[30..34], &[192, 168, 4, 95]);
        assert_eq!(u16::from_be_bytes([f[34], f[35]]), 34952);
        assert_eq!(u16::from_be_bytes([f[36], f[37]]), 34951);
        assert_eq!(u16::from_be_bytes([f[38], f[39]]), (UDP_HDR_SIZE + 10) as u16);
        let psd = udp_phdr_sum([192, 168, 4, 198], [192, 168, 4, 95], (UDP_HDR_SIZE + 10) as u16);
        assert_eq!(u16::from_be_bytes([f[40], f[41]]), psd);
        assert_eq!(&f[RAW_HDR_LEN..], &payload[..]);
        pool.free(buf);
    }

    #[test]
    fn multicast_destination_bypasses_peer_table() {
        let mut pool = FramePool::create("tx", 4).unwrap();
        let mut b = builder();
        let buf = b.build([224, 3, 29, 73], 34951, b"v", &mut pool).unwrap();
        let f = pool.frame(&buf).to_vec();
        assert_eq!(&f[0..6], &[0x01, 0x00, 0x5e, 0x03, 0x1d, 0x49]);
        pool.free(buf);
    }

    #[test]
    fn ip_ids_advance_per_frame() {
        let mut pool = FramePool::create("tx", 4).unwrap();
        let mut b = builder();
        let a = b.build([192, 168, 4, 95], 1, b"", &mut pool).unwrap();
        let c = b.build([192, 168, 4, 95], 1, b"", &mut pool).unwrap();
        let id_a = u16::from_be_bytes([pool.frame(&a)[18], pool.frame(&a)[19]]);
        let id_c = u16::from_be_bytes([pool.frame(&c)[18], pool.frame(&c)[19]]);
        assert_eq!(id_c, id_a.wrapping_add(1));
        pool.free(a);
        pool.free(c);
    }

    #[test]
    fn finalized_ip_checksum_verifies() {
        let mut pool = FramePool::create("tx", 4).unwrap();
        let mut b = builder();
        let buf = b.build([192, 168, 4, 95], 34951, b"payload", &mut pool).unwrap();
        let mut f = pool.frame(&buf).to_vec();
        finalize_checksums(&mut f);
        // Recomputing over the filled-in header must yield zero complement.
        let mut sum = 0u32;
        let mut i = 14;
        while i < 34 {
            sum += u16::from_be_bytes([f[i], f[i + 1]]) as u32;
            i += 2;
        }
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        assert_eq!(sum, 0xFFFF);
        assert_ne!(u16::from_be_bytes([f[40], f[41]]), 0);
        pool.free(buf);
    }
}
