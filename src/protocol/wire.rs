// DP-LEARNER: WIRE PROTOCOL
// Canonical definitions for the on-wire format carried to/from acceptors.
// All header structs are #[repr(C, packed)] for zero-copy overlay onto frame
// memory; every multi-byte field is big-endian on the wire and converted
// explicitly on read/write. No pointer casts, all access bounds-checked.

use std::mem;

use bytemuck::{Pod, Zeroable};

// ============================================================================
// WIRE CONSTANTS
// ============================================================================

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const IPPROTO_UDP: u8 = 17;

/// Learner and acceptor intentionally share one port namespace: coordinator
/// and acceptor traffic arrives on either port and both are accepted by the
/// classifier. Documented quirk of the deployment, not a bug.
pub const LEARNER_PORT: u16 = 34952;
pub const ACCEPTOR_PORT: u16 = 34951;

/// IPv4 multicast group all acceptors subscribe to. ACCEPT relays go here.
pub const ACCEPTOR_MCAST_ADDR: [u8; 4] = [224, 3, 29, 73];

// Paxos message types (libpaxos enumeration order).
pub const PAXOS_PREPARE: u16 = 0;
pub const PAXOS_PROMISE: u16 = 1;
pub const PAXOS_ACCEPT: u16 = 2;
pub const PAXOS_ACCEPTED: u16 = 3;

// ============================================================================
// WIRE HEADERS
// ============================================================================

/// IEEE 802.3 Ethernet header. 14 bytes: dst(6) + src(6) + ethertype(2 BE).
#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct EthernetHeader {
    pub dst: [u8; 6],
    pub src: [u8; 6],
    pub ethertype: u16,
}

/// IPv4 header, no options. 20 bytes. All u16/u32 fields big-endian.
#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct Ipv4Header {
    pub version_ihl: u8,
    pub dscp_ecn: u8,
    pub total_len: u16,
    pub ident: u16,
    pub frag_off: u16,
    pub ttl: u8,
    pub proto: u8,
    pub checksum: u16,
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

/// UDP header. 8 bytes. All fields big-endian.
#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub len: u16,
    pub checksum: u16,
}

/// Fixed part of the Paxos header, 16 bytes, followed on the wire by
/// `value_len` bytes of opaque value. All fields big-endian.
#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct PaxosHeaderRaw {
    pub msgtype: u16,
    pub inst: u32,
    pub rnd: u16,
    pub vrnd: u16,
    pub acptid: u16,
    pub value_len: u32,
}

pub const ETH_HDR_SIZE: usize = mem::size_of::<EthernetHeader>();
pub const IP_HDR_SIZE: usize = mem::size_of::<Ipv4Header>();
pub const UDP_HDR_SIZE: usize = mem::size_of::<UdpHeader>();
pub const PAXOS_HDR_SIZE: usize = mem::size_of::<PaxosHeaderRaw>();

/// Byte offset of the Paxos header within a frame (ETH + IP + UDP).
pub const PAXOS_OFF: usize = ETH_HDR_SIZE + IP_HDR_SIZE + UDP_HDR_SIZE;

const _: () = assert!(ETH_HDR_SIZE == 14);
const _: () = assert!(IP_HDR_SIZE == 20);
const _: () = assert!(UDP_HDR_SIZE == 8);
const _: () = assert!(PAXOS_HDR_SIZE == 16);

// IPv4 header flag bits (within frag_off, host order before conversion).
pub const IPV4_DF_FLAG: u16 = 0x4000;

// ============================================================================
// PAXOS HEADER CODEC
// ============================================================================

/// Host-order view of a Paxos header. The wire stores every field big-endian;
/// `decode`/`encode` do the conversion at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaxosHeader {
    pub msgtype: u16,
    pub inst: u32,
    pub rnd: u16,
    pub vrnd: u16,
    pub acptid: u16,
    pub value_len: u32,
}

impl PaxosHeader {
    /// Decode the header at the start of `bytes` and return it together with
    /// the inline value slice. None if the buffer is too short for the fixed
    /// header or the declared value length.
    pub fn decode(bytes: &[u8]) -> Option<(PaxosHeader, &[u8])> {
        if bytes.len() < PAXOS_HDR_SIZE {
            return None;
        }
        let raw: &PaxosHeaderRaw = bytemuck::from_bytes(&bytes[..PAXOS_HDR_SIZE]);
        let hdr = PaxosHeader {
            msgtype: u16::from_be(raw.msgtype),
            inst: u32::from_be(raw.inst),
            rnd: u16::from_be(raw.rnd),
            vrnd: u16::from_be(raw.vrnd),
            acptid: u16::from_be(raw.acptid),
            value_len: u32::from_be(raw.value_len),
        };
        let end = PAXOS_HDR_SIZE.checked_add(hdr.value_len as usize)?;
        if bytes.len() < end {
            return None;
        }
        Some((hdr, &bytes[PAXOS_HDR_SIZE..end]))
    }

    /// Encode this header plus `value` into `buf`. The `value_len` field is
    /// taken from the value slice, not from `self`. Returns the number of
    /// bytes written, or None if `buf` is too small.
    pub fn encode(&self, buf: &mut [u8], value: &[u8]) -> Option<usize> {
        let total = PAXOS_HDR_SIZE + value.len();
        if buf.len() < total {
            return None;
        }
        let raw = PaxosHeaderRaw {
            msgtype: self.msgtype.to_be(),
            inst: self.inst.to_be(),
            rnd: self.rnd.to_be(),
            vrnd: self.vrnd.to_be(),
            acptid: self.acptid.to_be(),
            value_len: (value.len() as u32).to_be(),
        };
        buf[..PAXOS_HDR_SIZE].copy_from_slice(bytemuck::bytes_of(&raw));
        buf[PAXOS_HDR_SIZE..total].copy_from_slice(value);
        Some(total)
    }
}

/// Map an IPv4 multicast group onto its Ethernet MAC: the low 23 bits of the
/// group address placed into the 01:00:5e multicast OUI prefix (RFC 1112).
pub fn mcast_mac(group: [u8; 4]) -> [u8; 6] {
    let g = u32::from_be_bytes(group) & 0x007f_ffff;
    [0x01, 0x00, 0x5e, (g >> 16) as u8, (g >> 8) as u8, g as u8]
}

/// Diagnostic side channel: hex dump of the Paxos header bytes at trace
/// level. No functional effect; compiled to nothing unless trace is enabled.
pub fn trace_hexdump(label: &str, bytes: &[u8]) {
    if !tracing::enabled!(tracing::Level::TRACE) {
        return;
    }
    let mut line = String::with_capacity(bytes.len() * 3);
    for b in bytes {
        line.push_str(&format!("{:02x} ", b));
    }
    tracing::trace!(%label, dump = %line.trim_end());
}

// ============================================================================
// CLIENT REQUEST ENVELOPE
// ============================================================================
// Payload of a decided value: u16 length | client IPv4+port | command.
// The command is {timestamp, command id, operation, 32B content}. Everything
// big-endian. Decided values are delivered back to the client that issued
// them, sharded across learners by command id.

pub const COMMAND_CONTENT_LEN: usize = 32;

/// Fixed envelope size preceding the command content: length(2) + ip(4) +
/// port(2) + ts_sec(8) + ts_nsec(4) + command_id(2) + op(1).
pub const CLIENT_REQ_FIXED: usize = 23;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Set,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub length: u16,
    pub client_ip: [u8; 4],
    pub client_port: u16,
    pub ts_sec: u64,
    pub ts_nsec: u32,
    pub command_id: u16,
    pub op: Operation,
    pub content: [u8; COMMAND_CONTENT_LEN],
}

impl ClientRequest {
    pub fn decode(bytes: &[u8]) -> Option<ClientRequest> {
        if bytes.len() < CLIENT_REQ_FIXED + COMMAND_CONTENT_LEN {
            return None;
        }
        let op = match bytes[22] {
            0 => Operation::Get,
            1 => Operation::Set,
            _ => return None,
        };
        let mut content = [0u8; COMMAND_CONTENT_LEN];
        content.copy_from_slice(&bytes[CLIENT_REQ_FIXED..CLIENT_REQ_FIXED + COMMAND_CONTENT_LEN]);
        Some(ClientRequest {
            length: u16::from_be_bytes([bytes[0], bytes[1]]),
            client_ip: [bytes[2], bytes[3], bytes[4], bytes[5]],
            client_port: u16::from_be_bytes([bytes[6], bytes[7]]),
            ts_sec: u64::from_be_bytes(bytes[8..16].try_into().ok()?),
            ts_nsec: u32::from_be_bytes(bytes[16..20].try_into().ok()?),
            command_id: u16::from_be_bytes([bytes[20], bytes[21]]),
            op,
            content,
        })
    }

    pub fn encode(&self, buf: &mut [u8]) -> Option<usize> {
        let total = CLIENT_REQ_FIXED + COMMAND_CONTENT_LEN;
        if buf.len() < total {
            return None;
        }
        buf[0..2].copy_from_slice(&self.length.to_be_bytes());
        buf[2..6].copy_from_slice(&self.client_ip);
        buf[6..8].copy_from_slice(&self.client_port.to_be_bytes());
        buf[8..16].copy_from_slice(&self.ts_sec.to_be_bytes());
        buf[16..20].copy_from_slice(&self.ts_nsec.to_be_bytes());
        buf[20..22].copy_from_slice(&self.command_id.to_be_bytes());
        buf[22] = match self.op {
            Operation::Get => 0,
            Operation::Set => 1,
        };
        buf[CLIENT_REQ_FIXED..total].copy_from_slice(&self.content);
        Some(total)
    }

    /// Command content bytes actually used, per the envelope length field.
    pub fn content_length(&self) -> u16 {
        self.length.saturating_sub((CLIENT_REQ_FIXED - 2) as u16)
    }

    /// Decided values are sharded across learners by command id; only the
    /// owning shard delivers the response to the client.
    pub fn owned_by(&self, nb_learners: usize, learner_id: usize) -> bool {
        nb_learners > 0 && (self.command_id as usize) % nb_learners == learner_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn paxos_header_decode_rejects_short_buffers() {
        assert!(PaxosHeader::decode(&[0u8; PAXOS_HDR_SIZE - 1]).is_none());
        // Declared value length exceeding the buffer is also rejected.
        let hdr = PaxosHeader {
            msgtype: PAXOS_PROMISE,
            inst: 1,
            rnd: 1,
            vrnd: 0,
            acptid: 0,
            value_len: 0,
        };
        let mut buf = [0u8; PAXOS_HDR_SIZE + 4];
        hdr.encode(&mut buf, &[1, 2, 3, 4]).unwrap();
        assert!(PaxosHeader::decode(&buf[..PAXOS_HDR_SIZE + 3]).is_none());
    }

    #[test]
    fn mcast_mac_maps_low_23_bits() {
        // 224.3.29.73 -> low 23 bits 0x031d49 under the 01:00:5e prefix.
        assert_eq!(mcast_mac([224, 3, 29, 73]), [0x01, 0x00, 0x5e, 0x03, 0x1d, 0x49]);
        // Bit 23 of the group address is masked off.
        assert_eq!(mcast_mac([239, 255, 0, 1]), [0x01, 0x00, 0x5e, 0x7f, 0x00, 0x01]);
    }

    #[test]
    fn client_request_round_trip() {
        let req = ClientRequest {
            length: 55,
            client_ip: [192, 168, 4, 98],
            client_port: 9001,
            ts_sec: 1_700_000_000,
            ts_nsec: 123_456,
            command_id: 42,
            op: Operation::Set,
            content: [7u8; COMMAND_CONTENT_LEN],
        };
        let mut buf = [0u8; 64];
        let n = req.encode(&mut buf).unwrap();
        assert_eq!(ClientRequest::decode(&buf[..n]).unwrap(), req);
    }

    #[test]
    fn client_request_sharding() {
        let mut req = ClientRequest::decode(&[0u8; 64]).unwrap();
        req.command_id = 7;
        assert!(req.owned_by(4, 3));
        assert!(!req.owned_by(4, 0));
    }

    proptest! {
        // Endian round-trip over the full legal field ranges.
        #[test]
        fn paxos_header_round_trip(
            msgtype in any::<u16>(),
            inst in any::<u32>(),
            rnd in any::<u16>(),
            vrnd in any::<u16>(),
            acptid in any::<u16>(),
            value in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let hdr = PaxosHeader {
                msgtype, inst, rnd, vrnd, acptid,
                value_len: value.len() as u32,
            };
            let mut buf = vec![0u8; PAXOS_HDR_SIZE + value.len()];
            let n = hdr.encode(&mut buf, &value).unwrap();
            prop_assert_eq!(n, PAXOS_HDR_SIZE + value.len());
            let (decoded, got_value) = PaxosHeader::decode(&buf).unwrap();
            prop_assert_eq!(decoded, hdr);
            prop_assert_eq!(got_value, &value[..]);
        }
    }
}
