// DP-LEARNER: PEER RESOLUTION
// Immutable IPv4 -> MAC table for the small set of known unicast peers
// (clients, acceptor hosts). Built once from configuration at startup and
// injected into the frame builder; never mutated afterwards. Multicast
// destinations never consult this table, their MAC is derived arithmetically.

/// One static resolution entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerEntry {
    pub ip: [u8; 4],
    pub mac: [u8; 6],
}

/// Flat immutable table. The peer set is a handful of hosts, so a linear
/// scan beats any hashing at this scale and keeps the hot path branch-cheap.
#[derive(Debug, Clone, Default)]
pub struct PeerMap {
    entries: Vec<PeerEntry>,
}

impl PeerMap {
    pub fn new(entries: Vec<PeerEntry>) -> Self {
        // Last entry wins for duplicate IPs.
        let mut merged: Vec<PeerEntry> = Vec::with_capacity(entries.len());
        for e in entries {
            match merged.iter_mut().find(|m| m.ip == e.ip) {
                Some(m) => m.mac = e.mac,
                None => merged.push(e),
            }
        }
        PeerMap { entries: merged }
    }

    pub fn resolve(&self, ip: [u8; 4]) -> Option<[u8; 6]> {
        self.entries.iter().find(|e| e.ip == ip).map(|e| e.mac)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse a `a.b.c.d=aa:bb:cc:dd:ee:ff` config entry.
pub fn parse_peer_entry(s: &str) -> Result<PeerEntry, String> {
    let (ip_s, mac_s) = s
        .split_once('=')
        .ok_or_else(|| format!("peer entry `{}` missing `=`", s))?;
    let ip_parts: Vec<u8> = ip_s
        .split('.')
        .filter_map(|o| o.parse::<u8>().ok())
        .collect();
    let mac_parts: Vec<u8> = mac_s
        .split(':')
        .filter_map(|h| u8::from_str_radix(h, 16).ok())
        .collect();
    if ip_parts.len() != 4 || mac_parts.len() != 6 {
        return Err(format!("peer entry `{}` is not ip=mac", s));
    }
    Ok(PeerEntry {
        ip: [ip_parts[0], ip_parts[1], ip_parts[2], ip_parts[3]],
        mac: [
            mac_parts[0], mac_parts[1], mac_parts[2], mac_parts[3], mac_parts[4], mac_parts[5],
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_hits_and_misses() {
        let map = PeerMap::new(vec![
            PeerEntry { ip: [192, 168, 4, 95], mac: [0x0c, 0xc4, 0x7a, 0xa3, 0x25, 0xd0] },
            PeerEntry { ip: [192, 168, 4, 96], mac: [0x0c, 0xc4, 0x7a, 0xa3, 0x25, 0xc8] },
        ]);
        assert_eq!(
            map.resolve([192, 168, 4, 96]),
            Some([0x0c, 0xc4, 0x7a, 0xa3, 0x25, 0xc8])
        );
        assert_eq!(map.resolve([192, 168, 4, 99]), None);
    }

    #[test]
    fn last_duplicate_wins() {
        let map = PeerMap::new(vec![
            PeerEntry { ip: [10, 0, 0, 1], mac: [1; 6] },
            PeerEntry { ip: [10, 0, 0, 1], mac: [2; 6] },
        ]);
        assert_eq!(map.len(), 1);
        assert_eq!(map.resolve([10, 0, 0, 1]), Some([2; 6]));
    }

    #[test]
    fn parse_entry() {
        let e = parse_peer_entry("192.168.4.95=0c:c4:7a:a3:25:d0").unwrap();
        assert_eq!(e.ip, [192, 168, 4, 95]);
        assert_eq!(e.mac, [0x0c, 0xc4, 0x7a, 0xa3, 0x25, 0xd0]);
        assert!(parse_peer_entry("not-an-entry").is_err());
        assert!(parse_peer_entry("1.2.3=aa:bb:cc:dd:ee:ff").is_err());
    }
}
