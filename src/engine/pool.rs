// DP-LEARNER: FRAME POOL
// Fixed-slot packet buffer pool over one contiguous allocation, with a LIFO
// free list. NetworkBuffer is a move-only handle into a slot: it is
// transferred between stages, never copied, and must be returned to its pool
// or cloned into another pool. Ownership makes use-after-release impossible
// without unsafe code.
//
// The RX path and the TX path each own a separate pool; sent buffers are
// freed back into the TX pool only, so the two allocators never race.

use crate::error::SetupError;

/// Per-slot capacity. Comfortably above a 1500B MTU frame.
pub const FRAME_CAP: usize = 2048;

// TX offload flags carried on a buffer. The NIC computes the checksums the
// builder left blank; the UDP one still needs the pseudo-header partial sum
// pre-filled in the header.
pub const OL_IP_CKSUM: u8 = 0x01;
pub const OL_UDP_CKSUM: u8 = 0x02;

/// Move-only handle to one pool slot. `len` is the valid byte count within
/// the slot; `ol_flags` carries checksum-offload requests for TX buffers;
/// `tunneled` is RX metadata set by the port when the NIC flagged the frame
/// as tunnel-encapsulated.
#[derive(Debug)]
pub struct NetworkBuffer {
    slot: u32,
    len: u32,
    pub ol_flags: u8,
    pub tunneled: bool,
}

impl NetworkBuffer {
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the valid length. Capped at slot capacity.
    #[inline(always)]
    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= FRAME_CAP);
        self.len = len.min(FRAME_CAP) as u32;
    }
}

pub struct FramePool {
    name: &'static str,
    mem: Box<[u8]>,
    free: Vec<u32>,
    nb_frames: u32,
}

impl FramePool {
    /// Allocate the pool backing store. Failure here is fatal to the process;
    /// mid-run exhaustion is not (alloc returns None and the caller counts a
    /// drop).
    pub fn create(name: &'static str, nb_frames: u32) -> Result<FramePool, SetupError> {
        if nb_frames == 0 {
            return Err(SetupError::PoolCreate { name, nb_frames });
        }
        let bytes = (nb_frames as usize).checked_mul(FRAME_CAP)
            .ok_or(SetupError::PoolCreate { name, nb_frames })?;
        let mem = vec![0u8; bytes].into_boxed_slice();
        // LIFO free list: slot 0 on top so tests and traces are predictable.
        let free: Vec<u32> = (0..nb_frames).rev().collect();
        Ok(FramePool { name, mem, free, nb_frames })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of slots currently available.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.nb_frames as usize
    }

    #[inline(always)]
    pub fn alloc(&mut self) -> Option<NetworkBuffer> {
        let slot = self.free.pop()?;
        Some(NetworkBuffer { slot, len: 0, ol_flags: 0, tunneled: false })
    }

    /// Allocate `n` buffers or none at all.
    pub fn alloc_bulk(&mut self, n: usize, out: &mut Vec<NetworkBuffer>) -> bool {
        if self.free.len() < n {
            return false;
        }
        for _ in 0..n {
            // Free list length was just checked.
            if let Some(buf) = self.alloc() {
                out.push(buf);
            }
        }
        true
    }

    /// Return a buffer to this pool. Consumes the handle; the slot contents
    /// are dead after this point.
    #[inline(always)]
    pub fn free(&mut self, buf: NetworkBuffer) {
        debug_assert!(buf.slot < self.nb_frames, "{}: foreign buffer freed", self.name);
        debug_assert!(!self.free.contains(&buf.slot), "{}: double free", self.name);
        self.free.push(buf.slot);
    }

    /// Valid bytes of a buffer.
    #[inline(always)]
    pub fn frame<'a>(&'a self, buf: &NetworkBuffer) -> &'a [u8] {
        let base = buf.slot as usize * FRAME_CAP;
        &self.mem[base..base + buf.len as usize]
    }

    /// Full slot capacity, writable. Callers set the valid length on the
    /// handle after writing.
    #[inline(always)]
    pub fn frame_mut<'a>(&'a mut self, buf: &NetworkBuffer) -> &'a mut [u8] {
        let base = buf.slot as usize * FRAME_CAP;
        &mut self.mem[base..base + FRAME_CAP]
    }

    /// Copy a frame owned by `src_pool` into a fresh buffer from this pool.
    /// The relay path uses this: the inbound buffer stays with the receive
    /// path, the clone joins the transmit path. None on exhaustion.
    pub fn clone_from(&mut self, src_pool: &FramePool, src: &NetworkBuffer) -> Option<NetworkBuffer> {
        let mut dst = self.alloc()?;
        dst.len = src.len;
        dst.ol_flags = src.ol_flags;
        let src_bytes = src_pool.frame(src);
        let base = dst.slot as usize * FRAME_CAP;
        self.mem[base..base + src_bytes.len()].copy_from_slice(src_bytes);
        Some(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_cycle() {
        let mut pool = FramePool::create("t", 4).unwrap();
        assert_eq!(pool.available(), 4);
        let mut a = pool.alloc().unwrap();
        pool.frame_mut(&a)[..3].copy_from_slice(&[1, 2, 3]);
        a.set_len(3);
        assert_eq!(pool.frame(&a), &[1, 2, 3]);
        pool.free(a);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut pool = FramePool::create("t", 2).unwrap();
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert!(pool.alloc().is_none());
        pool.free(a);
        assert!(pool.alloc().is_some());
        pool.free(b);
    }

    #[test]
    fn bulk_is_all_or_nothing() {
        let mut pool = FramePool::create("t", 3).unwrap();
        let mut out = Vec::new();
        assert!(!pool.alloc_bulk(4, &mut out));
        assert!(out.is_empty());
        assert!(pool.alloc_bulk(3, &mut out));
        assert_eq!(out.len(), 3);
        for b in out {
            pool.free(b);
        }
    }

    #[test]
    fn clone_crosses_pools() {
        let mut rx = FramePool::create("rx", 2).unwrap();
        let mut tx = FramePool::create("tx", 2).unwrap();
        let mut src = rx.alloc().unwrap();
        rx.frame_mut(&src)[..4].copy_from_slice(&[9, 8, 7, 6]);
        src.set_len(4);
        let cloned = tx.clone_from(&rx, &src).unwrap();
        assert_eq!(tx.frame(&cloned), &[9, 8, 7, 6]);
        // Inbound buffer still valid and owned by the receive path.
        assert_eq!(rx.frame(&src), &[9, 8, 7, 6]);
        rx.free(src);
        tx.free(cloned);
    }

    #[test]
    fn zero_slot_pool_is_a_setup_error() {
        assert!(FramePool::create("t", 0).is_err());
    }
}
