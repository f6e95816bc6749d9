//! On-region layouts of descriptor headers, ring records and slots
//!
//! These bytes are read by the consumer through its own mapping, so they
//! are encoded field by field in native byte order at fixed offsets. The
//! `#[repr(C)]` structs document the layout; they are never transmuted.

use crate::error::{MemError, Result};

use super::adapter::Direction;

/// Bytes reserved for the owner name, NUL terminated
pub const OWNER_NAME_LEN: usize = 16;
/// Fixed part of a descriptor header object
pub const HEADER_LEN: usize = 32;
/// One entry of the ring offset table
pub const RING_OFFSET_LEN: usize = 8;
/// Fixed part of a ring object
pub const RING_HEADER_LEN: usize = 64;
/// One ring slot
pub const SLOT_LEN: usize = 8;

/// Ring flag: ring is the synthetic per-direction ring
pub const RING_FLAG_SYNTHETIC: u8 = 0x1;
/// Ring flag: every slot points at the reserved sentinel buffer
pub const RING_FLAG_SENTINEL_BUFS: u8 = 0x2;

/// Size of a descriptor header object with `ntot` ring offsets
pub fn header_object_size(ntot: usize) -> usize {
    HEADER_LEN + ntot * RING_OFFSET_LEN
}

/// Size of a ring object with `num_slots` slots
pub fn ring_object_size(num_slots: usize) -> usize {
    RING_HEADER_LEN + num_slots * SLOT_LEN
}

/// Descriptor header, followed in the object by `num_offsets` signed
/// 64-bit offsets (tx rings, then rx rings, synthetic ring last in each).
#[repr(C)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingSetHeader {
    /// Owner name (NUL terminated)
    pub name: [u8; OWNER_NAME_LEN],
    /// Real transmit rings
    pub num_tx_rings: u32,
    /// Real receive rings
    pub num_rx_rings: u32,
    /// Head of the extra buffer chain (0 = empty)
    pub bufs_head: u32,
    /// Entries in the ring offset table
    pub num_offsets: u32,
}

impl RingSetHeader {
    /// Build a header for `owner`
    pub fn new(owner: &str, num_tx_rings: u32, num_rx_rings: u32, num_offsets: u32) -> Self {
        let mut name = [0u8; OWNER_NAME_LEN];
        let bytes = owner.as_bytes();
        let len = bytes.len().min(OWNER_NAME_LEN - 1);
        name[..len].copy_from_slice(&bytes[..len]);

        Self {
            name,
            num_tx_rings,
            num_rx_rings,
            bufs_head: 0,
            num_offsets,
        }
    }

    /// Owner name up to the first NUL
    pub fn owner(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(OWNER_NAME_LEN);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// Encode into the start of a header object
    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        check_len(buf, HEADER_LEN, "header object")?;
        buf[..OWNER_NAME_LEN].copy_from_slice(&self.name);
        put_u32(buf, 16, self.num_tx_rings);
        put_u32(buf, 20, self.num_rx_rings);
        put_u32(buf, 24, self.bufs_head);
        put_u32(buf, 28, self.num_offsets);
        Ok(())
    }

    /// Decode from the start of a header object
    pub fn read_from(buf: &[u8]) -> Result<Self> {
        check_len(buf, HEADER_LEN, "header object")?;
        let mut name = [0u8; OWNER_NAME_LEN];
        name.copy_from_slice(&buf[..OWNER_NAME_LEN]);
        Ok(Self {
            name,
            num_tx_rings: get_u32(buf, 16),
            num_rx_rings: get_u32(buf, 20),
            bufs_head: get_u32(buf, 24),
            num_offsets: get_u32(buf, 28),
        })
    }
}

/// Store entry `i` of a header's ring offset table
pub fn write_ring_offset(buf: &mut [u8], i: usize, offset: i64) -> Result<()> {
    let at = HEADER_LEN + i * RING_OFFSET_LEN;
    check_len(buf, at + RING_OFFSET_LEN, "ring offset table")?;
    buf[at..at + RING_OFFSET_LEN].copy_from_slice(&offset.to_ne_bytes());
    Ok(())
}

/// Load entry `i` of a header's ring offset table
pub fn read_ring_offset(buf: &[u8], i: usize) -> Result<i64> {
    let at = HEADER_LEN + i * RING_OFFSET_LEN;
    check_len(buf, at + RING_OFFSET_LEN, "ring offset table")?;
    let mut raw = [0u8; RING_OFFSET_LEN];
    raw.copy_from_slice(&buf[at..at + RING_OFFSET_LEN]);
    Ok(i64::from_ne_bytes(raw))
}

/// Ring record header, followed in the object by `num_slots` slots
#[repr(C)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingHeader {
    /// Offset from the ring object to the first byte of the buffer pool
    pub buf_ofs: i64,
    /// Slots following the header
    pub num_slots: u32,
    /// Size of every buffer
    pub buf_size: u32,
    /// Ring number within its direction
    pub ring_id: u16,
    /// Direction code, see [`Direction::code`]
    pub direction: u8,
    /// `RING_FLAG_*` bits
    pub flags: u8,
    pub head: u32,
    pub cur: u32,
    pub tail: u32,
    _padding: [u8; RING_HEADER_LEN - 32],
}

impl RingHeader {
    /// Fresh ring header. Transmit rings start with every slot available,
    /// receive rings start empty.
    pub fn new(direction: Direction, ring_id: u16, num_slots: u32, buf_size: u32, buf_ofs: i64, flags: u8) -> Self {
        let tail = match direction {
            Direction::Tx => num_slots.saturating_sub(1),
            Direction::Rx => 0,
        };
        Self {
            buf_ofs,
            num_slots,
            buf_size,
            ring_id,
            direction: direction.code(),
            flags,
            head: 0,
            cur: 0,
            tail,
            _padding: [0; RING_HEADER_LEN - 32],
        }
    }

    /// Whether every slot points at the sentinel buffer
    pub fn has_sentinel_bufs(&self) -> bool {
        self.flags & RING_FLAG_SENTINEL_BUFS != 0
    }

    /// Encode into the start of a ring object
    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        check_len(buf, RING_HEADER_LEN, "ring object")?;
        buf[0..8].copy_from_slice(&self.buf_ofs.to_ne_bytes());
        put_u32(buf, 8, self.num_slots);
        put_u32(buf, 12, self.buf_size);
        buf[16..18].copy_from_slice(&self.ring_id.to_ne_bytes());
        buf[18] = self.direction;
        buf[19] = self.flags;
        put_u32(buf, 20, self.head);
        put_u32(buf, 24, self.cur);
        put_u32(buf, 28, self.tail);
        buf[32..RING_HEADER_LEN].fill(0);
        Ok(())
    }

    /// Decode from the start of a ring object
    pub fn read_from(buf: &[u8]) -> Result<Self> {
        check_len(buf, RING_HEADER_LEN, "ring object")?;
        let mut ofs = [0u8; 8];
        ofs.copy_from_slice(&buf[0..8]);
        Ok(Self {
            buf_ofs: i64::from_ne_bytes(ofs),
            num_slots: get_u32(buf, 8),
            buf_size: get_u32(buf, 12),
            ring_id: u16::from_ne_bytes([buf[16], buf[17]]),
            direction: buf[18],
            flags: buf[19],
            head: get_u32(buf, 20),
            cur: get_u32(buf, 24),
            tail: get_u32(buf, 28),
            _padding: [0; RING_HEADER_LEN - 32],
        })
    }
}

/// One ring slot
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Slot {
    /// Buffer index in the buffer pool
    pub buf_idx: u32,
    /// Bytes of payload
    pub len: u16,
    pub flags: u16,
}

impl Slot {
    /// Slot pointing at `buf_idx` with no payload
    pub fn new(buf_idx: u32) -> Self {
        Self {
            buf_idx,
            ..Default::default()
        }
    }

    /// Encode slot `i` of a ring object
    pub fn write_to(&self, ring: &mut [u8], i: usize) -> Result<()> {
        let at = RING_HEADER_LEN + i * SLOT_LEN;
        check_len(ring, at + SLOT_LEN, "ring slot")?;
        put_u32(ring, at, self.buf_idx);
        ring[at + 4..at + 6].copy_from_slice(&self.len.to_ne_bytes());
        ring[at + 6..at + 8].copy_from_slice(&self.flags.to_ne_bytes());
        Ok(())
    }

    /// Decode slot `i` of a ring object
    pub fn read_from(ring: &[u8], i: usize) -> Result<Self> {
        let at = RING_HEADER_LEN + i * SLOT_LEN;
        check_len(ring, at + SLOT_LEN, "ring slot")?;
        Ok(Self {
            buf_idx: get_u32(ring, at),
            len: u16::from_ne_bytes([ring[at + 4], ring[at + 5]]),
            flags: u16::from_ne_bytes([ring[at + 6], ring[at + 7]]),
        })
    }
}

fn check_len(buf: &[u8], needed: usize, what: &str) -> Result<()> {
    if buf.len() < needed {
        return Err(MemError::invalid_argument(
            what,
            format!("needs {} bytes, object has {}", needed, buf.len()),
        ));
    }
    Ok(())
}

pub(crate) fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_ne_bytes());
}

pub(crate) fn get_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_sizes() {
        assert_eq!(header_object_size(4), 64);
        assert_eq!(ring_object_size(512), 64 + 4096);
        assert_eq!(std::mem::size_of::<RingSetHeader>(), HEADER_LEN);
        assert_eq!(std::mem::size_of::<RingHeader>(), RING_HEADER_LEN);
        assert_eq!(std::mem::size_of::<Slot>(), SLOT_LEN);
    }

    #[test]
    fn test_header_encoding() {
        let mut buf = vec![0u8; header_object_size(4)];
        let mut header = RingSetHeader::new("a-very-long-adapter-name", 1, 1, 4);
        header.bufs_head = 77;
        header.write_to(&mut buf).unwrap();
        write_ring_offset(&mut buf, 3, -4096).unwrap();

        let back = RingSetHeader::read_from(&buf).unwrap();
        assert_eq!(back, header);
        assert_eq!(back.owner(), "a-very-long-ada");
        assert_eq!(read_ring_offset(&buf, 3).unwrap(), -4096);
        assert!(write_ring_offset(&mut buf, 4, 0).is_err());
    }

    #[test]
    fn test_ring_and_slots() {
        let mut buf = vec![0u8; ring_object_size(8)];
        let header = RingHeader::new(Direction::Tx, 2, 8, 2048, 1 << 20, RING_FLAG_SYNTHETIC);
        header.write_to(&mut buf).unwrap();
        Slot::new(42).write_to(&mut buf, 7).unwrap();

        let back = RingHeader::read_from(&buf).unwrap();
        assert_eq!(back, header);
        assert_eq!(back.tail, 7);
        assert!(!back.has_sentinel_bufs());
        assert_eq!(Slot::read_from(&buf, 7).unwrap().buf_idx, 42);
        assert!(Slot::read_from(&buf, 8).is_err());
    }
}
