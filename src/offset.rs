//! Flat region offsets
//!
//! The three pools of an allocator are exposed as one region: header pool
//! first, then the ring pool, then the buffer pool. Offset 0 is the first
//! byte of the header pool. Inside a pool, clusters follow each other in
//! lookup table order, so object `k` of a pool starts `k * objsize` bytes
//! after the pool's base. Offsets stay valid while the allocator stays
//! finalized and must be recomputed after a reset.

use crate::{
    error::{MemError, Result},
    pool::{ObjectPool, PoolKind},
};

/// Offset arithmetic over the pools of one allocator
#[derive(Debug, Clone, Copy)]
pub struct OffsetTranslator<'a> {
    pools: &'a [ObjectPool; 3],
}

impl<'a> OffsetTranslator<'a> {
    /// Translator over pools laid out in [`PoolKind::ALL`] order
    pub fn new(pools: &'a [ObjectPool; 3]) -> Self {
        Self { pools }
    }

    fn pool(&self, kind: PoolKind) -> &'a ObjectPool {
        &self.pools[kind.index()]
    }

    /// Bytes in the region
    pub fn total_size(&self) -> usize {
        self.pools.iter().map(ObjectPool::memtotal).sum()
    }

    /// Region offset of the first byte of a pool
    pub fn pool_base(&self, kind: PoolKind) -> usize {
        PoolKind::ALL
            .iter()
            .take_while(|&&k| k != kind)
            .map(|&k| self.pool(k).memtotal())
            .sum()
    }

    /// Pool owning a region offset and the offset relative to that pool
    pub fn locate(&self, offset: usize) -> Result<(PoolKind, usize)> {
        let mut rest = offset;
        for kind in PoolKind::ALL {
            let memtotal = self.pool(kind).memtotal();
            if rest < memtotal {
                return Ok((kind, rest));
            }
            rest -= memtotal;
        }
        Err(MemError::invalid_argument(
            "offset",
            format!("offset {} beyond region of {} bytes", offset, self.total_size()),
        ))
    }

    /// Physical address of the byte at a region offset
    pub fn offset_to_physical(&self, offset: usize) -> Result<u64> {
        let (kind, rest) = self.locate(offset)?;
        self.pool(kind).physical_at(rest)
    }

    /// Virtual address of the byte at a region offset.
    ///
    /// Stays inside the crate; callers outside only ever see offsets.
    pub(crate) fn offset_to_address(&self, offset: usize) -> Result<usize> {
        let (kind, rest) = self.locate(offset)?;
        self.pool(kind).address_at(rest)
    }

    /// Region offset of a byte owned by the `kind` pool
    pub fn address_to_offset(&self, kind: PoolKind, vaddr: usize) -> Result<usize> {
        Ok(self.pool_base(kind) + self.pool(kind).address_to_offset(vaddr)?)
    }

    /// Region offset of object `index` of a pool
    pub fn object_offset(&self, kind: PoolKind, index: u32) -> Result<usize> {
        Ok(self.pool_base(kind) + self.pool(kind).object_offset(index)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory::AnonClusterSource, pool::OomPolicy};

    fn pools() -> [ObjectPool; 3] {
        let source = AnonClusterSource::new();
        let sizes = [(1024, 4), (4096, 2), (2048, 10)];
        PoolKind::ALL.map(|kind| {
            let (objsize, objtotal) = sizes[kind.index()];
            let mut pool = ObjectPool::new(kind, kind.name());
            pool.config(objsize, objtotal).unwrap();
            pool.finalize(&source, OomPolicy::Salvage).unwrap();
            pool
        })
    }

    #[test]
    fn test_pool_bases() {
        let pools = pools();
        let t = OffsetTranslator::new(&pools);
        assert_eq!(t.pool_base(PoolKind::Header), 0);
        assert_eq!(t.pool_base(PoolKind::Ring), 4096);
        assert_eq!(t.pool_base(PoolKind::Buffer), 3 * 4096);
        assert_eq!(t.total_size(), 8 * 4096);
    }

    #[test]
    fn test_locate() {
        let pools = pools();
        let t = OffsetTranslator::new(&pools);
        assert_eq!(t.locate(0).unwrap(), (PoolKind::Header, 0));
        assert_eq!(t.locate(4096).unwrap(), (PoolKind::Ring, 0));
        assert_eq!(t.locate(3 * 4096 + 2050).unwrap(), (PoolKind::Buffer, 2050));
        assert!(t.locate(8 * 4096).is_err());
    }

    #[test]
    fn test_address_offset_physical_agree() {
        let pools = pools();
        let t = OffsetTranslator::new(&pools);
        for kind in PoolKind::ALL {
            let pool = &pools[kind.index()];
            for index in 0..pool.objtotal() as u32 {
                let entry = pool.lut(index).unwrap();
                let offset = t.address_to_offset(kind, entry.vaddr).unwrap();
                assert_eq!(offset, t.object_offset(kind, index).unwrap());
                assert_eq!(t.offset_to_physical(offset).unwrap(), entry.paddr);
                assert_eq!(t.offset_to_address(offset + 9).unwrap(), entry.vaddr + 9);
            }
        }
    }

    #[test]
    fn test_empty_region() {
        let pools = PoolKind::ALL.map(|kind| ObjectPool::new(kind, kind.name()));
        let t = OffsetTranslator::new(&pools);
        assert_eq!(t.total_size(), 0);
        assert!(t.offset_to_physical(0).is_err());
    }
}
