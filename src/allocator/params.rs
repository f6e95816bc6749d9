//! Allocator sizing parameters and process-wide defaults

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::{
    config::{PAGE_SIZE, RESERVED_BUFFERS},
    error::Result,
    pool::{geometry::align_up, PoolKind},
    rings::{
        layout::{header_object_size, ring_object_size},
        AdapterDescriptor,
    },
};

/// Requested (or realized) object size and count for one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolRequest {
    /// Object size in bytes
    pub size: usize,
    /// Object count
    pub count: usize,
}

impl PoolRequest {
    pub const fn new(size: usize, count: usize) -> Self {
        Self { size, count }
    }

    /// Field-wise maximum
    pub fn max(self, other: Self) -> Self {
        Self {
            size: self.size.max(other.size),
            count: self.count.max(other.count),
        }
    }
}

/// Requests for all three pools of an allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorParams {
    pub header: PoolRequest,
    pub ring: PoolRequest,
    pub buffer: PoolRequest,
}

impl Default for AllocatorParams {
    fn default() -> Self {
        Self::global_defaults()
    }
}

impl AllocatorParams {
    /// Sizing of the shared global allocator
    pub const fn global_defaults() -> Self {
        Self {
            header: PoolRequest::new(1024, 100),
            ring: PoolRequest::new(9 * PAGE_SIZE, 200),
            buffer: PoolRequest::new(2048, 163_840),
        }
    }

    /// Smallest sizing handed to a private allocator
    pub const fn private_defaults() -> Self {
        Self {
            header: PoolRequest::new(1024, 2),
            ring: PoolRequest::new(9 * PAGE_SIZE, 4),
            buffer: PoolRequest::new(2048, 4098),
        }
    }

    /// Request for one pool
    pub fn get(&self, kind: PoolKind) -> PoolRequest {
        match kind {
            PoolKind::Header => self.header,
            PoolKind::Ring => self.ring,
            PoolKind::Buffer => self.buffer,
        }
    }

    /// Replace the request for one pool
    pub fn set(&mut self, kind: PoolKind, request: PoolRequest) {
        match kind {
            PoolKind::Header => self.header = request,
            PoolKind::Ring => self.ring = request,
            PoolKind::Buffer => self.buffer = request,
        }
    }

    /// Field-wise maximum of two parameter sets
    pub fn max(self, other: Self) -> Self {
        Self {
            header: self.header.max(other.header),
            ring: self.ring.max(other.ring),
            buffer: self.buffer.max(other.buffer),
        }
    }

    /// Sizing for a private allocator serving exactly one adapter.
    ///
    /// Ring objects are rounded up to whole pages so that any descriptor
    /// count yields a realizable cluster geometry. Every value is raised to
    /// at least `minimums`.
    pub fn for_adapter(adapter: &AdapterDescriptor, minimums: &AllocatorParams) -> Result<Self> {
        adapter.validate()?;

        let ntot = adapter.total_rings();
        let ring_size = align_up(ring_object_size(adapter.max_descs() as usize), PAGE_SIZE);
        let wanted = Self {
            header: PoolRequest::new(header_object_size(ntot), 1),
            ring: PoolRequest::new(ring_size, ntot),
            buffer: PoolRequest::new(minimums.buffer.size, adapter.buffers_needed()),
        };

        let params = wanted.max(*minimums);
        log::debug!(
            "{}: private sizing header {:?} ring {:?} buffer {:?} ({} reserved)",
            adapter.name,
            params.header,
            params.ring,
            params.buffer,
            RESERVED_BUFFERS
        );
        Ok(params)
    }
}

lazy_static::lazy_static! {
    static ref PRIVATE_MINIMUMS: RwLock<AllocatorParams> =
        RwLock::new(AllocatorParams::private_defaults());
}

/// Current minimum sizing for new private allocators
pub fn private_minimums() -> AllocatorParams {
    *PRIVATE_MINIMUMS.read().unwrap_or_else(PoisonError::into_inner)
}

/// Change the minimum sizing for private allocators created from now on
pub fn set_private_minimums(params: AllocatorParams) {
    *PRIVATE_MINIMUMS.write().unwrap_or_else(PoisonError::into_inner) = params;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pool::ClusterGeometry, rings::Direction};

    #[test]
    fn test_get_set() {
        let mut params = AllocatorParams::global_defaults();
        params.set(PoolKind::Buffer, PoolRequest::new(4096, 10));
        assert_eq!(params.get(PoolKind::Buffer), PoolRequest::new(4096, 10));
        assert_eq!(params.get(PoolKind::Header), PoolRequest::new(1024, 100));
    }

    #[test]
    fn test_for_adapter_raises_to_minimums() {
        let adapter = AdapterDescriptor::new("eth0").with_extra_bufs(100);
        let params =
            AllocatorParams::for_adapter(&adapter, &AllocatorParams::private_defaults()).unwrap();
        assert_eq!(params.header, PoolRequest::new(1024, 2));
        assert_eq!(params.ring, PoolRequest::new(9 * PAGE_SIZE, 4));
        assert_eq!(params.buffer, PoolRequest::new(2048, 4098));
    }

    #[test]
    fn test_for_adapter_large() {
        let adapter = AdapterDescriptor::new("eth1")
            .with_rings(Direction::Tx, 8)
            .with_rings(Direction::Rx, 8)
            .with_descs(Direction::Tx, 4096)
            .with_descs(Direction::Rx, 4096)
            .with_extra_bufs(10);
        let minimums = AllocatorParams::private_defaults();
        let params = AllocatorParams::for_adapter(&adapter, &minimums).unwrap();
        // 64 + 4096 * 8 rounds up to 9 pages
        assert_eq!(params.ring, PoolRequest::new(9 * PAGE_SIZE, 18));
        assert_eq!(params.buffer.count, 16 * 4096 + 2 + 10);
    }

    #[test]
    fn test_for_adapter_ring_geometry_is_realizable() {
        let limits = PoolKind::Ring.limits();
        for descs in [1000, 4097, 8192, 12_000, 16_376] {
            let adapter = AdapterDescriptor::new("eth2")
                .with_descs(Direction::Tx, descs)
                .with_descs(Direction::Rx, descs);
            let params = AllocatorParams::for_adapter(&adapter, &AllocatorParams::private_defaults()).unwrap();
            assert_eq!(params.ring.size % PAGE_SIZE, 0);
            assert!(params.ring.size >= ring_object_size(descs as usize));
            ClusterGeometry::compute(&limits, params.ring.size, params.ring.count).unwrap();
        }
    }

    #[test]
    fn test_params_serde_shape() {
        fn assert_serde<T: Serialize + for<'de> Deserialize<'de>>() {}
        assert_serde::<AllocatorParams>();
        assert_serde::<PoolRequest>();
    }
}
