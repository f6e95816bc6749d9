//! # Ringmem - Typed Cluster-Object Allocator
//!
//! Ringmem manages fixed-layout memory pools shared between a privileged
//! owner and an unprivileged consumer. All objects live in one flat,
//! offset-addressable region, so the consumer can map the region once and
//! reach every ring and buffer without further translation calls.
//!
//! ## Features
//!
//! - **Typed pools**: descriptor headers, ring records and packet buffers
//! - **Zero-waste geometry**: objects packed into page-aligned clusters
//! - **Bitmap free lists**: lowest-index-first allocation with scan hints
//! - **Flat offsets**: stable region offsets to physical addresses
//! - **Graceful degradation**: partial cluster failures salvage a smaller pool
//! - **Global and private allocators**: shared or per-owner lifecycles with a registry
//! - **Ring sets**: all-or-nothing attach of a header, rings and buffers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │        RingSetAssembler (attach / detach)       │
//! ├─────────────────────────────────────────────────┤
//! │  Allocator (global | private)  │  Registry      │
//! │  - config / finalize / deref   │  - ids         │
//! ├─────────────────────────────────────────────────┤
//! │  header pool │  ring pool  │  buffer pool       │
//! │  offset 0 ─────────────────────────▶ total_size │
//! ├─────────────────────────────────────────────────┤
//! │  ClusterSource (page-aligned clusters)          │
//! └─────────────────────────────────────────────────┘
//! ```

// Core modules
pub mod error;
pub mod memory;
pub mod pool;

// Allocators and their bookkeeping
pub mod allocator;
pub mod offset;
pub mod registry;

// Ring sets built on top of the pools
pub mod rings;

// Main API re-exports
pub use allocator::{
    global, Allocator, AllocatorBuilder, AllocatorInfo, AllocatorKind, AllocatorParams,
    DeviceGroup, MemFlags, PoolRequest,
};
pub use error::{MemError, Result};
pub use memory::{AnonClusterSource, Cluster, ClusterSource, FaultyClusterSource};
pub use offset::OffsetTranslator;
pub use pool::{ClusterGeometry, ObjectPool, OomPolicy, PoolKind, PoolStats};
pub use registry::{AllocatorId, Registry};
pub use rings::{AdapterDescriptor, Direction, ExtraBufferChain, RingInfo, RingSet, RingSetAssembler};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fixed sizes shared by every pool
pub mod config {
    /// Page size assumed by cluster geometry
    pub const PAGE_SIZE: usize = 4096;

    /// Object sizes are rounded up to a multiple of this
    pub const CACHE_LINE: usize = 64;

    /// Largest cluster a pool will ask for (4MB)
    pub const MAX_CLUSTER_SIZE: usize = 4 * 1024 * 1024;

    /// Buffer indices 0 and 1 are sentinels and never allocated
    pub const RESERVED_BUFFERS: usize = 2;

    /// Objects tracked per free-bitmap word
    pub const BITMAP_WORD_BITS: u32 = 32;
}
