//! Fixed-size object pools carved out of page-aligned clusters
//!
//! Every allocator owns three pools: descriptor headers, ring records and
//! packet buffers. A pool is configured (pure geometry), then finalized
//! (clusters acquired, lookup table and free bitmap built), and finally
//! reset when its memory is released.

pub mod bitmap;
pub mod geometry;
pub mod kind;
pub mod object_pool;
pub mod stats;

pub use bitmap::FreeBitmap;
pub use geometry::ClusterGeometry;
pub use kind::{PoolKind, PoolLimits};
pub use object_pool::{AllocatedObject, LutEntry, ObjectPool, OomPolicy};
pub use stats::PoolStats;
