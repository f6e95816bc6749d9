//! Allocators: three object pools behind one lock, with a shared or private lifecycle
//!
//! ```text
//! Unconfigured -> Configured -> Finalized (active > 0) -> Finalized (active == 0)
//!                      ^                                          |
//!                      +------------------ reset -----------------+
//! ```
//!
//! A private allocator leaves `Finalized` as soon as its last user calls
//! `deref`. A global allocator keeps its memory until `reset` or teardown.

pub mod builder;
pub mod core;
pub mod global;
pub mod info;
pub mod params;
pub mod variant;

pub use self::core::Allocator;
pub use builder::AllocatorBuilder;
pub use info::{AllocatorInfo, DeviceGroup, MemFlags};
pub use params::{private_minimums, set_private_minimums, AllocatorParams, PoolRequest};
pub use variant::AllocatorKind;
