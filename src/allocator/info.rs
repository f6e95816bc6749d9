//! Region description handed to whoever maps the allocator's memory

use serde::{Deserialize, Serialize};

/// Device or IOMMU affinity tag.
///
/// An allocator adopts the group of its first finalizer and refuses
/// finalizers from other groups until every user has released it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceGroup(pub u32);

impl DeviceGroup {
    /// Group used by owners with no device behind them
    pub const NONE: DeviceGroup = DeviceGroup(0);
}

impl Default for DeviceGroup {
    fn default() -> Self {
        Self::NONE
    }
}

impl std::fmt::Display for DeviceGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "group {}", self.0)
    }
}

/// Region flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemFlags {
    /// Region dedicated to one owner rather than the shared global one
    pub private: bool,
    /// Cluster memory is currently held
    pub finalized: bool,
}

/// Answer to [`Allocator::get_info`](super::Allocator::get_info)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorInfo {
    /// Bytes in the flat region: header, ring and buffer pools back to back
    pub total_size: usize,
    pub flags: MemFlags,
    /// Registry id, 0 when the allocator is not registered
    pub id: u16,
}
