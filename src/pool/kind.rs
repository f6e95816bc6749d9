//! Pool kinds and their hard size bounds

use serde::{Deserialize, Serialize};

use crate::{
    config::{PAGE_SIZE, RESERVED_BUFFERS},
    error::{MemError, Result},
};

/// The three object classes every allocator manages.
///
/// The declaration order is also the order of the pools inside the shared
/// region: headers first, then rings, then buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PoolKind {
    /// Per-owner descriptor headers with their ring offset tables
    Header,
    /// Ring records with their slot arrays
    Ring,
    /// Packet buffers
    Buffer,
}

impl PoolKind {
    /// All kinds in region order
    pub const ALL: [PoolKind; 3] = [PoolKind::Header, PoolKind::Ring, PoolKind::Buffer];

    /// Position of the pool inside an allocator and inside the region
    pub fn index(self) -> usize {
        match self {
            PoolKind::Header => 0,
            PoolKind::Ring => 1,
            PoolKind::Buffer => 2,
        }
    }

    /// Human-readable pool name
    pub fn name(self) -> &'static str {
        match self {
            PoolKind::Header => "header",
            PoolKind::Ring => "ring",
            PoolKind::Buffer => "buffer",
        }
    }

    /// Hard bounds on object size and count for this kind
    pub fn limits(self) -> PoolLimits {
        match self {
            PoolKind::Header => PoolLimits {
                objminsize: 64,
                objmaxsize: 4096,
                nummin: 1,
                nummax: 100_000,
            },
            PoolKind::Ring => PoolLimits {
                objminsize: 64,
                objmaxsize: 32 * PAGE_SIZE,
                nummin: 2,
                nummax: 1024,
            },
            PoolKind::Buffer => PoolLimits {
                objminsize: 64,
                objmaxsize: 65536,
                nummin: 4,
                nummax: 1_000_000,
            },
        }
    }

    /// Objects withheld from allocation at finalize time
    pub fn reserved_objects(self) -> usize {
        match self {
            PoolKind::Buffer => RESERVED_BUFFERS,
            _ => 0,
        }
    }
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Hard bounds a pool configuration must respect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    /// Smallest accepted object size in bytes
    pub objminsize: usize,
    /// Largest accepted object size in bytes
    pub objmaxsize: usize,
    /// Smallest accepted object count
    pub nummin: usize,
    /// Largest accepted object count
    pub nummax: usize,
}

impl PoolLimits {
    /// Check a requested `(objsize, objtotal)` pair against the bounds
    pub fn check(&self, objsize: usize, objtotal: usize) -> Result<()> {
        if objsize < self.objminsize || objsize > self.objmaxsize {
            return Err(MemError::invalid_argument(
                "objsize",
                format!(
                    "requested object size {} not in [{}, {}]",
                    objsize, self.objminsize, self.objmaxsize
                ),
            ));
        }

        if objtotal < self.nummin || objtotal > self.nummax {
            return Err(MemError::invalid_argument(
                "objtotal",
                format!(
                    "requested object count {} not in [{}, {}]",
                    objtotal, self.nummin, self.nummax
                ),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_order() {
        let indices: Vec<usize> = PoolKind::ALL.iter().map(|k| k.index()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(PoolKind::Header < PoolKind::Ring && PoolKind::Ring < PoolKind::Buffer);
    }

    #[test]
    fn test_only_buffers_reserve_objects() {
        assert_eq!(PoolKind::Header.reserved_objects(), 0);
        assert_eq!(PoolKind::Ring.reserved_objects(), 0);
        assert_eq!(PoolKind::Buffer.reserved_objects(), 2);
    }

    #[test]
    fn test_limits_check() {
        let limits = PoolKind::Buffer.limits();
        assert!(limits.check(2048, 10).is_ok());
        assert!(limits.check(32, 10).is_err());
        assert!(limits.check(2048, 0).is_err());
        assert!(limits.check(2048, 2_000_000).is_err());
    }
}
