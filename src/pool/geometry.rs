//! Cluster geometry: packing fixed-size objects into page-aligned clusters

use crate::{
    config::{CACHE_LINE, MAX_CLUSTER_SIZE, PAGE_SIZE},
    error::{MemError, Result},
};

use super::kind::PoolLimits;

/// Derived layout of a pool.
///
/// A cluster holds `clustentries` objects back to back and its size is an
/// exact multiple of the page size, so no byte of a cluster is wasted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterGeometry {
    /// Object size, rounded up to the cache line
    pub objsize: usize,
    /// Bytes per cluster (`clustentries * objsize`)
    pub clustsize: usize,
    /// Objects per cluster
    pub clustentries: usize,
    /// Clusters needed to cover the requested count
    pub numclusters: usize,
    /// Objects provided (`numclusters * clustentries`, never below the request)
    pub objtotal: usize,
}

impl ClusterGeometry {
    /// Compute the geometry for a requested object size and count.
    ///
    /// Pure computation: nothing is allocated.
    pub fn compute(limits: &PoolLimits, objsize: usize, objtotal: usize) -> Result<Self> {
        limits.check(objsize, objtotal)?;

        let objsize = align_up(objsize, CACHE_LINE);
        if objsize > limits.objmaxsize {
            return Err(MemError::invalid_argument(
                "objsize",
                format!(
                    "object size {} exceeds {} after cache line rounding",
                    objsize, limits.objmaxsize
                ),
            ));
        }

        let clustentries = (1usize..)
            .take_while(|i| i * objsize <= MAX_CLUSTER_SIZE)
            .find(|i| (i * objsize) % PAGE_SIZE == 0)
            .ok_or_else(|| {
                MemError::invalid_argument(
                    "objsize",
                    format!("unsupported allocation geometry for {} byte objects", objsize),
                )
            })?;

        let numclusters = (objtotal + clustentries - 1) / clustentries;

        Ok(Self {
            objsize,
            clustsize: clustentries * objsize,
            clustentries,
            numclusters,
            objtotal: numclusters * clustentries,
        })
    }

    /// Bytes covered by all clusters
    pub fn memtotal(&self) -> usize {
        self.numclusters * self.clustsize
    }
}

/// Round `value` up to a multiple of `align` (a power of two)
pub(crate) fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
