//! Object pool statistics

use serde::Serialize;

use super::kind::PoolKind;

/// Running counters kept by a pool while it is locked
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PoolCounters {
    pub allocations: u64,
    pub frees: u64,
    pub failures: u64,
    pub double_frees: u64,
    pub salvages: u64,
}

/// Point-in-time snapshot of a pool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    /// Which pool this is
    pub kind: PoolKind,
    /// Realized object size in bytes
    pub objsize: usize,
    /// Realized object count
    pub objtotal: usize,
    /// Objects currently free
    pub objfree: usize,
    /// Bytes of cluster memory held
    pub memtotal: usize,
    /// Clusters held
    pub numclusters: usize,
    /// Successful allocations
    pub allocations: u64,
    /// Successful frees
    pub frees: u64,
    /// Allocation requests that failed
    pub failures: u64,
    /// Double frees reported
    pub double_frees: u64,
    /// Finalize calls that degraded after a cluster failure
    pub salvages: u64,
}

impl PoolStats {
    /// Objects currently handed out
    pub fn in_use(&self) -> usize {
        self.objtotal
            .saturating_sub(self.objfree)
            .saturating_sub(self.kind.reserved_objects().min(self.objtotal))
    }

    /// Fraction of allocatable objects in use (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        let usable = self.objtotal.saturating_sub(self.kind.reserved_objects());
        if usable == 0 {
            return 0.0;
        }
        self.in_use() as f64 / usable as f64
    }

    /// Get a summary string of the statistics
    pub fn summary(&self) -> String {
        format!(
            "{} pool {{ objsize: {}, objtotal: {}, free: {}, clusters: {}, memtotal: {}, \
             allocations: {}, failures: {}, double_frees: {}, utilization: {:.2}% }}",
            self.kind,
            self.objsize,
            self.objtotal,
            self.objfree,
            self.numclusters,
            self.memtotal,
            self.allocations,
            self.failures,
            self.double_frees,
            self.utilization() * 100.0
        )
    }
}
