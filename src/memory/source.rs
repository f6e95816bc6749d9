//! Cluster sources: where pools get their backing memory from

use crate::{
    config::PAGE_SIZE,
    error::{MemError, Result},
};

use super::cluster::Cluster;

/// Provider of page-aligned cluster memory.
///
/// This is the only seam between the allocator and the platform. A source
/// hands out one cluster per call and reports the physical address of its
/// first byte through the returned [`Cluster`].
pub trait ClusterSource: Send + Sync + std::fmt::Debug {
    /// Acquire one cluster of exactly `len` bytes (a multiple of the page size)
    fn acquire(&self, len: usize) -> Result<Cluster>;

    /// Short name for diagnostics
    fn name(&self) -> &'static str {
        "cluster-source"
    }
}

/// Page size reported by the operating system
pub fn system_page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        PAGE_SIZE
    } else {
        size as usize
    }
}

/// Source backed by anonymous memory mappings.
///
/// Physical addresses are identity-mapped to virtual ones.
#[derive(Debug, Clone, Default)]
pub struct AnonClusterSource {
    /// Lock every cluster into memory after mapping it
    pin: bool,
}

impl AnonClusterSource {
    /// Create a source that maps clusters without pinning them
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source that locks every cluster into memory
    pub fn pinned() -> Self {
        Self { pin: true }
    }

    /// Whether clusters get pinned
    pub fn is_pinned(&self) -> bool {
        self.pin
    }
}

impl ClusterSource for AnonClusterSource {
    fn acquire(&self, len: usize) -> Result<Cluster> {
        let page = system_page_size();
        if page > PAGE_SIZE && len % page != 0 {
            log::debug!(
                "cluster of {} bytes is not a multiple of the {} byte system page",
                len,
                page
            );
        }

        let mut cluster = Cluster::anonymous(len)?;
        if self.pin {
            cluster.pin()?;
        }
        Ok(cluster)
    }

    fn name(&self) -> &'static str {
        "anon"
    }
}
