//! A single page-aligned cluster of object memory

use memmap2::MmapMut;

use crate::{
    config::PAGE_SIZE,
    error::{MemError, Result},
};

/// One page-aligned, contiguous allocation holding several pool objects.
///
/// The cluster exclusively owns its mapping. The mapping never moves, so the
/// base address stays valid for as long as the cluster is alive.
#[derive(Debug)]
pub struct Cluster {
    /// Anonymous mapping backing the cluster
    mmap: MmapMut,
    /// Physical (or device-visible) address of the first byte
    phys_base: u64,
    /// Whether the pages were locked into memory
    pinned: bool,
}

impl Cluster {
    /// Map a fresh zero-filled anonymous cluster of `len` bytes.
    ///
    /// The physical address defaults to the virtual one; sources that know
    /// better override it with [`Cluster::with_physical_base`].
    pub fn anonymous(len: usize) -> Result<Self> {
        if len == 0 || len % PAGE_SIZE != 0 {
            return Err(MemError::invalid_argument(
                "len",
                format!("cluster length {} is not a positive multiple of {}", len, PAGE_SIZE),
            ));
        }

        let mmap = MmapMut::map_anon(len)
            .map_err(|e| MemError::out_of_memory(format!("failed to map {} byte cluster: {}", len, e)))?;

        let base = mmap.as_ptr() as usize;
        if base % PAGE_SIZE != 0 {
            return Err(MemError::out_of_memory(format!(
                "cluster mapping at {:#x} is not page aligned",
                base
            )));
        }

        Ok(Self {
            mmap,
            phys_base: base as u64,
            pinned: false,
        })
    }

    /// Override the physical address of the first byte
    pub fn with_physical_base(mut self, phys_base: u64) -> Self {
        self.phys_base = phys_base;
        self
    }

    /// Lock the cluster pages into memory
    pub fn pin(&mut self) -> Result<()> {
        if self.pinned {
            return Ok(());
        }
        // SAFETY: the range is exactly the live mapping owned by `self`.
        let rc = unsafe { libc::mlock(self.mmap.as_ptr() as *const libc::c_void, self.mmap.len()) };
        if rc != 0 {
            return Err(MemError::out_of_memory(format!(
                "mlock of {} byte cluster failed: {}",
                self.mmap.len(),
                std::io::Error::last_os_error()
            )));
        }
        self.pinned = true;
        Ok(())
    }

    /// Size of the cluster in bytes
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Clusters are never empty; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Virtual address of the first byte
    pub fn base_addr(&self) -> usize {
        self.mmap.as_ptr() as usize
    }

    /// Physical address of the byte at `offset` within the cluster
    pub fn physical_address(&self, offset: usize) -> u64 {
        self.phys_base + offset as u64
    }

    /// Whether `addr` lies inside `[base, base + len)`
    pub fn contains(&self, addr: usize) -> bool {
        let base = self.base_addr();
        addr >= base && addr < base + self.len()
    }

    /// Whether the pages are locked into memory
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Read-only view of the cluster bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    /// Mutable view of the cluster bytes
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        if self.pinned {
            // SAFETY: same range that was locked in `pin`, still mapped here.
            unsafe {
                libc::munlock(self.mmap.as_ptr() as *const libc::c_void, self.mmap.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_cluster_is_page_aligned() {
        let cluster = Cluster::anonymous(2 * PAGE_SIZE).unwrap();
        assert_eq!(cluster.len(), 2 * PAGE_SIZE);
        assert_eq!(cluster.base_addr() % PAGE_SIZE, 0);
        assert!(cluster.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rejects_unaligned_length() {
        assert!(matches!(
            Cluster::anonymous(PAGE_SIZE + 1),
            Err(MemError::InvalidArgument { .. })
        ));
        assert!(Cluster::anonymous(0).is_err());
    }

    #[test]
    fn test_physical_addresses() {
        let cluster = Cluster::anonymous(PAGE_SIZE).unwrap().with_physical_base(0x1000_0000);
        assert_eq!(cluster.physical_address(0), 0x1000_0000);
        assert_eq!(cluster.physical_address(128), 0x1000_0080);
    }

    #[test]
    fn test_contains() {
        let cluster = Cluster::anonymous(PAGE_SIZE).unwrap();
        let base = cluster.base_addr();
        assert!(cluster.contains(base));
        assert!(cluster.contains(base + PAGE_SIZE - 1));
        assert!(!cluster.contains(base + PAGE_SIZE));
    }
}
