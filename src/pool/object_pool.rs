//! Object pool: one homogeneous class of fixed-size objects
//!
//! The pool owns its clusters, the per-object lookup table and the free
//! bitmap. Object ids are a bijection with bitmap bit positions and lookup
//! table indices; object `k` lives in cluster `k / clustentries` at byte
//! offset `(k % clustentries) * objsize`.

use serde::{Deserialize, Serialize};

use crate::{
    error::{MemError, Result},
    memory::{Cluster, ClusterSource},
};

use super::{
    bitmap::FreeBitmap,
    geometry::ClusterGeometry,
    kind::{PoolKind, PoolLimits},
    stats::{PoolCounters, PoolStats},
};

/// What finalize does when a cluster cannot be acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OomPolicy {
    /// Keep a smaller pool if at least two objects were secured: release
    /// down to the last whole cluster at or below half of what was obtained
    /// (never below one cluster) and report success.
    #[default]
    Salvage,
    /// Release everything and fail with `OutOfMemory`
    Strict,
}

/// Lookup table entry for one object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LutEntry {
    /// Virtual address of the first byte
    pub vaddr: usize,
    /// Physical address of the first byte
    pub paddr: u64,
}

/// An object handed out by [`ObjectPool::allocate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatedObject {
    /// Object index within the pool
    pub index: u32,
    /// Virtual address of the object
    pub vaddr: usize,
}

/// Pool of same-size, same-purpose objects
#[derive(Debug)]
pub struct ObjectPool {
    kind: PoolKind,
    name: String,
    limits: PoolLimits,
    /// Last accepted `(objsize, objtotal)` request
    requested: Option<(usize, usize)>,
    /// Geometry derived from the request
    geometry: Option<ClusterGeometry>,
    // realized state, zero until finalize
    objtotal: usize,
    numclusters: usize,
    memtotal: usize,
    clusters: Vec<Cluster>,
    lut: Vec<LutEntry>,
    bitmap: FreeBitmap,
    counters: PoolCounters,
}

impl ObjectPool {
    /// Create an empty, unconfigured pool
    pub fn new(kind: PoolKind, name: impl Into<String>) -> Self {
        Self::with_limits(kind, name, kind.limits())
    }

    /// Create an empty pool with custom hard bounds
    pub fn with_limits(kind: PoolKind, name: impl Into<String>, limits: PoolLimits) -> Self {
        Self {
            kind,
            name: name.into(),
            limits,
            requested: None,
            geometry: None,
            objtotal: 0,
            numclusters: 0,
            memtotal: 0,
            clusters: Vec::new(),
            lut: Vec::new(),
            bitmap: FreeBitmap::default(),
            counters: PoolCounters::default(),
        }
    }

    /// Validate a request and derive the pool geometry.
    ///
    /// Does not allocate. Repeating the current request is a no-op; a new
    /// request on a finalized pool releases its memory first.
    pub fn config(&mut self, objsize: usize, objtotal: usize) -> Result<()> {
        if self.requested == Some((objsize, objtotal)) && self.geometry.is_some() {
            return Ok(());
        }

        let geometry = ClusterGeometry::compute(&self.limits, objsize, objtotal).map_err(|e| {
            log::warn!("{}: rejected geometry ({}, {}): {}", self.name, objsize, objtotal, e);
            e
        })?;

        if self.is_finalized() {
            log::debug!("{}: reconfiguring, releasing {} bytes", self.name, self.memtotal);
            self.reset();
        }

        log::debug!(
            "{}: {} objects of {} bytes, {} per {} byte cluster, {} clusters",
            self.name,
            geometry.objtotal,
            geometry.objsize,
            geometry.clustentries,
            geometry.clustsize,
            geometry.numclusters
        );

        self.requested = Some((objsize, objtotal));
        self.geometry = Some(geometry);
        Ok(())
    }

    /// Acquire clusters and build the lookup table and bitmap.
    ///
    /// Under [`OomPolicy::Salvage`] this may succeed with fewer objects than
    /// configured; callers must read `objtotal()` afterwards.
    pub fn finalize(&mut self, source: &dyn ClusterSource, policy: OomPolicy) -> Result<()> {
        if self.is_finalized() {
            return Ok(());
        }
        let geometry = self
            .geometry
            .ok_or_else(|| MemError::invalid_argument(self.name.clone(), "pool is not configured"))?;

        let mut lut: Vec<LutEntry> = Vec::new();
        lut.try_reserve_exact(geometry.objtotal).map_err(|_| {
            MemError::out_of_memory(format!("{}: lookup table of {} entries", self.name, geometry.objtotal))
        })?;
        let mut bitmap = FreeBitmap::try_new(geometry.objtotal)?;
        let mut clusters: Vec<Cluster> = Vec::new();
        clusters.try_reserve_exact(geometry.numclusters).map_err(|_| {
            MemError::out_of_memory(format!("{}: cluster table of {} entries", self.name, geometry.numclusters))
        })?;

        while lut.len() < geometry.objtotal {
            let cluster = match source.acquire(geometry.clustsize) {
                Ok(cluster) => cluster,
                Err(err) => {
                    let secured = lut.len();
                    let keep = salvage_target(secured, geometry.clustentries, policy).ok_or_else(|| {
                        log::error!(
                            "{}: cluster #{} failed with {} objects secured: {}",
                            self.name,
                            clusters.len(),
                            secured,
                            err
                        );
                        MemError::out_of_memory(format!(
                            "{}: cluster allocation failed after {} objects",
                            self.name, secured
                        ))
                    })?;

                    log::warn!(
                        "{}: cluster #{} failed ({}), keeping {} of {} requested objects",
                        self.name,
                        clusters.len(),
                        err,
                        keep,
                        geometry.objtotal
                    );
                    clusters.truncate(keep / geometry.clustentries);
                    lut.truncate(keep);
                    bitmap.truncate(keep);
                    self.counters.salvages += 1;
                    break;
                }
            };

            let first = lut.len();
            let base = cluster.base_addr();
            lut.extend((0..geometry.clustentries).map(|j| {
                let offset = j * geometry.objsize;
                LutEntry {
                    vaddr: base + offset,
                    paddr: cluster.physical_address(offset),
                }
            }));
            bitmap.mark_free_range(first, geometry.clustentries);
            clusters.push(cluster);
        }

        let reserved = self.kind.reserved_objects();
        if reserved > 0 && lut.len() <= reserved {
            return Err(MemError::out_of_memory(format!(
                "{}: only {} objects secured, {} are reserved",
                self.name,
                lut.len(),
                reserved
            )));
        }
        for index in 0..reserved {
            bitmap.reserve(index);
        }

        self.objtotal = lut.len();
        self.numclusters = clusters.len();
        self.memtotal = self.numclusters * geometry.clustsize;
        self.clusters = clusters;
        self.lut = lut;
        self.bitmap = bitmap;

        log::info!(
            "{}: finalized {} objects ({} free) in {} clusters, {} bytes",
            self.name,
            self.objtotal,
            self.objfree(),
            self.numclusters,
            self.memtotal
        );
        Ok(())
    }

    /// Allocate one object able to hold `len` bytes.
    ///
    /// `cursor` is a scan hint the caller threads through successive calls;
    /// any value is correct.
    pub fn allocate(&mut self, len: usize, cursor: &mut usize) -> Result<AllocatedObject> {
        let objsize = self.objsize();
        if len > objsize {
            self.counters.failures += 1;
            return Err(MemError::invalid_argument(
                "len",
                format!("{}: request of {} bytes exceeds object size {}", self.name, len, objsize),
            ));
        }

        let index = match self.bitmap.take_first(cursor) {
            Some(index) => index,
            None => {
                self.counters.failures += 1;
                return Err(MemError::exhausted(self.name.clone()));
            }
        };

        self.counters.allocations += 1;
        Ok(AllocatedObject {
            index: index as u32,
            vaddr: self.lut[index].vaddr,
        })
    }

    /// Return object `index` to the pool.
    ///
    /// Reserved sentinels cannot be freed. Freeing an object that is already free reports
    /// [`MemError::DoubleFree`] and changes nothing.
    pub fn free(&mut self, index: u32) -> Result<()> {
        let i = index as usize;
        if i >= self.objtotal {
            return Err(MemError::invalid_argument(
                "index",
                format!("{}: object {} out of range ({} objects)", self.name, index, self.objtotal),
            ));
        }

        if i < self.kind.reserved_objects() {
            return Err(MemError::invalid_argument(
                "index",
                format!("{}: object {} is a reserved sentinel", self.name, index),
            ));
        }

        if !self.bitmap.release(i) {
            self.counters.double_frees += 1;
            log::warn!("{}: double free of object {}", self.name, index);
            return Err(MemError::double_free(self.name.clone(), index));
        }

        self.counters.frees += 1;
        Ok(())
    }

    /// Return the object containing `vaddr` to the pool
    pub fn free_by_address(&mut self, vaddr: usize) -> Result<()> {
        let index = self.index_of(vaddr)?;
        self.free(index)
    }

    /// Index of the object containing `vaddr`
    pub fn index_of(&self, vaddr: usize) -> Result<u32> {
        let (ordinal, cluster) = self.owning_cluster(vaddr)?;
        let delta = vaddr - cluster.base_addr();
        Ok((ordinal * self.clustentries() + delta / self.objsize()) as u32)
    }

    /// Pool-relative byte offset of any byte inside the pool.
    ///
    /// Clusters are enumerated in lookup table order, so the offset of object
    /// `k` is always `k * objsize`.
    pub fn address_to_offset(&self, vaddr: usize) -> Result<usize> {
        let (ordinal, cluster) = self.owning_cluster(vaddr)?;
        Ok(ordinal * self.clustsize() + (vaddr - cluster.base_addr()))
    }

    /// Pool-relative byte offset of object `index`
    pub fn object_offset(&self, index: u32) -> Result<usize> {
        self.check_index(index)?;
        Ok(index as usize * self.objsize())
    }

    /// Physical address of the byte at pool-relative `offset`
    pub fn physical_at(&self, offset: usize) -> Result<u64> {
        if offset >= self.memtotal {
            return Err(MemError::invalid_argument(
                "offset",
                format!("{}: offset {} beyond {} bytes", self.name, offset, self.memtotal),
            ));
        }
        let objsize = self.objsize();
        Ok(self.lut[offset / objsize].paddr + (offset % objsize) as u64)
    }

    /// Virtual address of the byte at pool-relative `offset`
    pub fn address_at(&self, offset: usize) -> Result<usize> {
        if offset >= self.memtotal {
            return Err(MemError::invalid_argument(
                "offset",
                format!("{}: offset {} beyond {} bytes", self.name, offset, self.memtotal),
            ));
        }
        let objsize = self.objsize();
        Ok(self.lut[offset / objsize].vaddr + offset % objsize)
    }

    /// Lookup table entry for object `index`
    pub fn lut(&self, index: u32) -> Option<LutEntry> {
        self.lut.get(index as usize).copied()
    }

    /// Bytes of object `index`
    pub fn object(&self, index: u32) -> Result<&[u8]> {
        let (cluster, start, end) = self.object_span(index)?;
        Ok(&self.clusters[cluster].as_slice()[start..end])
    }

    /// Mutable bytes of object `index`
    pub fn object_mut(&mut self, index: u32) -> Result<&mut [u8]> {
        let (cluster, start, end) = self.object_span(index)?;
        Ok(&mut self.clusters[cluster].as_mut_slice()[start..end])
    }

    /// Whether object `index` is currently free
    pub fn is_free(&self, index: u32) -> bool {
        self.bitmap.is_free(index as usize)
    }

    /// Release all cluster memory, the lookup table and the bitmap.
    ///
    /// The geometry is kept so the next finalize can reuse it.
    pub fn reset(&mut self) {
        if self.is_finalized() {
            log::debug!("{}: releasing {} clusters", self.name, self.numclusters);
        }
        self.clusters = Vec::new();
        self.lut = Vec::new();
        self.bitmap = FreeBitmap::default();
        self.objtotal = 0;
        self.numclusters = 0;
        self.memtotal = 0;
    }

    /// Snapshot of the pool counters and realized sizes
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            kind: self.kind,
            objsize: self.objsize(),
            objtotal: self.objtotal,
            objfree: self.objfree(),
            memtotal: self.memtotal,
            numclusters: self.numclusters,
            allocations: self.counters.allocations,
            frees: self.counters.frees,
            failures: self.counters.failures,
            double_frees: self.counters.double_frees,
            salvages: self.counters.salvages,
        }
    }

    /// Pool kind
    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hard bounds
    pub fn limits(&self) -> PoolLimits {
        self.limits
    }

    /// Last accepted `(objsize, objtotal)` request
    pub fn requested(&self) -> Option<(usize, usize)> {
        self.requested
    }

    /// Derived geometry, if configured
    pub fn geometry(&self) -> Option<ClusterGeometry> {
        self.geometry
    }

    /// Whether clusters are currently held
    pub fn is_finalized(&self) -> bool {
        self.objtotal > 0
    }

    /// Realized object size (0 if unconfigured)
    pub fn objsize(&self) -> usize {
        self.geometry.map_or(0, |g| g.objsize)
    }

    /// Bytes per cluster (0 if unconfigured)
    pub fn clustsize(&self) -> usize {
        self.geometry.map_or(0, |g| g.clustsize)
    }

    /// Objects per cluster (0 if unconfigured)
    pub fn clustentries(&self) -> usize {
        self.geometry.map_or(0, |g| g.clustentries)
    }

    /// Realized object count
    pub fn objtotal(&self) -> usize {
        self.objtotal
    }

    /// Free objects
    pub fn objfree(&self) -> usize {
        self.bitmap.free_count()
    }

    /// Clusters held
    pub fn numclusters(&self) -> usize {
        self.numclusters
    }

    /// Bytes held
    pub fn memtotal(&self) -> usize {
        self.memtotal
    }

    /// Words in the free bitmap
    pub fn bitmap_slots(&self) -> usize {
        self.bitmap.slots()
    }

    #[cfg(test)]
    pub(crate) fn bitmap(&self) -> &FreeBitmap {
        &self.bitmap
    }

    fn check_index(&self, index: u32) -> Result<()> {
        if index as usize >= self.objtotal {
            return Err(MemError::invalid_argument(
                "index",
                format!("{}: object {} out of range ({} objects)", self.name, index, self.objtotal),
            ));
        }
        Ok(())
    }

    fn object_span(&self, index: u32) -> Result<(usize, usize, usize)> {
        self.check_index(index)?;
        let clustentries = self.clustentries();
        let objsize = self.objsize();
        let start = (index as usize % clustentries) * objsize;
        Ok((index as usize / clustentries, start, start + objsize))
    }

    fn owning_cluster(&self, vaddr: usize) -> Result<(usize, &Cluster)> {
        self.clusters
            .iter()
            .enumerate()
            .find(|(_, cluster)| cluster.contains(vaddr))
            .ok_or_else(|| {
                MemError::invalid_argument(
                    "vaddr",
                    format!("{}: address {:#x} not owned by this pool", self.name, vaddr),
                )
            })
    }
}

/// Objects to keep after a cluster failure with `secured` objects in hand
fn salvage_target(secured: usize, clustentries: usize, policy: OomPolicy) -> Option<usize> {
    if policy == OomPolicy::Strict || secured < 2 {
        return None;
    }
    let half = secured / 2;
    Some((half - half % clustentries).max(clustentries))
}
