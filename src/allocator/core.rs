//! The allocator: three object pools and their lifecycle behind one lock

use std::sync::{
    atomic::{AtomicU16, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use crate::{
    error::{MemError, Result},
    memory::ClusterSource,
    offset::OffsetTranslator,
    pool::{ObjectPool, OomPolicy, PoolKind, PoolStats},
    registry::{AllocatorId, Registry},
    rings::ExtraBufferChain,
};

use super::{
    info::{AllocatorInfo, DeviceGroup, MemFlags},
    params::{AllocatorParams, PoolRequest},
    variant::AllocatorKind,
};

/// Everything the allocator lock protects
#[derive(Debug)]
pub(crate) struct AllocatorState {
    pub(crate) pools: [ObjectPool; 3],
    /// Scan hints for successive allocations, one per pool
    pub(crate) cursors: [usize; 3],
    pub(crate) requested: AllocatorParams,
    /// Parameters of the last `config` that ran
    pub(crate) applied: Option<AllocatorParams>,
    pub(crate) finalized: bool,
    pub(crate) lasterr: Option<MemError>,
    pub(crate) active: u32,
    pub(crate) group: Option<DeviceGroup>,
    pub(crate) oom_policy: OomPolicy,
}

impl AllocatorState {
    pub(crate) fn new(name: &str, requested: AllocatorParams, oom_policy: OomPolicy) -> Self {
        Self {
            pools: PoolKind::ALL.map(|kind| ObjectPool::new(kind, format!("{}-{}", name, kind))),
            cursors: [0; 3],
            requested,
            applied: None,
            finalized: false,
            lasterr: None,
            active: 0,
            group: None,
            oom_policy,
        }
    }

    pub(crate) fn pool(&self, kind: PoolKind) -> &ObjectPool {
        &self.pools[kind.index()]
    }

    pub(crate) fn pool_mut(&mut self, kind: PoolKind) -> &mut ObjectPool {
        &mut self.pools[kind.index()]
    }

    /// Pool plus its scan cursor, borrowed together
    pub(crate) fn pool_and_cursor(&mut self, kind: PoolKind) -> (&mut ObjectPool, &mut usize) {
        let i = kind.index();
        (&mut self.pools[i], &mut self.cursors[i])
    }

    pub(crate) fn translator(&self) -> OffsetTranslator<'_> {
        OffsetTranslator::new(&self.pools)
    }

    fn sticky(&self) -> Result<()> {
        match &self.lasterr {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Apply the requested parameters to the three pools.
    ///
    /// Nothing changes while the allocator has users or when the request is
    /// the one already applied; the sticky error is returned in both cases.
    pub(crate) fn config(&mut self) -> Result<()> {
        if self.active > 0 || self.applied == Some(self.requested) {
            return self.sticky();
        }

        if self.finalized {
            self.reset_all();
        }

        self.lasterr = None;
        self.applied = Some(self.requested);
        for kind in PoolKind::ALL {
            let request = self.requested.get(kind);
            if let Err(err) = self.pools[kind.index()].config(request.size, request.count) {
                self.lasterr = Some(err.clone());
                return Err(err);
            }
        }
        log::debug!(
            "configured header {:?} ring {:?} buffer {:?}",
            self.requested.header,
            self.requested.ring,
            self.requested.buffer
        );
        Ok(())
    }

    /// Acquire memory for all three pools, all or nothing
    pub(crate) fn finalize_all(&mut self, source: &dyn ClusterSource) -> Result<()> {
        if self.finalized {
            return Ok(());
        }

        self.lasterr = None;
        let policy = self.oom_policy;
        for pool in self.pools.iter_mut() {
            if let Err(err) = pool.finalize(source, policy) {
                log::error!("{}: finalize failed: {}", pool.name(), err);
                self.reset_all();
                self.lasterr = Some(err.clone());
                return Err(err);
            }
        }

        self.finalized = true;
        log::info!(
            "allocator finalized from {}: {} bytes over {} clusters",
            source.name(),
            self.total_memory(),
            self.pools.iter().map(ObjectPool::numclusters).sum::<usize>()
        );
        Ok(())
    }

    /// Release the memory of all three pools, keeping their geometry
    pub(crate) fn reset_all(&mut self) {
        for pool in self.pools.iter_mut() {
            pool.reset();
        }
        self.cursors = [0; 3];
        self.finalized = false;
    }

    fn total_memory(&self) -> usize {
        self.pools.iter().map(ObjectPool::memtotal).sum()
    }

    /// Region size now, or the size the current geometry would realize
    fn planned_size(&self) -> usize {
        if self.finalized {
            return self.total_memory();
        }
        self.pools
            .iter()
            .filter_map(|pool| pool.geometry())
            .map(|geometry| geometry.memtotal())
            .sum()
    }

    pub(crate) fn require_finalized(&self) -> Result<()> {
        if !self.finalized {
            return Err(MemError::invalid_argument("allocator", "allocator is not finalized"));
        }
        Ok(())
    }
}

/// A typed cluster-object allocator.
///
/// Holds a header pool, a ring pool and a buffer pool that together form
/// one flat region addressed by byte offsets. All pool mutation and every
/// lifecycle change go through a single mutex.
#[derive(Debug)]
pub struct Allocator {
    name: String,
    kind: AllocatorKind,
    /// Registry id, 0 while unregistered
    id: AtomicU16,
    source: Arc<dyn ClusterSource>,
    registry: Arc<Registry>,
    state: Mutex<AllocatorState>,
}

impl Allocator {
    pub(crate) fn new(
        name: String,
        kind: AllocatorKind,
        params: AllocatorParams,
        oom_policy: OomPolicy,
        source: Arc<dyn ClusterSource>,
        registry: Arc<Registry>,
    ) -> Self {
        let state = AllocatorState::new(&name, params, oom_policy);
        Self {
            name,
            kind,
            id: AtomicU16::new(0),
            source,
            registry,
            state: Mutex::new(state),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, AllocatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_id(&self, id: AllocatorId) {
        self.id.store(id.get(), Ordering::Release);
    }

    /// Take the id back from the registry, if still held
    pub(crate) fn unregister(&self) {
        if let Some(id) = AllocatorId::new(self.id.swap(0, Ordering::AcqRel)) {
            self.registry.release_id(id);
        }
    }

    /// Allocator name, also the prefix of its pool names
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Global or private
    pub fn kind(&self) -> AllocatorKind {
        self.kind
    }

    /// Registry id, `None` once deleted or torn down
    pub fn id(&self) -> Option<AllocatorId> {
        AllocatorId::new(self.id.load(Ordering::Acquire))
    }

    /// Registry this allocator is listed in
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Apply pending parameter changes to the pools.
    ///
    /// Returns the sticky error of the last configuration or finalize.
    pub fn config(&self) -> Result<()> {
        self.lock_state().config()
    }

    /// Register one more user and make sure memory is in place.
    ///
    /// The first caller fixes the allocator's device group; callers from a
    /// different group get [`MemError::Conflict`] until every user has
    /// released the allocator.
    pub fn finalize(&self, group: DeviceGroup) -> Result<()> {
        let mut state = self.lock_state();

        let adopted = state.group;
        match adopted {
            Some(current) if current != group => {
                let err = MemError::conflict(current.0, group.0);
                log::warn!("{}: finalize refused: {}", self.name, err);
                state.lasterr = Some(err.clone());
                return Err(err);
            }
            Some(_) => {}
            None => state.group = Some(group),
        }
        if matches!(state.lasterr, Some(MemError::Conflict { .. })) {
            state.lasterr = None;
        }

        if let Err(err) = self.kind.finalize(&mut state, self.source.as_ref()) {
            if state.active == 0 {
                state.group = None;
            }
            return Err(err);
        }

        state.active += 1;
        log::debug!("{}: finalized for {}, {} active", self.name, group, state.active);
        Ok(())
    }

    /// Drop one user. The last one out releases the group affinity, and for
    /// a private allocator all of its memory.
    pub fn deref(&self) {
        let mut state = self.lock_state();
        if state.active == 0 {
            log::warn!("{}: deref without a matching finalize", self.name);
            return;
        }

        state.active -= 1;
        if state.active == 0 {
            self.kind.release(&mut state);
            log::debug!("{}: last user gone", self.name);
        }
    }

    /// Free everything and give the id back. Private allocators only.
    pub fn delete(self: Arc<Self>) -> Result<()> {
        if !self.kind.is_private() {
            return Err(MemError::invalid_argument(
                "allocator",
                format!("{}: the global allocator cannot be deleted", self.name),
            ));
        }

        {
            let mut state = self.lock_state();
            if state.active > 0 {
                log::warn!("{}: deleted with {} active users", self.name, state.active);
            }
            state.reset_all();
            state.active = 0;
            state.group = None;
        }
        self.unregister();
        Ok(())
    }

    /// Return to the configured state, releasing all pool memory.
    ///
    /// Refused while the allocator has users. The next config re-applies
    /// the requested parameters, which also clears a sticky error.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.lock_state();
        if state.active > 0 {
            return Err(MemError::invalid_argument(
                "allocator",
                format!("{}: {} users still active", self.name, state.active),
            ));
        }
        state.reset_all();
        state.applied = None;
        Ok(())
    }

    /// Region size, flags and id for the mapping side
    pub fn get_info(&self) -> Result<AllocatorInfo> {
        let mut state = self.lock_state();
        if self.kind.configures_on_info() {
            state.config()?;
        }
        Ok(AllocatorInfo {
            total_size: state.planned_size(),
            flags: MemFlags {
                private: self.kind.is_private(),
                finalized: state.finalized,
            },
            id: self.id.load(Ordering::Acquire),
        })
    }

    /// Requested size and count for a pool
    pub fn requested(&self, kind: PoolKind) -> PoolRequest {
        self.lock_state().requested.get(kind)
    }

    /// Change the request for a pool; applied by the next config
    pub fn set_requested(&self, kind: PoolKind, request: PoolRequest) {
        self.lock_state().requested.set(kind, request);
    }

    /// Realized object size and count for a pool
    pub fn realized(&self, kind: PoolKind) -> PoolRequest {
        let state = self.lock_state();
        let pool = state.pool(kind);
        PoolRequest::new(pool.objsize(), pool.objtotal())
    }

    /// Snapshot of all three pools in region order
    pub fn stats(&self) -> Vec<PoolStats> {
        self.lock_state().pools.iter().map(ObjectPool::stats).collect()
    }

    /// Sticky error from the last config or finalize
    pub fn last_error(&self) -> Option<MemError> {
        self.lock_state().lasterr.clone()
    }

    /// Current users
    pub fn active(&self) -> u32 {
        self.lock_state().active
    }

    /// Structural references to this allocator
    pub fn refcount(self: &Arc<Self>) -> usize {
        Arc::strong_count(self)
    }

    /// Adopted device group, if any user holds the allocator
    pub fn group(&self) -> Option<DeviceGroup> {
        self.lock_state().group
    }

    /// Whether the pools currently hold memory
    pub fn is_finalized(&self) -> bool {
        self.lock_state().finalized
    }

    /// Bytes in the flat region
    pub fn region_size(&self) -> usize {
        self.lock_state().translator().total_size()
    }

    /// Physical address behind a region offset
    pub fn offset_to_physical(&self, offset: usize) -> Result<u64> {
        self.lock_state().translator().offset_to_physical(offset)
    }

    /// Region offset of object `index` of a pool
    pub fn object_offset(&self, kind: PoolKind, index: u32) -> Result<usize> {
        self.lock_state().translator().object_offset(kind, index)
    }

    /// Run `f` over the bytes of one object
    pub fn with_object<R>(&self, kind: PoolKind, index: u32, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let state = self.lock_state();
        state.require_finalized()?;
        Ok(f(state.pool(kind).object(index)?))
    }

    /// Run `f` over the mutable bytes of one object
    pub fn with_object_mut<R>(&self, kind: PoolKind, index: u32, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let mut state = self.lock_state();
        state.require_finalized()?;
        Ok(f(state.pool_mut(kind).object_mut(index)?))
    }

    /// Allocate `n` buffers, or none at all
    pub fn alloc_buffers(&self, n: usize) -> Result<Vec<u32>> {
        let mut state = self.lock_state();
        state.require_finalized()?;
        let (pool, cursor) = state.pool_and_cursor(PoolKind::Buffer);

        let mut indices = Vec::with_capacity(n);
        for _ in 0..n {
            match pool.allocate(0, cursor) {
                Ok(obj) => indices.push(obj.index),
                Err(err) => {
                    for &index in &indices {
                        // just allocated, cannot be a double free
                        let _ = pool.free(index);
                    }
                    return Err(err);
                }
            }
        }
        Ok(indices)
    }

    /// Return one buffer
    pub fn free_buffer(&self, index: u32) -> Result<()> {
        let mut state = self.lock_state();
        state.require_finalized()?;
        state.pool_mut(PoolKind::Buffer).free(index)
    }

    /// Region offset of buffer `index`
    pub fn buffer_offset(&self, index: u32) -> Result<usize> {
        self.object_offset(PoolKind::Buffer, index)
    }

    /// Allocate a chain of up to `n` spare buffers
    pub fn alloc_extra_buffers(&self, n: usize) -> Result<ExtraBufferChain> {
        let mut state = self.lock_state();
        state.require_finalized()?;
        ExtraBufferChain::alloc(state.pool_mut(PoolKind::Buffer), n)
    }

    /// Return a chain of spare buffers, returning how many were freed
    pub fn free_extra_buffers(&self, chain: ExtraBufferChain) -> Result<usize> {
        let mut state = self.lock_state();
        state.require_finalized()?;
        chain.release(state.pool_mut(PoolKind::Buffer))
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        allocator::AllocatorBuilder,
        memory::{AnonClusterSource, FaultyClusterSource},
    };

    fn small_params() -> AllocatorParams {
        AllocatorParams {
            header: PoolRequest::new(1024, 4),
            ring: PoolRequest::new(4096, 4),
            buffer: PoolRequest::new(2048, 16),
        }
    }

    fn private(registry: &Arc<Registry>) -> Arc<Allocator> {
        AllocatorBuilder::new("test")
            .params(small_params())
            .registry(registry.clone())
            .build_private()
            .unwrap()
    }

    #[test]
    fn test_state_config_is_idempotent() {
        let mut state = AllocatorState::new("s", small_params(), OomPolicy::Salvage);
        state.config().unwrap();
        assert_eq!(state.applied, Some(small_params()));
        state.config().unwrap();
        assert!(!state.finalized);
        assert_eq!(state.planned_size(), 4096 + 4 * 4096 + 8 * 4096);
    }

    #[test]
    fn test_state_config_error_is_sticky() {
        let mut params = small_params();
        params.buffer = PoolRequest::new(2048, 0);
        let mut state = AllocatorState::new("s", params, OomPolicy::Salvage);
        assert!(state.config().is_err());
        // same request again reports the same error without recomputing
        assert!(matches!(state.config(), Err(MemError::InvalidArgument { .. })));

        state.requested.buffer = PoolRequest::new(2048, 16);
        state.config().unwrap();
        assert!(state.lasterr.is_none());
    }

    #[test]
    fn test_finalize_failure_resets_all_pools() {
        let source = FaultyClusterSource::new(Arc::new(AnonClusterSource::new()));
        // header takes 1 cluster, ring 4, the buffer pool's first fails
        source.fail_from(5);
        let mut state = AllocatorState::new("s", small_params(), OomPolicy::Salvage);
        state.config().unwrap();
        assert!(matches!(state.finalize_all(&source), Err(MemError::OutOfMemory { .. })));
        assert!(!state.finalized);
        assert!(state.pools.iter().all(|pool| pool.memtotal() == 0));
        assert!(state.lasterr.is_some());
    }

    #[test]
    fn test_private_lifecycle() {
        let registry = Arc::new(Registry::new());
        let alloc = private(&registry);
        assert!(!alloc.is_finalized());

        alloc.finalize(DeviceGroup(1)).unwrap();
        alloc.finalize(DeviceGroup(1)).unwrap();
        assert_eq!(alloc.active(), 2);
        assert!(alloc.is_finalized());

        alloc.deref();
        assert!(alloc.is_finalized());
        alloc.deref();
        assert!(!alloc.is_finalized());
        assert_eq!(alloc.group(), None);

        // extra deref is ignored
        alloc.deref();
        assert_eq!(alloc.active(), 0);
    }

    #[test]
    fn test_group_conflict() {
        let registry = Arc::new(Registry::new());
        let alloc = private(&registry);
        alloc.finalize(DeviceGroup(3)).unwrap();
        assert_eq!(
            alloc.finalize(DeviceGroup(7)),
            Err(MemError::Conflict { expected: 3, actual: 7 })
        );
        assert_eq!(alloc.active(), 1);
        assert!(matches!(alloc.last_error(), Some(MemError::Conflict { .. })));

        alloc.deref();
        alloc.finalize(DeviceGroup(7)).unwrap();
        assert_eq!(alloc.group(), Some(DeviceGroup(7)));
        assert!(alloc.last_error().is_none());
    }

    #[test]
    fn test_reset_refused_while_active() {
        let registry = Arc::new(Registry::new());
        let alloc = private(&registry);
        alloc.finalize(DeviceGroup::NONE).unwrap();
        assert!(alloc.reset().is_err());
        alloc.deref();
        alloc.reset().unwrap();
    }

    #[test]
    fn test_alloc_buffers_all_or_nothing() {
        let registry = Arc::new(Registry::new());
        let alloc = private(&registry);
        alloc.finalize(DeviceGroup::NONE).unwrap();

        let bufs = alloc.alloc_buffers(10).unwrap();
        assert!(bufs.iter().all(|&b| b >= 2));
        assert!(matches!(alloc.alloc_buffers(5), Err(MemError::Exhausted { .. })));
        assert_eq!(alloc.stats()[PoolKind::Buffer.index()].objfree, 4);

        alloc.free_buffer(bufs[0]).unwrap();
        assert!(matches!(alloc.free_buffer(bufs[0]), Err(MemError::DoubleFree { .. })));
    }

    #[test]
    fn test_buffer_api_requires_finalize() {
        let registry = Arc::new(Registry::new());
        let alloc = private(&registry);
        assert!(alloc.alloc_buffers(1).is_err());
        assert!(alloc.alloc_extra_buffers(1).is_err());
        assert!(alloc.with_object(PoolKind::Buffer, 2, |b| b.len()).is_err());
    }

    #[test]
    fn test_object_access() {
        let registry = Arc::new(Registry::new());
        let alloc = private(&registry);
        alloc.finalize(DeviceGroup::NONE).unwrap();
        let idx = alloc.alloc_buffers(1).unwrap()[0];
        alloc
            .with_object_mut(PoolKind::Buffer, idx, |bytes| bytes[..3].copy_from_slice(b"abc"))
            .unwrap();
        let head = alloc.with_object(PoolKind::Buffer, idx, |bytes| bytes[..3].to_vec()).unwrap();
        assert_eq!(head, b"abc");
    }
}
