//! Registry of live allocators
//!
//! Every allocator gets a small non-zero id that the mapping side uses to
//! name a region. The registry only holds weak references: it lists
//! allocators, it does not keep them alive.

use std::{
    collections::BTreeMap,
    num::NonZeroU16,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use crate::{
    allocator::Allocator,
    error::{MemError, Result},
};

/// Non-zero allocator identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocatorId(NonZeroU16);

impl AllocatorId {
    /// `None` for the reserved value 0
    pub fn new(raw: u16) -> Option<Self> {
        NonZeroU16::new(raw).map(Self)
    }

    pub fn get(self) -> u16 {
        self.0.get()
    }
}

impl std::fmt::Display for AllocatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    members: BTreeMap<u16, Weak<Allocator>>,
    /// Last id handed out
    last: u16,
}

/// Ordered, id-keyed collection of allocators.
///
/// Ids are handed out circularly starting after the last one assigned, so
/// a just-released id is not reused right away.
#[derive(Debug)]
pub struct Registry {
    state: Mutex<RegistryState>,
    max_id: u16,
}

lazy_static::lazy_static! {
    static ref GLOBAL_REGISTRY: Arc<Registry> = Arc::new(Registry::new());
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Registry using the whole 16-bit id space
    pub fn new() -> Self {
        Self::with_max_id(u16::MAX)
    }

    /// Registry handing out ids `1..=max_id` only
    pub fn with_max_id(max_id: u16) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            max_id: max_id.max(1),
        }
    }

    /// The process-wide registry
    pub fn global() -> Arc<Registry> {
        GLOBAL_REGISTRY.clone()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// List `allocator` under the first free id after the last one assigned.
    ///
    /// Must not be called with the allocator's own lock held.
    pub fn assign_id(&self, allocator: &Arc<Allocator>) -> Result<AllocatorId> {
        let mut state = self.lock();
        let start = if state.last >= self.max_id { 1 } else { state.last + 1 };

        let id = self
            .first_gap(&state.members, start)
            .or_else(|| self.first_gap(&state.members, 1))
            .and_then(AllocatorId::new)
            .ok_or_else(|| MemError::out_of_memory("allocator id space exhausted"))?;

        state.members.insert(id.get(), Arc::downgrade(allocator));
        state.last = id.get();
        log::debug!("registry: assigned {} to {}", id, allocator.name());
        Ok(id)
    }

    /// Walk the held ids from `from` upward and return the first one not held
    fn first_gap(&self, members: &BTreeMap<u16, Weak<Allocator>>, from: u16) -> Option<u16> {
        let mut candidate = u32::from(from);
        for &held in members.range(from..=self.max_id).map(|(id, _)| id) {
            if u32::from(held) != candidate {
                break;
            }
            candidate += 1;
        }
        u16::try_from(candidate).ok().filter(|&id| id <= self.max_id)
    }

    /// Remove `id`; returns whether it was listed
    pub fn release_id(&self, id: AllocatorId) -> bool {
        let listed = self.lock().members.remove(&id.get()).is_some();
        if listed {
            log::debug!("registry: released {}", id);
        }
        listed
    }

    /// The live allocator listed under `id`
    pub fn lookup(&self, id: AllocatorId) -> Option<Arc<Allocator>> {
        let weak = self.lock().members.get(&id.get()).cloned();
        weak.and_then(|weak| weak.upgrade())
    }

    /// Allocators listed
    pub fn len(&self) -> usize {
        self.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().members.is_empty()
    }

    /// Listed ids in ascending order
    pub fn ids(&self) -> Vec<AllocatorId> {
        self.lock()
            .members
            .keys()
            .filter_map(|&id| AllocatorId::new(id))
            .collect()
    }

    /// Largest id this registry hands out
    pub fn max_id(&self) -> u16 {
        self.max_id
    }
}
