//! Ring-set assembly: build and tear down an owner's header, rings and buffers

use std::sync::Arc;

use crate::{
    allocator::{core::AllocatorState, Allocator},
    config::RESERVED_BUFFERS,
    error::{MemError, Result},
    pool::PoolKind,
};

use super::{
    adapter::{AdapterDescriptor, Direction},
    extra::ExtraBufferChain,
    layout::{
        header_object_size, ring_object_size, write_ring_offset, RingHeader, RingSetHeader, Slot,
        RING_FLAG_SENTINEL_BUFS, RING_FLAG_SYNTHETIC,
    },
};

/// Buffer index every slot of an idle synthetic ring points at
const SENTINEL_BUFFER: u32 = 0;

/// One ring of an attached ring set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingInfo {
    pub direction: Direction,
    /// Ring number within its direction; the synthetic ring comes last
    pub ring_id: u16,
    pub synthetic: bool,
    /// Every slot points at the reserved sentinel buffer
    pub sentinel: bool,
    pub num_slots: u32,
    /// Object index in the ring pool
    pub index: u32,
    /// Region offset of the ring object
    pub offset: usize,
}

/// Everything one owner holds in an allocator.
///
/// Give it back with [`RingSetAssembler::detach`]; dropping it leaks the
/// objects until the allocator is reset.
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub struct RingSet {
    owner: String,
    header_index: u32,
    header_offset: usize,
    rings: Vec<RingInfo>,
    extra: ExtraBufferChain,
}

impl RingSet {
    /// Owner name as given by the adapter
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Object index of the header in the header pool
    pub fn header_index(&self) -> u32 {
        self.header_index
    }

    /// Region offset of the header object, the consumer's entry point
    pub fn header_offset(&self) -> usize {
        self.header_offset
    }

    /// Rings in header offset-table order
    pub fn rings(&self) -> &[RingInfo] {
        &self.rings
    }

    /// Rings of one direction, synthetic ring last
    pub fn rings_for(&self, direction: Direction) -> impl Iterator<Item = &RingInfo> {
        self.rings.iter().filter(move |ring| ring.direction == direction)
    }

    /// Extra buffers obtained at attach time
    pub fn extra_buffers(&self) -> usize {
        self.extra.len()
    }

    /// Head of the extra buffer chain as published in the header
    pub fn extra_head(&self) -> u32 {
        self.extra.head()
    }
}

/// Objects taken so far by an attach in progress
#[derive(Debug, Default)]
struct PartialAttach {
    header: Option<u32>,
    rings: Vec<u32>,
    buffers: Vec<u32>,
    extra: ExtraBufferChain,
}

impl PartialAttach {
    /// Give everything back, newest first
    fn unwind(self, state: &mut AllocatorState) {
        let buffers = state.pool_mut(PoolKind::Buffer);
        for &index in self.buffers.iter().rev() {
            release(buffers.free(index));
        }
        release(self.extra.release(buffers).map(|_| ()));

        let rings = state.pool_mut(PoolKind::Ring);
        for &index in self.rings.iter().rev() {
            release(rings.free(index));
        }
        if let Some(index) = self.header {
            release(state.pool_mut(PoolKind::Header).free(index));
        }
    }
}

fn release(result: Result<()>) {
    if let Err(err) = result {
        log::warn!("attach unwind: {}", err);
    }
}

/// Builds ring sets out of one allocator's pools
#[derive(Debug, Clone)]
pub struct RingSetAssembler {
    allocator: Arc<Allocator>,
}

impl RingSetAssembler {
    pub fn new(allocator: Arc<Allocator>) -> Self {
        Self { allocator }
    }

    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    /// Allocate a header, every ring with its buffers, and the extra chain
    /// for `adapter`.
    ///
    /// Either the whole set is built or nothing is left allocated and
    /// `OutOfMemory` is returned.
    pub fn attach(&self, adapter: &AdapterDescriptor) -> Result<RingSet> {
        adapter.validate()?;
        let mut state = self.allocator.lock_state();
        state.require_finalized()?;

        let mut partial = PartialAttach::default();
        match build(&mut state, adapter, &mut partial) {
            Ok(set) => {
                log::debug!(
                    "{}: attached {} rings at offset {}, {} extra buffers",
                    set.owner,
                    set.rings.len(),
                    set.header_offset,
                    set.extra.len()
                );
                Ok(set)
            }
            Err(err) => {
                partial.unwind(&mut state);
                log::warn!("{}: attach failed and was rolled back: {}", adapter.name, err);
                Err(MemError::out_of_memory(format!("{}: attach failed: {}", adapter.name, err)))
            }
        }
    }

    /// Return every object of `set` to the allocator.
    ///
    /// Buffer indices and the extra chain head are read back from region
    /// memory, so buffers the consumer swapped into the rings are the ones
    /// freed. Slot counts and sentinel rings come from `set`, never from the
    /// ring headers the consumer can write. Keeps going past errors and
    /// reports the first fatal one.
    pub fn detach(&self, set: RingSet) -> Result<()> {
        let mut state = self.allocator.lock_state();
        state.require_finalized()?;

        let mut first_err = None;
        for ring in &set.rings {
            note(&mut first_err, detach_ring(&mut state, ring));
        }
        note(&mut first_err, detach_header(&mut state, set.header_offset));

        log::debug!("{}: detached {} rings", set.owner, set.rings.len());
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn build(state: &mut AllocatorState, adapter: &AdapterDescriptor, partial: &mut PartialAttach) -> Result<RingSet> {
    let ntot = adapter.total_rings();
    let (pool, cursor) = state.pool_and_cursor(PoolKind::Header);
    let header = pool.allocate(header_object_size(ntot), cursor)?;
    partial.header = Some(header.index);

    let buf_size = u32::try_from(state.pool(PoolKind::Buffer).objsize())
        .map_err(|_| MemError::invalid_argument("buf_size", "buffer size does not fit a ring header"))?;
    let buf_base = state.translator().pool_base(PoolKind::Buffer);

    let mut rings = Vec::with_capacity(ntot);
    for direction in Direction::ALL {
        let count = adapter.rings(direction);
        let num_slots = adapter.descs(direction);
        for ring_id in 0..=count {
            let synthetic = ring_id == count;
            let sentinel = synthetic && !adapter.host_rings_active;

            let (pool, cursor) = state.pool_and_cursor(PoolKind::Ring);
            let ring = pool.allocate(ring_object_size(num_slots as usize), cursor)?;
            partial.rings.push(ring.index);

            let slots = if sentinel {
                vec![SENTINEL_BUFFER; num_slots as usize]
            } else {
                let (pool, cursor) = state.pool_and_cursor(PoolKind::Buffer);
                let mut slots = Vec::with_capacity(num_slots as usize);
                for _ in 0..num_slots {
                    let buf = pool.allocate(0, cursor)?;
                    partial.buffers.push(buf.index);
                    slots.push(buf.index);
                }
                slots
            };

            let mut flags = 0;
            if synthetic {
                flags |= RING_FLAG_SYNTHETIC;
            }
            if sentinel {
                flags |= RING_FLAG_SENTINEL_BUFS;
            }

            let offset = state.translator().object_offset(PoolKind::Ring, ring.index)?;
            let ring_id = u16::try_from(ring_id)
                .map_err(|_| MemError::invalid_argument("rings", "too many rings in one direction"))?;
            let header = RingHeader::new(
                direction,
                ring_id,
                num_slots,
                buf_size,
                buf_base as i64 - offset as i64,
                flags,
            );

            let obj = state.pool_mut(PoolKind::Ring).object_mut(ring.index)?;
            header.write_to(obj)?;
            for (i, &buf_idx) in slots.iter().enumerate() {
                Slot::new(buf_idx).write_to(obj, i)?;
            }

            rings.push(RingInfo {
                direction,
                ring_id,
                synthetic,
                sentinel,
                num_slots,
                index: ring.index,
                offset,
            });
        }
    }

    let extra = ExtraBufferChain::alloc(state.pool_mut(PoolKind::Buffer), adapter.extra_bufs as usize)?;
    partial.extra = extra;

    let header_offset = state.translator().object_offset(PoolKind::Header, header.index)?;
    let mut record = RingSetHeader::new(&adapter.name, adapter.tx_rings, adapter.rx_rings, ntot as u32);
    record.bufs_head = extra.head();

    let obj = state.pool_mut(PoolKind::Header).object_mut(header.index)?;
    record.write_to(obj)?;
    for (i, ring) in rings.iter().enumerate() {
        write_ring_offset(obj, i, ring.offset as i64 - header_offset as i64)?;
    }

    Ok(RingSet {
        owner: adapter.name.clone(),
        header_index: header.index,
        header_offset,
        rings,
        extra,
    })
}

fn detach_ring(state: &mut AllocatorState, ring: &RingInfo) -> Result<()> {
    let mut first_err = None;

    if !ring.sentinel {
        let buffers: Vec<Result<u32>> = match state.pool(PoolKind::Ring).object(ring.index) {
            Ok(obj) => (0..ring.num_slots as usize)
                .map(|i| Slot::read_from(obj, i).map(|slot| slot.buf_idx))
                .collect(),
            Err(err) => vec![Err(err)],
        };

        let pool = state.pool_mut(PoolKind::Buffer);
        for buf_idx in buffers {
            match buf_idx {
                Ok(buf_idx) if (buf_idx as usize) < RESERVED_BUFFERS => {}
                Ok(buf_idx) => note(&mut first_err, pool.free(buf_idx)),
                Err(err) => note(&mut first_err, Err(err)),
            }
        }
    }
    note(&mut first_err, state.pool_mut(PoolKind::Ring).free(ring.index));

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn detach_header(state: &mut AllocatorState, header_offset: usize) -> Result<()> {
    let vaddr = state.translator().offset_to_address(header_offset)?;
    let pool = state.pool(PoolKind::Header);
    let record = pool
        .index_of(vaddr)
        .and_then(|index| pool.object(index))
        .and_then(RingSetHeader::read_from);

    let mut first_err = None;
    match record {
        Ok(record) => {
            match ExtraBufferChain::release_from(state.pool_mut(PoolKind::Buffer), record.bufs_head) {
                Ok(0) => {}
                Ok(freed) => log::debug!("{}: released {} extra buffers", record.owner(), freed),
                Err(err) => note(&mut first_err, Err(err)),
            }
        }
        Err(err) => note(&mut first_err, Err(err)),
    }
    note(&mut first_err, state.pool_mut(PoolKind::Header).free_by_address(vaddr));

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Keep the first fatal error, log the rest
fn note(first: &mut Option<MemError>, result: Result<()>) {
    if let Err(err) = result {
        if err.is_fatal() && first.is_none() {
            *first = Some(err);
        } else {
            log::warn!("detach: {}", err);
        }
    }
}
