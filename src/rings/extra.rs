//! Extra buffer chain: spare buffers threaded through their own payload
//!
//! The first four bytes of every chained buffer hold the index of the next
//! one. Index 0 terminates the chain, which is why buffer indices 0 and 1
//! are never handed out by the pool.

use crate::{
    config::RESERVED_BUFFERS,
    error::{MemError, Result},
    pool::{ObjectPool, PoolKind},
};

use super::layout::{get_u32, put_u32};

/// Singly-linked chain of spare buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtraBufferChain {
    head: u32,
    len: usize,
}

impl ExtraBufferChain {
    /// Head value of an empty chain
    pub const EMPTY: u32 = 0;

    /// Allocate up to `n` buffers from `pool` and link them.
    ///
    /// Stops early when the pool runs dry; the shortfall is logged and the
    /// chain holds whatever was obtained.
    pub fn alloc(pool: &mut ObjectPool, n: usize) -> Result<Self> {
        check_buffer_pool(pool)?;

        let mut chain = Self::default();
        let mut cursor = 0;
        for _ in 0..n {
            let obj = match pool.allocate(0, &mut cursor) {
                Ok(obj) => obj,
                Err(e) => {
                    log::warn!(
                        "{}: requested {} extra buffers, only {} allocated: {}",
                        pool.name(),
                        n,
                        chain.len,
                        e
                    );
                    break;
                }
            };
            put_u32(pool.object_mut(obj.index)?, 0, chain.head);
            chain.head = obj.index;
            chain.len += 1;
        }
        Ok(chain)
    }

    /// Chain starting at `head` as published by a consumer.
    ///
    /// The length is recomputed by walking the chain.
    pub fn from_head(pool: &ObjectPool, head: u32) -> Result<Self> {
        let len = Self::walk(pool, head)?.len();
        Ok(Self { head, len })
    }

    /// Index of the first buffer, [`Self::EMPTY`] if none
    pub fn head(&self) -> u32 {
        self.head
    }

    /// Buffers in the chain
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the chain holds no buffers
    pub fn is_empty(&self) -> bool {
        self.head == Self::EMPTY
    }

    /// Buffer indices in chain order
    pub fn indices(&self, pool: &ObjectPool) -> Result<Vec<u32>> {
        Self::walk(pool, self.head)
    }

    /// Return every buffer of the chain to `pool`, returning how many were freed
    pub fn release(self, pool: &mut ObjectPool) -> Result<usize> {
        Self::release_from(pool, self.head)
    }

    /// Return every buffer reachable from `head` to `pool`.
    ///
    /// Stops at the first index that is a sentinel, out of range or already
    /// free, so a corrupted chain cannot loop.
    pub fn release_from(pool: &mut ObjectPool, head: u32) -> Result<usize> {
        check_buffer_pool(pool)?;

        let mut freed = 0;
        let mut cur = head;
        while cur as usize >= RESERVED_BUFFERS && (cur as usize) < pool.objtotal() {
            let next = get_u32(pool.object(cur)?, 0);
            if let Err(e) = pool.free(cur) {
                log::warn!("{}: extra buffer chain broken at {}: {}", pool.name(), cur, e);
                break;
            }
            freed += 1;
            cur = next;
        }
        Ok(freed)
    }

    fn walk(pool: &ObjectPool, head: u32) -> Result<Vec<u32>> {
        let mut indices = Vec::new();
        let mut cur = head;
        while cur as usize >= RESERVED_BUFFERS && (cur as usize) < pool.objtotal() {
            if indices.len() >= pool.objtotal() {
                return Err(MemError::invalid_argument("head", "extra buffer chain loops"));
            }
            indices.push(cur);
            cur = get_u32(pool.object(cur)?, 0);
        }
        Ok(indices)
    }
}

fn check_buffer_pool(pool: &ObjectPool) -> Result<()> {
    if pool.kind() != PoolKind::Buffer {
        return Err(MemError::invalid_argument(
            "pool",
            format!("extra buffers come from the buffer pool, not {}", pool.name()),
        ));
    }
    Ok(())
}
