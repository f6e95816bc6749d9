//! Free-object bitmap
//!
//! One bit per object, packed into 32-bit words:
//! - `1` → free
//! - `0` → allocated (or not backed by memory)
//!
//! Bits past `len()` in the last word are always zero.

use crate::{
    config::BITMAP_WORD_BITS,
    error::{MemError, Result},
};

const WORD_BITS: usize = BITMAP_WORD_BITS as usize;

/// Bitmap tracking which object indices are free
#[derive(Debug, Clone, Default)]
pub struct FreeBitmap {
    words: Vec<u32>,
    nbits: usize,
    free: usize,
}

impl FreeBitmap {
    /// Allocate a bitmap for `nbits` objects, all marked allocated
    pub fn try_new(nbits: usize) -> Result<Self> {
        let slots = (nbits + WORD_BITS - 1) / WORD_BITS;
        let mut words = Vec::new();
        words
            .try_reserve_exact(slots)
            .map_err(|_| MemError::out_of_memory(format!("bitmap of {} words", slots)))?;
        words.resize(slots, 0);

        Ok(Self {
            words,
            nbits,
            free: 0,
        })
    }

    /// Number of objects covered
    pub fn len(&self) -> usize {
        self.nbits
    }

    /// Whether the bitmap covers no objects
    pub fn is_empty(&self) -> bool {
        self.nbits == 0
    }

    /// Number of 32-bit words (`ceil(len / 32)`)
    pub fn slots(&self) -> usize {
        self.words.len()
    }

    /// Number of free objects
    pub fn free_count(&self) -> usize {
        self.free
    }

    /// Population count of the words; always equal to `free_count`
    pub fn popcount(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Whether `index` is free
    pub fn is_free(&self, index: usize) -> bool {
        index < self.nbits && self.words[index / WORD_BITS] & bit(index) != 0
    }

    /// Mark `count` objects starting at `start` free
    pub fn mark_free_range(&mut self, start: usize, count: usize) {
        for index in start..(start + count).min(self.nbits) {
            self.release(index);
        }
    }

    /// Mark a free object allocated without handing it out.
    ///
    /// Returns false if the object was not free.
    pub fn reserve(&mut self, index: usize) -> bool {
        if !self.is_free(index) {
            return false;
        }
        self.words[index / WORD_BITS] &= !bit(index);
        self.free -= 1;
        true
    }

    /// Take the lowest free index, scanning words from `*cursor`.
    ///
    /// The cursor is only a hint: if nothing is free from the cursor onwards
    /// the scan wraps to the start. On success it is left on the word the
    /// object was found in.
    pub fn take_first(&mut self, cursor: &mut usize) -> Option<usize> {
        if self.free == 0 {
            return None;
        }

        let slots = self.words.len();
        let start = if *cursor < slots { *cursor } else { 0 };
        let word = (start..slots)
            .chain(0..start)
            .find(|&w| self.words[w] != 0)?;

        let index = word * WORD_BITS + self.words[word].trailing_zeros() as usize;
        self.words[word] &= !bit(index);
        self.free -= 1;
        *cursor = word;
        Some(index)
    }

    /// Mark `index` free.
    ///
    /// Returns false if it already was, leaving the bitmap unchanged.
    pub fn release(&mut self, index: usize) -> bool {
        if index >= self.nbits || self.is_free(index) {
            return false;
        }
        self.words[index / WORD_BITS] |= bit(index);
        self.free += 1;
        true
    }

    /// Shrink to the first `nbits` objects, dropping the state of the rest
    pub fn truncate(&mut self, nbits: usize) {
        if nbits >= self.nbits {
            return;
        }
        let slots = (nbits + WORD_BITS - 1) / WORD_BITS;
        self.words.truncate(slots);
        let tail = nbits % WORD_BITS;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u32 << tail) - 1;
            }
        }
        self.nbits = nbits;
        self.free = self.popcount();
    }
}

fn bit(index: usize) -> u32 {
    1u32 << (index % WORD_BITS)
}
