//! The process-wide global allocator
//!
//! Initialization order is registry, then the global allocator, then any
//! private allocators. The registry is a lazy static and always exists
//! first. [`teardown`] undoes [`init`]; private allocators should be
//! deleted before it runs.

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Result;

use super::{builder::AllocatorBuilder, core::Allocator};

/// Name of the global allocator and prefix of its pools
pub const GLOBAL_NAME: &str = "global";

lazy_static::lazy_static! {
    static ref GLOBAL: Mutex<Option<Arc<Allocator>>> = Mutex::new(None);
}

/// Create the global allocator if it does not exist yet and return it
pub fn init() -> Result<Arc<Allocator>> {
    let mut slot = GLOBAL.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(alloc) = slot.as_ref() {
        return Ok(alloc.clone());
    }

    let alloc = AllocatorBuilder::new(GLOBAL_NAME).build_global()?;
    log::info!("global allocator initialized");
    *slot = Some(alloc.clone());
    Ok(alloc)
}

/// The global allocator, if initialized
pub fn get() -> Option<Arc<Allocator>> {
    GLOBAL
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Release the global allocator's memory and registry id.
///
/// Outstanding handles stay valid but see an empty, unregistered allocator.
pub fn teardown() {
    let alloc = match GLOBAL.lock().unwrap_or_else(PoisonError::into_inner).take() {
        Some(alloc) => alloc,
        None => return,
    };

    {
        let mut state = alloc.lock_state();
        if state.active > 0 {
            log::warn!("{}: torn down with {} active users", GLOBAL_NAME, state.active);
        }
        state.reset_all();
        state.active = 0;
        state.group = None;
        state.applied = None;
    }
    alloc.unregister();
    log::info!("global allocator torn down");
}
