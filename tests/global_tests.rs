//! Tests for the process-wide global allocator and private sizing defaults
//!
//! Everything here touches process-wide state, so it runs as one test.

use std::sync::Arc;

use ringmem::{
    allocator::{private_minimums, set_private_minimums},
    global, AdapterDescriptor, AllocatorBuilder, AllocatorKind, AllocatorParams, DeviceGroup,
    PoolKind, PoolRequest, Registry,
};

#[test]
fn test_global_singleton_and_private_minimums() {
    let _ = env_logger::builder().is_test(true).try_init();
    assert!(global::get().is_none());

    let alloc = global::init().unwrap();
    assert!(Arc::ptr_eq(&alloc, &global::init().unwrap()));
    assert_eq!(alloc.kind(), AllocatorKind::Global);
    assert_eq!(alloc.name(), global::GLOBAL_NAME);
    assert_eq!(alloc.requested(PoolKind::Buffer), PoolRequest::new(2048, 163_840));

    let id = alloc.id().unwrap();
    assert!(Arc::ptr_eq(&Registry::global().lookup(id).unwrap(), &alloc));

    // keep the test light
    alloc.set_requested(PoolKind::Header, PoolRequest::new(1024, 4));
    alloc.set_requested(PoolKind::Ring, PoolRequest::new(4096, 4));
    alloc.set_requested(PoolKind::Buffer, PoolRequest::new(2048, 64));
    alloc.finalize(DeviceGroup::NONE).unwrap();
    alloc.finalize(DeviceGroup::NONE).unwrap();
    alloc.deref();
    alloc.deref();
    assert!(alloc.is_finalized());
    assert!(!alloc.get_info().unwrap().flags.private);

    // private allocators pick up the current minimums
    let defaults = private_minimums();
    assert_eq!(defaults, AllocatorParams::private_defaults());
    let mut raised = defaults;
    raised.buffer = PoolRequest::new(2048, 8192);
    set_private_minimums(raised);
    assert_eq!(private_minimums(), raised);

    let private = AllocatorBuilder::for_adapter(&AdapterDescriptor::new("vp0"))
        .unwrap()
        .build_private()
        .unwrap();
    assert_eq!(private.requested(PoolKind::Buffer), PoolRequest::new(2048, 8192));
    assert_ne!(private.id(), Some(id));
    private.delete().unwrap();
    set_private_minimums(defaults);

    // teardown in reverse order: private allocators first, then the global one
    global::teardown();
    assert!(global::get().is_none());
    assert!(Registry::global().lookup(id).is_none());
    assert!(alloc.id().is_none());
    assert!(!alloc.is_finalized());
    global::teardown();
}
