//! Tests for object pools

use std::sync::Arc;

use proptest::prelude::*;
use ringmem::{
    config::PAGE_SIZE, AnonClusterSource, ClusterGeometry, FaultyClusterSource, MemError,
    ObjectPool, OomPolicy, PoolKind,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn finalized(kind: PoolKind, objsize: usize, objtotal: usize) -> ObjectPool {
    let mut pool = ObjectPool::new(kind, format!("it-{}", kind));
    pool.config(objsize, objtotal).unwrap();
    pool.finalize(&AnonClusterSource::new(), OomPolicy::Salvage).unwrap();
    pool
}

#[test]
fn test_documented_geometry() {
    let geometry = ClusterGeometry::compute(&PoolKind::Buffer.limits(), 2048, 10).unwrap();
    assert_eq!(geometry.clustentries, 2);
    assert_eq!(geometry.clustsize, PAGE_SIZE);
    assert_eq!(geometry.numclusters, 5);
    assert_eq!(geometry.objtotal, 10);
}

#[test]
fn test_zero_count_touches_no_memory() {
    let source = FaultyClusterSource::new(Arc::new(AnonClusterSource::new()));
    let mut pool = ObjectPool::new(PoolKind::Buffer, "zero");
    assert!(matches!(pool.config(2048, 0), Err(MemError::InvalidArgument { .. })));
    assert!(pool.finalize(&source, OomPolicy::Salvage).is_err());
    assert_eq!(source.attempts(), 0);
    assert_eq!(pool.memtotal(), 0);
}

#[test]
fn test_drain_then_exhausted() {
    let mut pool = finalized(PoolKind::Header, 512, 16);
    let mut cursor = 0;
    for _ in 0..pool.objtotal() {
        pool.allocate(512, &mut cursor).unwrap();
    }
    assert_eq!(pool.objfree(), 0);
    assert!(matches!(pool.allocate(1, &mut cursor), Err(MemError::Exhausted { .. })));
}

#[test]
fn test_lowest_free_index_comes_back() {
    let mut pool = finalized(PoolKind::Header, 256, 64);
    let mut cursor = 0;
    for _ in 0..40 {
        pool.allocate(0, &mut cursor).unwrap();
    }
    pool.free(33).unwrap();
    pool.free(17).unwrap();

    let mut cursor = 0;
    assert_eq!(pool.allocate(0, &mut cursor).unwrap().index, 17);
    assert_eq!(pool.allocate(0, &mut cursor).unwrap().index, 33);
    assert_eq!(pool.allocate(0, &mut cursor).unwrap().index, 40);
}

#[test]
fn test_double_free_is_harmless() {
    init_logging();
    let mut pool = finalized(PoolKind::Ring, 4096, 4);
    let mut cursor = 0;
    let obj = pool.allocate(100, &mut cursor).unwrap();
    pool.free(obj.index).unwrap();
    let free = pool.objfree();

    let err = pool.free(obj.index).unwrap_err();
    assert!(!err.is_fatal());
    assert_eq!(pool.objfree(), free);
}

#[test]
fn test_sentinel_buffers_never_allocated() {
    let mut pool = finalized(PoolKind::Buffer, 2048, 64);
    assert_eq!(pool.objfree(), 62);
    let mut cursor = 0;
    while let Ok(obj) = pool.allocate(2048, &mut cursor) {
        assert!(obj.index >= 2);
    }
    assert!(matches!(pool.free(0), Err(MemError::InvalidArgument { .. })));
    assert!(matches!(pool.free(1), Err(MemError::InvalidArgument { .. })));
}

#[test]
fn test_salvage_at_ninth_of_ten_clusters() {
    init_logging();
    let source = FaultyClusterSource::new(Arc::new(AnonClusterSource::new()));
    source.fail_from(8);
    let mut pool = ObjectPool::new(PoolKind::Buffer, "salvage");
    pool.config(2048, 20).unwrap();
    assert_eq!(pool.geometry().unwrap().numclusters, 10);

    pool.finalize(&source, OomPolicy::Salvage).unwrap();
    assert!(pool.is_finalized());
    assert_eq!(pool.objtotal(), 8);
    assert_eq!(pool.numclusters(), 4);
    assert_eq!(pool.stats().salvages, 1);
}

#[test]
fn test_salvage_keeps_lut_consistent() {
    let source = FaultyClusterSource::new(Arc::new(AnonClusterSource::new()));
    source.fail_from(5);
    let mut pool = ObjectPool::new(PoolKind::Header, "hdr");
    pool.config(1024, 40).unwrap();
    pool.finalize(&source, OomPolicy::Salvage).unwrap();

    // 5 clusters of 4 secured, half is 10, floored to 8
    assert_eq!(pool.objtotal(), 8);
    assert!(pool.lut(7).is_some());
    assert!(pool.lut(8).is_none());
    let mut cursor = 0;
    for _ in 0..8 {
        pool.allocate(0, &mut cursor).unwrap();
    }
    assert!(pool.allocate(0, &mut cursor).is_err());
}

#[test]
fn test_physical_follows_virtual() {
    let pool = finalized(PoolKind::Buffer, 1536, 24);
    assert_eq!(pool.clustentries(), 8);
    for index in 0..pool.objtotal() as u32 {
        let entry = pool.lut(index).unwrap();
        let offset = pool.address_to_offset(entry.vaddr).unwrap();
        assert_eq!(pool.physical_at(offset).unwrap(), entry.paddr);
    }
}

#[test]
fn test_stats_snapshot() {
    let mut pool = finalized(PoolKind::Buffer, 2048, 10);
    let mut cursor = 0;
    pool.allocate(0, &mut cursor).unwrap();
    pool.allocate(0, &mut cursor).unwrap();

    let stats = pool.stats();
    assert_eq!(stats.allocations, 2);
    assert_eq!(stats.in_use(), 2);
    assert!((stats.utilization() - 0.25).abs() < f64::EPSILON);
}

#[derive(Debug, Clone)]
enum Op {
    Alloc,
    Free(u32),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Alloc), (0u32..40).prop_map(Op::Free)]
}

proptest! {
    #[test]
    fn prop_free_count_matches_bitmap(ops in proptest::collection::vec(op(), 1..200)) {
        let mut pool = finalized(PoolKind::Buffer, 2048, 32);
        let mut cursor = 0;
        for op in ops {
            match op {
                Op::Alloc => {
                    let _ = pool.allocate(0, &mut cursor);
                }
                Op::Free(index) => {
                    let _ = pool.free(index);
                }
            }
            let free = (0..pool.objtotal() as u32).filter(|&i| pool.is_free(i)).count();
            prop_assert_eq!(free, pool.objfree());
            prop_assert!(!pool.is_free(0) && !pool.is_free(1));
        }
    }
}
