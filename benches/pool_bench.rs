use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ringmem::{
    AdapterDescriptor, AllocatorBuilder, AllocatorParams, AnonClusterSource, DeviceGroup,
    ObjectPool, OomPolicy, PoolKind, PoolRequest, Registry, RingSetAssembler,
};
use std::sync::Arc;

fn benchmark_allocate_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("ObjectPool");

    for objsize in [256, 2048, 16384].iter() {
        group.bench_with_input(
            BenchmarkId::new("allocate_free", objsize),
            objsize,
            |b, &objsize| {
                let mut pool = ObjectPool::new(PoolKind::Buffer, "bench");
                pool.config(objsize, 4096).unwrap();
                pool.finalize(&AnonClusterSource::new(), OomPolicy::Salvage).unwrap();
                let mut cursor = 0;

                b.iter(|| {
                    let mut taken = Vec::with_capacity(256);

                    // Allocate
                    for _ in 0..256 {
                        match pool.allocate(objsize, &mut cursor) {
                            Ok(obj) => taken.push(obj.index),
                            Err(_) => break,
                        }
                    }

                    // Free
                    for index in taken {
                        let _ = pool.free(index);
                    }
                });
            },
        );
    }

    group.finish();
}

fn benchmark_finalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("Finalize");
    group.sample_size(20);

    for count in [1024, 16384].iter() {
        group.bench_with_input(BenchmarkId::new("buffers", count), count, |b, &count| {
            let source = AnonClusterSource::new();
            b.iter(|| {
                let mut pool = ObjectPool::new(PoolKind::Buffer, "bench");
                pool.config(2048, count).unwrap();
                pool.finalize(&source, OomPolicy::Salvage).unwrap();
                pool.objtotal()
            });
        });
    }

    group.finish();
}

fn benchmark_attach_detach(c: &mut Criterion) {
    let mut group = c.benchmark_group("RingSet");

    let params = AllocatorParams {
        header: PoolRequest::new(1024, 4),
        ring: PoolRequest::new(4096 + 64, 8),
        buffer: PoolRequest::new(2048, 4096),
    };
    let alloc = AllocatorBuilder::new("bench")
        .params(params)
        .registry(Arc::new(Registry::new()))
        .build_private()
        .unwrap();
    alloc.finalize(DeviceGroup::NONE).unwrap();
    let assembler = RingSetAssembler::new(alloc.clone());
    let adapter = AdapterDescriptor::new("bench0").with_extra_bufs(64);

    group.bench_function("attach_detach", |b| {
        b.iter(|| {
            let set = assembler.attach(&adapter).unwrap();
            assembler.detach(set).unwrap();
        });
    });

    group.finish();
    alloc.deref();
}

criterion_group!(
    benches,
    benchmark_allocate_free,
    benchmark_finalize,
    benchmark_attach_detach
);
criterion_main!(benches);
