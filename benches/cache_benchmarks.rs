//! Performance benchmarks for the instance cache and ownership protocol.
//!
//! - Lookup: cache hits on a warm cache of varying size
//! - Construction: first wrap of unseen handles
//! - Contention: several threads resolving the same handles
//! - Refcounting: add_ref/release_ref pairs across the pin transition
//!
//! ## Profiling with Puffin
//!
//! ```bash
//! cargo bench --features profile-with-puffin -- --profile-time 5
//! ```

use std::hint::black_box;
use std::sync::Arc;
use std::thread;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use objbridge::{Bridge, BridgeConfig, Handle, Managed};
use objbridge_registry::testing::{Node, RecordingNative};

#[cfg(feature = "profile-with-puffin")]
static FRAME_VIEW: std::sync::OnceLock<puffin::GlobalFrameView> = std::sync::OnceLock::new();

#[cfg(feature = "profile-with-puffin")]
fn setup_profiler() {
    puffin::set_scopes_on(true);
    FRAME_VIEW.get_or_init(puffin::GlobalFrameView::default);
}

#[cfg(not(feature = "profile-with-puffin"))]
fn setup_profiler() {}

#[cfg(feature = "profile-with-puffin")]
fn end_profiling_frame() {
    puffin::GlobalProfiler::lock().new_frame();
}

#[cfg(not(feature = "profile-with-puffin"))]
fn end_profiling_frame() {}

fn populated(count: usize) -> (Bridge, Arc<RecordingNative>, Vec<Handle>, Vec<Arc<Node>>) {
    let native = RecordingNative::new();
    let bridge = Bridge::with_config(native.clone(), BridgeConfig::default());
    let handles: Vec<Handle> = (0..count).map(|_| native.spawn("Node")).collect();
    let wrappers = handles
        .iter()
        .map(|handle| {
            bridge
                .get_or_create(*handle, |bridge, h| Ok(Node::borrowed(bridge, h)))
                .unwrap()
        })
        .collect();
    (bridge, native, handles, wrappers)
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");
    for size in [16usize, 1_024, 16_384] {
        let (bridge, _native, handles, _wrappers) = populated(size);
        group.throughput(Throughput::Elements(handles.len() as u64));
        group.bench_with_input(BenchmarkId::new("get_or_create_hit", size), &handles, |b, handles| {
            b.iter(|| {
                for handle in handles {
                    let node = bridge
                        .get_or_create(*handle, |bridge, h| Ok(Node::borrowed(bridge, h)))
                        .unwrap();
                    black_box(node);
                }
                end_profiling_frame();
            });
        });
        group.bench_with_input(BenchmarkId::new("get", size), &handles, |b, handles| {
            b.iter(|| {
                for handle in handles {
                    black_box(bridge.get(*handle));
                }
            });
        });
    }
    group.finish();
}

fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("construction");
    group.throughput(Throughput::Elements(256));
    group.bench_function("wrap_unseen_256", |b| {
        b.iter_with_setup(
            || {
                let native = RecordingNative::new();
                let bridge = Bridge::new(native.clone());
                bridge.bind::<Node, _>(|bridge, h| Ok(Node::borrowed(bridge, h)));
                let handles: Vec<Handle> = (0..256).map(|_| native.spawn("Node")).collect();
                (bridge, handles)
            },
            |(bridge, handles)| {
                for handle in handles {
                    black_box(bridge.wrap(handle).unwrap());
                }
                end_profiling_frame();
            },
        );
    });
    group.finish();
}

fn bench_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");
    let (bridge, _native, handles, _wrappers) = populated(64);
    for threads in [2usize, 4, 8] {
        group.bench_with_input(BenchmarkId::new("shared_handles", threads), &threads, |b, &threads| {
            b.iter(|| {
                thread::scope(|scope| {
                    for _ in 0..threads {
                        scope.spawn(|| {
                            for handle in &handles {
                                black_box(bridge.get(*handle));
                            }
                        });
                    }
                });
            });
        });
    }
    group.finish();
}

fn bench_refcount(c: &mut Criterion) {
    let (_bridge, _native, _handles, wrappers) = populated(1);
    let node = &wrappers[0];

    let mut group = c.benchmark_group("refcount");
    group.bench_function("pin_transition", |b| {
        b.iter(|| {
            node.native().add_ref().unwrap();
            node.native().release_ref().unwrap();
        });
    });
    node.native().add_ref().unwrap();
    group.bench_function("already_pinned", |b| {
        b.iter(|| {
            node.native().add_ref().unwrap();
            node.native().release_ref().unwrap();
        });
    });
    node.native().release_ref().unwrap();
    group.finish();
}

fn benches(c: &mut Criterion) {
    setup_profiler();
    bench_lookup(c);
    bench_construction(c);
    bench_contention(c);
    bench_refcount(c);
}

criterion_group!(cache_benches, benches);
criterion_main!(cache_benches);
