//! Allocation path benchmark
//!
//! Compares the cached reuse path against the raw backend path over a
//! mock driver, so the numbers isolate the allocator's own bookkeeping
//! from real driver latency.
//!
//! Run with: `cargo bench --bench alloc_bench`

use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use hipcache::{AllocResult, AllocatorConfig, CachingAllocator, DevicePtr, MemoryBackend};

struct BenchDriver {
    next_addr: AtomicUsize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BenchQueue(usize);

impl MemoryBackend for BenchDriver {
    type Queue = BenchQueue;
    type Event = ();

    fn malloc(&self, bytes: usize, _queue: &BenchQueue) -> AllocResult<DevicePtr> {
        let addr = self.next_addr.fetch_add(bytes.max(16), Ordering::Relaxed);
        Ok(DevicePtr::new(addr as *mut std::ffi::c_void).unwrap())
    }

    fn free(&self, _ptr: DevicePtr, _queue: &BenchQueue) {}

    fn create_event(&self) -> AllocResult<()> {
        Ok(())
    }

    fn record_event(&self, _event: &(), _queue: &BenchQueue) -> AllocResult<()> {
        Ok(())
    }

    fn event_completed(&self, _event: &()) -> AllocResult<bool> {
        Ok(true)
    }

    fn same_device(_a: &BenchQueue, _b: &BenchQueue) -> bool {
        true
    }

    fn queue_equals(a: &BenchQueue, b: &BenchQueue) -> bool {
        a == b
    }

    fn describe(&self) -> String {
        "bench device".to_string()
    }

    fn total_memory(&self) -> usize {
        0
    }
}

fn bench_driver() -> BenchDriver {
    BenchDriver {
        next_addr: AtomicUsize::new(0x1000),
    }
}

const ROUNDS: usize = 1_000_000;

fn bench_cached_roundtrip() {
    let allocator = CachingAllocator::new(
        bench_driver(),
        AllocatorConfig {
            max_cached_fraction: 1.0,
            debug: false,
            ..AllocatorConfig::default()
        },
    );
    let queue = BenchQueue(1);

    // warm the cache so every round is a reuse hit
    let warm = allocator.allocate(4096, &queue).unwrap();
    allocator.free(warm).unwrap();

    let start = Instant::now();
    for _ in 0..ROUNDS {
        let ptr = allocator.allocate(4096, &queue).unwrap();
        allocator.free(black_box(ptr)).unwrap();
    }
    let elapsed = start.elapsed();

    println!(
        "cached roundtrip:    {:>8.1} ns/op ({} rounds in {:?})",
        elapsed.as_nanos() as f64 / ROUNDS as f64,
        ROUNDS,
        elapsed
    );
}

fn bench_mixed_bins() {
    let allocator = CachingAllocator::new(
        bench_driver(),
        AllocatorConfig {
            max_cached_fraction: 1.0,
            debug: false,
            ..AllocatorConfig::default()
        },
    );
    let queue = BenchQueue(1);

    let start = Instant::now();
    for round in 0..ROUNDS {
        let bytes = 256 << (round % 8);
        let ptr = allocator.allocate(bytes, &queue).unwrap();
        allocator.free(black_box(ptr)).unwrap();
    }
    let elapsed = start.elapsed();

    println!(
        "mixed-bin roundtrip: {:>8.1} ns/op ({} rounds in {:?})",
        elapsed.as_nanos() as f64 / ROUNDS as f64,
        ROUNDS,
        elapsed
    );
}

fn bench_raw_backend() {
    let driver = bench_driver();
    let queue = BenchQueue(1);

    let start = Instant::now();
    for _ in 0..ROUNDS {
        let ptr = driver.malloc(4096, &queue).unwrap();
        driver.free(black_box(ptr), &queue);
    }
    let elapsed = start.elapsed();

    println!(
        "raw backend:         {:>8.1} ns/op ({} rounds in {:?})",
        elapsed.as_nanos() as f64 / ROUNDS as f64,
        ROUNDS,
        elapsed
    );
}

fn main() {
    println!("hipcache allocation benchmark ({} rounds each)", ROUNDS);
    bench_cached_roundtrip();
    bench_mixed_bins();
    bench_raw_backend();
}
