//! End-to-end caching allocator scenarios driven through a mock driver.
//!
//! The mock hands out unique fake addresses, tracks outstanding driver
//! allocations, and lets tests control when recorded events complete and
//! when the driver refuses an allocation.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use hipcache::{
    AllocError, AllocResult, AllocatorConfig, CachedBytes, CachingAllocator, DevicePtr,
    MemoryBackend,
};

#[derive(Debug, Clone)]
struct MockQueue {
    id: usize,
    device: i32,
}

fn queue(id: usize) -> MockQueue {
    MockQueue { id, device: 0 }
}

fn queue_on(id: usize, device: i32) -> MockQueue {
    MockQueue { id, device }
}

/// Completion token handed to the allocator. `ready` flips once the mock
/// driver completes the work captured at record time.
struct MockEvent {
    ready: Arc<AtomicBool>,
}

#[derive(Default)]
struct DriverState {
    /// addr -> bytes for every allocation not yet freed back to the driver
    outstanding: HashMap<usize, usize>,
    next_offset: usize,
    allocs: usize,
    frees: usize,
    refuse_next: usize,
    /// while true, recorded events stay pending until complete_all()
    busy: bool,
    pending: Vec<Arc<AtomicBool>>,
}

#[derive(Clone)]
struct MockDriver {
    state: Arc<Mutex<DriverState>>,
    total_memory: usize,
}

impl MockDriver {
    fn new() -> Self {
        MockDriver {
            state: Arc::new(Mutex::new(DriverState::default())),
            total_memory: 0,
        }
    }

    /// Recorded events stay pending until `complete_all`.
    fn set_busy(&self, busy: bool) {
        self.state.lock().unwrap().busy = busy;
    }

    /// Complete every pending event, as if all queued device work retired.
    fn complete_all(&self) {
        let mut state = self.state.lock().unwrap();
        for ready in state.pending.drain(..) {
            ready.store(true, Ordering::SeqCst);
        }
    }

    /// Refuse the next `n` allocations with OutOfMemory.
    fn refuse_next(&self, n: usize) {
        self.state.lock().unwrap().refuse_next = n;
    }

    fn net_allocations(&self) -> usize {
        self.state.lock().unwrap().outstanding.len()
    }

    fn outstanding_bytes(&self) -> usize {
        self.state.lock().unwrap().outstanding.values().sum()
    }

    fn alloc_calls(&self) -> usize {
        self.state.lock().unwrap().allocs
    }
}

impl MemoryBackend for MockDriver {
    type Queue = MockQueue;
    type Event = MockEvent;

    fn malloc(&self, bytes: usize, _queue: &MockQueue) -> AllocResult<DevicePtr> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(AllocError::OutOfMemory { bytes });
        }
        state.allocs += 1;
        let addr = 0x1000 + state.next_offset;
        state.next_offset += bytes.max(16);
        state.outstanding.insert(addr, bytes);
        Ok(DevicePtr::new(addr as *mut std::ffi::c_void).unwrap())
    }

    fn free(&self, ptr: DevicePtr, _queue: &MockQueue) {
        let mut state = self.state.lock().unwrap();
        let removed = state.outstanding.remove(&ptr.addr());
        assert!(
            removed.is_some(),
            "driver free of unknown pointer {:#x}",
            ptr.addr()
        );
        state.frees += 1;
    }

    fn create_event(&self) -> AllocResult<MockEvent> {
        // fresh events poll complete until first recorded
        Ok(MockEvent {
            ready: Arc::new(AtomicBool::new(true)),
        })
    }

    fn record_event(&self, event: &MockEvent, _queue: &MockQueue) -> AllocResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.busy {
            event.ready.store(false, Ordering::SeqCst);
            state.pending.push(Arc::clone(&event.ready));
        } else {
            event.ready.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn event_completed(&self, event: &MockEvent) -> AllocResult<bool> {
        Ok(event.ready.load(Ordering::SeqCst))
    }

    fn same_device(a: &MockQueue, b: &MockQueue) -> bool {
        a.device == b.device
    }

    fn queue_equals(a: &MockQueue, b: &MockQueue) -> bool {
        a.id == b.id
    }

    fn describe(&self) -> String {
        "mock device".to_string()
    }

    fn total_memory(&self) -> usize {
        self.total_memory
    }
}

fn config() -> AllocatorConfig {
    AllocatorConfig {
        bin_growth: 2,
        min_bin: 8,
        max_bin: 30,
        max_cached_bytes: 0,
        max_cached_fraction: 1.0,
        reuse_same_queue: true,
        debug: false,
    }
}

fn allocator() -> CachingAllocator<MockDriver> {
    CachingAllocator::new(MockDriver::new(), config())
}

#[test]
fn requests_round_up_to_bin_sizes() {
    let allocator = allocator();
    let q = queue(1);

    let p = allocator.allocate(300, &q).unwrap();
    assert_eq!(
        allocator.cache_status().unwrap(),
        CachedBytes { free: 0, live: 512, requested: 300 }
    );
    allocator.free(p).unwrap();

    // an exact bin size is not rounded further
    let p = allocator.allocate(256, &q).unwrap();
    assert_eq!(allocator.cache_status().unwrap().live, 256);
    allocator.free(p).unwrap();

    // one byte over moves to the next bin
    let p = allocator.allocate(257, &q).unwrap();
    assert_eq!(allocator.cache_status().unwrap().live, 512);
    allocator.free(p).unwrap();
}

#[test]
fn same_queue_roundtrip_reuses_the_block() {
    let allocator = allocator();
    let q = queue(1);

    let p1 = allocator.allocate(1024, &q).unwrap();
    allocator.free(p1).unwrap();
    assert_eq!(
        allocator.cache_status().unwrap(),
        CachedBytes { free: 1024, live: 0, requested: 0 }
    );

    let p2 = allocator.allocate(1024, &q).unwrap();
    assert_eq!(p2, p1);
    assert_eq!(
        allocator.cache_status().unwrap(),
        CachedBytes { free: 0, live: 1024, requested: 1024 }
    );
    assert_eq!(allocator.backend().alloc_calls(), 1);

    allocator.free(p2).unwrap();
}

#[test]
fn pending_event_forces_a_fresh_allocation_across_queues() {
    let allocator = CachingAllocator::new(
        MockDriver::new(),
        AllocatorConfig { reuse_same_queue: false, ..config() },
    );
    let driver = allocator.backend().clone();

    driver.set_busy(true);
    let p1 = allocator.allocate(1024, &queue(1)).unwrap();
    allocator.free(p1).unwrap();

    // p1's event is still pending: a request on another queue must not get
    // the cached block
    let p2 = allocator.allocate(1024, &queue(2)).unwrap();
    assert_ne!(p2, p1);
    assert_eq!(driver.alloc_calls(), 2);

    // once the device work retires the cached block is reusable again
    driver.complete_all();
    let p3 = allocator.allocate(1024, &queue(3)).unwrap();
    assert_eq!(p3, p1);

    allocator.free(p2).unwrap();
    allocator.free(p3).unwrap();
}

#[test]
fn same_queue_fast_path_ignores_pending_events() {
    let allocator = allocator();
    let driver = allocator.backend().clone();
    let q = queue(7);

    driver.set_busy(true);
    let p1 = allocator.allocate(2048, &q).unwrap();
    allocator.free(p1).unwrap();

    // event still pending, but the same queue serialises its own work
    let p2 = allocator.allocate(2048, &q).unwrap();
    assert_eq!(p2, p1);

    allocator.free(p2).unwrap();
}

#[test]
fn pinned_host_blocks_reuse_across_devices_once_idle() {
    let allocator = allocator();
    let driver = allocator.backend().clone();

    let p1 = allocator.allocate(4096, &queue_on(1, 0)).unwrap();
    allocator.free(p1).unwrap();

    // different queue on a different device; the free-time event has
    // completed, so cross-device reuse is safe
    let p2 = allocator.allocate(4096, &queue_on(2, 1)).unwrap();
    assert_eq!(p2, p1);
    assert_eq!(driver.alloc_calls(), 1);

    allocator.free(p2).unwrap();
}

#[test]
fn oversize_request_fails_and_leaves_state_untouched() {
    let allocator = allocator();
    let driver = allocator.backend().clone();

    let err = allocator.allocate((1usize << 30) + 1, &queue(1)).unwrap_err();
    assert!(matches!(err, AllocError::TooLarge { .. }));
    assert_eq!(driver.alloc_calls(), 0);
    assert_eq!(allocator.cache_status().unwrap(), CachedBytes::default());
}

#[test]
fn oom_is_retried_once_after_flushing_the_cache() {
    let allocator = allocator();
    let driver = allocator.backend().clone();
    let q = queue(1);

    let p = allocator.allocate(1024, &q).unwrap();
    allocator.free(p).unwrap();
    assert_eq!(allocator.cache_status().unwrap().free, 1024);

    driver.refuse_next(1);
    let p = allocator.allocate(1 << 20, &q).unwrap();

    let status = allocator.cache_status().unwrap();
    assert_eq!(status.free, 0, "retry must flush the cache first");
    assert_eq!(status.live, 1 << 20);
    assert_eq!(driver.net_allocations(), 1);

    allocator.free(p).unwrap();
}

#[test]
fn cache_ceiling_is_never_exceeded() {
    let allocator = CachingAllocator::new(
        MockDriver::new(),
        AllocatorConfig { max_cached_bytes: 2048, ..config() },
    );

    let mut live = Vec::new();
    for bytes in [256usize, 512, 1024, 1024, 2048, 256] {
        live.push(allocator.allocate(bytes, &queue(1)).unwrap());
    }
    for ptr in live {
        allocator.free(ptr).unwrap();
        assert!(allocator.cache_status().unwrap().free <= 2048);
    }
    assert!(allocator.cache_status().unwrap().free <= 2048);
}

#[test]
fn counters_match_driver_accounting_through_a_mixed_workload() {
    let allocator = allocator();
    let driver = allocator.backend().clone();
    let q1 = queue(1);
    let q2 = queue(2);

    let mut live = Vec::new();
    for (round, bytes) in [100usize, 256, 300, 512, 4000, 70000, 300, 100]
        .iter()
        .enumerate()
    {
        let q = if round % 2 == 0 { &q1 } else { &q2 };
        live.push(allocator.allocate(*bytes, q).unwrap());
        if round % 3 == 2 {
            allocator.free(live.remove(0)).unwrap();
        }

        // every byte the driver handed out is either cached or live
        let status = allocator.cache_status().unwrap();
        assert_eq!(status.free + status.live, driver.outstanding_bytes());
    }

    for ptr in live {
        allocator.free(ptr).unwrap();
    }
    let status = allocator.cache_status().unwrap();
    assert_eq!(status.live, 0);
    assert_eq!(status.requested, 0);
    assert_eq!(status.free, driver.outstanding_bytes());
}

#[test]
fn dropping_with_a_live_block_panics() {
    let allocator = allocator();
    let p = allocator.allocate(1024, &queue(1)).unwrap();
    let _ = p;

    let result = std::panic::catch_unwind(AssertUnwindSafe(move || drop(allocator)));
    assert!(result.is_err(), "drop with live blocks must fail loudly");
}

#[test]
fn dropping_after_matched_frees_releases_all_driver_memory() {
    let driver = MockDriver::new();
    {
        let allocator = CachingAllocator::new(driver.clone(), config());
        let q = queue(1);
        let p1 = allocator.allocate(1024, &q).unwrap();
        let p2 = allocator.allocate(1 << 20, &q).unwrap();
        allocator.free(p1).unwrap();
        allocator.free(p2).unwrap();
    }
    assert_eq!(driver.net_allocations(), 0);
}

#[test]
fn concurrent_allocate_and_free_keep_the_books_straight() {
    let allocator = Arc::new(allocator());
    let driver = allocator.backend().clone();

    let mut handles = Vec::new();
    for worker in 0..4 {
        let allocator = Arc::clone(&allocator);
        handles.push(thread::spawn(move || {
            let q = queue(worker);
            for round in 0..200 {
                let bytes = 256 << (round % 5);
                let ptr = allocator.allocate(bytes, &q).unwrap();
                if round % 7 == 0 {
                    thread::yield_now();
                }
                allocator.free(ptr).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let status = allocator.cache_status().unwrap();
    assert_eq!(status.live, 0);
    assert_eq!(status.requested, 0);
    assert_eq!(status.free, driver.outstanding_bytes());
}
