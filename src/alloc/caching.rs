//! Caching allocator core
//!
//! One allocator instance serves one memory pool (a single device, or the
//! pinned-host pool). Freed blocks are parked in per-bin lists and handed
//! back to later requests of the same size class; the driver is only
//! called when no cached block can be safely reused.
//!
//! Safety rule for reuse: a cached block may be handed out again if the
//! request comes from the queue of the block's last use (work on one queue
//! is serialised by the driver), or once the completion event recorded at
//! free time reports complete.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::alloc::backend::{DevicePtr, MemoryBackend};
use crate::alloc::bins::{as_bytes, BinSchedule};
use crate::alloc::config::AllocatorConfig;
use crate::error::{AllocError, AllocResult};

/// Byte counters for one allocator instance, maintained as deltas on
/// every block transition.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CachedBytes {
    /// Sum of bin-rounded sizes over cached (freed, reusable) blocks.
    pub free: usize,
    /// Sum of bin-rounded sizes over live blocks.
    pub live: usize,
    /// Sum of caller-requested sizes over live blocks, for monitoring.
    pub requested: usize,
}

struct Block<B: MemoryBackend> {
    ptr: DevicePtr,
    /// Bin-rounded size actually allocated.
    bytes: usize,
    /// Size the caller asked for.
    requested: usize,
    bin: u32,
    /// Queue of the block's last use.
    queue: B::Queue,
    /// Completes when all work submitted to `queue` before the last free
    /// has completed. Re-recorded on every free.
    event: B::Event,
}

struct State<B: MemoryBackend> {
    /// Cached blocks, grouped by bin. A bin may hold several blocks.
    cached: BTreeMap<u32, Vec<Block<B>>>,
    /// Live blocks, keyed by pointer.
    live: HashMap<DevicePtr, Block<B>>,
    bytes: CachedBytes,
}

impl<B: MemoryBackend> State<B> {
    fn cached_block_count(&self) -> usize {
        self.cached.values().map(Vec::len).sum()
    }
}

/// Bin-based caching allocator over a [`MemoryBackend`].
///
/// All public methods are safe to call from multiple threads; a single
/// mutex guards the block maps and counters. The raw driver allocation in
/// [`allocate`](Self::allocate) runs outside the lock so other threads can
/// keep reusing cached blocks while the driver works.
pub struct CachingAllocator<B: MemoryBackend> {
    backend: B,
    bins: BinSchedule,
    max_cached_bytes: usize,
    reuse_same_queue: bool,
    debug: bool,
    state: Mutex<State<B>>,
}

// Effective cache ceiling: the smaller of the explicit byte cap and the
// fraction of total memory, either of which may be disabled with 0.
fn cache_ceiling(max_cached_bytes: usize, max_cached_fraction: f64, total_memory: usize) -> usize {
    let mut ceiling = usize::MAX;
    if max_cached_bytes > 0 {
        ceiling = ceiling.min(max_cached_bytes);
    }
    let fraction_bytes = (max_cached_fraction * total_memory as f64) as usize;
    if fraction_bytes > 0 {
        ceiling = ceiling.min(fraction_bytes);
    }
    ceiling
}

impl<B: MemoryBackend> CachingAllocator<B> {
    pub fn new(backend: B, config: AllocatorConfig) -> Self {
        let bins = BinSchedule::new(config.bin_growth, config.min_bin, config.max_bin);
        let max_cached_bytes = cache_ceiling(
            config.max_cached_bytes,
            config.max_cached_fraction,
            backend.total_memory(),
        );

        if config.debug {
            use std::fmt::Write;
            let mut out = String::new();
            let _ = writeln!(out, "caching allocator settings for {}", backend.describe());
            let _ = writeln!(out, "  bin growth {}", bins.growth());
            let _ = writeln!(out, "  min bin    {}", bins.min_bin());
            let _ = writeln!(out, "  max bin    {}", bins.max_bin());
            let _ = writeln!(out, "  resulting bins:");
            let mut bin_bytes = bins.min_bin_bytes();
            for _ in bins.min_bin()..=bins.max_bin() {
                let _ = writeln!(out, "    {:>12}", as_bytes(bin_bytes));
                bin_bytes *= bins.growth() as usize;
            }
            let _ = write!(out, "  maximum cached memory: {}", as_bytes(max_cached_bytes));
            tracing::debug!("{}", out);
        }

        CachingAllocator {
            backend,
            bins,
            max_cached_bytes,
            reuse_same_queue: config.reuse_same_queue,
            debug: config.debug,
            state: Mutex::new(State {
                cached: BTreeMap::new(),
                live: HashMap::new(),
                bytes: CachedBytes::default(),
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn bin_schedule(&self) -> &BinSchedule {
        &self.bins
    }

    /// Effective cache ceiling in bytes.
    pub fn max_cached_bytes(&self) -> usize {
        self.max_cached_bytes
    }

    /// Allocate `bytes` for use on `queue`.
    ///
    /// The request is rounded up to its bin size; a cached block of that
    /// bin is reused when one is safely reusable, otherwise a fresh block
    /// comes from the driver. A driver out-of-memory failure triggers one
    /// retry after all cached blocks have been flushed.
    ///
    /// # Errors
    ///
    /// [`AllocError::TooLarge`] for requests above the maximum bin (no
    /// driver fallback), [`AllocError::OutOfMemory`] when the driver
    /// refuses twice, any other driver fault verbatim.
    pub fn allocate(&self, bytes: usize, queue: &B::Queue) -> AllocResult<DevicePtr> {
        let (bin, rounded) = self.bins.find_bin(bytes)?;

        if let Some(ptr) = self.try_reuse(bin, bytes, queue)? {
            return Ok(ptr);
        }

        // Fresh block from the driver, outside the lock: driver allocation
        // can take milliseconds and other threads must stay free to reuse
        // cached blocks meanwhile.
        let ptr = match self.backend.malloc(rounded, queue) {
            Ok(ptr) => ptr,
            Err(AllocError::OutOfMemory { .. }) => {
                if self.debug {
                    tracing::debug!(
                        "{} failed to allocate {}, retrying after freeing cached allocations",
                        self.backend.describe(),
                        as_bytes(rounded)
                    );
                }
                self.free_all_cached()?;
                self.backend.malloc(rounded, queue)?
            }
            Err(err) => return Err(err),
        };

        let event = match self.backend.create_event() {
            Ok(event) => event,
            Err(err) => {
                // don't leak the fresh block on the error path
                self.backend.free(ptr, queue);
                return Err(err);
            }
        };

        let block = Block {
            ptr,
            bytes: rounded,
            requested: bytes,
            bin,
            queue: queue.clone(),
            event,
        };

        let (live, free);
        {
            let mut state = self.state.lock()?;
            state.bytes.live += rounded;
            state.bytes.requested += bytes;
            state.live.insert(ptr, block);
            live = state.bytes.live;
            free = state.bytes.free;
        }

        if self.debug {
            tracing::debug!(
                "{} allocated new block at {:#x} ({}); {} live, {} cached",
                self.backend.describe(),
                ptr.addr(),
                as_bytes(rounded),
                as_bytes(live),
                as_bytes(free)
            );
        }

        Ok(ptr)
    }

    // Scan the requested bin for a reusable cached block and move it to
    // the live map. Must run under the mutex in one critical section: the
    // eligibility check and the removal have to be atomic.
    fn try_reuse(
        &self,
        bin: u32,
        requested: usize,
        queue: &B::Queue,
    ) -> AllocResult<Option<DevicePtr>> {
        let mut guard = self.state.lock()?;
        let state = &mut *guard;

        let Some(blocks) = state.cached.get_mut(&bin) else {
            return Ok(None);
        };

        let mut found = None;
        for (index, candidate) in blocks.iter().enumerate() {
            // Fast path: the driver serialises work within one queue, so a
            // block last used on the requesting queue is free by the time
            // any new work on that queue starts.
            let reusable = (self.reuse_same_queue && B::queue_equals(&candidate.queue, queue))
                || self.backend.event_completed(&candidate.event)?;
            if reusable {
                found = Some(index);
                break;
            }
        }

        let Some(index) = found else {
            return Ok(None);
        };

        let mut block = blocks.remove(index);
        let bin_empty = blocks.is_empty();
        if bin_empty {
            state.cached.remove(&bin);
        }

        // Pinned-host blocks may hop between devices; refresh the event on
        // the new queue so it keeps referring to the block's owner.
        let crossed_device = !B::same_device(&block.queue, queue);
        block.queue = queue.clone();
        if crossed_device {
            self.backend.record_event(&block.event, queue)?;
        }
        block.requested = requested;

        state.bytes.free -= block.bytes;
        state.bytes.live += block.bytes;
        state.bytes.requested += requested;

        let ptr = block.ptr;
        let bytes = block.bytes;
        state.live.insert(ptr, block);

        if self.debug {
            tracing::debug!(
                "{} reused cached block at {:#x} ({}); {} live, {} cached in {} blocks",
                self.backend.describe(),
                ptr.addr(),
                as_bytes(bytes),
                as_bytes(state.bytes.live),
                as_bytes(state.bytes.free),
                state.cached_block_count()
            );
        }

        Ok(Some(ptr))
    }

    /// Return a live block to the allocator.
    ///
    /// The block's event is re-recorded on its queue so a future reuser
    /// can poll for completion of this last use. The block is cached when
    /// it fits under the cache ceiling, otherwise released to the driver.
    ///
    /// # Errors
    ///
    /// [`AllocError::DoubleFreeOrForeign`] when `ptr` is not a live block
    /// of this allocator - a programming error.
    pub fn free(&self, ptr: DevicePtr) -> AllocResult<()> {
        let mut to_driver = None;
        let mut record_failure = None;

        {
            let mut guard = self.state.lock()?;
            let state = &mut *guard;

            let mut block = state
                .live
                .remove(&ptr)
                .ok_or(AllocError::DoubleFreeOrForeign { ptr: ptr.addr() })?;
            state.bytes.live -= block.bytes;
            state.bytes.requested -= block.requested;

            // The stored event must reflect the last work that used the
            // block; record it on the queue of that work.
            match self.backend.record_event(&block.event, &block.queue) {
                Ok(()) if state.bytes.free + block.bytes <= self.max_cached_bytes => {
                    state.bytes.free += block.bytes;
                    if self.debug {
                        tracing::debug!(
                            "{} returned {} at {:#x} to the cache; {} cached in {} blocks, {} live",
                            self.backend.describe(),
                            as_bytes(block.bytes),
                            ptr.addr(),
                            as_bytes(state.bytes.free),
                            state.cached_block_count() + 1,
                            as_bytes(state.bytes.live)
                        );
                    }
                    state.cached.entry(block.bin).or_default().push(block);
                }
                Ok(()) => to_driver = Some(block),
                Err(err) => {
                    // can't certify the block's last use; release it
                    record_failure = Some(err);
                    to_driver = Some(block);
                }
            }
        }

        if let Some(block) = to_driver {
            self.backend.free(block.ptr, &block.queue);
            if self.debug {
                tracing::debug!(
                    "{} freed {} at {:#x} to the driver",
                    self.backend.describe(),
                    as_bytes(block.bytes),
                    block.ptr.addr()
                );
            }
        }

        match record_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Release every cached block back to the driver. Live blocks and
    /// their counters are untouched.
    pub fn free_all_cached(&self) -> AllocResult<()> {
        let mut guard = self.state.lock()?;
        let state = &mut *guard;

        while let Some((_, blocks)) = state.cached.pop_first() {
            for block in blocks {
                state.bytes.free -= block.bytes;
                self.backend.free(block.ptr, &block.queue);
                if self.debug {
                    tracing::debug!(
                        "{} freed {} at {:#x}; {} cached, {} live",
                        self.backend.describe(),
                        as_bytes(block.bytes),
                        block.ptr.addr(),
                        as_bytes(state.bytes.free),
                        as_bytes(state.bytes.live)
                    );
                }
            }
        }

        debug_assert_eq!(state.bytes.free, 0);
        Ok(())
    }

    /// Atomic snapshot of the byte counters.
    pub fn cache_status(&self) -> AllocResult<CachedBytes> {
        Ok(self.state.lock()?.bytes)
    }
}

impl<B: MemoryBackend> Drop for CachingAllocator<B> {
    fn drop(&mut self) {
        // Dropping an allocator with live blocks is a programming error;
        // fail loudly rather than leak silently. Skipped when already
        // unwinding so a panicking test doesn't abort the process.
        if !std::thread::panicking() {
            let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
            assert!(
                state.live.is_empty(),
                "{} allocator dropped with {} live blocks ({} bytes) outstanding",
                self.backend.describe(),
                state.live.len(),
                state.bytes.live
            );
            assert_eq!(state.bytes.live, 0);
            assert_eq!(state.bytes.requested, 0);
        }
        if let Err(err) = self.free_all_cached() {
            tracing::error!("failed to drain cache on drop: {}", err);
        }
    }
}
