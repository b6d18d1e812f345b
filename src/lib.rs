//! hipcache - Bin-based caching allocator for AMD GPU memory
//!
//! Raw `hipMalloc`/`hipFree` calls are orders of magnitude more expensive
//! than the kernels that consume the buffers. This crate sits between
//! application code and the HIP driver: freed buffers are kept in per-size
//! bins and handed back to later requests of the same size class, and the
//! driver is only called when no cached buffer can be safely reused. A
//! buffer returned to a caller is never still in use by device work
//! previously queued against it.
//!
//! The `rocm` feature links against the HIP runtime and enables the real
//! device and pinned-host backends plus the process-wide allocator registry.
//! Without it the crate builds the backend-generic core only, which the
//! test suite drives through a mock driver.

pub mod alloc;
pub mod error;
#[cfg(feature = "rocm")]
pub mod hip;

pub use crate::alloc::{
    AllocatorConfig, BinSchedule, CachedBytes, CachingAllocator, DevicePtr, MemoryBackend,
};
pub use crate::error::{AllocError, AllocResult};

#[cfg(feature = "rocm")]
pub use crate::alloc::{
    allocate_device, allocate_host, device_allocator_status, free_device, free_host, registry,
    DeviceBackend, PinnedHostBackend, Policy, Registry, POLICY,
};
