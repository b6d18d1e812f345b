//! Bin-based caching allocation
//!
//! [`CachingAllocator`] is the backend-generic core; [`registry`] holds
//! the process-wide per-device instances and [`allocate_device`] /
//! [`free_device`] are the policy-dispatched entry points the rest of a
//! pipeline calls.

pub mod backend;
pub mod bins;
pub mod caching;
pub mod config;
#[cfg(feature = "rocm")]
pub mod dispatch;
#[cfg(feature = "rocm")]
pub mod registry;

pub use backend::{DevicePtr, MemoryBackend};
pub use bins::{as_bytes, power, BinSchedule};
pub use caching::{CachedBytes, CachingAllocator};
pub use config::AllocatorConfig;

#[cfg(feature = "rocm")]
pub use backend::{DeviceBackend, PinnedHostBackend};
#[cfg(feature = "rocm")]
pub use dispatch::{
    allocate_device, allocate_host, device_allocator_status, free_device, free_host, Policy,
    POLICY,
};
#[cfg(feature = "rocm")]
pub use registry::{registry, Registry};
