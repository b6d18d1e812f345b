//! Process-wide allocator registry
//!
//! One caching allocator per enumerated device, plus one over pinned host
//! memory. Initialisation is lazy and one-shot: the first caller of
//! [`registry`] pays for device discovery, concurrent first callers all
//! observe the same fully initialised registry, and the static instance
//! deliberately leaks on shutdown so no allocator destructor races the
//! HIP runtime teardown.

use std::collections::BTreeMap;

use once_cell::sync::OnceCell;

use crate::alloc::backend::{DeviceBackend, PinnedHostBackend};
use crate::alloc::caching::{CachedBytes, CachingAllocator};
use crate::alloc::config::AllocatorConfig;
use crate::error::{AllocError, AllocResult};
use crate::hip;

pub struct Registry {
    // host is an Option only so Drop can control destruction order
    host: Option<CachingAllocator<PinnedHostBackend>>,
    devices: Vec<CachingAllocator<DeviceBackend>>,
}

impl Registry {
    fn discover() -> AllocResult<Self> {
        let devices = hip::enumerate_devices().map_err(AllocError::from)?;
        tracing::info!("initialising caching allocators for {} device(s)", devices.len());

        let mut allocators = Vec::with_capacity(devices.len());
        for device in &devices {
            allocators.push(CachingAllocator::new(
                DeviceBackend::new(device.clone()),
                AllocatorConfig::default(),
            ));
        }

        // The pinned-host cache ceiling follows the smallest device memory,
        // the same bound a per-device allocator would get.
        let smallest_mem = devices.iter().map(|d| d.total_mem).min().unwrap_or(0);
        let host = CachingAllocator::new(
            PinnedHostBackend::new(smallest_mem),
            AllocatorConfig::default(),
        );

        Ok(Registry {
            host: Some(host),
            devices: allocators,
        })
    }

    /// Number of device allocators (equals the enumerated device count).
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// The caching allocator for device `index`.
    ///
    /// # Panics
    ///
    /// On an index outside the enumerated device range - a programming
    /// error, not a runtime condition.
    pub fn device_allocator(&self, index: usize) -> &CachingAllocator<DeviceBackend> {
        &self.devices[index]
    }

    /// The caching allocator over pinned host memory.
    pub fn host_allocator(&self) -> &CachingAllocator<PinnedHostBackend> {
        self.host.as_ref().expect("host allocator present until drop")
    }

    /// Counter snapshots for every device allocator, keyed by device index.
    pub fn status(&self) -> AllocResult<BTreeMap<usize, CachedBytes>> {
        let mut status = BTreeMap::new();
        for (index, allocator) in self.devices.iter().enumerate() {
            status.insert(index, allocator.cache_status()?);
        }
        Ok(status)
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        // Host allocator first, then device allocators in reverse index
        // order. Each drop asserts its live-block invariant.
        self.host.take();
        while self.devices.pop().is_some() {}
    }
}

static REGISTRY: OnceCell<Registry> = OnceCell::new();

/// The process-wide allocator registry, initialised on first use.
///
/// Returns an error when device enumeration fails; the failure is not
/// cached, so a later call retries.
pub fn registry() -> AllocResult<&'static Registry> {
    REGISTRY.get_or_try_init(Registry::discover)
}
