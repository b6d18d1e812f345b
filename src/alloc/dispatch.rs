//! Policy dispatch
//!
//! The allocation policy is fixed per build: caching by default, the
//! `disable-caching-allocator` feature falls back to stream-ordered
//! hipMallocAsync, and adding `disable-async-allocator` falls back to
//! synchronous hipMalloc. Switching policy is not a runtime capability.

use std::collections::BTreeMap;
use std::ptr;
use std::sync::Arc;

use crate::alloc::backend::{check_malloc, DevicePtr};
use crate::alloc::bins::power;
use crate::alloc::caching::CachedBytes;
use crate::alloc::config::{BIN_GROWTH, MAX_BIN};
use crate::alloc::registry::registry;
use crate::error::{AllocError, AllocResult};
use crate::hip::{device_context, ffi, get_error_string, HipStream};

/// How device allocations are satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Bin-based caching allocator (the default).
    Caching,
    /// Stream-ordered driver allocation (hipMallocAsync).
    StreamOrdered,
    /// Synchronous driver allocation (hipMalloc).
    Synchronous,
}

#[cfg(not(feature = "disable-caching-allocator"))]
pub const POLICY: Policy = Policy::Caching;
#[cfg(all(
    feature = "disable-caching-allocator",
    not(feature = "disable-async-allocator")
))]
pub const POLICY: Policy = Policy::StreamOrdered;
#[cfg(all(feature = "disable-caching-allocator", feature = "disable-async-allocator"))]
pub const POLICY: Policy = Policy::Synchronous;

/// Largest request the caching policy accepts.
const MAX_ALLOCATION_SIZE: usize = power(BIN_GROWTH as usize, MAX_BIN);

/// Allocate `bytes` of device memory on `device` for use on `queue`.
pub fn allocate_device(
    device: usize,
    bytes: usize,
    queue: &Arc<HipStream>,
) -> AllocResult<DevicePtr> {
    match POLICY {
        Policy::Caching => {
            if bytes > MAX_ALLOCATION_SIZE {
                return Err(AllocError::TooLarge {
                    requested: bytes,
                    max: MAX_ALLOCATION_SIZE,
                });
            }
            registry()?.device_allocator(device).allocate(bytes, queue)
        }
        Policy::StreamOrdered => {
            device_context::ensure_device(device as i32).map_err(AllocError::from)?;
            let mut raw: *mut std::ffi::c_void = ptr::null_mut();
            let result = unsafe { ffi::hipMallocAsync(&mut raw, bytes, queue.as_ptr()) };
            check_malloc(result, raw, bytes)
        }
        Policy::Synchronous => {
            device_context::ensure_device(device as i32).map_err(AllocError::from)?;
            let mut raw: *mut std::ffi::c_void = ptr::null_mut();
            let result = unsafe { ffi::hipMalloc(&mut raw, bytes) };
            check_malloc(result, raw, bytes)
        }
    }
}

/// Free device memory previously obtained from [`allocate_device`] under
/// the same build policy.
pub fn free_device(device: usize, ptr: DevicePtr, queue: &Arc<HipStream>) -> AllocResult<()> {
    match POLICY {
        Policy::Caching => registry()?.device_allocator(device).free(ptr),
        Policy::StreamOrdered => {
            device_context::ensure_device(device as i32).map_err(AllocError::from)?;
            let result = unsafe { ffi::hipFreeAsync(ptr.as_ptr(), queue.as_ptr()) };
            if result != ffi::HIP_SUCCESS {
                return Err(AllocError::Driver(format!(
                    "hipFreeAsync failed: {}",
                    get_error_string(result)
                )));
            }
            Ok(())
        }
        Policy::Synchronous => {
            device_context::ensure_device(device as i32).map_err(AllocError::from)?;
            let result = unsafe { ffi::hipFree(ptr.as_ptr()) };
            if result != ffi::HIP_SUCCESS {
                return Err(AllocError::Driver(format!(
                    "hipFree failed: {}",
                    get_error_string(result)
                )));
            }
            Ok(())
        }
    }
}

/// Allocate pinned host memory for use on `queue`.
///
/// There is no stream-ordered variant of pinned allocation; the non-caching
/// policies both go straight to hipHostMalloc.
pub fn allocate_host(bytes: usize, queue: &Arc<HipStream>) -> AllocResult<DevicePtr> {
    match POLICY {
        Policy::Caching => {
            if bytes > MAX_ALLOCATION_SIZE {
                return Err(AllocError::TooLarge {
                    requested: bytes,
                    max: MAX_ALLOCATION_SIZE,
                });
            }
            registry()?.host_allocator().allocate(bytes, queue)
        }
        Policy::StreamOrdered | Policy::Synchronous => {
            let mut raw: *mut std::ffi::c_void = ptr::null_mut();
            let result =
                unsafe { ffi::hipHostMalloc(&mut raw, bytes, ffi::HIP_HOST_MALLOC_DEFAULT) };
            check_malloc(result, raw, bytes)
        }
    }
}

/// Free pinned host memory previously obtained from [`allocate_host`].
pub fn free_host(ptr: DevicePtr, _queue: &Arc<HipStream>) -> AllocResult<()> {
    match POLICY {
        Policy::Caching => registry()?.host_allocator().free(ptr),
        Policy::StreamOrdered | Policy::Synchronous => {
            let result = unsafe { ffi::hipHostFree(ptr.as_ptr()) };
            if result != ffi::HIP_SUCCESS {
                return Err(AllocError::Driver(format!(
                    "hipHostFree failed: {}",
                    get_error_string(result)
                )));
            }
            Ok(())
        }
    }
}

/// Counter snapshots for every device allocator, keyed by device index.
///
/// Only meaningful under the caching policy; the fallback policies keep no
/// per-device state and report an empty map.
pub fn device_allocator_status() -> AllocResult<BTreeMap<usize, CachedBytes>> {
    match POLICY {
        Policy::Caching => registry()?.status(),
        Policy::StreamOrdered | Policy::Synchronous => Ok(BTreeMap::new()),
    }
}
