//! Thread-local HIP device context management
//!
//! The HIP device context is per-thread: hipSetDevice() only affects the
//! calling thread, and allocations land on the calling thread's current
//! device. The current device is cached per thread to avoid repeated
//! hipGetDevice() calls on the allocation path.

use std::cell::Cell;

use crate::hip::device::get_error_string;
use crate::hip::error::{HipError, HipResult};
use crate::hip::ffi;

thread_local! {
    static THREAD_DEVICE: Cell<i32> = const { Cell::new(-1) };
}

/// Current HIP device for this thread, cached after the first query.
pub fn current_device() -> HipResult<i32> {
    THREAD_DEVICE.with(|cell| {
        let cached = cell.get();
        if cached >= 0 {
            return Ok(cached);
        }

        let mut device: i32 = -1;
        let result = unsafe { ffi::hipGetDevice(&mut device) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(format!(
                "hipGetDevice failed: {}",
                get_error_string(result)
            )));
        }

        cell.set(device);
        Ok(device)
    })
}

/// Make `device` the calling thread's current device if it isn't already.
pub fn ensure_device(device: i32) -> HipResult<()> {
    let current = current_device()?;
    if current != device {
        tracing::trace!("switching thread device {} -> {}", current, device);
        let result = unsafe { ffi::hipSetDevice(device) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(format!(
                "hipSetDevice({}) failed: {}",
                device,
                get_error_string(result)
            )));
        }
        THREAD_DEVICE.with(|cell| cell.set(device));
    }
    Ok(())
}
