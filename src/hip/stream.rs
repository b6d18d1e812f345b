//! HIP stream wrapper

use std::ptr;

use crate::hip::device_context;
use crate::hip::error::{HipError, HipResult};
use crate::hip::ffi;

// SAFETY: HipStream only contains a raw handle owned by the HIP runtime;
// stream operations are thread-safe on the driver side.
// NOTE: HipStream does NOT implement Clone because cloning the raw handle
// would cause a double hipStreamDestroy. Share streams as Arc<HipStream>.
unsafe impl Send for HipStream {}
unsafe impl Sync for HipStream {}

/// A HIP stream together with the device it was created on.
///
/// Work submitted to a single stream executes in FIFO order; the caching
/// allocator's same-queue reuse fast path relies on this.
#[derive(Debug)]
pub struct HipStream {
    stream: *mut std::ffi::c_void,
    device_index: i32,
}

impl HipStream {
    /// Create a new stream on the given device.
    pub fn new(device_index: i32) -> HipResult<Self> {
        device_context::ensure_device(device_index)?;

        let mut stream: *mut std::ffi::c_void = ptr::null_mut();
        let result = unsafe { ffi::hipStreamCreate(&mut stream) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(format!(
                "hipStreamCreate failed with code {}",
                result
            )));
        }
        if stream.is_null() {
            return Err(HipError::DeviceError(
                "hipStreamCreate returned null pointer".to_string(),
            ));
        }

        tracing::debug!("created stream {:?} on device {}", stream, device_index);
        Ok(HipStream { stream, device_index })
    }

    /// Index of the device this stream submits to.
    pub fn device_index(&self) -> i32 {
        self.device_index
    }

    /// True iff both streams target the same physical device.
    pub fn same_device(a: &HipStream, b: &HipStream) -> bool {
        a.device_index == b.device_index
    }

    /// True iff both handles denote the same submission stream.
    pub fn handle_equals(a: &HipStream, b: &HipStream) -> bool {
        a.stream == b.stream
    }

    /// Block the host until all work submitted to this stream has completed.
    pub fn synchronize(&self) -> HipResult<()> {
        let result = unsafe { ffi::hipStreamSynchronize(self.stream) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(format!(
                "stream synchronization failed with code {}",
                result
            )));
        }
        Ok(())
    }

    /// Raw stream handle for FFI calls.
    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.stream
    }
}

impl Drop for HipStream {
    fn drop(&mut self) {
        if !self.stream.is_null() {
            unsafe {
                ffi::hipStreamDestroy(self.stream);
            }
        }
    }
}
