//! HIP event wrapper
//!
//! Events track completion of work across streams. The caching allocator
//! records an event on a block's stream when the block is freed; a later
//! request may only reuse the block from a different stream once the event
//! reports complete.

use std::ptr;

use crate::hip::error::{HipError, HipResult};
use crate::hip::ffi;
use crate::hip::stream::HipStream;

// SAFETY: HipEvent only contains a raw handle owned by the HIP runtime.
// NOTE: no Clone - cloning the raw handle would double hipEventDestroy.
unsafe impl Send for HipEvent {}
unsafe impl Sync for HipEvent {}

#[derive(Debug)]
pub struct HipEvent {
    event: *mut std::ffi::c_void,
}

impl HipEvent {
    /// Create a new event with timing disabled.
    ///
    /// The allocator only uses events for synchronization; disabling timing
    /// makes record and query cheaper.
    pub fn new() -> HipResult<Self> {
        let mut event: *mut std::ffi::c_void = ptr::null_mut();
        let result =
            unsafe { ffi::hipEventCreateWithFlags(&mut event, ffi::HIP_EVENT_DISABLE_TIMING) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(format!(
                "hipEventCreateWithFlags failed with code {}",
                result
            )));
        }
        if event.is_null() {
            return Err(HipError::DeviceError(
                "hipEventCreateWithFlags returned null pointer".to_string(),
            ));
        }
        Ok(HipEvent { event })
    }

    /// Record this event on the given stream.
    ///
    /// The event completes once all work submitted to the stream before
    /// this call has completed. Re-recording an already recorded event
    /// overwrites its capture point.
    pub fn record(&self, stream: &HipStream) -> HipResult<()> {
        let result = unsafe { ffi::hipEventRecord(self.event, stream.as_ptr()) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(format!(
                "hipEventRecord failed with code {}",
                result
            )));
        }
        Ok(())
    }

    /// Non-blocking completion poll.
    ///
    /// An event that has never been recorded polls complete.
    pub fn query(&self) -> HipResult<bool> {
        let result = unsafe { ffi::hipEventQuery(self.event) };
        match result {
            ffi::HIP_SUCCESS => Ok(true),
            ffi::HIP_ERROR_NOT_READY => Ok(false),
            _ => Err(HipError::MemoryQueryFailed(format!(
                "hipEventQuery failed with code {}",
                result
            ))),
        }
    }

    /// Block the host until the captured work has completed.
    pub fn synchronize(&self) -> HipResult<()> {
        let result = unsafe { ffi::hipEventSynchronize(self.event) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(format!(
                "hipEventSynchronize failed with code {}",
                result
            )));
        }
        Ok(())
    }
}

impl Drop for HipEvent {
    fn drop(&mut self) {
        if !self.event.is_null() {
            unsafe {
                ffi::hipEventDestroy(self.event);
            }
        }
    }
}
