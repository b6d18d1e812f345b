//! Memory backend capability set
//!
//! The caching allocator core is generic over a [`MemoryBackend`] that
//! supplies raw allocation, queue identity and event operations. Two real
//! backends exist under the `rocm` feature, one for device memory and one
//! for pinned host memory; they differ only in the driver calls that back
//! `malloc` and `free`. Selection is at instantiation time, so the hot
//! path has no dynamic dispatch.

use std::ffi::c_void;
use std::ptr::NonNull;

use crate::error::AllocResult;

// SAFETY: DevicePtr is a raw device address; it is never dereferenced on
// the host and ownership is tracked by the allocator's block maps.
unsafe impl Send for DevicePtr {}
unsafe impl Sync for DevicePtr {}

/// A non-null raw allocation handle returned by a memory backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(NonNull<c_void>);

impl DevicePtr {
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(DevicePtr)
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }

    /// Numeric address, for diagnostics and error reporting.
    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }
}

/// The capability set the caching allocator consumes.
pub trait MemoryBackend: Send + Sync {
    /// Submission queue handle. Cheap to clone; one block stores the queue
    /// of its last use.
    type Queue: Clone + Send + Sync;
    /// Completion token recorded on a queue. Owned by a block and dropped
    /// with it.
    type Event: Send + Sync;

    /// Raw driver allocation on the queue's device. Fails with
    /// [`crate::AllocError::OutOfMemory`] when the driver cannot satisfy
    /// the request.
    fn malloc(&self, bytes: usize, queue: &Self::Queue) -> AllocResult<DevicePtr>;

    /// Raw driver deallocation. Must not fail on a pointer previously
    /// returned by `malloc`; driver-side problems are logged, not raised.
    fn free(&self, ptr: DevicePtr, queue: &Self::Queue);

    /// A fresh event, not yet recorded. An unrecorded event polls complete.
    fn create_event(&self) -> AllocResult<Self::Event>;

    /// Record `event` on `queue`; the event completes once all work
    /// submitted to `queue` before this call has completed.
    fn record_event(&self, event: &Self::Event, queue: &Self::Queue) -> AllocResult<()>;

    /// Non-blocking completion poll.
    fn event_completed(&self, event: &Self::Event) -> AllocResult<bool>;

    /// True iff both queues target the same physical device.
    fn same_device(a: &Self::Queue, b: &Self::Queue) -> bool;

    /// True iff both handles denote the same submission stream.
    fn queue_equals(a: &Self::Queue, b: &Self::Queue) -> bool;

    /// Printable descriptor for diagnostics.
    fn describe(&self) -> String;

    /// Total memory backing this allocator, consumed by the fractional
    /// cache ceiling. 0 means unknown (no fractional limit).
    fn total_memory(&self) -> usize;
}

#[cfg(feature = "rocm")]
pub use rocm::{DeviceBackend, PinnedHostBackend};
#[cfg(feature = "rocm")]
pub(crate) use rocm::check_malloc;

#[cfg(feature = "rocm")]
mod rocm {
    use std::ptr;
    use std::sync::Arc;

    use super::{DevicePtr, MemoryBackend};
    use crate::error::{AllocError, AllocResult};
    use crate::hip::device::HipDevice;
    use crate::hip::error::HipError;
    use crate::hip::{device_context, ffi, get_error_string, HipEvent, HipStream};

    pub(crate) fn check_malloc(
        result: i32,
        ptr: *mut std::ffi::c_void,
        bytes: usize,
    ) -> AllocResult<DevicePtr> {
        match result {
            ffi::HIP_SUCCESS => DevicePtr::new(ptr).ok_or_else(|| {
                AllocError::from(HipError::MemoryAllocationFailed(format!(
                    "driver returned null pointer for {} bytes",
                    bytes
                )))
            }),
            ffi::HIP_ERROR_OUT_OF_MEMORY => Err(AllocError::from(HipError::OutOfMemory { bytes })),
            other => Err(AllocError::from(HipError::MemoryAllocationFailed(format!(
                "allocation of {} bytes failed: {}",
                bytes,
                get_error_string(other)
            )))),
        }
    }

    /// Device global memory backend, one instance per device.
    #[derive(Debug, Clone)]
    pub struct DeviceBackend {
        device: HipDevice,
    }

    impl DeviceBackend {
        pub fn new(device: HipDevice) -> Self {
            DeviceBackend { device }
        }

        pub fn device(&self) -> &HipDevice {
            &self.device
        }
    }

    impl MemoryBackend for DeviceBackend {
        type Queue = Arc<HipStream>;
        type Event = HipEvent;

        fn malloc(&self, bytes: usize, queue: &Self::Queue) -> AllocResult<DevicePtr> {
            debug_assert_eq!(queue.device_index(), self.device.index);
            device_context::ensure_device(queue.device_index())?;

            let mut ptr: *mut std::ffi::c_void = ptr::null_mut();
            let result = unsafe { ffi::hipMalloc(&mut ptr, bytes) };
            check_malloc(result, ptr, bytes)
        }

        fn free(&self, ptr: DevicePtr, queue: &Self::Queue) {
            if let Err(err) = device_context::ensure_device(queue.device_index()) {
                tracing::error!("hipFree skipped, cannot select device: {}", err);
                return;
            }
            let result = unsafe { ffi::hipFree(ptr.as_ptr()) };
            if result != ffi::HIP_SUCCESS {
                tracing::error!(
                    "hipFree({:#x}) failed: {}",
                    ptr.addr(),
                    get_error_string(result)
                );
            }
        }

        fn create_event(&self) -> AllocResult<HipEvent> {
            Ok(HipEvent::new()?)
        }

        fn record_event(&self, event: &HipEvent, queue: &Self::Queue) -> AllocResult<()> {
            Ok(event.record(queue)?)
        }

        fn event_completed(&self, event: &HipEvent) -> AllocResult<bool> {
            Ok(event.query()?)
        }

        fn same_device(a: &Self::Queue, b: &Self::Queue) -> bool {
            HipStream::same_device(a, b)
        }

        fn queue_equals(a: &Self::Queue, b: &Self::Queue) -> bool {
            HipStream::handle_equals(a, b)
        }

        fn describe(&self) -> String {
            format!("device {} ({})", self.device.index, self.device.name)
        }

        fn total_memory(&self) -> usize {
            self.device.total_mem
        }
    }

    /// Pinned host memory backend; a single instance serves all devices.
    ///
    /// Pinned memory is host RAM accessible by every device, so blocks may
    /// be reused across queues of different devices once their event has
    /// completed.
    #[derive(Debug, Clone)]
    pub struct PinnedHostBackend {
        total_memory: usize,
    }

    impl PinnedHostBackend {
        /// `total_memory` bounds the fractional cache ceiling; the registry
        /// passes the smallest device memory, matching the per-device limit.
        pub fn new(total_memory: usize) -> Self {
            PinnedHostBackend { total_memory }
        }
    }

    impl MemoryBackend for PinnedHostBackend {
        type Queue = Arc<HipStream>;
        type Event = HipEvent;

        fn malloc(&self, bytes: usize, _queue: &Self::Queue) -> AllocResult<DevicePtr> {
            let mut ptr: *mut std::ffi::c_void = ptr::null_mut();
            let result =
                unsafe { ffi::hipHostMalloc(&mut ptr, bytes, ffi::HIP_HOST_MALLOC_DEFAULT) };
            check_malloc(result, ptr, bytes)
        }

        fn free(&self, ptr: DevicePtr, _queue: &Self::Queue) {
            let result = unsafe { ffi::hipHostFree(ptr.as_ptr()) };
            if result != ffi::HIP_SUCCESS {
                tracing::error!(
                    "hipHostFree({:#x}) failed: {}",
                    ptr.addr(),
                    get_error_string(result)
                );
            }
        }

        fn create_event(&self) -> AllocResult<HipEvent> {
            Ok(HipEvent::new()?)
        }

        fn record_event(&self, event: &HipEvent, queue: &Self::Queue) -> AllocResult<()> {
            device_context::ensure_device(queue.device_index())?;
            Ok(event.record(queue)?)
        }

        fn event_completed(&self, event: &HipEvent) -> AllocResult<bool> {
            Ok(event.query()?)
        }

        fn same_device(a: &Self::Queue, b: &Self::Queue) -> bool {
            HipStream::same_device(a, b)
        }

        fn queue_equals(a: &Self::Queue, b: &Self::Queue) -> bool {
            HipStream::handle_equals(a, b)
        }

        fn describe(&self) -> String {
            "pinned host memory".to_string()
        }

        fn total_memory(&self) -> usize {
            self.total_memory
        }
    }
}
