//! HIP FFI bindings
//!
//! Declarations are limited to the runtime entry points the allocator
//! actually calls. The dead_code allowance is needed because FFI symbols
//! appear unused to the compiler (they're only called through unsafe
//! blocks).

use std::ffi::c_void;

#[link(name = "amdhip64")]
#[allow(dead_code)]
extern "C" {
    pub fn hipInit(flags: u32) -> i32;
    pub fn hipGetDeviceCount(count: *mut i32) -> i32;
    pub fn hipGetDeviceProperties(props: *mut super::device::HipDeviceProp, deviceId: i32) -> i32;
    pub fn hipSetDevice(deviceId: i32) -> i32;
    pub fn hipGetDevice(deviceId: *mut i32) -> i32;
    pub fn hipMalloc(ptr: *mut *mut c_void, size: usize) -> i32;
    pub fn hipFree(ptr: *mut c_void) -> i32;
    pub fn hipHostMalloc(ptr: *mut *mut c_void, size: usize, flags: u32) -> i32;
    pub fn hipHostFree(ptr: *mut c_void) -> i32;
    pub fn hipMallocAsync(ptr: *mut *mut c_void, size: usize, stream: *mut c_void) -> i32;
    pub fn hipFreeAsync(ptr: *mut c_void, stream: *mut c_void) -> i32;
    pub fn hipStreamCreate(stream: *mut *mut c_void) -> i32;
    pub fn hipStreamDestroy(stream: *mut c_void) -> i32;
    pub fn hipStreamSynchronize(stream: *mut c_void) -> i32;
    pub fn hipEventCreateWithFlags(event: *mut *mut c_void, flags: u32) -> i32;
    pub fn hipEventDestroy(event: *mut c_void) -> i32;
    pub fn hipEventRecord(event: *mut c_void, stream: *mut c_void) -> i32;
    pub fn hipEventQuery(event: *mut c_void) -> i32;
    pub fn hipEventSynchronize(event: *mut c_void) -> i32;
    pub fn hipGetErrorString(error: i32) -> *const i8;
}

/// HIP success code
pub const HIP_SUCCESS: i32 = 0;

/// hipErrorOutOfMemory - the driver cannot satisfy the allocation
pub const HIP_ERROR_OUT_OF_MEMORY: i32 = 2;

/// hipErrorNotReady - returned by hipEventQuery while captured work is
/// still running; not a failure
pub const HIP_ERROR_NOT_READY: i32 = 600;

/// Event flag to disable timing data collection. Events used only for
/// synchronization are cheaper without timing.
pub const HIP_EVENT_DISABLE_TIMING: u32 = 0x2;

/// Default flags for hipHostMalloc (portable pinned memory)
pub const HIP_HOST_MALLOC_DEFAULT: u32 = 0x0;
