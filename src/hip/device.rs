//! HIP device enumeration and properties

use std::ffi::CStr;

use crate::hip::error::{HipError, HipResult};
use crate::hip::ffi;

// Opaque buffer for hipDeviceProp_t - MUST be exactly 1472 bytes to match
// C's sizeof(hipDeviceProp_t) for ROCm 7.x. If C writes it, Rust must
// allocate exactly the same bytes. We read the two fields we need through
// accessor methods at verified offsets.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct HipDeviceProp {
    _buffer: [u8; 1472],
}

impl HipDeviceProp {
    // char name[256] at the start of the struct
    const NAME_OFFSET: usize = 0;

    // size_t totalGlobalMem
    // After: name[256] (256) + uuid (16) + luid[8] (8) + luidDeviceNodeMask (4)
    // + 4 bytes of alignment padding = 288
    const TOTAL_GLOBAL_MEM_OFFSET: usize = 288;

    /// Device name (null-terminated C string)
    pub fn name(&self) -> String {
        let name_bytes = &self._buffer[Self::NAME_OFFSET..Self::NAME_OFFSET + 256];
        let len = name_bytes.iter().position(|&c| c == 0).unwrap_or(256);
        String::from_utf8_lossy(&name_bytes[..len]).into_owned()
    }

    /// Total global memory in bytes
    pub fn total_global_mem(&self) -> u64 {
        let bytes =
            &self._buffer[Self::TOTAL_GLOBAL_MEM_OFFSET..Self::TOTAL_GLOBAL_MEM_OFFSET + 8];
        bytes.try_into().map(u64::from_ne_bytes).unwrap_or_else(|_| {
            tracing::error!("hipDeviceProp_t field access failed: totalGlobalMem slice has wrong length");
            0
        })
    }
}

impl Default for HipDeviceProp {
    fn default() -> Self {
        HipDeviceProp { _buffer: [0u8; 1472] }
    }
}

/// A discovered HIP device
#[derive(Debug, Clone)]
pub struct HipDevice {
    pub index: i32,
    pub name: String,
    pub total_mem: usize,
}

/// Get HIP error string from error code
pub fn get_error_string(error: i32) -> String {
    unsafe {
        let error_ptr = ffi::hipGetErrorString(error);
        if error_ptr.is_null() {
            "unknown error".to_string()
        } else {
            CStr::from_ptr(error_ptr).to_string_lossy().into_owned()
        }
    }
}

/// Enumerate all HIP devices in driver order.
///
/// The order is stable for the lifetime of the process; the allocator
/// registry indexes its per-device allocators by position in this list.
pub fn enumerate_devices() -> HipResult<Vec<HipDevice>> {
    let result = unsafe { ffi::hipInit(0) };
    if result != ffi::HIP_SUCCESS {
        return Err(HipError::InitializationFailed(format!(
            "hipInit failed: {}",
            get_error_string(result)
        )));
    }

    let mut count: i32 = 0;
    let result = unsafe { ffi::hipGetDeviceCount(&mut count) };
    if result != ffi::HIP_SUCCESS {
        return Err(HipError::DeviceNotFound);
    }
    if count == 0 {
        return Err(HipError::DeviceNotFound);
    }

    let mut devices = Vec::with_capacity(count as usize);
    for index in 0..count {
        let mut props = HipDeviceProp::default();
        let result = unsafe { ffi::hipGetDeviceProperties(&mut props, index) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(format!(
                "hipGetDeviceProperties({}) failed: {}",
                index,
                get_error_string(result)
            )));
        }
        tracing::debug!(
            "device {}: {} ({} MB)",
            index,
            props.name(),
            props.total_global_mem() / (1024 * 1024)
        );
        devices.push(HipDevice {
            index,
            name: props.name(),
            total_mem: props.total_global_mem() as usize,
        });
    }

    Ok(devices)
}
