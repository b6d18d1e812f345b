//! Dispatcher and registry tests against a real HIP device.
//!
//! These only build with the `rocm` feature and need at least one GPU;
//! they are serialised because the registry and the HIP device context
//! are process-wide.

#![cfg(feature = "rocm")]

use std::sync::Arc;

use serial_test::serial;

use hipcache::hip::{enumerate_devices, HipStream};
use hipcache::{
    allocate_device, allocate_host, device_allocator_status, free_device, free_host, registry,
};

#[test]
#[serial]
fn enumeration_finds_at_least_one_device() {
    let devices = enumerate_devices().expect("no HIP device available");
    assert!(!devices.is_empty());
    for (index, device) in devices.iter().enumerate() {
        assert_eq!(device.index as usize, index);
        assert!(device.total_mem > 0);
    }
}

#[test]
#[serial]
fn registry_is_shared_between_callers() {
    let first = registry().expect("registry init failed");
    let second = registry().expect("registry init failed");
    assert!(std::ptr::eq(first, second));
    assert_eq!(
        first.device_count(),
        enumerate_devices().unwrap().len()
    );
}

#[test]
#[serial]
fn device_roundtrip_through_the_dispatcher() {
    let queue = Arc::new(HipStream::new(0).expect("stream creation failed"));

    let ptr = allocate_device(0, 1024, &queue).expect("device allocation failed");
    let status = device_allocator_status().expect("status failed");
    if let Some(bytes) = status.get(&0) {
        assert!(bytes.live >= 1024);
    }
    free_device(0, ptr, &queue).expect("device free failed");

    // the cached block comes straight back on the same stream
    let again = allocate_device(0, 1024, &queue).expect("second allocation failed");
    free_device(0, again, &queue).expect("second free failed");
}

#[test]
#[serial]
fn pinned_host_roundtrip_is_host_accessible() {
    let queue = Arc::new(HipStream::new(0).expect("stream creation failed"));

    let ptr = allocate_host(4096, &queue).expect("pinned allocation failed");
    // pinned memory is host-addressable; touch it directly
    unsafe {
        std::ptr::write_bytes(ptr.as_ptr() as *mut u8, 0xab, 4096);
    }
    free_host(ptr, &queue).expect("pinned free failed");
}
