//! HIP runtime layer
//!
//! Thin wrappers over the subset of the HIP runtime API the allocator
//! consumes: device enumeration, streams, events, and raw memory calls.

pub mod device;
pub mod device_context;
pub mod error;
pub mod event;
pub mod ffi;
pub mod stream;

pub use device::{enumerate_devices, get_error_string, HipDevice, HipDeviceProp};
pub use device_context::{current_device, ensure_device};
pub use error::{HipError, HipResult};
pub use event::HipEvent;
pub use stream::HipStream;
