//! Device state storage
//!
//! This crate holds the lamp model and the narrow get/update contract the
//! event engine uses to read and mutate device state.

pub mod device;
pub mod error;
pub mod persistence;
pub mod store;

pub use device::Device;
pub use error::StoreError;
pub use store::{set_power, DeviceEvent, DeviceStore, JsonDeviceStore};
