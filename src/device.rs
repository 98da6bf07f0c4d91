//! Device control
//!
//! Thin wrapper over the external `adb` tool. Only what the device tools need
//! is exposed: listing devices, running shell commands, reading properties,
//! root detection and reverse port forwarding.

pub mod adb_client;

pub use adb_client::{AdbClient, DeviceControl, DeviceInfo};
