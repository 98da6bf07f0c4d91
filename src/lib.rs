pub mod configuration;
pub mod device;
pub mod error_handling;
pub mod storage;
pub mod tools;
pub mod traffic;
pub mod web_interface;
