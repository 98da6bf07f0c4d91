pub mod device_tools;
pub mod traffic_tools;

pub use device_tools::DeviceTools;
pub use traffic_tools::{ListParams, ReadBodyParams, SearchParams, TrafficTools};
