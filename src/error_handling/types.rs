use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failures surfaced by a traffic store.
///
/// Corrupt per-record sub-fields (headers, timing) are not represented here:
/// they are recovered while decoding rows and never reach the caller.
#[derive(Debug)]
pub enum StorageError {
    /// The backing database file does not exist. An empty store is not this.
    NotInitialized(PathBuf),
    NotFound(String),
    /// The database stayed locked by another writer past the busy timeout.
    Contention,
    ConnectionFailed,
    WriteFailed,
    ReadFailed,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotInitialized(p) => {
                write!(f, "Storage not initialized: {} does not exist", p.display())
            }
            StorageError::NotFound(id) => write!(f, "Record not found: {}", id),
            StorageError::Contention => write!(f, "Storage is locked by another writer"),
            StorageError::ConnectionFailed => write!(f, "Storage connection failed"),
            StorageError::WriteFailed => write!(f, "Storage write failed"),
            StorageError::ReadFailed => write!(f, "Storage read failed"),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum DeviceError {
    /// The `adb` executable could not be spawned.
    NotAvailable(String),
    CommandFailed { code: i32, stderr: String },
    Timeout(String),
    DeviceNotFound(String),
    DeviceOffline { serial: String, state: String },
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NotAvailable(e) => write!(f, "ADB not available: {}", e),
            DeviceError::CommandFailed { code, stderr } => {
                write!(f, "ADB command failed with code {}: {}", code, stderr)
            }
            DeviceError::Timeout(cmd) => write!(f, "ADB command timed out: {}", cmd),
            DeviceError::DeviceNotFound(serial) => write!(f, "Device not found: {}", serial),
            DeviceError::DeviceOffline { serial, state } => {
                write!(f, "Device is not online: {} (state: {})", serial, state)
            }
        }
    }
}

impl std::error::Error for DeviceError {}

#[derive(Debug)]
pub enum ToolError {
    StorageError(StorageError),
    DeviceError(DeviceError),
    InvalidArgument(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::StorageError(e) => write!(f, "{}", e),
            ToolError::DeviceError(e) => write!(f, "ADB error: {}", e),
            ToolError::InvalidArgument(e) => write!(f, "Invalid argument: {}", e),
        }
    }
}

impl std::error::Error for ToolError {}

impl From<StorageError> for ToolError {
    fn from(err: StorageError) -> Self {
        ToolError::StorageError(err)
    }
}

impl From<DeviceError> for ToolError {
    fn from(err: DeviceError) -> Self {
        ToolError::DeviceError(err)
    }
}

#[derive(Debug)]
pub enum WebError {
    InvalidAddress(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::InvalidAddress(addr) => write!(f, "Invalid bind address: {}", addr),
        }
    }
}

impl std::error::Error for WebError {}
