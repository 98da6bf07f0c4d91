use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error_handling::types::ConfigError;
use crate::storage::database_storage::DatabaseStorage;

/// Command-line arguments.
///
/// Every value is optional: anything left out falls back to the configuration
/// file given with `--config`, then to the built-in defaults of [`Config`].
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "droidtap")]
#[command(version)]
#[command(about = "Queryable store of HTTP traffic captured from Android devices")]
pub struct Args {
    /// TOML file providing base values
    ///
    /// # Command Line
    /// Use `--config <FILE>` or the `DROIDTAP_CONFIG` environment variable
    #[arg(long, env = "DROIDTAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database file shared between the capture process and the tools
    #[arg(long, env = "DROIDTAP_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Maximum number of records kept; the oldest are evicted past it
    #[arg(long, env = "DROIDTAP_MAX_SIZE")]
    pub max_size: Option<usize>,

    /// How long a store operation waits on a locked database, in seconds
    #[arg(long, env = "DROIDTAP_BUSY_TIMEOUT_SECS")]
    pub busy_timeout_secs: Option<u64>,

    /// IP address the HTTP interface listens on
    #[arg(long, env = "DROIDTAP_BIND_ADDRESS")]
    pub bind_address: Option<String>,

    /// Port of the HTTP interface
    #[arg(long, env = "DROIDTAP_WEB_PORT")]
    pub web_port: Option<u16>,

    /// Path to the `adb` executable
    #[arg(long, env = "DROIDTAP_ADB_PATH")]
    pub adb_path: Option<PathBuf>,
}

/// Resolved runtime configuration.
///
/// # Examples
///
/// ```
/// use droidtap::configuration::config::Config;
///
/// let config = Config::from_toml("max_size = 500").unwrap();
/// assert_eq!(config.max_size, 500);
/// assert_eq!(config.web_port, 8765);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub db_path: PathBuf,
    pub max_size: usize,
    pub busy_timeout_secs: u64,
    pub bind_address: String,
    pub web_port: u16,
    pub adb_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DatabaseStorage::DEFAULT_DB_PATH),
            max_size: DatabaseStorage::DEFAULT_MAX_SIZE,
            busy_timeout_secs: DatabaseStorage::DEFAULT_BUSY_TIMEOUT.as_secs(),
            bind_address: String::from("127.0.0.1"),
            web_port: 8765,
            adb_path: PathBuf::from("adb"),
        }
    }
}

impl Config {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Defaults, then the `--config` file, then explicit arguments.
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(db_path) = &args.db_path {
            config.db_path = db_path.clone();
        }
        if let Some(max_size) = args.max_size {
            config.max_size = max_size;
        }
        if let Some(secs) = args.busy_timeout_secs {
            config.busy_timeout_secs = secs;
        }
        if let Some(bind_address) = &args.bind_address {
            config.bind_address = bind_address.clone();
        }
        if let Some(port) = args.web_port {
            config.web_port = port;
        }
        if let Some(adb_path) = &args.adb_path {
            config.adb_path = adb_path.clone();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::NotInRange(
                "max_size must be at least 1".to_string(),
            ));
        }
        if self.busy_timeout_secs == 0 {
            return Err(ConfigError::NotInRange(
                "busy_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.web_port == 0 {
            return Err(ConfigError::NotInRange("web_port must not be 0".to_string()));
        }
        if self.bind_address.parse::<IpAddr>().is_err() {
            return Err(ConfigError::NotInRange(format!(
                "bind_address is not an IP address: {}",
                self.bind_address
            )));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }

    /// Listening address of the HTTP interface. Only valid after `validate`.
    pub fn web_address(&self) -> Option<SocketAddr> {
        let ip: IpAddr = self.bind_address.parse().ok()?;
        Some(SocketAddr::new(ip, self.web_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn args_under_test(extra: &[&str]) -> Result<Args, clap::Error> {
        let mut argv = vec!["droidtap"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.db_path, PathBuf::from("/tmp/android-proxy-traffic.db"));
        assert_eq!(config.max_size, 2000);
        assert_eq!(config.busy_timeout(), Duration::from_secs(10));
        assert_eq!(
            config.web_address(),
            Some("127.0.0.1:8765".parse().unwrap())
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = Config::from_toml("db_path = \"/data/t.db\"\nweb_port = 9000\n").unwrap();
        assert_eq!(config.db_path, PathBuf::from("/data/t.db"));
        assert_eq!(config.web_port, 9000);
        assert_eq!(config.max_size, 2000);
    }

    #[test]
    fn test_from_toml_rejects_bad_input() {
        assert!(matches!(
            Config::from_toml("max_size = \"lots\""),
            Err(ConfigError::TomlError(_))
        ));
        assert!(matches!(
            Config::from_toml("unknown_key = 1"),
            Err(ConfigError::TomlError(_))
        ));
        assert!(matches!(
            Config::from_toml("max_size = 0"),
            Err(ConfigError::NotInRange(_))
        ));
        assert!(matches!(
            Config::from_toml("bind_address = \"localhost:80\""),
            Err(ConfigError::NotInRange(_))
        ));
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_size = 50\nweb_port = 9000").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = args_under_test(&["--config", &path, "--web-port", "9100"]).unwrap();
        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.max_size, 50);
        assert_eq!(config.web_port, 9100);
    }

    #[test]
    fn test_missing_config_file() {
        let args = args_under_test(&["--config", "/nonexistent/droidtap.toml"]).unwrap();
        assert!(matches!(
            Config::from_args(&args),
            Err(ConfigError::IoError(_))
        ));
    }

    #[test]
    fn test_invalid_cli_value() {
        let args = args_under_test(&["--busy-timeout-secs", "0"]).unwrap();
        assert!(matches!(
            Config::from_args(&args),
            Err(ConfigError::NotInRange(_))
        ));
        assert!(args_under_test(&["--web-port", "not-a-port"]).is_err());
    }
}
