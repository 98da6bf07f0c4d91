use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, trace, warn};
use serde::Serialize;
use tokio::process::Command;

use crate::error_handling::types::DeviceError;

/// One entry of `adb devices -l`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub serial: String,
    /// "device", "offline", "unauthorized", ...
    pub state: String,
    pub model: Option<String>,
    pub product: Option<String>,
    pub transport_id: Option<String>,
    pub android_version: Option<String>,
    pub extra_info: HashMap<String, String>,
}

impl DeviceInfo {
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }
}

/// Device operations the tools rely on. `AdbClient` is the real
/// implementation; tests substitute their own.
pub trait DeviceControl: Send + Sync {
    fn list_devices(&self) -> impl Future<Output = Result<Vec<DeviceInfo>, DeviceError>> + Send;

    /// Run a shell command, returning its exit code and output.
    fn shell(
        &self,
        serial: &str,
        command: &str,
    ) -> impl Future<Output = Result<(i32, String), DeviceError>> + Send;

    /// Make `remote` on the device connect to `local` on the host.
    fn reverse(
        &self,
        serial: &str,
        remote: &str,
        local: &str,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send;

    fn get_prop(
        &self,
        serial: &str,
        prop: &str,
    ) -> impl Future<Output = Result<Option<String>, DeviceError>> + Send {
        let command = format!("getprop {}", prop);
        async move {
            let (_, output) = self.shell(serial, &command).await?;
            let value = output.trim();
            Ok(if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            })
        }
    }

    /// SDK level (34 for Android 14), 0 when unknown.
    fn sdk_version(&self, serial: &str) -> impl Future<Output = Result<u32, DeviceError>> + Send {
        async move {
            Ok(self
                .get_prop(serial, "ro.build.version.sdk")
                .await?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0))
        }
    }

    fn is_rooted(&self, serial: &str) -> impl Future<Output = Result<bool, DeviceError>> + Send {
        async move {
            let (code, output) = self.shell(serial, "su -c id").await?;
            if code == 0 && output.contains("uid=0") {
                return Ok(true);
            }

            let (_, output) = self.shell(serial, "which su").await?;
            if output.contains("/su") {
                return Ok(true);
            }

            let (_, output) = self
                .shell(serial, "pm list packages | grep -E 'supersu|magisk'")
                .await?;
            let output = output.to_lowercase();
            Ok(output.contains("supersu") || output.contains("magisk"))
        }
    }
}

struct CommandOutput {
    code: i32,
    stdout: String,
    stderr: String,
}

/// Client for the `adb` command-line tool.
///
/// Constructed explicitly and handed to whatever needs device access.
#[derive(Debug, Clone)]
pub struct AdbClient {
    adb_path: PathBuf,
    timeout: Duration,
}

impl AdbClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new<P: AsRef<Path>>(adb_path: P) -> Self {
        Self {
            adb_path: adb_path.as_ref().to_path_buf(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn adb_path(&self) -> &Path {
        &self.adb_path
    }

    async fn run(&self, args: &[&str]) -> Result<CommandOutput, DeviceError> {
        let printable = format!("{} {}", self.adb_path.display(), args.join(" "));
        trace!("Running {}", printable);

        let mut cmd = Command::new(&self.adb_path);
        cmd.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                warn!("ADB command timed out after {:?}: {}", self.timeout, printable);
                DeviceError::Timeout(printable.clone())
            })?
            .map_err(|e| DeviceError::NotAvailable(format!("{}: {}", self.adb_path.display(), e)))?;

        let result = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };
        debug!("{} exited with {}", printable, result.code);
        Ok(result)
    }
}

impl DeviceControl for AdbClient {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let out = self.run(&["devices", "-l"]).await?;
        if out.code != 0 {
            return Err(DeviceError::CommandFailed {
                code: out.code,
                stderr: out.stderr,
            });
        }

        let mut devices = parse_device_list(&out.stdout);
        for device in devices.iter_mut().filter(|d| d.is_online()) {
            device.android_version = self
                .get_prop(&device.serial, "ro.build.version.release")
                .await?;
        }
        Ok(devices)
    }

    async fn shell(&self, serial: &str, command: &str) -> Result<(i32, String), DeviceError> {
        let out = self.run(&["-s", serial, "shell", command]).await?;
        let text = if out.stdout.is_empty() {
            out.stderr
        } else {
            out.stdout
        };
        Ok((out.code, text))
    }

    async fn reverse(&self, serial: &str, remote: &str, local: &str) -> Result<(), DeviceError> {
        let out = self.run(&["-s", serial, "reverse", remote, local]).await?;
        if out.code != 0 {
            return Err(DeviceError::CommandFailed {
                code: out.code,
                stderr: if out.stderr.is_empty() {
                    out.stdout
                } else {
                    out.stderr
                },
            });
        }
        Ok(())
    }
}

/// Parse `adb devices -l` output, skipping the "List of devices" header.
pub fn parse_device_list(output: &str) -> Vec<DeviceInfo> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?.to_string();
            let state = parts.next()?.to_string();
            let extra_info: HashMap<String, String> = parts
                .filter_map(|p| p.split_once(':'))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            Some(DeviceInfo {
                serial,
                state,
                model: extra_info.get("model").cloned(),
                product: extra_info.get("product").cloned(),
                transport_id: extra_info.get("transport_id").cloned(),
                android_version: None,
                extra_info,
            })
        })
        .collect()
}
