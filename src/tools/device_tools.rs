use std::sync::Arc;

use serde_json::{json, Value};

use super::traffic_tools::{failure_message, respond};
use crate::device::adb_client::{DeviceControl, DeviceInfo};
use crate::error_handling::types::{DeviceError, ToolError};

/// Device-control tools over an injected `DeviceControl`.
pub struct DeviceTools<D: DeviceControl> {
    client: Arc<D>,
}

impl<D: DeviceControl> Clone for DeviceTools<D> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<D: DeviceControl> DeviceTools<D> {
    pub fn new(client: Arc<D>) -> Self {
        Self { client }
    }

    pub async fn list_devices(&self) -> Value {
        match self.client.list_devices().await {
            Ok(devices) => {
                let list: Vec<Value> = devices.iter().map(device_summary).collect();
                json!({
                    "success": true,
                    "count": list.len(),
                    "devices": list,
                })
            }
            Err(e) => json!({
                "success": false,
                "message": failure_message(&ToolError::from(e)),
                "devices": [],
                "count": 0,
            }),
        }
    }

    pub async fn device_info(&self, serial: &str) -> Value {
        respond("device_info", self.try_device_info(serial).await)
    }

    async fn try_device_info(&self, serial: &str) -> Result<Value, ToolError> {
        let devices = self.client.list_devices().await?;
        let device = devices
            .into_iter()
            .find(|d| d.serial == serial)
            .ok_or_else(|| DeviceError::DeviceNotFound(serial.to_string()))?;
        if !device.is_online() {
            return Err(DeviceError::DeviceOffline {
                serial: device.serial,
                state: device.state,
            }
            .into());
        }

        let sdk_version = self.client.sdk_version(serial).await?;
        let is_rooted = self.client.is_rooted(serial).await?;
        let brand = self.client.get_prop(serial, "ro.product.brand").await?;
        let device_name = self.client.get_prop(serial, "ro.product.device").await?;
        let build_id = self.client.get_prop(serial, "ro.build.id").await?;

        Ok(json!({
            "success": true,
            "device": {
                "serial": device.serial,
                "state": device.state,
                "model": device.model,
                "android_version": device.android_version,
                "sdk_version": sdk_version,
                "is_rooted": is_rooted,
                "brand": brand,
                "device_name": device_name,
                "build_id": build_id,
            },
        }))
    }

    /// Point the device's global HTTP proxy at `host:port`.
    ///
    /// Only apps honouring the system proxy setting are affected.
    pub async fn setup_proxy(&self, serial: &str, host: &str, port: u16) -> Value {
        let command = format!("settings put global http_proxy {}:{}", host, port);
        let result = self.client.shell(serial, &command).await;
        respond(
            "setup_proxy",
            result.map_err(ToolError::from).map(|(code, output)| {
                if code != 0 {
                    return json!({
                        "success": false,
                        "message": format!("Failed to set proxy: {}", output),
                    });
                }
                json!({
                    "success": true,
                    "message": format!("Proxy set to {}:{}", host, port),
                    "note": "This proxy setting may not work for all apps. \
                             For better results, configure proxy in Wi-Fi settings manually.",
                })
            }),
        )
    }

    pub async fn clear_proxy(&self, serial: &str) -> Value {
        let result = self
            .client
            .shell(serial, "settings put global http_proxy :0")
            .await;
        respond(
            "clear_proxy",
            result.map_err(ToolError::from).map(|(code, output)| {
                if code != 0 {
                    return json!({
                        "success": false,
                        "message": format!("Failed to clear proxy: {}", output),
                    });
                }
                json!({ "success": true, "message": "Proxy cleared" })
            }),
        )
    }

    /// Forward `remote` on the device to `local` on the host, e.g.
    /// `tcp:8080` to `tcp:8080` so an emulator reaches the host proxy.
    pub async fn reverse_port(&self, serial: &str, remote: &str, local: &str) -> Value {
        let result = self.client.reverse(serial, remote, local).await;
        respond(
            "reverse_port",
            result.map_err(ToolError::from).map(|()| {
                json!({
                    "success": true,
                    "message": format!("Reverse {} -> {} established", remote, local),
                })
            }),
        )
    }
}

fn device_summary(device: &DeviceInfo) -> Value {
    json!({
        "serial": device.serial,
        "state": device.state,
        "model": device.model,
        "android_version": device.android_version,
        "is_online": device.is_online(),
    })
}
