use std::net::{IpAddr, SocketAddr};

use log::info;
use warp::Filter;

use super::routes::{api, handle_rejection};
use crate::device::adb_client::DeviceControl;
use crate::error_handling::types::WebError;
use crate::tools::{DeviceTools, TrafficTools};

/// HTTP front end exposing the traffic and device tools as JSON endpoints.
pub struct WebServer<D: DeviceControl + 'static> {
    traffic: TrafficTools,
    devices: DeviceTools<D>,
}

impl<D: DeviceControl + 'static> WebServer<D> {
    pub fn new(traffic: TrafficTools, devices: DeviceTools<D>) -> Self {
        Self { traffic, devices }
    }

    /// Serve until the process exits.
    pub async fn start(&self, bind_address: &str, port: u16) -> Result<(), WebError> {
        let ip: IpAddr = bind_address
            .parse()
            .map_err(|_| WebError::InvalidAddress(bind_address.to_string()))?;
        let addr = SocketAddr::new(ip, port);

        let routes = api(self.traffic.clone(), self.devices.clone())
            .recover(handle_rejection);

        info!("Web interface listening on http://{}", addr);
        warp::serve(routes).run(addr).await;

        Ok(())
    }
}
