use std::sync::Arc;

use clap::Parser;
use droidtap::configuration::config::{Args, Config};
use droidtap::device::adb_client::AdbClient;
use droidtap::storage::database_storage::DatabaseStorage;
use droidtap::tools::{DeviceTools, TrafficTools};
use droidtap::web_interface::WebServer;
use log::{error, info, warn};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    let args = Args::parse();

    info!("Importing configuration");
    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration imported successfully");

    let storage = Arc::new(
        DatabaseStorage::new(&config.db_path, config.max_size)
            .with_busy_timeout(config.busy_timeout()),
    );
    if storage.exists() {
        info!(
            "Serving traffic store at {} (capacity {} records)",
            storage.path().display(),
            storage.max_size()
        );
    } else {
        // The capture process creates the store; until then every query reports it as not started.
        warn!(
            "Traffic store {} does not exist yet",
            config.db_path.display()
        );
    }

    let adb = Arc::new(AdbClient::new(&config.adb_path));
    info!("Using adb at {}", adb.adb_path().display());
    let server = WebServer::new(TrafficTools::new(storage), DeviceTools::new(adb));

    if let Err(e) = server.start(&config.bind_address, config.web_port).await {
        error!("Web interface failed: {}", e);
        std::process::exit(1);
    }
}
