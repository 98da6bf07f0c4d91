use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use env_logger::Env;
use log::info;

use droidtap::storage::database_storage::DatabaseStorage;
use droidtap::tools::{ReadBodyParams, SearchParams, TrafficTools};
use droidtap::traffic::{CapturedExchange, CapturedRequest, CapturedResponse, TrafficRecorder};

fn exchange(now: f64, url: &str, content_type: &str, body: &[u8]) -> CapturedExchange {
    let mut headers = HashMap::new();
    headers.insert("Content-Type".to_string(), content_type.to_string());
    CapturedExchange {
        request: CapturedRequest {
            method: "GET".to_string(),
            url: url.to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
            timestamp_start: now,
            timestamp_end: Some(now + 0.01),
        },
        response: Some(CapturedResponse {
            status: 200,
            headers,
            body: body.to_vec(),
            timestamp_start: Some(now + 0.05),
            timestamp_end: Some(now + 0.08),
        }),
        error: None,
    }
}

fn main() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info")).try_init();

    // Point DROIDTAP_DB_PATH at the served database to feed a running droidtap.
    let db_path = env::var("DROIDTAP_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("droidtap-demo.db"));
    let storage = Arc::new(DatabaseStorage::new(&db_path, DatabaseStorage::DEFAULT_MAX_SIZE));
    if let Err(e) = storage.initialize() {
        eprintln!("Unable to create {}: {}", db_path.display(), e);
        std::process::exit(1);
    }
    info!("Writing demo traffic to {}", db_path.display());

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    let recorder = TrafficRecorder::new(storage.clone());
    let samples = [
        exchange(now, "https://api.example.com/v1/profile", "application/json", b"{\"user\":\"alice\",\"token\":\"abc123\"}"),
        exchange(now + 1.0, "https://cdn.example.com/logo.png", "image/png", &[0x89, 0x50, 0x4e, 0x47, 0x00, 0x01]),
        exchange(now + 2.0, "https://www.example.com/", "text/html; charset=utf-8", b"<html><body>hello</body></html>"),
    ];
    for sample in &samples {
        match recorder.record(sample) {
            Ok(id) => info!("Recorded {} as {}", sample.request.url, id),
            Err(e) => eprintln!("Failed to record {}: {}", sample.request.url, e),
        }
    }

    let tools = TrafficTools::new(storage);
    let print = |label: &str, value: serde_json::Value| {
        println!(
            "== {} ==\n{}",
            label,
            serde_json::to_string_pretty(&value).unwrap_or_default()
        );
    };
    print("status", tools.status());
    print("list", tools.list(&Default::default()));
    print("search token", tools.search(&SearchParams::new("token")));
    print("body of 1", tools.read_body("1", &ReadBodyParams::default()));
    print("cdp export of 2", tools.export_cdp("2"));
}
