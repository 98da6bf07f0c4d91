use std::convert::Infallible;

use log::error;
use serde_json::Value;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::types::{ApiError, ProxyRequest, ReverseRequest};
use crate::device::adb_client::DeviceControl;
use crate::tools::{DeviceTools, ListParams, ReadBodyParams, SearchParams, TrafficTools};

/// Store-backed tools block on SQLite, so they run off the async workers.
async fn run_blocking<F>(tool: F) -> Result<reply::Json, Rejection>
where
    F: FnOnce() -> Value + Send + 'static,
{
    let value = tokio::task::spawn_blocking(tool).await.unwrap_or_else(|e| {
        error!("Traffic tool task failed: {}", e);
        serde_json::json!({ "success": false, "message": "internal error" })
    });
    Ok(reply::json(&value))
}

fn with_traffic(
    tools: TrafficTools,
) -> impl Filter<Extract = (TrafficTools,), Error = Infallible> + Clone {
    warp::any().map(move || tools.clone())
}

fn with_devices<D: DeviceControl + 'static>(
    tools: DeviceTools<D>,
) -> impl Filter<Extract = (DeviceTools<D>,), Error = Infallible> + Clone {
    warp::any().map(move || tools.clone())
}

/// GET /
pub fn index_route() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path::end().and(warp::get()).map(|| {
        reply::html(
            r#"<html><head><title>droidtap</title></head>
                <body><h1>droidtap is running</h1><p>See /status and /traffic for JSON.</p></body></html>"#,
        )
    })
}

/// GET /status
pub fn status_route(
    tools: TrafficTools,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("status")
        .and(warp::get())
        .and(with_traffic(tools))
        .and_then(|tools: TrafficTools| run_blocking(move || tools.status()))
}

/// GET /traffic?limit=&offset=&filter_domain=&filter_type=&filter_status=&filter_url=
pub fn list_traffic_route(
    tools: TrafficTools,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("traffic")
        .and(warp::get())
        .and(warp::query::<ListParams>())
        .and(with_traffic(tools))
        .and_then(|params: ListParams, tools: TrafficTools| {
            run_blocking(move || tools.list(&params))
        })
}

/// GET /traffic/:id
pub fn traffic_detail_route(
    tools: TrafficTools,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("traffic" / String)
        .and(warp::get())
        .and(with_traffic(tools))
        .and_then(|id: String, tools: TrafficTools| {
            run_blocking(move || tools.get_detail(&id))
        })
}

/// GET /traffic/:id/cdp
pub fn traffic_cdp_route(
    tools: TrafficTools,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("traffic" / String / "cdp")
        .and(warp::get())
        .and(with_traffic(tools))
        .and_then(|id: String, tools: TrafficTools| {
            run_blocking(move || tools.export_cdp(&id))
        })
}

/// GET /traffic/:id/body?field=&offset=&length=
pub fn traffic_body_route(
    tools: TrafficTools,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("traffic" / String / "body")
        .and(warp::get())
        .and(warp::query::<ReadBodyParams>())
        .and(with_traffic(tools))
        .and_then(|id: String, params: ReadBodyParams, tools: TrafficTools| {
            run_blocking(move || tools.read_body(&id, &params))
        })
}

/// POST /traffic/search
pub fn search_route(
    tools: TrafficTools,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("traffic" / "search")
        .and(warp::post())
        .and(warp::body::json::<SearchParams>())
        .and(with_traffic(tools))
        .and_then(|params: SearchParams, tools: TrafficTools| {
            run_blocking(move || tools.search(&params))
        })
}

/// DELETE /traffic
pub fn clear_traffic_route(
    tools: TrafficTools,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("traffic")
        .and(warp::delete())
        .and(with_traffic(tools))
        .and_then(|tools: TrafficTools| run_blocking(move || tools.clear()))
}

/// GET /devices
pub fn list_devices_route<D: DeviceControl + 'static>(
    tools: DeviceTools<D>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("devices")
        .and(warp::get())
        .and(with_devices(tools))
        .and_then(|tools: DeviceTools<D>| async move {
            Ok::<_, Rejection>(reply::json(&tools.list_devices().await))
        })
}

/// GET /devices/:serial
pub fn device_info_route<D: DeviceControl + 'static>(
    tools: DeviceTools<D>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("devices" / String)
        .and(warp::get())
        .and(with_devices(tools))
        .and_then(|serial: String, tools: DeviceTools<D>| async move {
            Ok::<_, Rejection>(reply::json(&tools.device_info(&serial).await))
        })
}

/// POST /devices/:serial/proxy
pub fn setup_proxy_route<D: DeviceControl + 'static>(
    tools: DeviceTools<D>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("devices" / String / "proxy")
        .and(warp::post())
        .and(warp::body::json::<ProxyRequest>())
        .and(with_devices(tools))
        .and_then(
            |serial: String, body: ProxyRequest, tools: DeviceTools<D>| async move {
                let result = tools.setup_proxy(&serial, &body.host, body.port).await;
                Ok::<_, Rejection>(reply::json(&result))
            },
        )
}

/// DELETE /devices/:serial/proxy
pub fn clear_proxy_route<D: DeviceControl + 'static>(
    tools: DeviceTools<D>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("devices" / String / "proxy")
        .and(warp::delete())
        .and(with_devices(tools))
        .and_then(|serial: String, tools: DeviceTools<D>| async move {
            Ok::<_, Rejection>(reply::json(&tools.clear_proxy(&serial).await))
        })
}

/// POST /devices/:serial/reverse
pub fn reverse_route<D: DeviceControl + 'static>(
    tools: DeviceTools<D>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("devices" / String / "reverse")
        .and(warp::post())
        .and(warp::body::json::<ReverseRequest>())
        .and(with_devices(tools))
        .and_then(
            |serial: String, body: ReverseRequest, tools: DeviceTools<D>| async move {
                let result = tools.reverse_port(&serial, &body.remote, &body.local).await;
                Ok::<_, Rejection>(reply::json(&result))
            },
        )
}

/// Every endpoint, without rejection handling.
pub fn api<D: DeviceControl + 'static>(
    traffic: TrafficTools,
    devices: DeviceTools<D>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    index_route()
        .or(status_route(traffic.clone()))
        .or(search_route(traffic.clone()))
        .or(list_traffic_route(traffic.clone()))
        .or(clear_traffic_route(traffic.clone()))
        .or(traffic_cdp_route(traffic.clone()))
        .or(traffic_body_route(traffic.clone()))
        .or(traffic_detail_route(traffic))
        .or(list_devices_route(devices.clone()))
        .or(device_info_route(devices.clone()))
        .or(setup_proxy_route(devices.clone()))
        .or(clear_proxy_route(devices.clone()))
        .or(reverse_route(devices))
}

/// Turn rejections into the same `{success, message}` shape the tools use.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, format!("Invalid query string: {}", e))
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    };

    Ok(reply::with_status(
        reply::json(&ApiError::new(message)),
        status,
    ))
}
