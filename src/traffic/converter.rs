//! Conversion of a captured request/response exchange into a `TrafficRecord`.
//!
//! The capture side (an intercepting proxy) hands over raw exchange data;
//! everything derived (domain, resource type, sizes, timing phases) is
//! computed here so every record obeys the same invariants.

use std::collections::{BTreeMap, HashMap};

use url::Url;

use super::record::TrafficRecord;
use super::resource_type::{header_value, infer_resource_type};

/// Request half of a captured exchange. Timestamps are epoch seconds.
#[derive(Debug, Clone, Default)]
pub struct CapturedRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub timestamp_start: f64,
    pub timestamp_end: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct CapturedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub timestamp_start: Option<f64>,
    pub timestamp_end: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct CapturedExchange {
    pub request: CapturedRequest,
    pub response: Option<CapturedResponse>,
    pub error: Option<String>,
}

pub fn exchange_to_record(exchange: &CapturedExchange, record_id: &str) -> TrafficRecord {
    let request = &exchange.request;
    let response = exchange.response.as_ref();

    let content_type = response
        .and_then(|r| header_value(&r.headers, "content-type"))
        .unwrap_or("");
    let resource_type = infer_resource_type(content_type, &request.url, &request.headers);

    let response_body = response
        .map(|r| r.body.clone())
        .filter(|body| !body.is_empty());
    let request_body = Some(request.body.clone()).filter(|body| !body.is_empty());

    let timing = calculate_timing(exchange);
    let time_ms = timing.get("total").copied().unwrap_or(0.0);

    TrafficRecord {
        id: record_id.to_string(),
        timestamp: request.timestamp_start,
        method: request.method.clone(),
        url: request.url.clone(),
        domain: extract_domain(&request.url),
        status: response.map_or(0, |r| r.status),
        resource_type,
        size: response_body.as_ref().map_or(0, |b| b.len() as u64),
        time_ms,
        request_headers: request.headers.clone(),
        request_body_size: request_body.as_ref().map_or(0, |b| b.len() as u64),
        request_body,
        response_headers: response.map(|r| r.headers.clone()).unwrap_or_default(),
        response_body,
        timing,
        error: exchange.error.clone(),
    }
}

/// Host of `url` without the port, empty when the URL does not parse.
pub fn extract_domain(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

/// DevTools-style timing phases in milliseconds.
///
/// `requestTime` is the absolute start in seconds; the other phases are
/// relative to it and only present when the needed timestamps were captured.
pub fn calculate_timing(exchange: &CapturedExchange) -> BTreeMap<String, f64> {
    let request = &exchange.request;
    let response = exchange.response.as_ref();
    let start = request.timestamp_start;

    let mut timing = BTreeMap::new();
    timing.insert("requestTime".to_string(), start);

    if let Some(req_end) = request.timestamp_end {
        timing.insert("sendStart".to_string(), 0.0);
        timing.insert("sendEnd".to_string(), (req_end - start) * 1000.0);
    }

    if let (Some(resp_start), Some(req_end)) =
        (response.and_then(|r| r.timestamp_start), request.timestamp_end)
    {
        let wait = (resp_start - req_end) * 1000.0;
        let send_end = timing.get("sendEnd").copied().unwrap_or(0.0);
        timing.insert("receiveHeadersEnd".to_string(), send_end + wait);
    }

    if let Some(r) = response {
        if let (Some(resp_start), Some(resp_end)) = (r.timestamp_start, r.timestamp_end) {
            timing.insert("responseTime".to_string(), (resp_end - resp_start) * 1000.0);
        }
    }

    let total = match (response.and_then(|r| r.timestamp_end), request.timestamp_end) {
        (Some(resp_end), _) => (resp_end - start) * 1000.0,
        (None, Some(req_end)) => (req_end - start) * 1000.0,
        (None, None) => 0.0,
    };
    timing.insert("total".to_string(), total);

    timing
}
