//! The canonical representation of one captured HTTP transaction.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::encoding::encode_body;
use super::resource_type::{clean_mime_type, header_value, ResourceType};

/// One HTTP transaction as persisted by the traffic store.
///
/// Records are never edited in place: the store replaces them wholesale on a
/// repeated `id` or deletes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRecord {
    pub id: String,
    /// Capture start, seconds since the epoch
    pub timestamp: f64,
    pub method: String,
    pub url: String,
    /// Host without port
    pub domain: String,
    /// 0 when no response was received
    pub status: u16,
    pub resource_type: ResourceType,
    /// Response body length in bytes
    pub size: u64,
    pub time_ms: f64,
    pub request_headers: HashMap<String, String>,
    pub request_body: Option<Vec<u8>>,
    pub request_body_size: u64,
    pub response_headers: HashMap<String, String>,
    pub response_body: Option<Vec<u8>>,
    /// Phase name to milliseconds; `total` is always present
    pub timing: BTreeMap<String, f64>,
    pub error: Option<String>,
}

/// List entry without headers or bodies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficSummary {
    pub id: String,
    pub timestamp: f64,
    pub method: String,
    pub url: String,
    pub domain: String,
    pub status: u16,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub size: u64,
    #[serde(rename = "time")]
    pub time_ms: f64,
    pub error: Option<String>,
}

/// Full metadata of a record, body content excluded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficDetail {
    pub id: String,
    pub timestamp: f64,
    /// RFC 3339 rendering of `timestamp`
    pub captured_at: Option<String>,
    pub method: String,
    pub url: String,
    pub domain: String,
    pub status: u16,
    pub resource_type: ResourceType,
    pub response_size: u64,
    pub time_ms: f64,
    pub request_headers: HashMap<String, String>,
    pub request_body_size: u64,
    pub response_headers: HashMap<String, String>,
    pub response_body_size: u64,
    pub timing: BTreeMap<String, f64>,
    pub error: Option<String>,
}

impl TrafficRecord {
    pub fn summary(&self) -> TrafficSummary {
        TrafficSummary {
            id: self.id.clone(),
            timestamp: self.timestamp,
            method: self.method.clone(),
            url: self.url.clone(),
            domain: self.domain.clone(),
            status: self.status,
            resource_type: self.resource_type,
            size: self.size,
            time_ms: self.time_ms,
            error: self.error.clone(),
        }
    }

    pub fn detail(&self) -> TrafficDetail {
        let request_body_size = if self.request_body_size > 0 {
            self.request_body_size
        } else {
            self.request_body.as_ref().map_or(0, |b| b.len() as u64)
        };

        TrafficDetail {
            id: self.id.clone(),
            timestamp: self.timestamp,
            captured_at: timestamp_to_rfc3339(self.timestamp),
            method: self.method.clone(),
            url: self.url.clone(),
            domain: self.domain.clone(),
            status: self.status,
            resource_type: self.resource_type,
            response_size: self.size,
            time_ms: self.time_ms,
            request_headers: self.request_headers.clone(),
            request_body_size,
            response_headers: self.response_headers.clone(),
            response_body_size: self.size,
            timing: self.timing.clone(),
            error: self.error.clone(),
        }
    }

    /// Response MIME type without parameters, empty when unknown.
    pub fn mime_type(&self) -> String {
        header_value(&self.response_headers, "content-type")
            .map(|ct| clean_mime_type(ct).to_string())
            .unwrap_or_default()
    }

    /// DevTools-shaped detail with both bodies run through the body codec.
    pub fn to_cdp_detail(&self) -> Value {
        let (post_data, post_data_b64) =
            encode_optional_body(&self.request_body, &self.request_headers);
        let (body, body_b64) = encode_optional_body(&self.response_body, &self.response_headers);

        json!({
            "id": self.id,
            "timestamp": self.timestamp,
            "request": {
                "method": self.method,
                "url": self.url,
                "headers": self.request_headers,
                "postData": post_data,
                "postDataBase64Encoded": post_data_b64,
            },
            "response": {
                "status": self.status,
                "headers": self.response_headers,
                "body": body,
                "base64Encoded": body_b64,
                "mimeType": self.mime_type(),
            },
            "resourceType": self.resource_type,
            "timing": self.timing,
            "size": self.size,
            "time": self.time_ms,
            "error": self.error,
        })
    }
}

fn encode_optional_body(
    body: &Option<Vec<u8>>,
    headers: &HashMap<String, String>,
) -> (String, bool) {
    match body {
        Some(data) if !data.is_empty() => {
            let content_type = header_value(headers, "content-type").unwrap_or("");
            encode_body(data, content_type)
        }
        _ => (String::new(), false),
    }
}

fn timestamp_to_rfc3339(timestamp: f64) -> Option<String> {
    if !timestamp.is_finite() {
        return None;
    }
    let secs = timestamp.floor();
    let nanos = ((timestamp - secs) * 1e9) as u32;
    DateTime::<Utc>::from_timestamp(secs as i64, nanos.min(999_999_999)).map(|d| d.to_rfc3339())
}
