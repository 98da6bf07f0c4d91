//! Query tools over the traffic store.
//!
//! Each tool applies input defaults and clamping, delegates to the store and
//! shapes the result as JSON. Failures never escape: they come back as
//! `{"success": false, "message": ...}`, and a store whose backing file does
//! not exist yet answers with the "proxy not started" message.

use std::sync::Arc;

use log::{debug, warn};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error_handling::types::{DeviceError, StorageError, ToolError};
use crate::storage::storage_trait::TrafficStorage;
use crate::storage::types::{
    BodyField, SearchField, SearchRequest, TrafficFilter, DEFAULT_CHUNK_LENGTH,
    DEFAULT_CONTEXT_CHARS, DEFAULT_SEARCH_LIMIT, MAX_QUERY_LIMIT,
};

pub const NOT_STARTED_MESSAGE: &str = "proxy not started";

#[derive(Debug, Clone, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_list_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    pub filter_domain: Option<String>,
    pub filter_type: Option<String>,
    pub filter_status: Option<String>,
    pub filter_url: Option<String>,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            limit: default_list_limit(),
            offset: 0,
            filter_domain: None,
            filter_type: None,
            filter_status: None,
            filter_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    pub keyword: String,
    pub search_in: Option<Vec<String>>,
    pub method: Option<String>,
    pub domain: Option<String>,
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

impl SearchParams {
    pub fn new<S: Into<String>>(keyword: S) -> Self {
        Self {
            keyword: keyword.into(),
            search_in: None,
            method: None,
            domain: None,
            context_chars: default_context_chars(),
            limit: default_search_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadBodyParams {
    #[serde(default = "default_body_field")]
    pub field: String,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_chunk_length")]
    pub length: usize,
}

impl Default for ReadBodyParams {
    fn default() -> Self {
        Self {
            field: default_body_field(),
            offset: 0,
            length: default_chunk_length(),
        }
    }
}

fn default_list_limit() -> usize {
    MAX_QUERY_LIMIT
}

fn default_context_chars() -> usize {
    DEFAULT_CONTEXT_CHARS
}

fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

fn default_body_field() -> String {
    BodyField::ResponseBody.as_str().to_string()
}

fn default_chunk_length() -> usize {
    DEFAULT_CHUNK_LENGTH
}

/// Query tools bound to one traffic store.
#[derive(Clone)]
pub struct TrafficTools {
    storage: Arc<dyn TrafficStorage>,
}

impl TrafficTools {
    pub fn new(storage: Arc<dyn TrafficStorage>) -> Self {
        Self { storage }
    }

    /// Whether capture is running, with the record count and store location.
    pub fn status(&self) -> Value {
        match self.storage.count() {
            Ok(count) => json!({
                "running": true,
                "message": "proxy is running",
                "traffic_count": count,
                "db_path": self.storage.location(),
            }),
            Err(StorageError::NotInitialized(_)) => json!({
                "running": false,
                "message": NOT_STARTED_MESSAGE,
                "db_path": self.storage.location(),
            }),
            Err(e) => {
                warn!("Status check failed: {}", e);
                json!({
                    "running": false,
                    "message": e.to_string(),
                    "db_path": self.storage.location(),
                })
            }
        }
    }

    pub fn list(&self, params: &ListParams) -> Value {
        respond("list", self.try_list(params))
    }

    fn try_list(&self, params: &ListParams) -> Result<Value, ToolError> {
        let limit = params.limit.min(MAX_QUERY_LIMIT);
        let filter = TrafficFilter {
            domain: params.filter_domain.clone(),
            resource_type: params.filter_type.clone(),
            status: params.filter_status.clone(),
            url: params.filter_url.clone(),
        };

        let records = self.storage.query(limit, params.offset, &filter)?;
        let store_size = self.storage.count()?;
        let summaries: Vec<_> = records.iter().map(|r| r.summary()).collect();

        Ok(json!({
            "success": true,
            "returned": summaries.len(),
            "offset": params.offset,
            "store_size": store_size,
            "has_more": params.offset.saturating_add(summaries.len()) < store_size,
            "requests": summaries,
        }))
    }

    /// Metadata of one request, bodies excluded.
    pub fn get_detail(&self, id: &str) -> Value {
        respond("get_detail", self.try_get_detail(id))
    }

    fn try_get_detail(&self, id: &str) -> Result<Value, ToolError> {
        let record = self
            .storage
            .get_by_id(id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        Ok(json!({
            "success": true,
            "request": record.detail(),
            "hint": "use read_body to fetch request or response body content",
        }))
    }

    /// DevTools-shaped detail including encoded bodies.
    pub fn export_cdp(&self, id: &str) -> Value {
        respond("export_cdp", self.try_export_cdp(id))
    }

    fn try_export_cdp(&self, id: &str) -> Result<Value, ToolError> {
        let record = self
            .storage
            .get_by_id(id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        Ok(json!({
            "success": true,
            "request": record.to_cdp_detail(),
        }))
    }

    pub fn search(&self, params: &SearchParams) -> Value {
        respond("search", self.try_search(params))
    }

    fn try_search(&self, params: &SearchParams) -> Result<Value, ToolError> {
        let request = SearchRequest {
            keyword: params.keyword.clone(),
            fields: SearchField::resolve(params.search_in.as_deref()),
            method: params.method.clone(),
            domain: params.domain.clone(),
            context_chars: params.context_chars,
            limit: params.limit,
        };
        let matches = self.storage.search(&request)?;

        Ok(json!({
            "success": true,
            "keyword": params.keyword,
            "search_in": params.search_in.clone().unwrap_or_else(|| vec!["all".to_string()]),
            "total_matches": matches.len(),
            "matches": matches,
        }))
    }

    pub fn read_body(&self, id: &str, params: &ReadBodyParams) -> Value {
        respond("read_body", self.try_read_body(id, params))
    }

    fn try_read_body(&self, id: &str, params: &ReadBodyParams) -> Result<Value, ToolError> {
        let field: BodyField = params.field.parse().map_err(ToolError::InvalidArgument)?;
        let chunk = self
            .storage
            .read_body(id, field, params.offset, params.length)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        Ok(json!({
            "success": true,
            "request_id": id,
            "field": field,
            "content": chunk.content,
            "offset": chunk.offset,
            "length": chunk.length,
            "total_size": chunk.total_size,
            "has_more": chunk.has_more,
        }))
    }

    /// Delete all captured traffic, reporting how many records were removed.
    pub fn clear(&self) -> Value {
        respond("clear", self.try_clear())
    }

    fn try_clear(&self) -> Result<Value, ToolError> {
        let count = self.storage.count()?;
        self.storage.clear()?;
        Ok(json!({
            "success": true,
            "message": format!("Cleared {} requests", count),
            "cleared_count": count,
        }))
    }
}

pub(crate) fn respond(tool: &str, result: Result<Value, ToolError>) -> Value {
    match result {
        Ok(value) => value,
        Err(e) => {
            let message = failure_message(&e);
            debug!("Tool {} failed: {}", tool, e);
            json!({ "success": false, "message": message })
        }
    }
}

pub(crate) fn failure_message(err: &ToolError) -> String {
    match err {
        ToolError::StorageError(StorageError::NotInitialized(_)) => NOT_STARTED_MESSAGE.to_string(),
        ToolError::StorageError(StorageError::NotFound(id)) => format!("Request not found: {}", id),
        ToolError::DeviceError(
            e @ (DeviceError::DeviceNotFound(_) | DeviceError::DeviceOffline { .. }),
        ) => e.to_string(),
        ToolError::InvalidArgument(msg) => msg.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database_storage::DatabaseStorage;
    use crate::traffic::record::TrafficRecord;
    use crate::traffic::resource_type::ResourceType;
    use std::collections::{BTreeMap, HashMap};
    use tempfile::TempDir;

    fn tools(initialize: bool) -> (TempDir, Arc<DatabaseStorage>, TrafficTools) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(DatabaseStorage::new(dir.path().join("traffic.db"), 100));
        if initialize {
            storage.initialize().unwrap();
        }
        let tools = TrafficTools::new(storage.clone());
        (dir, storage, tools)
    }

    fn record(id: &str, timestamp: f64, status: u16) -> TrafficRecord {
        let mut timing = BTreeMap::new();
        timing.insert("total".to_string(), 5.0);
        let mut response_headers = HashMap::new();
        response_headers.insert("Content-Type".into(), "application/json".into());
        TrafficRecord {
            id: id.into(),
            timestamp,
            method: "GET".into(),
            url: format!("https://api.example.com/v1/items?id={}", id),
            domain: "api.example.com".into(),
            status,
            resource_type: ResourceType::Xhr,
            size: 13,
            time_ms: 5.0,
            request_headers: HashMap::new(),
            request_body: None,
            request_body_size: 0,
            response_headers,
            response_body: Some(b"{\"token\":\"x\"}".to_vec()),
            timing,
            error: None,
        }
    }

    #[test]
    fn test_not_started_everywhere() {
        let (_dir, _storage, tools) = tools(false);

        let status = tools.status();
        assert_eq!(status["running"], false);
        assert_eq!(status["message"], NOT_STARTED_MESSAGE);

        for response in [
            tools.list(&ListParams::default()),
            tools.get_detail("1"),
            tools.export_cdp("1"),
            tools.search(&SearchParams::new("x")),
            tools.read_body("1", &ReadBodyParams::default()),
            tools.clear(),
        ] {
            assert_eq!(response["success"], false);
            assert_eq!(response["message"], NOT_STARTED_MESSAGE);
        }
    }

    #[test]
    fn test_status_running() {
        let (_dir, storage, tools) = tools(true);
        storage.add(&record("1", 1.0, 200)).unwrap();
        let status = tools.status();
        assert_eq!(status["running"], true);
        assert_eq!(status["traffic_count"], 1);
        assert!(status["db_path"].as_str().unwrap().ends_with("traffic.db"));
    }

    #[test]
    fn test_list_clamps_and_paginates() {
        let (_dir, storage, tools) = tools(true);
        for i in 0..25 {
            storage.add(&record(&i.to_string(), i as f64, 200)).unwrap();
        }

        let page = tools.list(&ListParams {
            limit: 50,
            ..Default::default()
        });
        assert_eq!(page["success"], true);
        assert_eq!(page["returned"], 10);
        assert_eq!(page["store_size"], 25);
        assert_eq!(page["has_more"], true);
        assert_eq!(page["requests"][0]["id"], "24");
        assert_eq!(page["requests"][0]["type"], "XHR");

        let last = tools.list(&ListParams {
            offset: 20,
            ..Default::default()
        });
        assert_eq!(last["returned"], 5);
        assert_eq!(last["has_more"], false);
    }

    #[test]
    fn test_list_offset_beyond_store() {
        let (_dir, storage, tools) = tools(true);
        storage.add(&record("1", 1.0, 200)).unwrap();

        let page = tools.list(&ListParams {
            offset: usize::MAX,
            ..Default::default()
        });
        assert_eq!(page["success"], true);
        assert_eq!(page["returned"], 0);
        assert_eq!(page["has_more"], false);
    }

    #[test]
    fn test_list_filters_pass_through() {
        let (_dir, storage, tools) = tools(true);
        storage.add(&record("ok", 1.0, 200)).unwrap();
        storage.add(&record("missing", 2.0, 404)).unwrap();

        let page = tools.list(&ListParams {
            filter_status: Some("4xx".into()),
            ..Default::default()
        });
        assert_eq!(page["returned"], 1);
        assert_eq!(page["requests"][0]["id"], "missing");
    }

    #[test]
    fn test_detail_excludes_bodies() {
        let (_dir, storage, tools) = tools(true);
        storage.add(&record("1", 1.0, 200)).unwrap();

        let detail = tools.get_detail("1");
        assert_eq!(detail["success"], true);
        assert_eq!(detail["request"]["response_body_size"], 13);
        assert_eq!(detail["request"]["resource_type"], "XHR");
        assert!(detail["request"].get("response_body").is_none());

        let missing = tools.get_detail("nope");
        assert_eq!(missing["success"], false);
        assert_eq!(missing["message"], "Request not found: nope");
    }

    #[test]
    fn test_export_cdp() {
        let (_dir, storage, tools) = tools(true);
        storage.add(&record("1", 1.0, 200)).unwrap();
        let cdp = tools.export_cdp("1");
        assert_eq!(cdp["request"]["response"]["body"], "{\"token\":\"x\"}");
        assert_eq!(cdp["request"]["response"]["mimeType"], "application/json");
    }

    #[test]
    fn test_search_shape() {
        let (_dir, storage, tools) = tools(true);
        storage.add(&record("1", 1.0, 200)).unwrap();

        let mut params = SearchParams::new("TOKEN");
        params.search_in = Some(vec!["response_body".into()]);
        let result = tools.search(&params);
        assert_eq!(result["success"], true);
        assert_eq!(result["total_matches"], 1);
        assert_eq!(result["matches"][0]["matched_in"], "response_body");
        assert_eq!(result["matches"][0]["request_id"], "1");
        assert_eq!(result["matches"][0]["match_position"], 2);

        let all = tools.search(&SearchParams::new("token"));
        assert_eq!(all["search_in"], json!(["all"]));
        assert_eq!(all["total_matches"], 1);
    }

    #[test]
    fn test_read_body_validation_and_chunks() {
        let (_dir, storage, tools) = tools(true);
        storage.add(&record("1", 1.0, 200)).unwrap();

        let bad = tools.read_body(
            "1",
            &ReadBodyParams {
                field: "headers".into(),
                ..Default::default()
            },
        );
        assert_eq!(bad["success"], false);
        assert!(bad["message"].as_str().unwrap().contains("invalid field"));

        let chunk = tools.read_body(
            "1",
            &ReadBodyParams {
                offset: 2,
                length: 5,
                ..Default::default()
            },
        );
        assert_eq!(chunk["success"], true);
        assert_eq!(chunk["field"], "response_body");
        assert_eq!(chunk["content"], "token");
        assert_eq!(chunk["total_size"], 13);
        assert_eq!(chunk["has_more"], true);

        let empty = tools.read_body(
            "1",
            &ReadBodyParams {
                field: "request_body".into(),
                ..Default::default()
            },
        );
        assert_eq!(empty["content"], "");
        assert_eq!(empty["has_more"], false);

        let missing = tools.read_body("zzz", &ReadBodyParams::default());
        assert_eq!(missing["success"], false);
    }

    #[test]
    fn test_clear_reports_count() {
        let (_dir, storage, tools) = tools(true);
        storage.add(&record("1", 1.0, 200)).unwrap();
        storage.add(&record("2", 2.0, 200)).unwrap();

        let cleared = tools.clear();
        assert_eq!(cleared["cleared_count"], 2);
        assert_eq!(storage.count().unwrap(), 0);

        let again = tools.clear();
        assert_eq!(again["success"], true);
        assert_eq!(again["cleared_count"], 0);
    }

    #[test]
    fn test_list_params_defaults_from_json() {
        let params: ListParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.limit, 10);
        let params: SearchParams = serde_json::from_str("{\"keyword\":\"k\"}").unwrap();
        assert_eq!(params.context_chars, 150);
        assert_eq!(params.limit, 10);
        let params: ReadBodyParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.field, "response_body");
        assert_eq!(params.length, 4000);
    }
}
