use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Hard cap on the number of records a single `query` returns.
pub const MAX_QUERY_LIMIT: usize = 10;
pub const DEFAULT_CONTEXT_CHARS: usize = 150;
pub const DEFAULT_SEARCH_LIMIT: usize = 10;
pub const DEFAULT_CHUNK_LENGTH: usize = 4000;

/// Criteria for listing records. All present conditions must hold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrafficFilter {
    /// Domain pattern where `*` matches any run of characters
    pub domain: Option<String>,
    /// Resource type name, compared case-insensitively
    pub resource_type: Option<String>,
    /// `"200"`, `"500-599"` or `"4xx"`; anything else is ignored
    pub status: Option<String>,
    /// Case-sensitive substring of the URL
    pub url: Option<String>,
}

/// Parsed form of a status filter expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Exact(i64),
    /// Inclusive range
    Range(i64, i64),
}

/// Fields a keyword search can scan, in scan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchField {
    Url,
    RequestHeaders,
    RequestBody,
    ResponseHeaders,
    ResponseBody,
}

impl SearchField {
    pub const ALL: [SearchField; 5] = [
        SearchField::Url,
        SearchField::RequestHeaders,
        SearchField::RequestBody,
        SearchField::ResponseHeaders,
        SearchField::ResponseBody,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchField::Url => "url",
            SearchField::RequestHeaders => "request_headers",
            SearchField::RequestBody => "request_body",
            SearchField::ResponseHeaders => "response_headers",
            SearchField::ResponseBody => "response_body",
        }
    }

    pub(crate) fn column(&self) -> &'static str {
        self.as_str()
    }

    pub(crate) fn is_body(&self) -> bool {
        matches!(self, SearchField::RequestBody | SearchField::ResponseBody)
    }

    /// Resolve the caller's field list. `None`, or a list containing `"all"`,
    /// selects every field; unknown names are skipped.
    pub fn resolve(names: Option<&[String]>) -> Vec<SearchField> {
        match names {
            None => Self::ALL.to_vec(),
            Some(names) if names.iter().any(|n| n == "all") => Self::ALL.to_vec(),
            Some(names) => names.iter().filter_map(|n| n.parse().ok()).collect(),
        }
    }
}

impl fmt::Display for SearchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SearchField::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown search field: {}", s))
    }
}

/// A keyword search over the store.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub keyword: String,
    /// Scanned in order; duplicates are scanned twice
    pub fields: Vec<SearchField>,
    /// Exact HTTP method, case-insensitive
    pub method: Option<String>,
    /// Domain pattern where `*` matches any run of characters
    pub domain: Option<String>,
    pub context_chars: usize,
    pub limit: usize,
}

impl SearchRequest {
    pub fn new<S: Into<String>>(keyword: S) -> Self {
        Self {
            keyword: keyword.into(),
            fields: SearchField::ALL.to_vec(),
            method: None,
            domain: None,
            context_chars: DEFAULT_CONTEXT_CHARS,
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

/// One hit of a keyword search. A record matching in two fields yields two.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchMatch {
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub domain: String,
    pub response_size: u64,
    pub matched_in: SearchField,
    pub snippet: String,
    /// Character offset of the first case-insensitive occurrence
    pub match_position: Option<usize>,
    /// Byte length for body fields, character length otherwise
    pub field_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyField {
    RequestBody,
    ResponseBody,
}

impl BodyField {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyField::RequestBody => "request_body",
            BodyField::ResponseBody => "response_body",
        }
    }
}

impl fmt::Display for BodyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BodyField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request_body" => Ok(BodyField::RequestBody),
            "response_body" => Ok(BodyField::ResponseBody),
            other => Err(format!(
                "invalid field: {}, only request_body or response_body are supported",
                other
            )),
        }
    }
}

/// A window of a decoded body. Offsets and sizes count characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BodyChunk {
    pub content: String,
    pub offset: usize,
    pub length: usize,
    pub total_size: usize,
    pub has_more: bool,
}

impl BodyChunk {
    pub fn empty() -> Self {
        Self {
            content: String::new(),
            offset: 0,
            length: 0,
            total_size: 0,
            has_more: false,
        }
    }
}
