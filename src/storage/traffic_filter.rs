//! Helpers turning `TrafficFilter` criteria into SQL conditions.

use std::sync::LazyLock;

use regex::Regex;

pub use crate::storage::types::{StatusFilter, TrafficFilter};

static STATUS_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s*-\s*(\d+)$").expect("valid status range regex"));
static STATUS_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d)xx$").expect("valid status class regex"));

/// Parse `"200"`, `"500-599"` or `"4xx"` (case-insensitive, surrounding
/// whitespace ignored). Other forms return `None` and filter nothing.
pub fn parse_status_filter(pattern: &str) -> Option<StatusFilter> {
    let pattern = pattern.trim().to_lowercase();

    if !pattern.is_empty() && pattern.bytes().all(|b| b.is_ascii_digit()) {
        return pattern.parse().ok().map(StatusFilter::Exact);
    }

    if let Some(caps) = STATUS_RANGE.captures(&pattern) {
        let start = caps[1].parse().ok()?;
        let end = caps[2].parse().ok()?;
        return Some(StatusFilter::Range(start, end));
    }

    if let Some(caps) = STATUS_CLASS.captures(&pattern) {
        let class: i64 = caps[1].parse().ok()?;
        return Some(StatusFilter::Range(class * 100, class * 100 + 99));
    }

    None
}

/// Translate a `*` wildcard domain pattern into a `LIKE` pattern.
pub fn domain_like_pattern(pattern: &str) -> String {
    pattern.replace('*', "%")
}

/// Escape `LIKE` metacharacters so `text` matches literally with `ESCAPE '\'`.
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Builds a `WHERE` clause and its positional text/integer binds.
#[derive(Debug, Default)]
pub(crate) struct WhereBuilder {
    clauses: Vec<String>,
    pub(crate) binds: Vec<SqlBind>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlBind {
    Text(String),
    Int(i64),
}

impl WhereBuilder {
    pub(crate) fn push(&mut self, clause: &str, binds: Vec<SqlBind>) {
        self.clauses.push(clause.to_string());
        self.binds.extend(binds);
    }

    pub(crate) fn domain(&mut self, pattern: &str) {
        self.push(
            "domain LIKE ?",
            vec![SqlBind::Text(domain_like_pattern(pattern))],
        );
    }

    pub(crate) fn status(&mut self, pattern: &str) {
        match parse_status_filter(pattern) {
            Some(StatusFilter::Exact(code)) => self.push("status = ?", vec![SqlBind::Int(code)]),
            Some(StatusFilter::Range(lo, hi)) => self.push(
                "status BETWEEN ? AND ?",
                vec![SqlBind::Int(lo), SqlBind::Int(hi)],
            ),
            None => log::debug!("Ignoring unrecognized status filter {:?}", pattern),
        }
    }

    pub(crate) fn from_filter(filter: &TrafficFilter) -> Self {
        let mut builder = Self::default();
        if let Some(domain) = non_empty(&filter.domain) {
            builder.domain(domain);
        }
        if let Some(kind) = non_empty(&filter.resource_type) {
            builder.push(
                "LOWER(resource_type) = LOWER(?)",
                vec![SqlBind::Text(kind.to_string())],
            );
        }
        if let Some(status) = non_empty(&filter.status) {
            builder.status(status);
        }
        if let Some(url) = non_empty(&filter.url) {
            // instr() is case-sensitive, unlike LIKE
            builder.push("instr(url, ?) > 0", vec![SqlBind::Text(url.to_string())]);
        }
        builder
    }

    pub(crate) fn clause(&self) -> String {
        if self.clauses.is_empty() {
            "1=1".to_string()
        } else {
            self.clauses.join(" AND ")
        }
    }
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
