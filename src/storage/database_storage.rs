//! SQLite-backed traffic store shared between the capture process and readers.
//!
//! Every operation opens its own connection, does one unit of work and closes
//! it again; nothing is cached in memory, so readers in other processes always
//! see what the writer committed. Cross-process write serialization relies on
//! SQLite file locking with a busy timeout, while writes issued from this
//! process are additionally serialized by a mutex.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, error, trace, warn};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Connection, Row, Sqlite};

use crate::error_handling::types::StorageError;
use crate::storage::snippet::{extract_snippet, find_ignore_case};
use crate::storage::storage_trait::TrafficStorage;
use crate::storage::traffic_filter::{escape_like, non_empty, SqlBind, WhereBuilder};
use crate::storage::types::{
    BodyChunk, BodyField, SearchMatch, SearchRequest, TrafficFilter, MAX_QUERY_LIMIT,
};
use crate::traffic::encoding::decode_utf8_or_latin1;
use crate::traffic::record::TrafficRecord;
use crate::traffic::resource_type::ResourceType;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS traffic (
        id TEXT PRIMARY KEY,
        timestamp REAL NOT NULL,
        method TEXT NOT NULL,
        url TEXT NOT NULL,
        domain TEXT NOT NULL,
        status INTEGER NOT NULL,
        resource_type TEXT NOT NULL,
        size INTEGER NOT NULL,
        time_ms REAL NOT NULL,
        request_headers TEXT,
        request_body BLOB,
        request_body_size INTEGER DEFAULT 0,
        response_headers TEXT,
        response_body BLOB,
        timing TEXT,
        error TEXT,
        created_at REAL DEFAULT (strftime('%s', 'now'))
    )",
    "CREATE INDEX IF NOT EXISTS idx_timestamp ON traffic(timestamp DESC)",
    "CREATE INDEX IF NOT EXISTS idx_domain ON traffic(domain)",
    "CREATE INDEX IF NOT EXISTS idx_status ON traffic(status)",
];

const RECORD_COLUMNS: &str = "id, timestamp, method, url, domain, status, resource_type, size, \
     time_ms, request_headers, request_body, request_body_size, response_headers, \
     response_body, timing, error";

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

pub struct DatabaseStorage {
    path: PathBuf,
    max_size: usize,
    busy_timeout: Duration,
    write_lock: Mutex<()>,
}

impl DatabaseStorage {
    /// Database file shared with the capture process
    pub const DEFAULT_DB_PATH: &'static str = "/tmp/android-proxy-traffic.db";
    pub const DEFAULT_MAX_SIZE: usize = 2000;
    pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(10);

    /// Handle on the database at `path`. Nothing is touched on disk until an
    /// operation runs; use `initialize` on the writer side to create the file.
    pub fn new<P: AsRef<Path>>(path: P, max_size: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_size,
            busy_timeout: Self::DEFAULT_BUSY_TIMEOUT,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Whether the backing file exists, i.e. the capture side has started.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Create the database file and schema if missing.
    pub fn initialize(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                error!("Failed to create directory {}: {}", parent.display(), e);
                StorageError::WriteFailed
            })?;
        }
        self.run(async {
            let opts = self.connect_options().create_if_missing(true);
            let mut conn = SqliteConnection::connect_with(&opts)
                .await
                .map_err(|e| map_sqlx_error(e, StorageError::ConnectionFailed))?;
            create_schema(&mut conn).await?;
            close(conn).await;
            Ok(())
        })?;
        debug!("Traffic store initialized at {}", self.path.display());
        Ok(())
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(&self.path)
            .busy_timeout(self.busy_timeout)
    }

    /// Each call gets its own current-thread runtime so the store can be used
    /// from plain threads; callers inside async code go through
    /// `spawn_blocking`.
    fn run<T, F>(&self, fut: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                error!("Failed to build storage runtime: {}", e);
                StorageError::ConnectionFailed
            })?;
        rt.block_on(fut)
    }

    async fn connect(&self) -> Result<SqliteConnection, StorageError> {
        if !self.path.exists() {
            return Err(StorageError::NotInitialized(self.path.clone()));
        }
        let opts = self.connect_options().create_if_missing(false);
        let mut conn = SqliteConnection::connect_with(&opts)
            .await
            .map_err(|e| map_sqlx_error(e, StorageError::ConnectionFailed))?;

        let has_table: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'traffic'",
        )
        .fetch_one(&mut conn)
        .await
        .map_err(|e| map_sqlx_error(e, StorageError::ReadFailed))?;
        if has_table == 0 {
            create_schema(&mut conn).await?;
        }
        Ok(conn)
    }

    fn lock_writes(&self) -> std::sync::MutexGuard<'_, ()> {
        // The guarded data is `()`, so a poisoned lock carries no broken state.
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TrafficStorage for DatabaseStorage {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn add(&self, record: &TrafficRecord) -> Result<(), StorageError> {
        let request_headers = to_json(&record.request_headers)?;
        let response_headers = to_json(&record.response_headers)?;
        let timing = to_json(&record.timing)?;

        let _guard = self.lock_writes();
        let evicted = self.run(async {
            let mut conn = self.connect().await?;
            let mut tx = conn
                .begin()
                .await
                .map_err(|e| map_sqlx_error(e, StorageError::WriteFailed))?;

            sqlx::query(
                "INSERT OR REPLACE INTO traffic (
                    id, timestamp, method, url, domain, status,
                    resource_type, size, time_ms, request_headers,
                    request_body, request_body_size, response_headers,
                    response_body, timing, error
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.id)
            .bind(record.timestamp)
            .bind(&record.method)
            .bind(&record.url)
            .bind(&record.domain)
            .bind(i64::from(record.status))
            .bind(record.resource_type.as_str())
            .bind(record.size as i64)
            .bind(record.time_ms)
            .bind(&request_headers)
            .bind(record.request_body.as_deref())
            .bind(record.request_body_size as i64)
            .bind(&response_headers)
            .bind(record.response_body.as_deref())
            .bind(&timing)
            .bind(record.error.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(e, StorageError::WriteFailed))?;

            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM traffic")
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error(e, StorageError::ReadFailed))?;

            let mut evicted = 0u64;
            let excess = count - self.max_size as i64;
            if excess > 0 {
                evicted = sqlx::query(
                    "DELETE FROM traffic WHERE id IN (
                        SELECT id FROM traffic ORDER BY timestamp ASC LIMIT ?
                    )",
                )
                .bind(excess)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error(e, StorageError::WriteFailed))?
                .rows_affected();
            }

            tx.commit()
                .await
                .map_err(|e| map_sqlx_error(e, StorageError::WriteFailed))?;
            close(conn).await;
            Ok(evicted)
        })?;

        trace!("Stored traffic record {}", record.id);
        if evicted > 0 {
            debug!(
                "Evicted {} oldest record(s) to stay within {} entries",
                evicted, self.max_size
            );
        }
        Ok(())
    }

    fn query(
        &self,
        limit: usize,
        offset: usize,
        filter: &TrafficFilter,
    ) -> Result<Vec<TrafficRecord>, StorageError> {
        let limit = limit.min(MAX_QUERY_LIMIT);
        let builder = WhereBuilder::from_filter(filter);
        let sql = format!(
            "SELECT {} FROM traffic WHERE {} ORDER BY timestamp DESC LIMIT ? OFFSET ?",
            RECORD_COLUMNS,
            builder.clause()
        );
        debug!("Querying traffic: {} (limit {}, offset {})", builder.clause(), limit, offset);

        self.run(async {
            let mut conn = self.connect().await?;
            let rows = bind_all(sqlx::query(&sql), &builder.binds)
                .bind(to_sql_int(limit))
                .bind(to_sql_int(offset))
                .fetch_all(&mut conn)
                .await
                .map_err(|e| map_sqlx_error(e, StorageError::ReadFailed))?;
            close(conn).await;
            rows.iter().map(row_to_record).collect()
        })
    }

    fn get_by_id(&self, id: &str) -> Result<Option<TrafficRecord>, StorageError> {
        let sql = format!("SELECT {} FROM traffic WHERE id = ?", RECORD_COLUMNS);
        self.run(async {
            let mut conn = self.connect().await?;
            let row = sqlx::query(&sql)
                .bind(id)
                .fetch_optional(&mut conn)
                .await
                .map_err(|e| map_sqlx_error(e, StorageError::ReadFailed))?;
            close(conn).await;
            row.as_ref().map(row_to_record).transpose()
        })
    }

    fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.lock_writes();
        let removed = self.run(async {
            let mut conn = self.connect().await?;
            let done = sqlx::query("DELETE FROM traffic")
                .execute(&mut conn)
                .await
                .map_err(|e| map_sqlx_error(e, StorageError::WriteFailed))?;
            close(conn).await;
            Ok(done.rows_affected())
        })?;
        debug!("Cleared {} traffic record(s)", removed);
        Ok(())
    }

    fn count(&self) -> Result<usize, StorageError> {
        self.run(async {
            let mut conn = self.connect().await?;
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM traffic")
                .fetch_one(&mut conn)
                .await
                .map_err(|e| map_sqlx_error(e, StorageError::ReadFailed))?;
            close(conn).await;
            Ok(count.max(0) as usize)
        })
    }

    fn search(&self, request: &SearchRequest) -> Result<Vec<SearchMatch>, StorageError> {
        let mut base = WhereBuilder::default();
        if let Some(method) = non_empty(&request.method) {
            base.push(
                "UPPER(method) = UPPER(?)",
                vec![SqlBind::Text(method.to_string())],
            );
        }
        if let Some(domain) = non_empty(&request.domain) {
            base.domain(domain);
        }
        let keyword_pattern = format!("%{}%", escape_like(&request.keyword));

        self.run(async {
            let mut conn = self.connect().await?;
            let mut matches = Vec::new();

            for field in &request.fields {
                let remaining = request.limit.saturating_sub(matches.len());
                if remaining == 0 {
                    break;
                }

                let column = field.column();
                // Body blobs are matched through a text cast; multi-byte
                // content may not match the way a decoded body would.
                let (match_expr, size_expr) = if field.is_body() {
                    (format!("CAST({} AS TEXT)", column), format!("LENGTH({})", column))
                } else {
                    (column.to_string(), "NULL".to_string())
                };
                let sql = format!(
                    "SELECT id, url, method, domain, size,
                            CAST({column} AS BLOB) AS matched_content,
                            {size_expr} AS field_size
                     FROM traffic
                     WHERE {base} AND {match_expr} LIKE ? ESCAPE '\\'
                     ORDER BY timestamp DESC
                     LIMIT ?",
                    column = column,
                    size_expr = size_expr,
                    base = base.clause(),
                    match_expr = match_expr,
                );

                let rows = bind_all(sqlx::query(&sql), &base.binds)
                    .bind(&keyword_pattern)
                    .bind(to_sql_int(remaining))
                    .fetch_all(&mut conn)
                    .await
                    .map_err(|e| map_sqlx_error(e, StorageError::ReadFailed))?;

                for row in &rows {
                    let raw: Option<Vec<u8>> = get(row, "matched_content")?;
                    let content = String::from_utf8_lossy(raw.as_deref().unwrap_or_default());
                    let field_size = match get::<Option<i64>>(row, "field_size")? {
                        Some(n) if n > 0 => n as u64,
                        _ => content.chars().count() as u64,
                    };

                    matches.push(SearchMatch {
                        request_id: get(row, "id")?,
                        url: get(row, "url")?,
                        method: get(row, "method")?,
                        domain: get(row, "domain")?,
                        response_size: get::<i64>(row, "size")?.max(0) as u64,
                        matched_in: *field,
                        snippet: extract_snippet(&content, &request.keyword, request.context_chars),
                        match_position: find_ignore_case(&content, &request.keyword),
                        field_size,
                    });
                }
            }

            close(conn).await;
            matches.truncate(request.limit);
            Ok(matches)
        })
    }

    fn read_body(
        &self,
        id: &str,
        field: BodyField,
        offset: usize,
        length: usize,
    ) -> Result<Option<BodyChunk>, StorageError> {
        let sql = format!("SELECT {} AS body FROM traffic WHERE id = ?", field.as_str());
        let body = self.run(async {
            let mut conn = self.connect().await?;
            let row = sqlx::query(&sql)
                .bind(id)
                .fetch_optional(&mut conn)
                .await
                .map_err(|e| map_sqlx_error(e, StorageError::ReadFailed))?;
            close(conn).await;
            row.as_ref()
                .map(|r| get::<Option<Vec<u8>>>(r, "body"))
                .transpose()
        })?;

        let Some(body) = body else {
            return Ok(None);
        };
        let Some(bytes) = body else {
            return Ok(Some(BodyChunk::empty()));
        };

        let text = decode_utf8_or_latin1(&bytes);
        let total_size = text.chars().count();
        let content: String = text.chars().skip(offset).take(length).collect();

        Ok(Some(BodyChunk {
            length: content.chars().count(),
            content,
            offset,
            total_size,
            has_more: offset.saturating_add(length) < total_size,
        }))
    }
}

async fn create_schema(conn: &mut SqliteConnection) -> Result<(), StorageError> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error(e, StorageError::WriteFailed))?;
    }
    Ok(())
}

async fn close(conn: SqliteConnection) {
    if let Err(e) = conn.close().await {
        debug!("Error while closing storage connection: {}", e);
    }
}

/// Counts above `i64::MAX` saturate instead of wrapping negative.
fn to_sql_int(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn bind_all<'q>(mut query: SqliteQuery<'q>, binds: &'q [SqlBind]) -> SqliteQuery<'q> {
    for bind in binds {
        query = match bind {
            SqlBind::Text(s) => query.bind(s.as_str()),
            SqlBind::Int(i) => query.bind(*i),
        };
    }
    query
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended codes,
/// mean another connection held the lock past the busy timeout.
fn map_sqlx_error(err: sqlx::Error, fallback: StorageError) -> StorageError {
    if let sqlx::Error::Database(db) = &err {
        let primary = db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| code & 0xff);
        if matches!(primary, Some(5) | Some(6)) {
            warn!("Traffic store is locked: {}", db);
            return StorageError::Contention;
        }
    }
    error!("Storage error ({}): {}", fallback, err);
    fallback
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| {
        error!("Failed to serialize record field: {}", e);
        StorageError::WriteFailed
    })
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, StorageError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(column).map_err(|e| {
        error!("Failed to decode column {}: {}", column, e);
        StorageError::ReadFailed
    })
}

/// Corrupt or missing JSON decodes to an empty value instead of failing the read.
fn parse_json_field<T: DeserializeOwned + Default>(raw: Option<String>, column: &str, id: &str) -> T {
    match raw.as_deref() {
        None | Some("") => T::default(),
        Some(text) => serde_json::from_str(text).unwrap_or_else(|e| {
            warn!("Record {} has corrupt {} ({}), using empty value", id, column, e);
            T::default()
        }),
    }
}

fn row_to_record(row: &SqliteRow) -> Result<TrafficRecord, StorageError> {
    let id: String = get(row, "id")?;

    let resource_type_name: String = get(row, "resource_type")?;
    let resource_type = resource_type_name.parse().unwrap_or_else(|_| {
        warn!(
            "Record {} has unknown resource type {:?}",
            id, resource_type_name
        );
        ResourceType::Other
    });

    let request_headers: HashMap<String, String> =
        parse_json_field(get(row, "request_headers")?, "request_headers", &id);
    let response_headers: HashMap<String, String> =
        parse_json_field(get(row, "response_headers")?, "response_headers", &id);
    let timing: BTreeMap<String, f64> = parse_json_field(get(row, "timing")?, "timing", &id);

    Ok(TrafficRecord {
        timestamp: get(row, "timestamp")?,
        method: get(row, "method")?,
        url: get(row, "url")?,
        domain: get(row, "domain")?,
        status: u16::try_from(get::<i64>(row, "status")?).unwrap_or(0),
        resource_type,
        size: get::<i64>(row, "size")?.max(0) as u64,
        time_ms: get(row, "time_ms")?,
        request_headers,
        request_body: get(row, "request_body")?,
        request_body_size: get::<Option<i64>>(row, "request_body_size")?
            .unwrap_or(0)
            .max(0) as u64,
        response_headers,
        response_body: get(row, "response_body")?,
        timing,
        error: get(row, "error")?,
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::SearchField;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn temp_db(max_size: usize) -> (TempDir, DatabaseStorage) {
        let dir = TempDir::new().unwrap();
        let storage = DatabaseStorage::new(dir.path().join("traffic.db"), max_size);
        storage.initialize().unwrap();
        (dir, storage)
    }

    fn record(id: &str, timestamp: f64) -> TrafficRecord {
        let mut timing = BTreeMap::new();
        timing.insert("requestTime".to_string(), timestamp);
        timing.insert("total".to_string(), 20.0);
        TrafficRecord {
            id: id.to_string(),
            timestamp,
            method: "GET".into(),
            url: format!("https://api.example.com/items/{}", id),
            domain: "api.example.com".into(),
            status: 200,
            resource_type: ResourceType::Xhr,
            size: 0,
            time_ms: 20.0,
            request_headers: HashMap::new(),
            request_body: None,
            request_body_size: 0,
            response_headers: HashMap::new(),
            response_body: None,
            timing,
            error: None,
        }
    }

    fn with_status(id: &str, timestamp: f64, status: u16) -> TrafficRecord {
        TrafficRecord {
            status,
            ..record(id, timestamp)
        }
    }

    #[test]
    fn test_missing_file_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        let storage = DatabaseStorage::new(dir.path().join("absent.db"), 10);
        assert!(!storage.exists());
        assert!(matches!(
            storage.count(),
            Err(StorageError::NotInitialized(_))
        ));
        assert!(matches!(
            storage.query(10, 0, &TrafficFilter::default()),
            Err(StorageError::NotInitialized(_))
        ));
        assert!(matches!(
            storage.add(&record("1", 1.0)),
            Err(StorageError::NotInitialized(_))
        ));
        // reads must not create the file
        assert!(!storage.exists());
    }

    #[test]
    fn test_empty_store_is_queryable() {
        let (_dir, storage) = temp_db(10);
        assert_eq!(storage.count().unwrap(), 0);
        assert!(storage
            .query(10, 0, &TrafficFilter::default())
            .unwrap()
            .is_empty());
        assert!(storage.get_by_id("nope").unwrap().is_none());
    }

    #[test]
    fn test_add_and_get_roundtrip() {
        let (_dir, storage) = temp_db(10);
        let mut rec = record("1", 100.0);
        rec.request_headers
            .insert("Authorization".into(), "Bearer abc".into());
        rec.response_body = Some(vec![0, 159, 146, 150]);
        rec.size = 4;
        rec.error = Some("boom".into());
        storage.add(&rec).unwrap();

        let fetched = storage.get_by_id("1").unwrap().unwrap();
        assert_eq!(fetched, rec);
    }

    #[test]
    fn test_upsert_replaces_without_growing() {
        let (_dir, storage) = temp_db(10);
        storage.add(&record("1", 100.0)).unwrap();
        storage.add(&record("2", 101.0)).unwrap();

        let mut replacement = record("1", 102.0);
        replacement.method = "POST".into();
        storage.add(&replacement).unwrap();

        assert_eq!(storage.count().unwrap(), 2);
        assert_eq!(storage.get_by_id("1").unwrap().unwrap().method, "POST");
    }

    #[test]
    fn test_eviction_keeps_most_recent() {
        let (_dir, storage) = temp_db(5);
        for i in 0..8 {
            storage.add(&record(&i.to_string(), 1000.0 + i as f64)).unwrap();
            assert!(storage.count().unwrap() <= 5);
        }
        assert_eq!(storage.count().unwrap(), 5);
        for i in 0..3 {
            assert!(storage.get_by_id(&i.to_string()).unwrap().is_none());
        }
        for i in 3..8 {
            assert!(storage.get_by_id(&i.to_string()).unwrap().is_some());
        }
    }

    #[test]
    fn test_query_clamps_limit_and_orders_descending() {
        let (_dir, storage) = temp_db(100);
        for i in 0..15 {
            // insertion order differs from timestamp order
            let ts = if i % 2 == 0 { 500.0 + i as f64 } else { 100.0 + i as f64 };
            storage.add(&record(&i.to_string(), ts)).unwrap();
        }

        let rows = storage.query(50, 0, &TrafficFilter::default()).unwrap();
        assert_eq!(rows.len(), MAX_QUERY_LIMIT);
        assert!(rows.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

        let page2 = storage.query(10, 10, &TrafficFilter::default()).unwrap();
        assert_eq!(page2.len(), 5);
        assert!(rows.last().unwrap().timestamp >= page2[0].timestamp);
    }

    #[test]
    fn test_query_offset_past_i64_is_empty() {
        let (_dir, storage) = temp_db(10);
        storage.add(&record("1", 1.0)).unwrap();
        storage.add(&record("2", 2.0)).unwrap();

        let rows = storage
            .query(10, usize::MAX, &TrafficFilter::default())
            .unwrap();
        assert!(rows.is_empty());
        assert_eq!(
            storage.query(usize::MAX, 0, &TrafficFilter::default()).unwrap().len(),
            2
        );
    }

    #[test]
    fn test_status_filters() {
        let (_dir, storage) = temp_db(100);
        let statuses = [200, 204, 301, 404, 418, 500, 503, 0];
        for (i, status) in statuses.iter().enumerate() {
            storage
                .add(&with_status(&i.to_string(), i as f64, *status))
                .unwrap();
        }

        let statuses_for = |pattern: &str| -> Vec<u16> {
            let filter = TrafficFilter {
                status: Some(pattern.to_string()),
                ..Default::default()
            };
            let mut got: Vec<u16> = storage
                .query(10, 0, &filter)
                .unwrap()
                .iter()
                .map(|r| r.status)
                .collect();
            got.sort();
            got
        };

        assert_eq!(statuses_for("4xx"), vec![404, 418]);
        assert_eq!(statuses_for("200-299"), vec![200, 204]);
        assert_eq!(statuses_for("200"), vec![200]);
        assert_eq!(statuses_for("500-599"), vec![500, 503]);
        // unparsable filters are ignored
        assert_eq!(statuses_for("teapot").len(), statuses.len());
    }

    #[test]
    fn test_domain_type_and_url_filters() {
        let (_dir, storage) = temp_db(100);
        let mut a = record("a", 1.0);
        a.domain = "api.example.com".into();
        a.url = "https://api.example.com/v1/Login".into();
        let mut b = record("b", 2.0);
        b.domain = "cdn.example.com".into();
        b.url = "https://cdn.example.com/logo.png".into();
        b.resource_type = ResourceType::Image;
        let mut c = record("c", 3.0);
        c.domain = "example.com".into();
        c.url = "https://example.com/".into();
        c.resource_type = ResourceType::Document;
        for r in [&a, &b, &c] {
            storage.add(r).unwrap();
        }

        let ids = |filter: TrafficFilter| -> Vec<String> {
            storage
                .query(10, 0, &filter)
                .unwrap()
                .into_iter()
                .map(|r| r.id)
                .collect()
        };

        assert_eq!(
            ids(TrafficFilter {
                domain: Some("*.example.com".into()),
                ..Default::default()
            }),
            vec!["b", "a"]
        );
        assert_eq!(
            ids(TrafficFilter {
                resource_type: Some("image".into()),
                ..Default::default()
            }),
            vec!["b"]
        );
        assert_eq!(
            ids(TrafficFilter {
                url: Some("Login".into()),
                ..Default::default()
            }),
            vec!["a"]
        );
        assert!(ids(TrafficFilter {
            url: Some("login".into()),
            ..Default::default()
        })
        .is_empty());
        assert_eq!(
            ids(TrafficFilter {
                domain: Some("*.example.com".into()),
                resource_type: Some("XHR".into()),
                ..Default::default()
            }),
            vec!["a"]
        );
    }

    #[test]
    fn test_clear_always_empties() {
        let (_dir, storage) = temp_db(10);
        storage.clear().unwrap();
        assert_eq!(storage.count().unwrap(), 0);
        storage.add(&record("1", 1.0)).unwrap();
        storage.add(&record("2", 2.0)).unwrap();
        storage.clear().unwrap();
        assert_eq!(storage.count().unwrap(), 0);
    }

    #[test]
    fn test_search_url_match() {
        let (_dir, storage) = temp_db(10);
        let mut rec = record("1", 1.0);
        rec.url = "https://auth.example.com/oauth?access_TOKEN=xyz".into();
        storage.add(&rec).unwrap();
        storage.add(&record("2", 2.0)).unwrap();

        let mut request = SearchRequest::new("token");
        request.fields = vec![SearchField::Url];
        let matches = storage.search(&request).unwrap();

        assert_eq!(matches.len(), 1);
        let hit = &matches[0];
        assert_eq!(hit.request_id, "1");
        assert_eq!(hit.matched_in, SearchField::Url);
        assert!(hit.snippet.to_lowercase().contains("token"));
        assert_eq!(hit.match_position, Some(38));
        assert_eq!(hit.field_size, rec.url.chars().count() as u64);
    }

    #[test]
    fn test_search_across_fields_without_dedup() {
        let (_dir, storage) = temp_db(10);
        let mut rec = record("1", 1.0);
        rec.method = "POST".into();
        rec.request_headers
            .insert("X-Session".into(), "secret-abc".into());
        rec.response_body = Some(b"{\"session\":\"SECRET-abc\"}".to_vec());
        rec.size = 24;
        storage.add(&rec).unwrap();

        let matches = storage.search(&SearchRequest::new("secret")).unwrap();
        let fields: Vec<SearchField> = matches.iter().map(|m| m.matched_in).collect();
        assert_eq!(
            fields,
            vec![SearchField::RequestHeaders, SearchField::ResponseBody]
        );
        assert_eq!(matches[1].field_size, 24);
        assert_eq!(matches[1].response_size, 24);

        let mut get_only = SearchRequest::new("secret");
        get_only.method = Some("get".into());
        assert!(storage.search(&get_only).unwrap().is_empty());

        let mut by_domain = SearchRequest::new("secret");
        by_domain.method = Some("post".into());
        by_domain.domain = Some("*.example.com".into());
        assert_eq!(storage.search(&by_domain).unwrap().len(), 2);
    }

    #[test]
    fn test_search_limit_and_literal_keyword() {
        let (_dir, storage) = temp_db(50);
        for i in 0..20 {
            let mut rec = record(&i.to_string(), i as f64);
            rec.url = format!("https://api.example.com/find?q=needle{}", i);
            storage.add(&rec).unwrap();
        }

        let mut request = SearchRequest::new("NEEDLE");
        request.limit = 3;
        let matches = storage.search(&request).unwrap();
        let ids: Vec<&str> = matches.iter().map(|m| m.request_id.as_str()).collect();
        assert_eq!(ids, vec!["19", "18", "17"]);

        // LIKE metacharacters in the keyword match literally
        assert!(storage.search(&SearchRequest::new("needle_")).unwrap().is_empty());
        assert!(storage.search(&SearchRequest::new("%")).unwrap().is_empty());
    }

    #[test]
    fn test_read_body_chunks_reconstruct() {
        let (_dir, storage) = temp_db(10);
        let text: String = (0..10_000)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect();
        let mut rec = record("1", 1.0);
        rec.response_body = Some(text.clone().into_bytes());
        rec.size = 10_000;
        storage.add(&rec).unwrap();

        let first = storage
            .read_body("1", BodyField::ResponseBody, 0, 1000)
            .unwrap()
            .unwrap();
        assert_eq!(first.content.chars().count(), 1000);
        assert_eq!(first.total_size, 10_000);
        assert!(first.has_more);

        let mut rebuilt = String::new();
        let mut offset = 0;
        loop {
            let chunk = storage
                .read_body("1", BodyField::ResponseBody, offset, 1000)
                .unwrap()
                .unwrap();
            rebuilt.push_str(&chunk.content);
            offset += chunk.length;
            if !chunk.has_more {
                break;
            }
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_read_body_counts_characters() {
        let (_dir, storage) = temp_db(10);
        let mut rec = record("1", 1.0);
        rec.request_body = Some("héllo wörld".as_bytes().to_vec());
        rec.response_body = Some(vec![b'c', 0xE9, b'!']);
        storage.add(&rec).unwrap();

        let chunk = storage
            .read_body("1", BodyField::RequestBody, 6, 3)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.content, "wör");
        assert_eq!(chunk.total_size, 11);
        assert!(chunk.has_more);

        // invalid UTF-8 decodes as Latin-1
        let latin = storage
            .read_body("1", BodyField::ResponseBody, 0, 100)
            .unwrap()
            .unwrap();
        assert_eq!(latin.content, "cé!");
        assert!(!latin.has_more);
    }

    #[test]
    fn test_read_body_absent_cases() {
        let (_dir, storage) = temp_db(10);
        storage.add(&record("1", 1.0)).unwrap();
        assert!(storage
            .read_body("missing", BodyField::ResponseBody, 0, 10)
            .unwrap()
            .is_none());
        assert_eq!(
            storage
                .read_body("1", BodyField::RequestBody, 5, 10)
                .unwrap()
                .unwrap(),
            BodyChunk::empty()
        );
    }

    #[test]
    fn test_corrupt_json_fields_decode_empty() {
        let (_dir, storage) = temp_db(10);
        storage.add(&record("1", 1.0)).unwrap();

        storage
            .run(async {
                let mut conn = storage.connect().await?;
                sqlx::query(
                    "UPDATE traffic SET request_headers = '{not json', timing = '[1,2]' WHERE id = '1'",
                )
                .execute(&mut conn)
                .await
                .map_err(|e| map_sqlx_error(e, StorageError::WriteFailed))?;
                close(conn).await;
                Ok(())
            })
            .unwrap();

        let rec = storage.get_by_id("1").unwrap().unwrap();
        assert!(rec.request_headers.is_empty());
        assert!(rec.timing.is_empty());
        assert_eq!(storage.query(10, 0, &TrafficFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_writers_respect_bound() {
        let (_dir, storage) = temp_db(40);
        let storage = Arc::new(storage);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let storage = Arc::clone(&storage);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let id = format!("{}-{}", t, i);
                        storage.add(&record(&id, (t * 100 + i) as f64)).unwrap();
                        storage.query(10, 0, &TrafficFilter::default()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(storage.count().unwrap(), 40);
    }

    #[test]
    fn test_second_handle_sees_writes() {
        let (_dir, writer) = temp_db(10);
        let reader = DatabaseStorage::new(writer.path(), 10);
        assert_eq!(reader.max_size(), 10);
        writer.add(&record("1", 1.0)).unwrap();
        assert_eq!(reader.count().unwrap(), 1);
        assert!(reader.get_by_id("1").unwrap().is_some());
    }

    #[test]
    fn test_locked_database_reports_contention() {
        let (_dir, storage) = temp_db(10);
        let storage = DatabaseStorage::new(storage.path(), 10)
            .with_busy_timeout(Duration::from_millis(300));

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let mut holder = rt.block_on(async {
            let opts = SqliteConnectOptions::new().filename(storage.path());
            let mut conn = SqliteConnection::connect_with(&opts).await.unwrap();
            sqlx::query("BEGIN EXCLUSIVE")
                .execute(&mut conn)
                .await
                .unwrap();
            conn
        });

        assert!(matches!(
            storage.add(&record("1", 1.0)),
            Err(StorageError::Contention)
        ));
        assert!(matches!(storage.count(), Err(StorageError::Contention)));

        let tools = crate::tools::TrafficTools::new(Arc::new(storage));
        let cleared = tools.clear();
        assert_eq!(cleared["success"], false);
        assert_eq!(cleared["message"], StorageError::Contention.to_string());

        rt.block_on(async {
            sqlx::query("ROLLBACK").execute(&mut holder).await.unwrap();
            holder.close().await.unwrap();
        });
    }
}
