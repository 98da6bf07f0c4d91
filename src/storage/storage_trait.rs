//! Storage Trait
//!
//! This module defines the `TrafficStorage` trait, the interface every traffic
//! store backend implements.
//!
//! Implementors are responsible for:
//! - Upserting captured records and enforcing the capacity bound
//! - Filtered, most-recent-first listing
//! - Keyword search with snippet extraction
//! - Chunked reads of request and response bodies
//!
//! All methods return a `Result`; a missing backing location is reported as
//! `StorageError::NotInitialized`, distinct from an empty store.

use crate::error_handling::types::StorageError;
use crate::storage::types::{BodyChunk, BodyField, SearchMatch, SearchRequest, TrafficFilter};
use crate::traffic::record::TrafficRecord;

pub trait TrafficStorage: Send + Sync {
    /// Human-readable backing location, e.g. the database file path.
    fn location(&self) -> String;

    /// Insert `record`, replacing any record with the same id, then evict the
    /// oldest records by timestamp until the capacity bound holds.
    fn add(&self, record: &TrafficRecord) -> Result<(), StorageError>;

    /// Records matching `filter`, most recent first. `limit` is capped at
    /// `MAX_QUERY_LIMIT`.
    fn query(
        &self,
        limit: usize,
        offset: usize,
        filter: &TrafficFilter,
    ) -> Result<Vec<TrafficRecord>, StorageError>;

    fn get_by_id(&self, id: &str) -> Result<Option<TrafficRecord>, StorageError>;

    /// Delete every record.
    fn clear(&self) -> Result<(), StorageError>;

    fn count(&self) -> Result<usize, StorageError>;

    fn search(&self, request: &SearchRequest) -> Result<Vec<SearchMatch>, StorageError>;

    /// A character window of a decoded body, `None` when the record is absent.
    fn read_body(
        &self,
        id: &str,
        field: BodyField,
        offset: usize,
        length: usize,
    ) -> Result<Option<BodyChunk>, StorageError>;
}
