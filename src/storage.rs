//! Storage subsystem
//!
//! This module provides the traffic store shared between the capture process
//! (writer) and the query tools (readers).
//!
//! Components:
//! - `storage_trait`: the `TrafficStorage` trait defining a uniform API.
//! - `types`: filters, search requests/matches and body chunks.
//! - `traffic_filter`: translation of list filters into SQL conditions.
//! - `snippet`: context extraction around search hits.
//! - `database_storage`: SQLite implementation using sqlx.

pub mod database_storage;
pub mod snippet;
pub mod storage_trait;
pub mod traffic_filter;
pub mod types;

pub use database_storage::DatabaseStorage;
pub use storage_trait::TrafficStorage;
