//! The embedded analytical engine's contract: plain query execution plus
//! the table-versioning catalog (snapshot create/list/prune, time-travel
//! reads) that [`crate::cache`] builds its refresh modes on.
//!
//! The engine itself — "assumed available as a library" — is out of this
//! crate's core scope; [`datafusion_engine`] is this gateway's concrete
//! stand-in, built on Apache DataFusion for SQL execution, with an
//! in-memory per-table snapshot history layered on top to emulate the
//! versioned catalog DataFusion itself doesn't provide.

pub mod datafusion_engine;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::model::{CacheCursor, RetentionPolicy};
use crate::errors::Result;

pub use datafusion_engine::DataFusionEngine;

/// Tabular result of a read, already converted to JSON-friendly rows.
#[derive(Debug, Clone, Serialize, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    /// Set by [`Engine::read_page`] when more rows exist past this page.
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteResult {
    pub rows_affected: u64,
    pub returning: Option<QueryResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotMeta {
    pub id: u64,
    pub created_at: DateTime<Utc>,
}

/// Thin contract over the embedded engine's query surface (the
/// `QueryExecutor` dependency, not the fairness/locking policy — that is
/// [`crate::executor`]'s job).
#[async_trait]
pub trait Engine: Send + Sync {
    async fn query(&self, sql: &str) -> Result<QueryResult>;

    /// Runs `sql` wrapped to return only `[offset, offset+limit)` rows;
    /// `has_more` tells the caller whether a further page exists.
    async fn query_page(&self, sql: &str, limit: usize, offset: usize) -> Result<QueryResult>;

    /// Executes a write statement (INSERT/UPDATE/DELETE/DDL). When
    /// `returning` is set the statement's own result rows (if any) are
    /// captured as [`WriteResult::returning`].
    async fn execute_write(&self, sql: &str, returning: bool) -> Result<WriteResult>;
}

/// The versioned-catalog half of the embedded engine: everything
/// [`crate::cache::CacheStore`] needs to implement full/append/merge
/// refresh and retention without knowing how snapshots are physically
/// represented.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// `CREATE OR REPLACE TABLE <table> AS <select_sql>` — a brand new
    /// snapshot whose contents are exactly the populate query's output.
    async fn replace_table(&self, table: &str, select_sql: &str) -> Result<SnapshotMeta>;

    /// Appends the populate query's output as a new snapshot layered on
    /// top of the previous one (Append refresh mode).
    async fn append_table(
        &self,
        table: &str,
        select_sql: &str,
        cursor: Option<&CacheCursor>,
    ) -> Result<SnapshotMeta>;

    /// Upserts the populate query's output by `primary_key`, producing a
    /// new snapshot (Merge refresh mode).
    async fn merge_table(
        &self,
        table: &str,
        select_sql: &str,
        primary_key: &[String],
        cursor: Option<&CacheCursor>,
    ) -> Result<SnapshotMeta>;

    /// Runs `sql` against `table` as of a specific snapshot, or the latest
    /// one when `as_of` is `None`.
    async fn query_as_of(
        &self,
        table: &str,
        sql: &str,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<QueryResult>;

    async fn list_snapshots(&self, table: &str) -> Result<Vec<SnapshotMeta>>;

    /// Applies `retention`, returning the number of snapshots pruned.
    async fn prune(&self, table: &str, retention: &RetentionPolicy) -> Result<usize>;

    /// Drops every snapshot of `table` and the table itself.
    async fn drop_table(&self, table: &str) -> Result<()>;
}

/// The single handle [`crate::executor::QueryExecutor`] and
/// [`crate::cache::CacheStore`] share: both engine operations and the
/// catalog's snapshot mutations go through the same shared/exclusive
/// lock, since both act on the one underlying engine handle.
pub trait EngineHandle: Engine + Catalog {}
impl<T: Engine + Catalog> EngineHandle for T {}
