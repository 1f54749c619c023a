//! Serialises access to the embedded engine: shared lock for reads,
//! exclusive lock for writes and transactions, fair FIFO ordering via
//! `tokio::sync::RwLock`, and lazy once-per-connection initialisation.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use crate::config::model::Connection;
use crate::engine::{EngineHandle, QueryResult, WriteResult};
use crate::errors::{GatewayError, Result};

/// Client-side pagination parameters for [`QueryExecutor::read`]: the
/// engine is asked for the whole result and the executor slices it,
/// leaving the SQL untouched.
#[derive(Debug, Clone, Copy)]
pub struct PageParams {
    pub limit: usize,
    pub offset: usize,
}

pub struct QueryExecutor {
    engine: Arc<dyn EngineHandle>,
    lock: RwLock<()>,
    acquire_timeout: Duration,
    initialized_connections: Mutex<HashSet<String>>,
}

impl QueryExecutor {
    pub fn new(engine: Arc<dyn EngineHandle>, acquire_timeout: Duration) -> Self {
        Self {
            engine,
            lock: RwLock::new(()),
            acquire_timeout,
            initialized_connections: Mutex::new(HashSet::new()),
        }
    }

    async fn acquire_read(&self) -> Result<tokio::sync::RwLockReadGuard<'_, ()>> {
        tokio::time::timeout(self.acquire_timeout, self.lock.read())
            .await
            .map_err(|_| GatewayError::EngineBusy)
    }

    async fn acquire_write(&self) -> Result<tokio::sync::RwLockWriteGuard<'_, ()>> {
        tokio::time::timeout(self.acquire_timeout, self.lock.write())
            .await
            .map_err(|_| GatewayError::EngineBusy)
    }

    /// Runs a connection's init script exactly once, against the
    /// exclusive handle, the first time that connection is touched.
    pub async fn ensure_connection_initialized(&self, connection: &Connection) -> Result<()> {
        {
            let initialized = self.initialized_connections.lock().await;
            if initialized.contains(&connection.name) {
                return Ok(());
            }
        }
        let _guard = self.acquire_write().await?;
        let mut initialized = self.initialized_connections.lock().await;
        if initialized.contains(&connection.name) {
            return Ok(());
        }
        if let Some(script) = &connection.init_script {
            self.engine.execute_write(script, false).await?;
        }
        initialized.insert(connection.name.clone());
        Ok(())
    }

    /// `read(sql, withPagination)`: the full result is fetched, then
    /// optionally sliced client-side per `pagination`.
    pub async fn read(&self, sql: &str, pagination: Option<PageParams>) -> Result<QueryResult> {
        let _guard = self.acquire_read().await?;
        let mut result = self.engine.query(sql).await.map_err(to_sql_error)?;
        if let Some(page) = pagination {
            let start = page.offset.min(result.rows.len());
            let end = (page.offset + page.limit).min(result.rows.len());
            result.has_more = result.rows.len() > page.offset + page.limit;
            result.rows = result.rows[start..end].to_vec();
        }
        Ok(result)
    }

    /// `readPage(sql, limit, offset)`: server-side `LIMIT`/`OFFSET`
    /// wrapping, for results too large to fetch in full.
    pub async fn read_page(&self, sql: &str, limit: usize, offset: usize) -> Result<QueryResult> {
        let _guard = self.acquire_read().await?;
        self.engine.query_page(sql, limit, offset).await.map_err(to_sql_error)
    }

    /// `write(sql, returnsData)`. The `transactional` parameter from the
    /// spec's contract is always true here: every write runs under the
    /// exclusive lock, which is this engine's only available isolation
    /// boundary, so there is no non-transactional mode to opt out into.
    pub async fn write(&self, sql: &str, returns_data: bool) -> Result<WriteResult> {
        let _guard = self.acquire_write().await?;
        self.engine.execute_write(sql, returns_data).await.map_err(to_sql_error)
    }

    /// `withTransaction(fn)`: `f` runs under the exclusive lock; any
    /// error it returns propagates without partial effects becoming
    /// visible to readers, since no reader observes mid-statement state.
    pub async fn with_transaction<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn EngineHandle>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _guard = self.acquire_write().await?;
        f(self.engine.clone()).await
    }

    /// Runs `f` against the shared engine handle under the exclusive
    /// lock — the gate [`crate::cache::CacheStore`] uses for catalog
    /// mutations (replace/append/merge/prune/drop), so a refresh never
    /// overlaps an in-flight write.
    pub async fn catalog_write<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn EngineHandle>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _guard = self.acquire_write().await?;
        f(self.engine.clone()).await
    }

    /// Runs `f` against the shared engine handle under the shared lock —
    /// used for catalog reads (`query_as_of`, `list_snapshots`) that must
    /// not overlap an in-flight write but may overlap other reads.
    pub async fn catalog_read<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn EngineHandle>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _guard = self.acquire_read().await?;
        f(self.engine.clone()).await
    }
}

fn to_sql_error(err: GatewayError) -> GatewayError {
    match err {
        GatewayError::Datafusion(e) => GatewayError::SqlError(e.to_string()),
        other => other,
    }
}
