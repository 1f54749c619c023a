//! Owns the mapping from cached endpoint to versioned cache table, the
//! per-table refresh state machine, and the full/append/merge refresh
//! modes: `Empty → Populating → Fresh ⇄ Refreshing → Fresh`,
//! with `Invalidated` reachable from any state.

pub mod audit;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{FutureExt, Shared};
use indexmap::IndexMap;

use crate::cache::audit::{AuditEntry, AuditLog, Outcome};
use crate::config::model::{CacheSpec, Endpoint, RefreshMode};
use crate::errors::{GatewayError, Result};
use crate::executor::QueryExecutor;
use crate::template::{self, CtxValue, RenderMode, TemplateContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Empty,
    Populating,
    Fresh,
    Refreshing,
    Invalidated,
}

struct TableState {
    status: Status,
    last_success: Option<DateTime<Utc>>,
}

impl Default for TableState {
    fn default() -> Self {
        Self { status: Status::Empty, last_success: None }
    }
}

type RefreshResult = std::result::Result<(), String>;
type SharedRefresh = Shared<Pin<Box<dyn Future<Output = Arc<RefreshResult>> + Send>>>;

pub struct CacheStore {
    executor: Arc<QueryExecutor>,
    states: StdMutex<HashMap<String, TableState>>,
    in_flight: StdMutex<HashMap<String, SharedRefresh>>,
    audit: StdMutex<HashMap<String, AuditLog>>,
}

impl CacheStore {
    pub fn new(executor: Arc<QueryExecutor>) -> Arc<Self> {
        Arc::new(Self {
            executor,
            states: StdMutex::new(HashMap::new()),
            in_flight: StdMutex::new(HashMap::new()),
            audit: StdMutex::new(HashMap::new()),
        })
    }

    fn status_of(&self, slug: &str) -> Status {
        self.states.lock().unwrap().get(slug).map(|s| s.status).unwrap_or(Status::Empty)
    }

    fn last_success_of(&self, slug: &str) -> Option<DateTime<Utc>> {
        self.states.lock().unwrap().get(slug).and_then(|s| s.last_success)
    }

    /// Timestamp of the endpoint's last successful refresh, if any —
    /// what [`crate::scheduler::RefreshScheduler`] compares against
    /// `schedule` to decide whether a refresh is due.
    pub fn last_success(&self, slug: &str) -> Option<DateTime<Utc>> {
        self.last_success_of(slug)
    }

    /// Whether a refresh is currently in flight for this slug (coalesced
    /// or not) — the scheduler skips ticking endpoints already refreshing.
    pub fn is_refreshing(&self, slug: &str) -> bool {
        self.in_flight.lock().unwrap().contains_key(slug)
    }

    /// `serve(endpoint, ctx)`: `None` if disabled, not yet populated, or
    /// not in a servable state; otherwise the endpoint template rendered
    /// with `conn` repointed at the cache table, run as of the last
    /// successful snapshot via `Catalog::query_as_of` — a concurrent
    /// refresh mutates a new snapshot without this read ever observing
    /// partial writes.
    pub async fn serve(&self, endpoint: &Endpoint, ctx: &TemplateContext) -> Result<Option<crate::engine::QueryResult>> {
        let Some(cache) = &endpoint.cache else { return Ok(None) };
        if !cache.enabled {
            return Ok(None);
        }
        let status = self.status_of(&endpoint.slug);
        if !matches!(status, Status::Fresh | Status::Refreshing) {
            return Ok(None);
        }

        let mut cache_ctx = ctx.clone();
        let qualified = cache.qualified_table();
        let mut redirected: IndexMap<String, CtxValue> = IndexMap::new();
        for name in cache_ctx.conn.keys().cloned().collect::<Vec<_>>() {
            let mut props = IndexMap::new();
            props.insert("table".to_string(), CtxValue::from(qualified.as_str()));
            redirected.insert(name, CtxValue::Map(props));
        }
        cache_ctx.conn = redirected;

        let sql = template::render(&endpoint.template, &cache_ctx, RenderMode::Lenient)?;
        let as_of = self.last_success_of(&endpoint.slug);
        let table = qualified.clone();
        let result = self
            .executor
            .catalog_read(|engine| async move { engine.query_as_of(&table, &sql, as_of).await })
            .await?;
        Ok(Some(result))
    }

    /// `refresh(endpoint)`: idempotent, at-most-one concurrent refresh
    /// per cache table via `Shared`-future coalescing.
    pub async fn refresh(self: &Arc<Self>, endpoint: Arc<Endpoint>, ctx: TemplateContext) -> Result<()> {
        let slug = endpoint.slug.clone();

        let shared = {
            let mut in_flight = self.in_flight.lock().unwrap();
            if let Some(existing) = in_flight.get(&slug) {
                existing.clone()
            } else {
                let this = self.clone();
                let ep = endpoint.clone();
                let boxed: Pin<Box<dyn Future<Output = Arc<RefreshResult>> + Send>> = Box::pin(async move {
                    Arc::new(this.do_refresh(ep, ctx).await)
                });
                let shared = boxed.shared();
                in_flight.insert(slug.clone(), shared.clone());
                shared
            }
        };

        let outcome = shared.await;
        self.in_flight.lock().unwrap().remove(&slug);
        (*outcome).clone().map_err(GatewayError::CacheRefreshError)
    }

    async fn do_refresh(self: Arc<Self>, endpoint: Arc<Endpoint>, ctx: TemplateContext) -> RefreshResult {
        let Some(cache) = &endpoint.cache else {
            return Err("endpoint has no cache spec".to_string());
        };
        let slug = endpoint.slug.clone();
        let previous_success = self.last_success_of(&slug);

        {
            let mut states = self.states.lock().unwrap();
            let entry = states.entry(slug.clone()).or_default();
            entry.status = if entry.status == Status::Fresh { Status::Refreshing } else { Status::Populating };
        }

        let start = Instant::now();
        let result = self.run_refresh_mode(cache, &ctx, previous_success).await;
        let duration = start.elapsed();

        match &result {
            Ok(()) => {
                let mut states = self.states.lock().unwrap();
                let entry = states.entry(slug.clone()).or_default();
                entry.status = Status::Fresh;
                entry.last_success = Some(Utc::now());
            }
            Err(_) => {
                let mut states = self.states.lock().unwrap();
                let entry = states.entry(slug.clone()).or_default();
                entry.status = if previous_success.is_some() { Status::Fresh } else { Status::Empty };
            }
        }

        self.record_audit(&slug, cache.mode, &result, duration);

        if result.is_ok() {
            if let Err(e) = self.gc_one(&endpoint).await {
                tracing::warn!(slug = %slug, error = %e, "post-refresh retention pass failed");
            }
        }

        result.map_err(|e| e.to_string())
    }

    async fn run_refresh_mode(
        &self,
        cache: &CacheSpec,
        ctx: &TemplateContext,
        previous_success: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut populate_ctx = ctx.clone();
        let mut cache_scope = ctx.cache.clone();
        cache_scope.insert("table".to_string(), CtxValue::from(cache.table.as_str()));
        cache_scope.insert("schema".to_string(), CtxValue::from(cache.schema.as_str()));
        cache_scope.insert("catalog".to_string(), CtxValue::from(cache.catalog.as_str()));
        if let Some(ts) = previous_success {
            cache_scope.insert("previousSnapshotTimestamp".to_string(), CtxValue::from(ts.to_rfc3339().as_str()));
        }
        cache_scope.insert("currentSnapshotTimestamp".to_string(), CtxValue::from(Utc::now().to_rfc3339().as_str()));
        populate_ctx.cache = cache_scope;

        let populate_sql = template::render(&cache.populate_template, &populate_ctx, RenderMode::Lenient)?;
        let table = cache.qualified_table();

        match cache.mode {
            RefreshMode::Full => {
                self.executor
                    .catalog_write(|engine| async move { engine.replace_table(&table, &populate_sql).await })
                    .await?;
            }
            RefreshMode::Append => {
                let cursor = cache.cursor.clone();
                self.executor
                    .catalog_write(|engine| async move { engine.append_table(&table, &populate_sql, cursor.as_ref()).await })
                    .await?;
            }
            RefreshMode::Merge => {
                let primary_key = cache.primary_key.clone();
                let cursor = cache.cursor.clone();
                self.executor
                    .catalog_write(|engine| async move {
                        engine.merge_table(&table, &populate_sql, &primary_key, cursor.as_ref()).await
                    })
                    .await?;
            }
        }
        Ok(())
    }

    /// Drops all snapshots of the endpoint's cache table and the table
    /// itself.
    pub async fn invalidate(&self, endpoint: &Endpoint) -> Result<()> {
        let Some(cache) = &endpoint.cache else { return Ok(()) };
        let table = cache.qualified_table();
        self.executor.catalog_write(|engine| async move { engine.drop_table(&table).await }).await?;
        let mut states = self.states.lock().unwrap();
        states.entry(endpoint.slug.clone()).or_default().status = Status::Invalidated;
        Ok(())
    }

    async fn gc_one(&self, endpoint: &Endpoint) -> Result<usize> {
        let Some(cache) = &endpoint.cache else { return Ok(0) };
        let table = cache.qualified_table();
        let retention = cache.retention.clone();
        self.executor.catalog_write(|engine| async move { engine.prune(&table, &retention).await }).await
    }

    /// `gc(endpoint?)`: retention over one table, or (when `None`) every
    /// cache table this store currently knows about.
    pub async fn gc(&self, endpoints: &[&Endpoint]) -> Result<usize> {
        let mut total = 0;
        for endpoint in endpoints {
            total += self.gc_one(endpoint).await?;
        }
        Ok(total)
    }

    fn record_audit(&self, slug: &str, mode: RefreshMode, result: &Result<()>, duration: Duration) {
        let outcome = match result {
            Ok(()) => Outcome::Success { rows_affected: None },
            Err(e) => Outcome::Failure { error: e.to_string() },
        };
        let mut audit = self.audit.lock().unwrap();
        audit.entry(slug.to_string()).or_default().push(AuditEntry {
            timestamp: Utc::now(),
            mode,
            outcome,
            duration,
        });
    }

    /// `audit(endpoint?)`: the bounded refresh-attempt log for one
    /// endpoint, or every endpoint this store has attempted when `slug`
    /// is `None`.
    pub fn audit(&self, slug: Option<&str>) -> Vec<AuditEntry> {
        let audit = self.audit.lock().unwrap();
        match slug {
            Some(slug) => audit.get(slug).map(AuditLog::entries).unwrap_or_default(),
            None => audit.values().flat_map(AuditLog::entries).collect(),
        }
    }
}
