//! Black-box lifecycle tests of [`CacheStore`]: populate via `refresh`,
//! read back via `serve`, and drop via `invalidate`, driven entirely
//! through the public API a management surface or scheduler would use.

use std::sync::Arc;
use std::time::Duration;

use sqlgate::config::model::{
    CacheSpec, Endpoint, EndpointKind, HttpMethod, RefreshMode, RetentionPolicy,
};
use sqlgate::engine::DataFusionEngine;
use sqlgate::executor::QueryExecutor;
use sqlgate::cache::CacheStore;
use sqlgate::template::{CtxValue, TemplateContext};

fn executor() -> Arc<QueryExecutor> {
    Arc::new(QueryExecutor::new(Arc::new(DataFusionEngine::new()), Duration::from_secs(5)))
}

fn ctx_with_main_conn() -> TemplateContext {
    let mut ctx = TemplateContext::new();
    ctx.conn.insert("main".to_string(), CtxValue::map());
    ctx
}

fn full_mode_endpoint() -> Arc<Endpoint> {
    let mut endpoint = Endpoint::new(
        EndpointKind::Rest { method: HttpMethod::Get, path: "/customers".into() },
        "SELECT * FROM {{{ conn.main.table }}}",
    );
    endpoint.connections.push("main".into());
    endpoint.cache = Some(CacheSpec {
        enabled: true,
        table: "customers".into(),
        schema: "cache".into(),
        catalog: String::new(),
        mode: RefreshMode::Full,
        cursor: None,
        primary_key: vec![],
        schedule: Duration::from_secs(60),
        retention: RetentionPolicy { keep_last_snapshots: Some(2), max_snapshot_age: None },
        invalidate_on_write: false,
        refresh_on_write: false,
        populate_template: "SELECT 1 AS id, 'Alice' AS name".into(),
    });
    Arc::new(endpoint)
}

#[tokio::test]
async fn unrefreshed_endpoint_serves_nothing() {
    let store = CacheStore::new(executor());
    let endpoint = full_mode_endpoint();
    let ctx = ctx_with_main_conn();
    assert!(store.serve(&endpoint, &ctx).await.unwrap().is_none());
    assert!(store.last_success(&endpoint.slug).is_none());
}

#[tokio::test]
async fn refresh_then_serve_returns_the_populated_rows() {
    let store = CacheStore::new(executor());
    let endpoint = full_mode_endpoint();
    let ctx = ctx_with_main_conn();

    store.refresh(endpoint.clone(), ctx.clone()).await.unwrap();
    assert!(store.last_success(&endpoint.slug).is_some());

    let result = store.serve(&endpoint, &ctx).await.unwrap().unwrap();
    assert_eq!(result.rows.len(), 1);
}

#[tokio::test]
async fn a_second_refresh_replaces_the_snapshot_and_keeps_serving() {
    let store = CacheStore::new(executor());
    let endpoint = full_mode_endpoint();
    let ctx = ctx_with_main_conn();

    store.refresh(endpoint.clone(), ctx.clone()).await.unwrap();
    let first_success = store.last_success(&endpoint.slug).unwrap();

    store.refresh(endpoint.clone(), ctx.clone()).await.unwrap();
    let second_success = store.last_success(&endpoint.slug).unwrap();
    assert!(second_success >= first_success);

    let result = store.serve(&endpoint, &ctx).await.unwrap().unwrap();
    assert_eq!(result.rows.len(), 1);
}

#[tokio::test]
async fn invalidate_stops_serve_from_returning_rows() {
    let store = CacheStore::new(executor());
    let endpoint = full_mode_endpoint();
    let ctx = ctx_with_main_conn();

    store.refresh(endpoint.clone(), ctx.clone()).await.unwrap();
    assert!(store.serve(&endpoint, &ctx).await.unwrap().is_some());

    store.invalidate(&endpoint).await.unwrap();
    assert!(store.serve(&endpoint, &ctx).await.unwrap().is_none());
}

#[tokio::test]
async fn disabled_cache_never_serves_regardless_of_refresh_history() {
    let store = CacheStore::new(executor());
    let mut endpoint = (*full_mode_endpoint()).clone();
    endpoint.cache.as_mut().unwrap().enabled = false;
    let endpoint = Arc::new(endpoint);
    let ctx = ctx_with_main_conn();

    store.refresh(endpoint.clone(), ctx.clone()).await.unwrap();
    assert!(store.serve(&endpoint, &ctx).await.unwrap().is_none());
}

#[tokio::test]
async fn refresh_records_an_audit_entry_with_outcome() {
    let store = CacheStore::new(executor());
    let endpoint = full_mode_endpoint();
    let ctx = ctx_with_main_conn();

    store.refresh(endpoint.clone(), ctx).await.unwrap();
    let entries = store.audit(Some(&endpoint.slug));
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn gc_runs_without_error_after_a_refresh() {
    let store = CacheStore::new(executor());
    let endpoint = full_mode_endpoint();
    let ctx = ctx_with_main_conn();

    store.refresh(endpoint.clone(), ctx).await.unwrap();
    store.gc(&[endpoint.as_ref()]).await.unwrap();
}
