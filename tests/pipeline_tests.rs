//! End-to-end tests of [`RequestPipeline::invoke`]: a real connection
//! registry, a real cache store, and a real embedded engine wired
//! together the way [`sqlgate::server::AppState`] assembles them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use sqlgate::auth::AuthOutcome;
use sqlgate::cache::CacheStore;
use sqlgate::config::model::{
    CacheSpec, Connection, Endpoint, EndpointKind, HttpMethod, ParamLocation, Parameter,
    RefreshMode, RetentionPolicy,
};
use sqlgate::engine::DataFusionEngine;
use sqlgate::executor::QueryExecutor;
use sqlgate::pipeline::RequestPipeline;
use sqlgate::registry::ConnectionRegistry;
use sqlgate::template::TemplateContext;

fn executor() -> Arc<QueryExecutor> {
    Arc::new(QueryExecutor::new(Arc::new(DataFusionEngine::new()), Duration::from_secs(5)))
}

fn connections() -> Arc<ConnectionRegistry> {
    Arc::new(ConnectionRegistry::from_connections(vec![Connection::new("main")]).unwrap())
}

fn read_endpoint_with_cache() -> Arc<Endpoint> {
    let mut endpoint = Endpoint::new(
        EndpointKind::Rest { method: HttpMethod::Get, path: "/customers".into() },
        "SELECT 1 AS id, 'Alice' AS name",
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
        invalidate_on_write: true,
        refresh_on_write: false,
        populate_template: "SELECT 1 AS id, 'Alice' AS name".into(),
    });
    Arc::new(endpoint)
}

#[tokio::test]
async fn read_executes_directly_when_cache_has_never_been_populated() {
    let executor = executor();
    let cache = CacheStore::new(executor.clone());
    let pipeline = RequestPipeline::new(connections(), executor, cache, vec![]);

    let outcome = pipeline
        .invoke(&read_endpoint_with_cache(), &HashMap::new(), &AuthOutcome::anonymous(), None)
        .await
        .unwrap();
    assert!(!outcome.from_cache);
    assert_eq!(outcome.result.rows.len(), 1);
}

#[tokio::test]
async fn read_serves_from_cache_once_the_store_has_been_refreshed() {
    let executor = executor();
    let cache = CacheStore::new(executor.clone());
    let endpoint = read_endpoint_with_cache();

    // Populate the cache out-of-band, the way RefreshScheduler or
    // ManagementApi::trigger_refresh would.
    let mut ctx = TemplateContext::new();
    ctx.conn = connections().template_scope(&endpoint.connections);
    cache.refresh(endpoint.clone(), ctx).await.unwrap();

    let pipeline = RequestPipeline::new(connections(), executor, cache, vec![]);
    let outcome = pipeline
        .invoke(&endpoint, &HashMap::new(), &AuthOutcome::anonymous(), None)
        .await
        .unwrap();
    assert!(outcome.from_cache);
    assert_eq!(outcome.result.rows.len(), 1);
}

fn write_endpoint_with_cache() -> Endpoint {
    let mut endpoint = (*read_endpoint_with_cache()).clone();
    endpoint.kind = EndpointKind::Rest { method: HttpMethod::Post, path: "/customers".into() };
    endpoint.slug = endpoint.kind.derive_slug();
    endpoint
}

#[tokio::test]
async fn a_write_invalidates_a_previously_populated_cache() {
    let executor = executor();
    let cache = CacheStore::new(executor.clone());
    let endpoint = Arc::new(write_endpoint_with_cache());

    let mut ctx = TemplateContext::new();
    ctx.conn = connections().template_scope(&endpoint.connections);
    cache.refresh(endpoint.clone(), ctx.clone()).await.unwrap();
    assert!(cache.serve(&endpoint, &ctx).await.unwrap().is_some());

    let pipeline = RequestPipeline::new(connections(), executor, cache.clone(), vec![]);
    let outcome = pipeline
        .invoke(&endpoint, &HashMap::new(), &AuthOutcome::anonymous(), None)
        .await
        .unwrap();
    assert_eq!(outcome.rows_affected, Some(1));
    assert!(cache.serve(&endpoint, &ctx).await.unwrap().is_none());
}

#[tokio::test]
async fn whitelisted_environment_variables_are_visible_to_templates() {
    unsafe { std::env::set_var("SQLGATE_PIPELINE_TEST_REGION", "us-east-1") };
    let executor = executor();
    let cache = CacheStore::new(executor.clone());
    let whitelist = vec![Regex::new("^SQLGATE_PIPELINE_TEST_").unwrap()];
    let pipeline = RequestPipeline::new(connections(), executor, cache, whitelist);

    let mut endpoint = Endpoint::new(
        EndpointKind::Rest { method: HttpMethod::Get, path: "/region".into() },
        "SELECT {{{ env.SQLGATE_PIPELINE_TEST_REGION }}} AS region",
    );
    endpoint.connections.push("main".into());

    let outcome = pipeline
        .invoke(&Arc::new(endpoint), &HashMap::new(), &AuthOutcome::anonymous(), None)
        .await
        .unwrap();
    assert_eq!(outcome.result.rows[0]["region"], "us-east-1");
    unsafe { std::env::remove_var("SQLGATE_PIPELINE_TEST_REGION") };
}

#[tokio::test]
async fn unvalidated_required_parameter_short_circuits_before_touching_the_engine() {
    let executor = executor();
    let cache = CacheStore::new(executor.clone());
    let pipeline = RequestPipeline::new(connections(), executor, cache, vec![]);

    let mut endpoint = Endpoint::new(
        EndpointKind::Rest { method: HttpMethod::Get, path: "/echo/:id".into() },
        "SELECT {{ params.id }} AS id",
    );
    endpoint.connections.push("main".into());
    endpoint.parameters.push(Parameter {
        name: "id".into(),
        location: ParamLocation::Path,
        required: true,
        default: None,
        validators: vec![],
    });

    let err = pipeline
        .invoke(&Arc::new(endpoint), &HashMap::new(), &AuthOutcome::anonymous(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, sqlgate::GatewayError::InvalidInput { .. }));
}
