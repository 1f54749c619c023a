//! Orchestrates a single invocation: resolve → extract → validate →
//! build `TemplateContext` → cache lookup → render → execute → shape
//! response. [`rest`] and [`mcp`] adapt each transport's extraction and
//! response shaping onto this shared core; this module owns none of the
//! transport-specific wire format.

pub mod mcp;
pub mod rest;

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;

use crate::auth::{self, AuthOutcome};
use crate::cache::CacheStore;
use crate::config::model::{Endpoint, EndpointKind};
use crate::engine::QueryResult;
use crate::errors::Result;
use crate::executor::{PageParams, QueryExecutor};
use crate::registry::ConnectionRegistry;
use crate::template::{self, CtxValue, RenderMode, TemplateContext};
use crate::validator;

/// The shaped outcome of one invocation, before transport-specific
/// rendering: tabular result for query-backed endpoints, or rendered
/// text for prompt endpoints.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    pub result: QueryResult,
    pub from_cache: bool,
    pub rows_affected: Option<u64>,
    pub text: Option<String>,
}

pub struct RequestPipeline {
    connections: Arc<ConnectionRegistry>,
    executor: Arc<QueryExecutor>,
    cache: Arc<CacheStore>,
    env_whitelist: Vec<Regex>,
}

impl RequestPipeline {
    pub fn new(
        connections: Arc<ConnectionRegistry>,
        executor: Arc<QueryExecutor>,
        cache: Arc<CacheStore>,
        env_whitelist: Vec<Regex>,
    ) -> Self {
        Self { connections, executor, cache, env_whitelist }
    }

    pub async fn invoke(
        &self,
        endpoint: &Arc<Endpoint>,
        raw_params: &HashMap<String, String>,
        auth_outcome: &AuthOutcome,
        pagination: Option<PageParams>,
    ) -> Result<InvocationOutcome> {
        auth::authorize(endpoint.auth.as_ref(), auth_outcome)?;
        let validated = validator::validate_parameters(&endpoint.parameters, raw_params)?;
        let ctx = self.build_context(endpoint, &validated, auth_outcome);

        if let EndpointKind::McpPrompt { .. } = &endpoint.kind {
            let text = template::render(&endpoint.template, &ctx, RenderMode::Lenient)?;
            return Ok(InvocationOutcome {
                result: QueryResult::default(),
                from_cache: false,
                rows_affected: None,
                text: Some(text),
            });
        }

        for name in &endpoint.connections {
            let conn = self.connections.get(name)?;
            self.executor.ensure_connection_initialized(&conn).await?;
        }

        let is_write = matches!(
            &endpoint.kind,
            EndpointKind::Rest { method, .. } if !method.is_read()
        );

        if !is_write {
            if let Some(result) = self.cache.serve(endpoint, &ctx).await? {
                return Ok(InvocationOutcome { result, from_cache: true, rows_affected: None, text: None });
            }
        }

        let sql = template::render(&endpoint.template, &ctx, RenderMode::Lenient)?;

        if is_write {
            let write_result = self
                .executor
                .with_transaction(|engine| async move { engine.execute_write(&sql, true).await })
                .await?;

            if let Some(cache_spec) = &endpoint.cache {
                if cache_spec.invalidate_on_write {
                    self.cache.invalidate(endpoint).await?;
                }
                if cache_spec.refresh_on_write {
                    let cache = self.cache.clone();
                    let endpoint = endpoint.clone();
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        let _ = cache.refresh(endpoint, ctx).await;
                    });
                }
            }

            Ok(InvocationOutcome {
                result: write_result.returning.unwrap_or_default(),
                from_cache: false,
                rows_affected: Some(write_result.rows_affected),
                text: None,
            })
        } else {
            let result = self.executor.read(&sql, pagination).await?;
            Ok(InvocationOutcome { result, from_cache: false, rows_affected: None, text: None })
        }
    }

    /// Builds `params`/`conn`/`env`/`auth`/`cache` per the whitelisted
    /// sub-trees a template may address. `conn` is namespaced by
    /// connection name (`conn.<name>.<property>`), matching how
    /// `ConnectionRegistry::template_scope` and every template-rendering
    /// test already address connection properties.
    fn build_context(
        &self,
        endpoint: &Endpoint,
        params: &HashMap<String, String>,
        auth_outcome: &AuthOutcome,
    ) -> TemplateContext {
        let mut ctx = TemplateContext::new();
        for (key, value) in params {
            ctx.params.insert(key.clone(), CtxValue::from(value.as_str()));
        }
        ctx.conn = self.connections.template_scope(&endpoint.connections);
        ctx.env = self.env_scope();
        ctx.auth = auth_outcome.template_scope();
        if let Some(cache) = &endpoint.cache {
            let mut scope: IndexMap<String, CtxValue> = IndexMap::new();
            scope.insert("table".to_string(), CtxValue::from(cache.table.as_str()));
            scope.insert("schema".to_string(), CtxValue::from(cache.schema.as_str()));
            scope.insert("catalog".to_string(), CtxValue::from(cache.catalog.as_str()));
            ctx.cache = scope;
        }
        ctx
    }

    fn env_scope(&self) -> IndexMap<String, CtxValue> {
        let mut scope = IndexMap::new();
        for (key, value) in std::env::vars() {
            if self.env_whitelist.iter().any(|pattern| pattern.is_match(&key)) {
                scope.insert(key, CtxValue::from(value.as_str()));
            }
        }
        scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{Connection, HttpMethod, ParamLocation, Parameter};
    use crate::engine::DataFusionEngine;
    use std::time::Duration;

    fn pipeline() -> RequestPipeline {
        let connections = Arc::new(ConnectionRegistry::from_connections(vec![Connection::new("main")]).unwrap());
        let executor = Arc::new(QueryExecutor::new(Arc::new(DataFusionEngine::new()), Duration::from_secs(5)));
        let cache = CacheStore::new(executor.clone());
        RequestPipeline::new(connections, executor, cache, vec![])
    }

    fn read_endpoint() -> Arc<Endpoint> {
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
        Arc::new(endpoint)
    }

    #[tokio::test]
    async fn read_endpoint_renders_and_executes() {
        let pipeline = pipeline();
        let endpoint = read_endpoint();
        let mut params = HashMap::new();
        params.insert("id".to_string(), "7".to_string());
        let outcome = pipeline.invoke(&endpoint, &params, &AuthOutcome::anonymous(), None).await.unwrap();
        assert_eq!(outcome.result.rows.len(), 1);
        assert!(!outcome.from_cache);
    }

    #[tokio::test]
    async fn missing_required_parameter_is_invalid_input() {
        let pipeline = pipeline();
        let endpoint = read_endpoint();
        let err = pipeline.invoke(&endpoint, &HashMap::new(), &AuthOutcome::anonymous(), None).await.unwrap_err();
        assert!(matches!(err, crate::errors::GatewayError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn auth_required_endpoint_rejects_anonymous_caller() {
        let pipeline = pipeline();
        let mut endpoint = (*read_endpoint()).clone();
        endpoint.auth = Some(crate::config::model::AuthSpec {
            kind: crate::config::model::AuthKind::Jwt,
            required_roles: vec![],
        });
        let endpoint = Arc::new(endpoint);
        let mut params = HashMap::new();
        params.insert("id".to_string(), "1".to_string());
        let err = pipeline.invoke(&endpoint, &params, &AuthOutcome::anonymous(), None).await.unwrap_err();
        assert!(matches!(err, crate::errors::GatewayError::AuthRequired));
    }

    #[tokio::test]
    async fn prompt_endpoint_renders_text_without_executing_sql() {
        let pipeline = pipeline();
        let mut endpoint = Endpoint::new(
            EndpointKind::McpPrompt { prompt_name: "greeting".into() },
            "Hello, {{ params.name }}!",
        );
        endpoint.parameters.push(Parameter {
            name: "name".into(),
            location: ParamLocation::Query,
            required: true,
            default: None,
            validators: vec![],
        });
        let endpoint = Arc::new(endpoint);
        let mut params = HashMap::new();
        params.insert("name".to_string(), "Ada".to_string());
        let outcome = pipeline.invoke(&endpoint, &params, &AuthOutcome::anonymous(), None).await.unwrap();
        assert_eq!(outcome.text.as_deref(), Some("Hello, Ada!"));
    }
}
