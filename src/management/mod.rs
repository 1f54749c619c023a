//! Management surface behind `RequestPipeline`'s sibling operations:
//! list/get/create/update/delete/reload endpoints; get/update template;
//! expand/dry-run a template; get/update cache spec; trigger refresh;
//! trigger gc; fetch audit log. Every operation here is a thin wrapper
//! over `EndpointRegistry`/`CacheStore` — no new behaviour of its own.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::cache::audit::AuditEntry;
use crate::cache::CacheStore;
use crate::config::model::{CacheSpec, Endpoint};
use crate::engine::QueryResult;
use crate::errors::{GatewayError, Result};
use crate::executor::QueryExecutor;
use crate::registry::{ConnectionRegistry, EndpointRegistry};
use crate::template::{self, CtxValue, RenderMode, TemplateContext};
use crate::validator;

pub struct ManagementApi {
    registry: Arc<EndpointRegistry>,
    connections: Arc<ConnectionRegistry>,
    executor: Arc<QueryExecutor>,
    cache: Arc<CacheStore>,
}

impl ManagementApi {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        connections: Arc<ConnectionRegistry>,
        executor: Arc<QueryExecutor>,
        cache: Arc<CacheStore>,
    ) -> Self {
        Self { registry, connections, executor, cache }
    }

    pub fn list_endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.registry.list()
    }

    pub fn get_endpoint(&self, slug: &str) -> Result<Arc<Endpoint>> {
        self.registry
            .list()
            .into_iter()
            .find(|endpoint| endpoint.slug == slug)
            .ok_or_else(|| GatewayError::NotFound(format!("endpoint '{slug}'")))
    }

    pub fn create_endpoint(&self, endpoint: Endpoint) -> Result<()> {
        endpoint.validate_well_formed()?;
        if self.get_endpoint(&endpoint.slug).is_ok() {
            return Err(GatewayError::DuplicateSlug(endpoint.slug));
        }
        self.registry.put(endpoint);
        Ok(())
    }

    pub fn update_endpoint(&self, endpoint: Endpoint) -> Result<()> {
        endpoint.validate_well_formed()?;
        self.get_endpoint(&endpoint.slug)?;
        self.registry.put(endpoint);
        Ok(())
    }

    pub fn delete_endpoint(&self, slug: &str) -> Result<()> {
        self.registry.remove(slug)
    }

    pub fn reload_endpoint(&self, slug: &str) -> Result<()> {
        self.registry.reload(slug)
    }

    pub fn get_template(&self, slug: &str) -> Result<String> {
        Ok(self.get_endpoint(slug)?.template.clone())
    }

    pub fn update_template(&self, slug: &str, template: String) -> Result<()> {
        let mut endpoint = (*self.get_endpoint(slug)?).clone();
        endpoint.template = template;
        endpoint.validate_well_formed()?;
        self.registry.put(endpoint);
        Ok(())
    }

    /// Renders the endpoint's template against `params` without
    /// executing it, returning the rendered text.
    pub fn expand_template(&self, slug: &str, params: &HashMap<String, String>) -> Result<String> {
        let endpoint = self.get_endpoint(slug)?;
        let validated = validator::validate_parameters(&endpoint.parameters, params)?;
        let ctx = self.build_context(&endpoint, &validated);
        template::render(&endpoint.template, &ctx, RenderMode::Strict)
    }

    /// Renders and executes the endpoint's template against `params`,
    /// capped at 10 rows regardless of the endpoint's own pagination.
    pub async fn dry_run_template(&self, slug: &str, params: &HashMap<String, String>) -> Result<QueryResult> {
        let endpoint = self.get_endpoint(slug)?;
        for name in &endpoint.connections {
            let conn = self.connections.get(name)?;
            self.executor.ensure_connection_initialized(&conn).await?;
        }
        let validated = validator::validate_parameters(&endpoint.parameters, params)?;
        let ctx = self.build_context(&endpoint, &validated);
        let sql = template::render(&endpoint.template, &ctx, RenderMode::Lenient)?;
        self.executor.read_page(&sql, 10, 0).await
    }

    pub fn get_cache_spec(&self, slug: &str) -> Result<CacheSpec> {
        self.get_endpoint(slug)?
            .cache
            .clone()
            .ok_or_else(|| GatewayError::NotFound(format!("endpoint '{slug}' has no cache spec")))
    }

    pub fn update_cache_spec(&self, slug: &str, cache: CacheSpec) -> Result<()> {
        cache.validate_well_formed()?;
        let mut endpoint = (*self.get_endpoint(slug)?).clone();
        endpoint.cache = Some(cache);
        self.registry.put(endpoint);
        Ok(())
    }

    pub async fn trigger_refresh(&self, slug: &str) -> Result<()> {
        let endpoint = self.get_endpoint(slug)?;
        if endpoint.cache.is_none() {
            return Err(GatewayError::ValidationError(format!("endpoint '{slug}' has no cache spec")));
        }
        let mut ctx = TemplateContext::new();
        ctx.conn = self.connections.template_scope(&endpoint.connections);
        self.cache.refresh(endpoint, ctx).await
    }

    pub async fn trigger_gc(&self, slug: Option<&str>) -> Result<usize> {
        match slug {
            Some(slug) => {
                let endpoint = self.get_endpoint(slug)?;
                self.cache.gc(&[endpoint.as_ref()]).await
            }
            None => {
                let endpoints = self.registry.list();
                let cached: Vec<&Endpoint> =
                    endpoints.iter().filter(|e| e.cache.is_some()).map(Arc::as_ref).collect();
                self.cache.gc(&cached).await
            }
        }
    }

    pub fn audit_log(&self, slug: Option<&str>) -> Vec<AuditEntry> {
        self.cache.audit(slug)
    }

    fn build_context(&self, endpoint: &Endpoint, params: &HashMap<String, String>) -> TemplateContext {
        let mut ctx = TemplateContext::new();
        for (key, value) in params {
            ctx.params.insert(key.clone(), CtxValue::from(value.as_str()));
        }
        ctx.conn = self.connections.template_scope(&endpoint.connections);
        if let Some(cache) = &endpoint.cache {
            let mut scope: IndexMap<String, CtxValue> = IndexMap::new();
            scope.insert("table".to_string(), CtxValue::from(cache.table.as_str()));
            scope.insert("schema".to_string(), CtxValue::from(cache.schema.as_str()));
            scope.insert("catalog".to_string(), CtxValue::from(cache.catalog.as_str()));
            ctx.cache = scope;
        }
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{Connection, EndpointKind, HttpMethod};
    use crate::engine::DataFusionEngine;
    use std::time::Duration;

    fn api() -> ManagementApi {
        let registry = Arc::new(EndpointRegistry::from_endpoints(vec![]).unwrap());
        let connections = Arc::new(ConnectionRegistry::from_connections(vec![Connection::new("main")]).unwrap());
        let executor = Arc::new(QueryExecutor::new(Arc::new(DataFusionEngine::new()), Duration::from_secs(5)));
        let cache = CacheStore::new(executor.clone());
        ManagementApi::new(registry, connections, executor, cache)
    }

    fn endpoint() -> Endpoint {
        let mut endpoint =
            Endpoint::new(EndpointKind::Rest { method: HttpMethod::Get, path: "/customers".into() }, "SELECT 1 AS id");
        endpoint.connections.push("main".into());
        endpoint
    }

    #[test]
    fn create_then_get_round_trips() {
        let api = api();
        api.create_endpoint(endpoint()).unwrap();
        assert!(api.get_endpoint("rest:GET:/customers").is_ok());
    }

    #[test]
    fn create_duplicate_slug_is_rejected() {
        let api = api();
        api.create_endpoint(endpoint()).unwrap();
        let err = api.create_endpoint(endpoint()).unwrap_err();
        assert!(matches!(err, GatewayError::DuplicateSlug(_)));
    }

    #[test]
    fn update_template_replaces_sql() {
        let api = api();
        api.create_endpoint(endpoint()).unwrap();
        api.update_template("rest:GET:/customers", "SELECT 2 AS id".to_string()).unwrap();
        assert_eq!(api.get_template("rest:GET:/customers").unwrap(), "SELECT 2 AS id");
    }

    #[test]
    fn expand_template_renders_without_executing() {
        let api = api();
        let mut ep = endpoint();
        ep.template = "SELECT {{ params.id }} AS id".to_string();
        ep.parameters.push(crate::config::model::Parameter {
            name: "id".into(),
            location: crate::config::model::ParamLocation::Query,
            required: true,
            default: None,
            validators: vec![],
        });
        api.create_endpoint(ep).unwrap();
        let mut params = HashMap::new();
        params.insert("id".to_string(), "5".to_string());
        let rendered = api.expand_template("rest:GET:/customers", &params).unwrap();
        assert_eq!(rendered, "SELECT 5 AS id");
    }

    #[tokio::test]
    async fn dry_run_executes_and_caps_at_ten_rows() {
        let api = api();
        api.create_endpoint(endpoint()).unwrap();
        let result = api.dry_run_template("rest:GET:/customers", &HashMap::new()).await.unwrap();
        assert_eq!(result.rows.len(), 1);
    }

    #[tokio::test]
    async fn trigger_refresh_without_cache_spec_is_validation_error() {
        let api = api();
        api.create_endpoint(endpoint()).unwrap();
        let err = api.trigger_refresh("rest:GET:/customers").await.unwrap_err();
        assert!(matches!(err, GatewayError::ValidationError(_)));
    }
}
