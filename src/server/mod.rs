//! axum application wiring: dynamic REST routes resolved per request via
//! [`EndpointRegistry::lookup`], plus a single MCP JSON-RPC POST endpoint.
//! REST routing can't be expressed as static axum routes since endpoints
//! are registered at runtime, so every method/path is caught by one
//! fallback handler that defers matching to the registry itself.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, HeaderName, Method, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::auth::AuthOutcome;
use crate::cache::CacheStore;
use crate::config::model::HttpMethod;
use crate::errors::{GatewayError, Result};
use crate::executor::{PageParams, QueryExecutor};
use crate::pipeline::{mcp, rest, RequestPipeline};
use crate::registry::{ConnectionRegistry, EndpointRegistry};
use crate::scheduler::RefreshScheduler;

const SESSION_HEADER: &str = "mcp-session-id";
const DEFAULT_PAGE_LIMIT: usize = 100;
const MAX_PAGE_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<EndpointRegistry>,
    pub connections: Arc<ConnectionRegistry>,
    pub executor: Arc<QueryExecutor>,
    pub cache: Arc<CacheStore>,
    pub pipeline: Arc<RequestPipeline>,
    pub scheduler: Arc<RefreshScheduler>,
    pub debug_mode: bool,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/mcp", post(mcp_handler))
        .fallback(rest_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn http_method_from(method: &Method) -> Option<HttpMethod> {
    match method.as_str() {
        "GET" => Some(HttpMethod::Get),
        "POST" => Some(HttpMethod::Post),
        "PUT" => Some(HttpMethod::Put),
        "PATCH" => Some(HttpMethod::Patch),
        "DELETE" => Some(HttpMethod::Delete),
        _ => None,
    }
}

fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect()
}

/// Flattens a JSON body's top-level fields into strings: scalars
/// stringify directly, nested objects/arrays fall back to their JSON
/// text (a body-located parameter is declared as a single string value,
/// never a structured one).
fn flatten_body(bytes: &Bytes) -> HashMap<String, String> {
    let mut flat = HashMap::new();
    if bytes.is_empty() {
        return flat;
    }
    let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(bytes) else {
        return flat;
    };
    for (key, value) in map {
        let as_string = match value {
            Value::String(s) => s,
            Value::Null => continue,
            other => other.to_string(),
        };
        flat.insert(key, as_string);
    }
    flat
}

/// Resolves `limit`/`offset` for a read request: absent `limit` defaults
/// to [`DEFAULT_PAGE_LIMIT`], and any supplied value is clamped into
/// `[1, MAX_PAGE_LIMIT]` so a read can never fetch an unbounded result.
/// Write requests are never paginated.
fn resolve_pagination(query: &HashMap<String, String>, is_read: bool) -> Result<Option<PageParams>> {
    if !is_read {
        return Ok(None);
    }
    let limit: usize = query
        .get("limit")
        .map(|v| v.parse().map_err(|_| GatewayError::invalid_input("limit", "not an integer")))
        .transpose()?
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);
    let offset: usize = query
        .get("offset")
        .map(|v| v.parse().map_err(|_| GatewayError::invalid_input("offset", "not an integer")))
        .transpose()?
        .unwrap_or(0);
    Ok(Some(PageParams { limit, offset }))
}

async fn rest_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let debug_mode = state.debug_mode;
    match handle_rest(&state, method, uri, query, headers, body).await {
        Ok(response) => response,
        Err(err) => err.into_rest_response(debug_mode),
    }
}

async fn handle_rest(
    state: &AppState,
    method: Method,
    uri: Uri,
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let Some(http_method) = http_method_from(&method) else {
        return Err(GatewayError::NotFound(format!("unsupported method {method}")));
    };

    let rest_match = state.registry.lookup(http_method, uri.path())?;
    let endpoint = rest_match.endpoint;
    let header_map = headers_to_map(&headers);
    let body_map = flatten_body(&body);
    let raw = rest::extract_parameters(&endpoint.parameters, &query, &rest_match.path_params, &header_map, &body_map);

    let pagination = resolve_pagination(&query, http_method.is_read())?;

    let outcome = state.pipeline.invoke(&endpoint, &raw, &AuthOutcome::anonymous(), pagination).await?;

    let table_format = query.get("format").map(String::as_str) == Some("table");
    let body = if http_method.is_read() {
        rest::shape_read_response(&outcome, table_format)
    } else {
        rest::shape_write_response(&outcome)
    };
    Ok((StatusCode::OK, Json(body)).into_response())
}

async fn mcp_handler(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let id = body.get("id").cloned().unwrap_or(Value::Null);
    let method = body.get("method").and_then(Value::as_str).unwrap_or_default().to_string();
    let params = body.get("params").cloned().unwrap_or(Value::Null);
    let request = mcp::JsonRpcRequest { id, method, params };

    let payload = mcp::dispatch(&state.pipeline, &state.registry, request, &AuthOutcome::anonymous(), state.debug_mode).await;
    let mut response = (StatusCode::OK, Json(payload)).into_response();
    if let Some(session_id) = headers.get(SESSION_HEADER) {
        if let Ok(name) = HeaderName::from_bytes(SESSION_HEADER.as_bytes()) {
            response.headers_mut().insert(name, session_id.clone());
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_method_from_rejects_unsupported_verbs() {
        assert!(http_method_from(&Method::OPTIONS).is_none());
        assert_eq!(http_method_from(&Method::GET), Some(HttpMethod::Get));
    }

    #[test]
    fn flatten_body_keeps_only_top_level_scalars() {
        let bytes = Bytes::from(r#"{"name":"Alice","age":30,"nested":{"x":1}}"#);
        let flat = flatten_body(&bytes);
        assert_eq!(flat.get("name"), Some(&"Alice".to_string()));
        assert_eq!(flat.get("age"), Some(&"30".to_string()));
        assert!(flat.contains_key("nested"));
    }

    #[test]
    fn flatten_body_on_empty_bytes_is_empty() {
        assert!(flatten_body(&Bytes::new()).is_empty());
    }

    #[test]
    fn pagination_defaults_to_one_hundred_when_absent() {
        let query = HashMap::new();
        let page = resolve_pagination(&query, true).unwrap().unwrap();
        assert_eq!(page.limit, DEFAULT_PAGE_LIMIT);
        assert_eq!(page.offset, 0);
    }

    #[test]
    fn pagination_clamps_limit_above_the_maximum() {
        let mut query = HashMap::new();
        query.insert("limit".to_string(), "50000".to_string());
        let page = resolve_pagination(&query, true).unwrap().unwrap();
        assert_eq!(page.limit, MAX_PAGE_LIMIT);
    }

    #[test]
    fn pagination_clamps_limit_below_one() {
        let mut query = HashMap::new();
        query.insert("limit".to_string(), "0".to_string());
        let page = resolve_pagination(&query, true).unwrap().unwrap();
        assert_eq!(page.limit, 1);
    }

    #[test]
    fn pagination_is_none_for_write_requests() {
        let query = HashMap::new();
        assert!(resolve_pagination(&query, false).unwrap().is_none());
    }
}
