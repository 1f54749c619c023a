//! MCP transport adapter: JSON-RPC 2.0 method dispatch over
//! [`RequestPipeline`], per the wire contract's implemented methods —
//! `initialize`, `tools/list`, `tools/call`, `resources/list`,
//! `resources/read`, `prompts/list`, `prompts/get`, `ping`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::auth::AuthOutcome;
use crate::config::model::{Endpoint, EndpointKind, Parameter};
use crate::errors::{GatewayError, Result};
use crate::registry::EndpointRegistry;

use super::RequestPipeline;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

const KNOWN_METHODS: &[&str] = &[
    "ping",
    "initialize",
    "tools/list",
    "tools/call",
    "resources/list",
    "resources/read",
    "prompts/list",
    "prompts/get",
];

pub struct JsonRpcRequest {
    pub id: Value,
    pub method: String,
    pub params: Value,
}

/// Dispatches one JSON-RPC request and returns a full JSON-RPC response
/// object (success or error), never panicking or propagating a Rust
/// error past this boundary.
pub async fn dispatch(
    pipeline: &RequestPipeline,
    registry: &EndpointRegistry,
    request: JsonRpcRequest,
    auth_outcome: &AuthOutcome,
    debug_mode: bool,
) -> Value {
    if !KNOWN_METHODS.contains(&request.method.as_str()) {
        return json!({
            "jsonrpc": "2.0",
            "id": request.id,
            "error": { "code": -32601, "message": format!("method not found: {}", request.method) },
        });
    }
    match handle(pipeline, registry, &request, auth_outcome).await {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": request.id, "result": result }),
        Err(err) => err.to_jsonrpc_error(request.id.clone(), debug_mode),
    }
}

async fn handle(
    pipeline: &RequestPipeline,
    registry: &EndpointRegistry,
    request: &JsonRpcRequest,
    auth_outcome: &AuthOutcome,
) -> Result<Value> {
    match request.method.as_str() {
        "ping" => Ok(json!({})),
        "initialize" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {}, "resources": {}, "prompts": {} },
            "serverInfo": { "name": "sqlgate", "version": env!("CARGO_PKG_VERSION") },
        })),
        "tools/list" => Ok(json!({
            "tools": list_by_kind(registry, |k| matches!(k, EndpointKind::McpTool { .. }))
        })),
        "resources/list" => Ok(json!({
            "resources": list_by_kind(registry, |k| matches!(k, EndpointKind::McpResource { .. }))
        })),
        "prompts/list" => Ok(json!({
            "prompts": list_by_kind(registry, |k| matches!(k, EndpointKind::McpPrompt { .. }))
        })),
        "tools/call" => {
            let name = required_str(&request.params, "name")?;
            let endpoint = registry.lookup_by_tool_name(name)?;
            let raw = arguments_to_params(request.params.get("arguments").unwrap_or(&Value::Null));
            let outcome = pipeline.invoke(&endpoint, &raw, auth_outcome, None).await?;
            Ok(content_text(rows_as_text(&outcome.result.rows)))
        }
        "resources/read" => {
            let uri = required_str(&request.params, "uri")?;
            let endpoint = registry.lookup_by_resource_name(uri)?;
            let outcome = pipeline.invoke(&endpoint, &HashMap::new(), auth_outcome, None).await?;
            Ok(json!({
                "contents": [{ "uri": uri, "text": rows_as_text(&outcome.result.rows) }]
            }))
        }
        "prompts/get" => {
            let name = required_str(&request.params, "name")?;
            let endpoint = registry.lookup_by_prompt_name(name)?;
            let raw = arguments_to_params(request.params.get("arguments").unwrap_or(&Value::Null));
            let outcome = pipeline.invoke(&endpoint, &raw, auth_outcome, None).await?;
            Ok(json!({
                "messages": [{
                    "role": "user",
                    "content": { "type": "text", "text": outcome.text.unwrap_or_default() },
                }]
            }))
        }
        other => Err(GatewayError::NotFound(format!("mcp method '{other}'"))),
    }
}

fn required_str<'a>(params: &'a Value, field: &str) -> Result<&'a str> {
    params
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::invalid_input(field, "required"))
}

fn arguments_to_params(arguments: &Value) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let Value::Object(map) = arguments {
        for (key, value) in map {
            let as_string = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.insert(key.clone(), as_string);
        }
    }
    out
}

fn content_text(text: String) -> Value {
    json!({ "content": [{ "type": "text", "text": text }] })
}

fn rows_as_text(rows: &[serde_json::Map<String, Value>]) -> String {
    serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string())
}

fn list_by_kind(registry: &EndpointRegistry, matches: impl Fn(&EndpointKind) -> bool) -> Vec<Value> {
    registry.list().into_iter().filter(|endpoint| matches(&endpoint.kind)).map(describe_endpoint).collect()
}

fn describe_endpoint(endpoint: Arc<Endpoint>) -> Value {
    let name = match &endpoint.kind {
        EndpointKind::McpTool { tool_name } => tool_name.clone(),
        EndpointKind::McpResource { resource_name } => resource_name.clone(),
        EndpointKind::McpPrompt { prompt_name } => prompt_name.clone(),
        EndpointKind::Rest { .. } => endpoint.slug.clone(),
    };
    json!({ "name": name, "inputSchema": input_schema(&endpoint.parameters) })
}

fn input_schema(parameters: &[Parameter]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in parameters {
        properties.insert(param.name.clone(), json!({ "type": "string" }));
        if param.required {
            required.push(param.name.clone());
        }
    }
    json!({ "type": "object", "properties": properties, "required": required })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::config::model::{Connection, ParamLocation};
    use crate::engine::DataFusionEngine;
    use crate::executor::QueryExecutor;
    use crate::registry::ConnectionRegistry;
    use std::time::Duration;

    fn setup() -> (RequestPipeline, EndpointRegistry) {
        let connections = Arc::new(ConnectionRegistry::from_connections(vec![Connection::new("main")]).unwrap());
        let executor = Arc::new(QueryExecutor::new(Arc::new(DataFusionEngine::new()), Duration::from_secs(5)));
        let cache = CacheStore::new(executor.clone());
        let pipeline = RequestPipeline::new(connections, executor, cache, vec![]);

        let mut tool = Endpoint::new(EndpointKind::McpTool { tool_name: "echo".into() }, "SELECT {{ params.id }} AS id");
        tool.connections.push("main".into());
        tool.parameters.push(Parameter {
            name: "id".into(),
            location: ParamLocation::Query,
            required: true,
            default: None,
            validators: vec![],
        });
        let registry = EndpointRegistry::from_endpoints(vec![tool]).unwrap();
        (pipeline, registry)
    }

    #[tokio::test]
    async fn unknown_method_is_minus_32601() {
        let (pipeline, registry) = setup();
        let request = JsonRpcRequest { id: json!(1), method: "bogus".into(), params: Value::Null };
        let response = dispatch(&pipeline, &registry, request, &AuthOutcome::anonymous(), false).await;
        assert_eq!(response["error"]["code"], json!(-32601));
    }

    #[tokio::test]
    async fn ping_returns_empty_result() {
        let (pipeline, registry) = setup();
        let request = JsonRpcRequest { id: json!(1), method: "ping".into(), params: Value::Null };
        let response = dispatch(&pipeline, &registry, request, &AuthOutcome::anonymous(), false).await;
        assert_eq!(response["result"], json!({}));
    }

    #[tokio::test]
    async fn tools_call_routes_to_registered_tool() {
        let (pipeline, registry) = setup();
        let request = JsonRpcRequest {
            id: json!(2),
            method: "tools/call".into(),
            params: json!({ "name": "echo", "arguments": { "id": "9" } }),
        };
        let response = dispatch(&pipeline, &registry, request, &AuthOutcome::anonymous(), false).await;
        assert!(response["result"]["content"][0]["text"].as_str().unwrap().contains('9'));
    }

    #[tokio::test]
    async fn tools_call_for_unknown_tool_is_tool_not_found() {
        let (pipeline, registry) = setup();
        let request = JsonRpcRequest {
            id: json!(3),
            method: "tools/call".into(),
            params: json!({ "name": "missing" }),
        };
        let response = dispatch(&pipeline, &registry, request, &AuthOutcome::anonymous(), false).await;
        assert_eq!(response["error"]["code"], json!(-32002));
    }
}
