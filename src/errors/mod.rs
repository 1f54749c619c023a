//! Error taxonomy for the gateway, and its two edge mappings (REST, MCP).

use std::collections::HashMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Main error type for gateway operations.
///
/// Every variant carries a human message; some carry a structured details
/// map surfaced verbatim to callers (validation failures, not-found), and
/// some are redacted at the edge unless `debug_mode` is enabled (SQL and
/// template errors).
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input")]
    InvalidInput { details: HashMap<String, String> },

    #[error("authentication required")]
    AuthRequired,

    #[error("authentication denied: {0}")]
    AuthDenied(String),

    #[error("template syntax error: {0}")]
    TemplateSyntaxError(String),

    #[error("unresolved template variable: {0}")]
    TemplateVariableError(String),

    #[error("SQL error: {0}")]
    SqlError(String),

    #[error("engine busy")]
    EngineBusy,

    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("operation timed out")]
    Timeout,

    #[error("cache refresh failed: {0}")]
    CacheRefreshError(String),

    #[error("duplicate slug: {0}")]
    DuplicateSlug(String),

    #[error("configuration error: {0}")]
    ValidationError(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("DataFusion error: {0}")]
    Datafusion(#[from] datafusion::error::DataFusionError),

    #[error("task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut details = HashMap::new();
        details.insert(field.into(), reason.into());
        GatewayError::InvalidInput { details }
    }

    /// Error kind label used in REST JSON error bodies and logs.
    fn kind(&self) -> &'static str {
        match self {
            GatewayError::NotFound(_) => "NotFound",
            GatewayError::InvalidInput { .. } => "InvalidInput",
            GatewayError::AuthRequired => "AuthRequired",
            GatewayError::AuthDenied(_) => "AuthDenied",
            GatewayError::TemplateSyntaxError(_) => "TemplateSyntaxError",
            GatewayError::TemplateVariableError(_) => "TemplateVariableError",
            GatewayError::SqlError(_) => "SqlError",
            GatewayError::EngineBusy => "EngineBusy",
            GatewayError::EngineUnavailable(_) => "EngineUnavailable",
            GatewayError::Timeout => "Timeout",
            GatewayError::CacheRefreshError(_) => "CacheRefreshError",
            GatewayError::DuplicateSlug(_) => "DuplicateSlug",
            GatewayError::ValidationError(_) => "ValidationError",
            GatewayError::Internal(_) => "Internal",
            GatewayError::Io(_)
            | GatewayError::SerdeJson(_)
            | GatewayError::SerdeYaml(_)
            | GatewayError::Regex(_)
            | GatewayError::Datafusion(_)
            | GatewayError::JoinError(_) => "Internal",
        }
    }

    fn http_status(&self) -> StatusCode {
        match self {
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            GatewayError::AuthRequired => StatusCode::UNAUTHORIZED,
            GatewayError::AuthDenied(_) => StatusCode::FORBIDDEN,
            GatewayError::TemplateSyntaxError(_) | GatewayError::TemplateVariableError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::SqlError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::EngineBusy | GatewayError::EngineUnavailable(_) | GatewayError::Timeout => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::CacheRefreshError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::DuplicateSlug(_) => StatusCode::CONFLICT,
            GatewayError::ValidationError(_) => StatusCode::BAD_REQUEST,
            GatewayError::Internal(_)
            | GatewayError::Io(_)
            | GatewayError::SerdeJson(_)
            | GatewayError::SerdeYaml(_)
            | GatewayError::Regex(_)
            | GatewayError::Datafusion(_)
            | GatewayError::JoinError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the caller: generic for SQL/template errors unless
    /// `debug_mode` is set, full text otherwise. The full text always goes
    /// to the operator log via the `tracing::error!` call sites upstream.
    fn public_message(&self, debug_mode: bool) -> String {
        match self {
            GatewayError::SqlError(_) | GatewayError::TemplateSyntaxError(_) if !debug_mode => {
                "internal configuration error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// JSON-RPC 2.0 error code per the MCP wire contract.
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            GatewayError::NotFound(_) => -32002,
            GatewayError::InvalidInput { .. } | GatewayError::ValidationError(_) => -32602,
            GatewayError::AuthRequired | GatewayError::AuthDenied(_) => -32001,
            GatewayError::TemplateSyntaxError(_)
            | GatewayError::TemplateVariableError(_)
            | GatewayError::SqlError(_)
            | GatewayError::EngineBusy
            | GatewayError::EngineUnavailable(_)
            | GatewayError::Timeout
            | GatewayError::CacheRefreshError(_)
            | GatewayError::DuplicateSlug(_)
            | GatewayError::Internal(_)
            | GatewayError::Io(_)
            | GatewayError::SerdeJson(_)
            | GatewayError::SerdeYaml(_)
            | GatewayError::Regex(_)
            | GatewayError::Datafusion(_)
            | GatewayError::JoinError(_) => -32603,
        }
    }

    /// Render this error as a JSON-RPC 2.0 error object, given the request id.
    pub fn to_jsonrpc_error(&self, id: Value, debug_mode: bool) -> Value {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {
                "code": self.jsonrpc_code(),
                "message": self.public_message(debug_mode),
            }
        })
    }
}

#[derive(Serialize)]
struct RestErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl GatewayError {
    /// Renders this error as a REST JSON error response. `debug_mode`
    /// gates the same redaction `to_jsonrpc_error` applies on the MCP
    /// side: SQL/template diagnostics are only included when set.
    pub fn into_rest_response(self, debug_mode: bool) -> Response {
        let status = self.http_status();
        let kind = self.kind();
        let details = match &self {
            GatewayError::InvalidInput { details } => Some(details.clone()),
            _ => None,
        };
        let message = if details.is_none() {
            Some(self.public_message(debug_mode))
        } else {
            None
        };
        let body = RestErrorBody {
            error: kind,
            details,
            message,
        };
        (status, Json(body)).into_response()
    }
}
