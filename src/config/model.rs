//! The materialised configuration model the core consumes.
//!
//! The config *loader* (YAML/JSON parsing, include expansion) is an
//! external collaborator; this module only defines the shape of the
//! model it must produce plus the well-formedness checks §3's invariants
//! require at construction time.

use std::collections::HashMap;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{GatewayError, Result};

/// A named data source with an initialisation script and a property bag
/// exposed to templates under `conn.<name>.<key>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub name: String,
    #[serde(default)]
    pub init_script: Option<String>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
    #[serde(default)]
    pub log_queries: bool,
    #[serde(default)]
    pub log_parameters: bool,
}

impl Connection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            init_script: None,
            properties: HashMap::new(),
            log_queries: false,
            log_parameters: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Read endpoints never mutate state; only GET is a read per this gateway.
    pub fn is_read(&self) -> bool {
        matches!(self, HttpMethod::Get)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EndpointKind {
    Rest { method: HttpMethod, path: String },
    McpTool { tool_name: String },
    McpResource { resource_name: String },
    McpPrompt { prompt_name: String },
}

impl EndpointKind {
    /// The slug derived from kind + identifier
    /// from kind+identifier").
    pub fn derive_slug(&self) -> String {
        match self {
            EndpointKind::Rest { method, path } => {
                format!("rest:{}:{}", method.as_str(), path)
            }
            EndpointKind::McpTool { tool_name } => format!("mcp-tool:{tool_name}"),
            EndpointKind::McpResource { resource_name } => {
                format!("mcp-resource:{resource_name}")
            }
            EndpointKind::McpPrompt { prompt_name } => format!("mcp-prompt:{prompt_name}"),
        }
    }

    pub fn is_query_backed(&self) -> bool {
        !matches!(self, EndpointKind::McpPrompt { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamLocation {
    Query,
    Path,
    Body,
    Header,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorKind {
    Int,
    String,
    Email,
    Uuid,
    Enum,
    Date,
    Time,
}

/// A typed constraint applied to a request parameter before rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorSpec {
    pub kind: Option<ValidatorKind>,
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub allowed_values: Vec<String>,
    #[serde(default)]
    pub min_str: Option<String>,
    #[serde(default)]
    pub max_str: Option<String>,
    #[serde(default = "default_true")]
    pub prevent_sql_injection: bool,
}

fn default_true() -> bool {
    true
}

impl ValidatorSpec {
    /// Checks kind-specific well-formedness: min ≤ max, regex compiles.
    pub fn validate_well_formed(&self) -> Result<()> {
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(GatewayError::ValidationError(format!(
                    "validator min ({min}) > max ({max})"
                )));
            }
        }
        if let (Some(min), Some(max)) = (self.min_length, self.max_length) {
            if min > max {
                return Err(GatewayError::ValidationError(format!(
                    "validator min_length ({min}) > max_length ({max})"
                )));
            }
        }
        if let Some(pattern) = &self.regex {
            Regex::new(pattern).map_err(GatewayError::Regex)?;
        }
        if self.kind == Some(ValidatorKind::Enum) && self.allowed_values.is_empty() {
            return Err(GatewayError::ValidationError(
                "enum validator requires a non-empty allowed_values list".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub location: ParamLocation,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub validators: Vec<ValidatorSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RefreshMode {
    Full,
    Append,
    Merge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheCursor {
    pub column: String,
    pub column_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(default)]
    pub keep_last_snapshots: Option<u32>,
    #[serde(default)]
    pub max_snapshot_age: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSpec {
    #[serde(default)]
    pub enabled: bool,
    pub table: String,
    #[serde(default)]
    pub schema: String,
    /// Engine catalog this cache table lives in. Empty means the engine's
    /// default catalog.
    #[serde(default)]
    pub catalog: String,
    pub mode: RefreshMode,
    #[serde(default)]
    pub cursor: Option<CacheCursor>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(with = "humantime_duration")]
    pub schedule: Duration,
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default)]
    pub invalidate_on_write: bool,
    #[serde(default)]
    pub refresh_on_write: bool,
    /// Sibling template used to populate the cache table. Rendered with
    /// the same context as the endpoint template plus `cache.*` snapshot
    /// timestamps.
    pub populate_template: String,
}

impl CacheSpec {
    /// Merge mode requires non-empty primary-key list and
    /// cursor; Append mode requires cursor; Full requires neither".
    pub fn validate_well_formed(&self) -> Result<()> {
        match self.mode {
            RefreshMode::Merge => {
                if self.primary_key.is_empty() {
                    return Err(GatewayError::ValidationError(
                        "merge cache mode requires a non-empty primary key list".into(),
                    ));
                }
                if self.cursor.is_none() {
                    return Err(GatewayError::ValidationError(
                        "merge cache mode requires a cursor".into(),
                    ));
                }
            }
            RefreshMode::Append => {
                if self.cursor.is_none() {
                    return Err(GatewayError::ValidationError(
                        "append cache mode requires a cursor".into(),
                    ));
                }
            }
            RefreshMode::Full => {}
        }
        Ok(())
    }

    pub fn qualified_table(&self) -> String {
        if self.schema.is_empty() {
            self.table.clone()
        } else {
            format!("{}.{}", self.schema, self.table)
        }
    }
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Seconds(u64),
            Text(String),
        }
        match Repr::deserialize(d)? {
            Repr::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Repr::Text(text) => parse_duration_text(&text)
                .map_err(serde::de::Error::custom),
        }
    }

    /// Parses a small subset of human-friendly durations: `"30s"`, `"1m"`,
    /// `"1h"`, `"7d"`. Kept intentionally small; the loader is out of the
    /// core's scope.
    pub fn parse_duration_text(text: &str) -> std::result::Result<Duration, String> {
        let text = text.trim();
        let (num, unit) = text.split_at(
            text.find(|c: char| !c.is_ascii_digit())
                .ok_or_else(|| format!("invalid duration: {text}"))?,
        );
        let num: u64 = num
            .parse()
            .map_err(|_| format!("invalid duration number: {text}"))?;
        let secs = match unit {
            "s" => num,
            "m" => num * 60,
            "h" => num * 3600,
            "d" => num * 86400,
            other => return Err(format!("unknown duration unit: {other}")),
        };
        Ok(Duration::from_secs(secs))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    None,
    Basic,
    Jwt,
    Oidc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSpec {
    #[serde(default)]
    pub kind: AuthKind,
    #[serde(default)]
    pub required_roles: Vec<String>,
}

impl Default for AuthKind {
    fn default() -> Self {
        AuthKind::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSpec {
    pub requests_per_minute: u32,
}

/// A named, declarative mapping from a transport operation to a
/// parameterised SQL template and execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub slug: String,
    pub kind: EndpointKind,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    /// Inline template text (prompt kind) or reference resolved by the
    /// loader into template text; the core only ever sees resolved text.
    pub template: String,
    #[serde(default)]
    pub connections: Vec<String>,
    #[serde(default)]
    pub cache: Option<CacheSpec>,
    #[serde(default)]
    pub auth: Option<AuthSpec>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitSpec>,
}

impl Endpoint {
    pub fn new(kind: EndpointKind, template: impl Into<String>) -> Self {
        let slug = kind.derive_slug();
        Self {
            slug,
            kind,
            parameters: Vec::new(),
            template: template.into(),
            connections: Vec::new(),
            cache: None,
            auth: None,
            rate_limit: None,
        }
    }

    /// Well-formedness: path patterns well-formed; `path`
    /// parameters appear in the pattern; at least one connection for
    /// query-backed kinds; prompt kind needs no connection.
    pub fn validate_well_formed(&self) -> Result<()> {
        if self.slug != self.kind.derive_slug() {
            return Err(GatewayError::ValidationError(format!(
                "slug {} does not match derived slug {} for its kind",
                self.slug,
                self.kind.derive_slug()
            )));
        }

        let mut seen_names = std::collections::HashSet::new();
        for param in &self.parameters {
            if !seen_names.insert(&param.name) {
                return Err(GatewayError::ValidationError(format!(
                    "duplicate parameter name: {}",
                    param.name
                )));
            }
            for validator in &param.validators {
                validator.validate_well_formed()?;
            }
        }

        if let EndpointKind::Rest { path, .. } = &self.kind {
            crate::registry::endpoint::validate_path_pattern(path)?;
            for param in self.parameters.iter().filter(|p| p.location == ParamLocation::Path) {
                let placeholder = format!(":{}", param.name);
                if !path.split('/').any(|seg| seg == placeholder) {
                    return Err(GatewayError::ValidationError(format!(
                        "path parameter '{}' not present in pattern '{}'",
                        param.name, path
                    )));
                }
            }
        }

        if self.kind.is_query_backed() && !matches!(self.kind, EndpointKind::McpPrompt { .. }) {
            if self.connections.is_empty() {
                return Err(GatewayError::ValidationError(format!(
                    "endpoint {} must reference at least one connection",
                    self.slug
                )));
            }
        }

        if let Some(cache) = &self.cache {
            cache.validate_well_formed()?;
        }

        Ok(())
    }
}

/// DuckLake-style versioned catalog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub metadata_path: String,
    pub data_path: String,
    #[serde(default)]
    pub default_retention: RetentionPolicy,
}

/// Top-level gateway configuration: everything the loader must surface
/// beyond the connection/endpoint sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    pub catalog: CatalogConfig,
    #[serde(with = "humantime_duration", default = "default_tick")]
    pub scheduler_tick: Duration,
    #[serde(with = "humantime_duration", default = "default_drain")]
    pub scheduler_drain_timeout: Duration,
    /// Regex patterns; an OS env var is whitelisted for `env.*` template
    /// access iff its name matches one of these.
    #[serde(default)]
    pub env_whitelist: Vec<String>,
    #[serde(default)]
    pub debug_mode: bool,
}

fn default_tick() -> Duration {
    Duration::from_secs(60)
}

fn default_drain() -> Duration {
    Duration::from_secs(30)
}

impl GatewayConfig {
    pub fn connection(&self, name: &str) -> Option<&Connection> {
        self.connections.iter().find(|c| c.name == name)
    }

    pub fn compiled_env_whitelist(&self) -> Result<Vec<Regex>> {
        self.env_whitelist
            .iter()
            .map(|p| Regex::new(p).map_err(GatewayError::Regex))
            .collect()
    }
}
