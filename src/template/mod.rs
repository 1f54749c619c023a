//! Logic-less tag expander over a scoped [`TemplateContext`].
//!
//! Supports `{{{ path }}}` escaped-string insertion, `{{ path }}` raw
//! insertion, `{{# path }}…{{/ path }}` present sections and
//! `{{^ path }}…{{/ path }}` inverted sections. Deliberately hand-rolled
//! rather than built on a general-purpose Jinja-family engine: none of
//! those distinguish "insert as a quoted, injection-safe SQL string
//! literal" from "insert raw" the way this gateway's safety model
//! requires, so the escaping behaviour has to be exact and explicit.

use indexmap::IndexMap;

use crate::errors::{GatewayError, Result};

/// A context value: either a leaf string or a nested scope.
#[derive(Debug, Clone)]
pub enum CtxValue {
    String(String),
    Map(IndexMap<String, CtxValue>),
}

impl CtxValue {
    pub fn map() -> Self {
        CtxValue::Map(IndexMap::new())
    }

    fn is_present(&self) -> bool {
        match self {
            CtxValue::String(s) => !s.is_empty() && s != "false",
            CtxValue::Map(m) => !m.is_empty(),
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            CtxValue::String(s) => Some(s.as_str()),
            CtxValue::Map(_) => None,
        }
    }
}

impl From<String> for CtxValue {
    fn from(s: String) -> Self {
        CtxValue::String(s)
    }
}

impl From<&str> for CtxValue {
    fn from(s: &str) -> Self {
        CtxValue::String(s.to_string())
    }
}

/// The whitelisted top-level sub-trees a template may address.
/// Any other top-level key renders as absent.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub params: IndexMap<String, CtxValue>,
    pub conn: IndexMap<String, CtxValue>,
    pub env: IndexMap<String, CtxValue>,
    pub cache: IndexMap<String, CtxValue>,
    pub auth: IndexMap<String, CtxValue>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn root(&self, name: &str) -> Option<&IndexMap<String, CtxValue>> {
        match name {
            "params" => Some(&self.params),
            "conn" => Some(&self.conn),
            "env" => Some(&self.env),
            "cache" => Some(&self.cache),
            "auth" => Some(&self.auth),
            _ => None,
        }
    }

    /// Dot-separated path resolution, walking map-valued scopes. A missing
    /// key at any step is absent, not an error.
    fn resolve(&self, path: &str) -> Option<&CtxValue> {
        let mut segments = path.split('.');
        let root_name = segments.next()?;
        let mut map = self.root(root_name)?;
        let mut current: Option<&CtxValue> = None;
        for (i, seg) in segments.clone().enumerate() {
            let value = map.get(seg)?;
            let is_last = i == segments.clone().count() - 1;
            if is_last {
                current = Some(value);
            } else {
                match value {
                    CtxValue::Map(m) => map = m,
                    CtxValue::String(_) => return None,
                }
            }
        }
        // path was just the root name with no sub-path (e.g. "params"
        // alone) — not a meaningful lookup target, treat as absent.
        current
    }
}

/// Rendering strictness. The request pipeline always uses [`RenderMode::Lenient`];
/// strict mode is available for operators validating templates offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Strict,
    Lenient,
}

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Escaped(String),
    Raw(String),
    Section {
        path: String,
        invert: bool,
        body: Vec<Node>,
    },
}

struct Parser;

impl Parser {
    fn parse(template: &str) -> Result<Vec<Node>> {
        let mut stack: Vec<(String, bool, Vec<Node>)> = Vec::new();
        let mut current: Vec<Node> = Vec::new();
        let mut i = 0usize;

        while i < template.len() {
            let Some(rel_start) = template[i..].find("{{") else {
                current.push(Node::Text(template[i..].to_string()));
                break;
            };
            let start = i + rel_start;
            if start > i {
                current.push(Node::Text(template[i..start].to_string()));
            }
            let after = start + 2;

            if template[after..].starts_with('{') {
                let body_start = after + 1;
                let Some(rel_close) = template[body_start..].find("}}}") else {
                    return Err(GatewayError::TemplateSyntaxError(format!(
                        "unmatched '{{{{{{' at byte offset {start}"
                    )));
                };
                let path = template[body_start..body_start + rel_close].trim().to_string();
                current.push(Node::Escaped(path));
                i = body_start + rel_close + 3;
                continue;
            }

            let Some(rel_close) = template[after..].find("}}") else {
                return Err(GatewayError::TemplateSyntaxError(format!(
                    "unmatched '{{{{' at byte offset {start}"
                )));
            };
            let inner = &template[after..after + rel_close];
            i = after + rel_close + 2;

            if let Some(rest) = inner.strip_prefix('#') {
                let path = rest.trim().to_string();
                stack.push((path, false, std::mem::take(&mut current)));
            } else if let Some(rest) = inner.strip_prefix('^') {
                let path = rest.trim().to_string();
                stack.push((path, true, std::mem::take(&mut current)));
            } else if let Some(rest) = inner.strip_prefix('/') {
                let path = rest.trim().to_string();
                let Some((open_path, invert, parent_body)) = stack.pop() else {
                    return Err(GatewayError::TemplateSyntaxError(format!(
                        "close tag '{{{{/{path}}}}}' has no matching opener"
                    )));
                };
                if open_path != path {
                    return Err(GatewayError::TemplateSyntaxError(format!(
                        "close tag '{{{{/{path}}}}}' does not match opener '{{{{{}{open_path}}}}}'",
                        if invert { "^" } else { "#" }
                    )));
                }
                let body = std::mem::replace(&mut current, parent_body);
                current.push(Node::Section { path: open_path, invert, body });
            } else {
                current.push(Node::Raw(inner.trim().to_string()));
            }
        }

        if let Some((path, invert, _)) = stack.pop() {
            return Err(GatewayError::TemplateSyntaxError(format!(
                "unclosed section '{{{{{}{path}}}}}'",
                if invert { "^" } else { "#" }
            )));
        }

        Ok(current)
    }
}

fn escape_sql_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push('\'');
            out.push('\'');
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

fn render_nodes(nodes: &[Node], ctx: &TemplateContext, mode: RenderMode, out: &mut String) -> Result<()> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Escaped(path) => match ctx.resolve(path).and_then(CtxValue::as_str) {
                Some(value) => out.push_str(&escape_sql_string(value)),
                None => {
                    if mode == RenderMode::Strict {
                        return Err(GatewayError::TemplateVariableError(path.clone()));
                    }
                }
            },
            Node::Raw(path) => match ctx.resolve(path).and_then(CtxValue::as_str) {
                Some(value) => out.push_str(value),
                None => {
                    if mode == RenderMode::Strict {
                        return Err(GatewayError::TemplateVariableError(path.clone()));
                    }
                }
            },
            Node::Section { path, invert, body } => {
                let present = ctx.resolve(path).map(CtxValue::is_present).unwrap_or(false);
                let should_render = present != *invert;
                if should_render {
                    render_nodes(body, ctx, mode, out)?;
                }
            }
        }
    }
    Ok(())
}

/// Renders `template` against `ctx`. Pure function of (template, context,
/// mode); no partial output on failure, no side effects.
pub fn render(template: &str, ctx: &TemplateContext, mode: RenderMode) -> Result<String> {
    let nodes = Parser::parse(template)?;
    let mut out = String::with_capacity(template.len());
    render_nodes(&nodes, ctx, mode, &mut out)?;
    Ok(out)
}
