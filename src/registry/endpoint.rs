//! In-memory index of live [`Endpoint`] descriptors: lookup by (method,
//! path) for REST, by name for MCP, atomic replace/delete/reload.
//!
//! Readers never block readers and see either the pre- or post-state of
//! a write, never a partial update — a copy-on-write registry built on
//! `arc_swap::ArcSwap` over an immutable snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use indexmap::IndexMap;

use crate::config::model::{Endpoint, EndpointKind, HttpMethod};
use crate::errors::{GatewayError, Result};

/// Re-reads a single endpoint definition from wherever the registry was
/// configured to load from. Implemented by the CLI/server wiring layer;
/// the registry itself has no opinion on where endpoints come from.
pub trait EndpointSource: Send + Sync {
    fn load_endpoint(&self, slug: &str) -> Result<Endpoint>;
}

/// Checks that a REST path pattern is well-formed: starts with `/`, has
/// no empty segments, and every `:name` placeholder names a non-empty
/// identifier.
pub fn validate_path_pattern(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(GatewayError::ValidationError(format!(
            "path pattern '{path}' must start with '/'"
        )));
    }
    for segment in path.split('/').skip(1) {
        if segment.is_empty() {
            return Err(GatewayError::ValidationError(format!(
                "path pattern '{path}' has an empty segment"
            )));
        }
        if let Some(name) = segment.strip_prefix(':') {
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(GatewayError::ValidationError(format!(
                    "path pattern '{path}' has a malformed placeholder ':{name}'"
                )));
            }
        }
    }
    Ok(())
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').skip(1).collect()
}

/// A resolved REST match: the endpoint plus the path parameters bound
/// from `:name` segments.
pub struct RestMatch {
    pub endpoint: Arc<Endpoint>,
    pub path_params: HashMap<String, String>,
}

fn matches_pattern<'a>(pattern: &[&str], request: &[&'a str]) -> Option<HashMap<String, String>> {
    if pattern.len() != request.len() {
        return None;
    }
    let mut bound = HashMap::new();
    for (pat_seg, req_seg) in pattern.iter().zip(request.iter()) {
        if let Some(name) = pat_seg.strip_prefix(':') {
            bound.insert(name.to_string(), (*req_seg).to_string());
        } else if *pat_seg != *req_seg {
            return None;
        }
    }
    Some(bound)
}

fn placeholder_count(pattern: &[&str]) -> usize {
    pattern.iter().filter(|s| s.starts_with(':')).count()
}

#[derive(Default, Clone)]
struct Snapshot {
    by_slug: IndexMap<String, Arc<Endpoint>>,
    by_tool: HashMap<String, Arc<Endpoint>>,
    by_resource: HashMap<String, Arc<Endpoint>>,
    by_prompt: HashMap<String, Arc<Endpoint>>,
}

impl Snapshot {
    fn insert(&mut self, endpoint: Arc<Endpoint>) {
        match &endpoint.kind {
            EndpointKind::McpTool { tool_name } => {
                self.by_tool.insert(tool_name.clone(), endpoint.clone());
            }
            EndpointKind::McpResource { resource_name } => {
                self.by_resource.insert(resource_name.clone(), endpoint.clone());
            }
            EndpointKind::McpPrompt { prompt_name } => {
                self.by_prompt.insert(prompt_name.clone(), endpoint.clone());
            }
            EndpointKind::Rest { .. } => {}
        }
        self.by_slug.insert(endpoint.slug.clone(), endpoint);
    }

    fn remove(&mut self, slug: &str) -> Option<Arc<Endpoint>> {
        let removed = self.by_slug.shift_remove(slug)?;
        match &removed.kind {
            EndpointKind::McpTool { tool_name } => {
                self.by_tool.remove(tool_name);
            }
            EndpointKind::McpResource { resource_name } => {
                self.by_resource.remove(resource_name);
            }
            EndpointKind::McpPrompt { prompt_name } => {
                self.by_prompt.remove(prompt_name);
            }
            EndpointKind::Rest { .. } => {}
        }
        Some(removed)
    }
}

pub struct EndpointRegistry {
    snapshot: ArcSwap<Snapshot>,
    source: Option<Arc<dyn EndpointSource>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            source: None,
        }
    }

    pub fn with_source(source: Arc<dyn EndpointSource>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            source: Some(source),
        }
    }

    /// Builds a registry from an initial endpoint set, rejecting duplicate
    /// slugs up front.
    pub fn from_endpoints(endpoints: Vec<Endpoint>) -> Result<Self> {
        let registry = Self::new();
        let mut snapshot = Snapshot::default();
        for endpoint in endpoints {
            if snapshot.by_slug.contains_key(&endpoint.slug) {
                return Err(GatewayError::DuplicateSlug(endpoint.slug));
            }
            snapshot.insert(Arc::new(endpoint));
        }
        registry.snapshot.store(Arc::new(snapshot));
        Ok(registry)
    }

    pub fn lookup(&self, method: HttpMethod, path: &str) -> Result<RestMatch> {
        let request_segments = segments(path);
        let snapshot = self.snapshot.load();

        let mut best: Option<(usize, &str, &Arc<Endpoint>, HashMap<String, String>)> = None;
        for endpoint in snapshot.by_slug.values() {
            let EndpointKind::Rest { method: ep_method, path: pattern } = &endpoint.kind else {
                continue;
            };
            if *ep_method != method {
                continue;
            }
            let pattern_segments = segments(pattern);
            let Some(bound) = matches_pattern(&pattern_segments, &request_segments) else {
                continue;
            };
            let specificity = placeholder_count(&pattern_segments);
            let better = match &best {
                None => true,
                Some((best_specificity, best_pattern, _, _)) => {
                    specificity < *best_specificity
                        || (specificity == *best_specificity && pattern.as_str() < *best_pattern)
                }
            };
            if better {
                best = Some((specificity, pattern.as_str(), endpoint, bound));
            }
        }

        best.map(|(_, _, endpoint, path_params)| RestMatch {
            endpoint: endpoint.clone(),
            path_params,
        })
        .ok_or_else(|| GatewayError::NotFound(format!("{} {}", method.as_str(), path)))
    }

    pub fn lookup_by_tool_name(&self, name: &str) -> Result<Arc<Endpoint>> {
        self.snapshot
            .load()
            .by_tool
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("mcp tool '{name}'")))
    }

    pub fn lookup_by_resource_name(&self, name: &str) -> Result<Arc<Endpoint>> {
        self.snapshot
            .load()
            .by_resource
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("mcp resource '{name}'")))
    }

    pub fn lookup_by_prompt_name(&self, name: &str) -> Result<Arc<Endpoint>> {
        self.snapshot
            .load()
            .by_prompt
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("mcp prompt '{name}'")))
    }

    pub fn list(&self) -> Vec<Arc<Endpoint>> {
        self.snapshot.load().by_slug.values().cloned().collect()
    }

    pub fn put(&self, endpoint: Endpoint) {
        let endpoint = Arc::new(endpoint);
        loop {
            let current = self.snapshot.load();
            let mut next = (**current).clone();
            next.insert(endpoint.clone());
            let next = Arc::new(next);
            let prev = self.snapshot.compare_and_swap(&current, next);
            if Arc::ptr_eq(&prev, &current) {
                break;
            }
        }
    }

    pub fn remove(&self, slug: &str) -> Result<()> {
        loop {
            let current = self.snapshot.load();
            if !current.by_slug.contains_key(slug) {
                return Err(GatewayError::NotFound(format!("endpoint '{slug}'")));
            }
            let mut next = (**current).clone();
            next.remove(slug);
            let next = Arc::new(next);
            let prev = self.snapshot.compare_and_swap(&current, next);
            if Arc::ptr_eq(&prev, &current) {
                return Ok(());
            }
        }
    }

    pub fn reload(&self, slug: &str) -> Result<()> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| GatewayError::Internal("registry has no configured endpoint source".into()))?;
        let endpoint = source.load_endpoint(slug)?;
        if endpoint.slug != slug {
            return Err(GatewayError::ValidationError(format!(
                "reloaded endpoint slug '{}' does not match requested slug '{slug}'",
                endpoint.slug
            )));
        }
        self.put(endpoint);
        Ok(())
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}
