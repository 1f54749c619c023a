//! In-memory index of configured [`Connection`] descriptors, and the
//! property-bag view templates address as `conn.<name>.<key>`.
//!
//! Same copy-on-write discipline as [`super::endpoint::EndpointRegistry`],
//! kept deliberately simpler since connections have no secondary indices.

use std::sync::Arc;

use arc_swap::ArcSwap;
use indexmap::IndexMap;

use crate::config::model::Connection;
use crate::errors::{GatewayError, Result};
use crate::template::CtxValue;

pub struct ConnectionRegistry {
    snapshot: ArcSwap<IndexMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(IndexMap::new()),
        }
    }

    pub fn from_connections(connections: Vec<Connection>) -> Result<Self> {
        let registry = Self::new();
        let mut map = IndexMap::new();
        for conn in connections {
            if map.contains_key(&conn.name) {
                return Err(GatewayError::ValidationError(format!(
                    "duplicate connection name: {}",
                    conn.name
                )));
            }
            map.insert(conn.name.clone(), Arc::new(conn));
        }
        registry.snapshot.store(Arc::new(map));
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Connection>> {
        self.snapshot
            .load()
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("connection '{name}'")))
    }

    pub fn list(&self) -> Vec<Arc<Connection>> {
        self.snapshot.load().values().cloned().collect()
    }

    pub fn put(&self, connection: Connection) {
        loop {
            let current = self.snapshot.load();
            let mut next = (**current).clone();
            next.insert(connection.name.clone(), Arc::new(connection.clone()));
            let next = Arc::new(next);
            let prev = self.snapshot.compare_and_swap(&current, next);
            if Arc::ptr_eq(&prev, &current) {
                return;
            }
        }
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        loop {
            let current = self.snapshot.load();
            if !current.contains_key(name) {
                return Err(GatewayError::NotFound(format!("connection '{name}'")));
            }
            let mut next = (**current).clone();
            next.shift_remove(name);
            let next = Arc::new(next);
            let prev = self.snapshot.compare_and_swap(&current, next);
            if Arc::ptr_eq(&prev, &current) {
                return Ok(());
            }
        }
    }

    /// Builds the `conn.*` template scope for the given connection names,
    /// one `Map` entry per connection holding its property bag.
    pub fn template_scope(&self, names: &[String]) -> IndexMap<String, CtxValue> {
        let snapshot = self.snapshot.load();
        let mut scope = IndexMap::new();
        for name in names {
            if let Some(conn) = snapshot.get(name) {
                let mut props = IndexMap::new();
                for (key, value) in &conn.properties {
                    props.insert(key.clone(), CtxValue::from(value.as_str()));
                }
                scope.insert(name.clone(), CtxValue::Map(props));
            }
        }
        scope
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
