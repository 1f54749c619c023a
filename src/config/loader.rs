//! Thin YAML loader building the materialised [`GatewayConfig`].
//!
//! The full config *file loader* — include expansion, schema migration,
//! AI-assisted authoring — is explicitly out of scope. This is
//! just enough to load a single YAML document into the model the core
//! consumes.

use std::path::Path;

use crate::config::model::GatewayConfig;
use crate::errors::Result;

pub fn load_from_str(yaml: &str) -> Result<GatewayConfig> {
    let config: GatewayConfig = serde_yaml::from_str(yaml)?;
    for endpoint in &config.endpoints {
        endpoint.validate_well_formed()?;
    }
    Ok(config)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<GatewayConfig> {
    let text = std::fs::read_to_string(path)?;
    load_from_str(&text)
}
