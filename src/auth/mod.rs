//! Auth decision contract the request pipeline consumes. Token parsing
//! and validation themselves are an external collaborator's job; this
//! module only shapes the outcome and checks it against an endpoint's
//! `AuthSpec`.

use indexmap::IndexMap;

use crate::config::model::{AuthKind, AuthSpec};
use crate::errors::{GatewayError, Result};
use crate::template::CtxValue;

/// The identity an external auth collaborator decided for this request,
/// or the anonymous default when no credentials were presented.
#[derive(Debug, Clone, Default)]
pub struct AuthOutcome {
    pub user: Option<String>,
    pub roles: Vec<String>,
}

impl AuthOutcome {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(user: impl Into<String>, roles: Vec<String>) -> Self {
        Self { user: Some(user.into()), roles }
    }

    /// Builds the `auth.*` template scope: `user` and a comma-joined
    /// `roles` string, consistent with every context value being a
    /// string or a map of strings.
    pub fn template_scope(&self) -> IndexMap<String, CtxValue> {
        let mut scope = IndexMap::new();
        if let Some(user) = &self.user {
            scope.insert("user".to_string(), CtxValue::from(user.as_str()));
        }
        if !self.roles.is_empty() {
            scope.insert("roles".to_string(), CtxValue::from(self.roles.join(",").as_str()));
        }
        scope
    }
}

/// Enforces `spec` against `outcome`. No spec, or a spec of kind `None`,
/// always passes. Otherwise an anonymous outcome is `AuthRequired`, and a
/// non-anonymous outcome missing every role in `required_roles` is
/// `AuthDenied`.
pub fn authorize(spec: Option<&AuthSpec>, outcome: &AuthOutcome) -> Result<()> {
    let Some(spec) = spec else { return Ok(()) };
    if spec.kind == AuthKind::None {
        return Ok(());
    }
    if outcome.user.is_none() {
        return Err(GatewayError::AuthRequired);
    }
    if !spec.required_roles.is_empty() && !spec.required_roles.iter().any(|r| outcome.roles.contains(r)) {
        return Err(GatewayError::AuthDenied(format!(
            "requires one of roles: {}",
            spec.required_roles.join(", ")
        )));
    }
    Ok(())
}
