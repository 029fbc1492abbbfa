//! Path based mechanism selection
//!
//! A path permission that names a mechanism pins it and beats any endpoint
//! binding. An endpoint binding restricts its endpoints to one mechanism.
//! Everything else tries the mechanisms in [`MechanismKind::PRECEDENCE`].

use tracing::trace;

use crate::auth::config::{HttpAuthConfig, PolicyKind};
use crate::auth::mechanism::MechanismKind;
use crate::error::{OidcError, Result};
use crate::path_pattern::PathPattern;

#[derive(Debug, Clone)]
struct CompiledPermission {
    name: String,
    pattern: PathPattern,
    policy: PolicyKind,
    mechanism: Option<MechanismKind>,
}

#[derive(Debug, Clone)]
struct CompiledBinding {
    pattern: PathPattern,
    mechanism: MechanismKind,
}

/// Mechanisms and policy that apply to a request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub policy: PolicyKind,
    /// Candidate mechanisms in the order they are tried
    pub mechanisms: Vec<MechanismKind>,
    /// Whether a permission or binding restricted the candidates
    pub restricted: bool,
}

#[derive(Debug, Clone)]
pub struct MechanismSelector {
    permissions: Vec<CompiledPermission>,
    bindings: Vec<CompiledBinding>,
}

impl MechanismSelector {
    pub fn new(config: &HttpAuthConfig) -> Result<Self> {
        let compile = |pattern: &str, owner: &str| {
            PathPattern::compile(pattern).map_err(|e| {
                OidcError::config(format!("{}: invalid path '{}': {}", owner, pattern, e))
            })
        };

        let mut permissions = Vec::new();
        for permission in &config.permissions {
            if permission.paths.is_empty() {
                return Err(OidcError::config(format!(
                    "Permission '{}' has no paths",
                    permission.name
                )));
            }
            let owner = format!("Permission '{}'", permission.name);
            for path in &permission.paths {
                permissions.push(CompiledPermission {
                    name: permission.name.clone(),
                    pattern: compile(path, &owner)?,
                    policy: permission.policy,
                    mechanism: permission.auth_mechanism,
                });
            }
        }
        permissions.sort_by(|a, b| a.pattern.cmp_specificity(&b.pattern));

        let mut bindings = Vec::new();
        for binding in &config.endpoint_bindings {
            let owner = format!("Endpoint binding for '{}'", binding.mechanism);
            for path in &binding.paths {
                bindings.push(CompiledBinding {
                    pattern: compile(path, &owner)?,
                    mechanism: binding.mechanism,
                });
            }
        }
        bindings.sort_by(|a, b| a.pattern.cmp_specificity(&b.pattern));

        Ok(Self {
            permissions,
            bindings,
        })
    }

    pub fn select(&self, path: &str) -> Selection {
        let permission = self.permissions.iter().find(|p| p.pattern.is_match(path));
        let policy = permission.map(|p| p.policy).unwrap_or_default();

        if let Some(mechanism) = permission.and_then(|p| p.mechanism) {
            trace!(
                path = %path,
                permission = %permission.map(|p| p.name.as_str()).unwrap_or_default(),
                mechanism = %mechanism,
                "Mechanism pinned by path permission"
            );
            return Selection {
                policy,
                mechanisms: vec![mechanism],
                restricted: true,
            };
        }

        if let Some(binding) = self.bindings.iter().find(|b| b.pattern.is_match(path)) {
            trace!(path = %path, mechanism = %binding.mechanism, "Mechanism bound by endpoint");
            return Selection {
                policy,
                mechanisms: vec![binding.mechanism],
                restricted: true,
            };
        }

        Selection {
            policy,
            mechanisms: MechanismKind::PRECEDENCE.to_vec(),
            restricted: false,
        }
    }
}
