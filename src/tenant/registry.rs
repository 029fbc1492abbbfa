//! Immutable registry of statically configured tenants

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{OidcError, Result};
use crate::path_pattern::PathPattern;
use crate::tenant::config::{TenantConfig, DEFAULT_TENANT_ID};

/// A compiled `tenant_paths` entry
#[derive(Debug, Clone)]
struct TenantPathPattern {
    pattern: PathPattern,
    tenant_id: String,
}

impl TenantPathPattern {
    fn compile(pattern: &str, tenant_id: &str) -> Result<Self> {
        let pattern = PathPattern::compile(pattern).map_err(|e| {
            OidcError::config(format!(
                "Tenant '{}': invalid tenant path '{}': {}",
                tenant_id, pattern, e
            ))
        })?;
        Ok(Self {
            pattern,
            tenant_id: tenant_id.to_string(),
        })
    }
}

/// Read-mostly tenant registry, populated once at startup
#[derive(Debug, Clone)]
pub struct TenantRegistry {
    default_tenant: Arc<TenantConfig>,
    tenants: BTreeMap<String, Arc<TenantConfig>>,
    path_patterns: Vec<TenantPathPattern>,
}

impl TenantRegistry {
    /// Validate and register the default tenant and the named tenants
    pub fn new(
        mut default_tenant: TenantConfig,
        tenants: BTreeMap<String, TenantConfig>,
    ) -> Result<Self> {
        if let Some(id) = &default_tenant.tenant_id {
            if id != DEFAULT_TENANT_ID {
                return Err(OidcError::config(format!(
                    "Default tenant id must be '{}' or unset, found '{}'",
                    DEFAULT_TENANT_ID, id
                )));
            }
        }
        default_tenant.tenant_id = Some(DEFAULT_TENANT_ID.to_string());
        if default_tenant.auth_server_url.is_none() && default_tenant.public_key.is_none() {
            debug!("Default tenant has no authorization server, OIDC disabled for it");
            default_tenant.tenant_enabled = false;
        }
        if default_tenant.tenant_enabled {
            default_tenant.validate()?;
        }

        let mut registered = BTreeMap::new();
        let mut path_patterns = Vec::new();

        for (key, mut tenant) in tenants {
            if key == DEFAULT_TENANT_ID {
                return Err(OidcError::config(format!(
                    "Named tenant id cannot be '{}'",
                    DEFAULT_TENANT_ID
                )));
            }
            match &tenant.tenant_id {
                Some(id) if id != &key => {
                    return Err(OidcError::config(format!(
                        "Tenant '{}' declares a different tenant_id '{}'",
                        key, id
                    )));
                }
                _ => tenant.tenant_id = Some(key.clone()),
            }
            tenant.validate()?;

            if !tenant.tenant_enabled {
                debug!(tenant_id = %key, "Skipping disabled tenant");
                continue;
            }

            for pattern in &tenant.tenant_paths {
                path_patterns.push(TenantPathPattern::compile(pattern, &key)?);
            }
            registered.insert(key, Arc::new(tenant));
        }

        for pattern in &default_tenant.tenant_paths {
            path_patterns.push(TenantPathPattern::compile(pattern, DEFAULT_TENANT_ID)?);
        }

        // Most specific first; ties broken by tenant id so lookup never
        // depends on registration order
        path_patterns.sort_by(|a, b| {
            a.pattern
                .cmp_specificity(&b.pattern)
                .then_with(|| a.tenant_id.cmp(&b.tenant_id))
        });

        Ok(Self {
            default_tenant: Arc::new(default_tenant),
            tenants: registered,
            path_patterns,
        })
    }

    pub fn default_tenant(&self) -> Arc<TenantConfig> {
        self.default_tenant.clone()
    }

    /// Look up an enabled tenant, including the default tenant by its id
    pub fn get(&self, tenant_id: &str) -> Option<Arc<TenantConfig>> {
        if tenant_id == DEFAULT_TENANT_ID {
            return Some(self.default_tenant.clone());
        }
        self.tenants.get(tenant_id).cloned()
    }

    /// Named tenants in tenant id order
    pub fn tenants(&self) -> impl Iterator<Item = &Arc<TenantConfig>> {
        self.tenants.values()
    }

    pub fn tenant_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(DEFAULT_TENANT_ID).chain(self.tenants.keys().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.tenants.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Tenant whose most specific `tenant_paths` pattern matches the path
    pub fn match_path(&self, path: &str) -> Option<Arc<TenantConfig>> {
        let pattern = self
            .path_patterns
            .iter()
            .find(|p| p.pattern.is_match(path))?;
        debug!(
            path = %path,
            pattern = %pattern.pattern.as_str(),
            tenant_id = %pattern.tenant_id,
            "Tenant path matched"
        );
        self.get(&pattern.tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(paths: &[&str]) -> TenantConfig {
        TenantConfig {
            tenant_paths: paths.iter().map(|p| p.to_string()).collect(),
            ..TenantConfig::new("placeholder", "http://localhost:8180")
        }
    }

    fn registry(entries: Vec<(&str, TenantConfig)>) -> TenantRegistry {
        let tenants = entries
            .into_iter()
            .map(|(id, mut t)| {
                t.tenant_id = None;
                (id.to_string(), t)
            })
            .collect();
        TenantRegistry::new(TenantConfig::new(DEFAULT_TENANT_ID, "http://localhost:8180"), tenants)
            .unwrap()
    }

    #[test]
    fn most_specific_path_wins() {
        let registry = registry(vec![
            ("a-broad", tenant(&["/api/*"])),
            ("z-narrow", tenant(&["/api/tenant/*"])),
            ("exact", tenant(&["/api/tenant/exact"])),
        ]);

        assert_eq!(registry.match_path("/api/other").unwrap().id(), "a-broad");
        assert_eq!(registry.match_path("/api").unwrap().id(), "a-broad");
        assert_eq!(registry.match_path("/api/tenant/x/y").unwrap().id(), "z-narrow");
        assert_eq!(registry.match_path("/api/tenant/exact").unwrap().id(), "exact");
        assert!(registry.match_path("/other").is_none());
    }

    #[test]
    fn single_star_stays_within_segment() {
        let registry = registry(vec![("a", tenant(&["/files/*.txt"]))]);
        assert!(registry.match_path("/files/a.txt").is_some());
        assert!(registry.match_path("/files/nested/a.txt").is_none());
    }

    #[test]
    fn rejects_named_default_tenant() {
        let mut tenants = BTreeMap::new();
        tenants.insert(DEFAULT_TENANT_ID.to_string(), tenant(&[]));
        let result = TenantRegistry::new(TenantConfig::new(DEFAULT_TENANT_ID, "http://localhost"), tenants);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_mismatched_tenant_id() {
        let mut tenants = BTreeMap::new();
        tenants.insert("a".to_string(), TenantConfig::new("b", "http://localhost"));
        let result = TenantRegistry::new(TenantConfig::new(DEFAULT_TENANT_ID, "http://localhost"), tenants);
        assert!(result.is_err());
    }

    #[test]
    fn disabled_tenants_are_not_registered() {
        let mut disabled = tenant(&["/disabled/*"]);
        disabled.tenant_enabled = false;
        let registry = registry(vec![("off", disabled)]);
        assert!(registry.get("off").is_none());
        assert!(registry.match_path("/disabled/x").is_none());
        assert_eq!(registry.get(DEFAULT_TENANT_ID).unwrap().id(), DEFAULT_TENANT_ID);
    }
}
