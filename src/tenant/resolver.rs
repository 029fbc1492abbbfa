//! Ordered tenant resolution
//!
//! Strategies are evaluated short-circuit style:
//! custom config resolver, custom tenant resolver, static `tenant_paths`,
//! token header, token issuer (opt-in), default tenant.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use tracing::{debug, warn};

use crate::error::{OidcError, Result};
use crate::request::RequestContext;
use crate::tenant::config::{TenantConfig, DEFAULT_TENANT_ID};
use crate::tenant::registry::TenantRegistry;

/// Resolves a tenant id for a request; `None` defers to the next strategy
#[async_trait]
pub trait TenantResolver: Send + Sync {
    async fn resolve(&self, request: &RequestContext) -> Option<String>;
}

/// Produces a complete tenant configuration, bypassing the registry
#[async_trait]
pub trait TenantConfigResolver: Send + Sync {
    async fn resolve(&self, request: &RequestContext) -> Option<TenantConfig>;
}

/// Strategy that produced a [`ResolvedTenant`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    CustomConfigResolver,
    CustomResolver,
    StaticPath,
    Header,
    Issuer,
    Default,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolutionStrategy::CustomConfigResolver => "custom-config-resolver",
            ResolutionStrategy::CustomResolver => "custom-resolver",
            ResolutionStrategy::StaticPath => "static-path",
            ResolutionStrategy::Header => "header",
            ResolutionStrategy::Issuer => "issuer",
            ResolutionStrategy::Default => "default",
        };
        f.write_str(name)
    }
}

/// Tenant selected for one request
#[derive(Debug, Clone)]
pub struct ResolvedTenant {
    pub config: Arc<TenantConfig>,
    pub strategy: ResolutionStrategy,
}

impl ResolvedTenant {
    pub fn new(config: Arc<TenantConfig>, strategy: ResolutionStrategy) -> Self {
        Self { config, strategy }
    }

    pub fn tenant_id(&self) -> &str {
        self.config.id()
    }
}

/// Issuer claim of a JWT, read without verifying the signature
pub fn unverified_issuer(token: &str) -> Option<String> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return None,
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| URL_SAFE.decode(payload))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("iss")?.as_str().map(str::to_string)
}

/// Ordered chain of tenant resolution strategies
pub struct TenantResolverChain {
    registry: Arc<TenantRegistry>,
    config_resolver: Option<Arc<dyn TenantConfigResolver>>,
    tenant_resolver: Option<Arc<dyn TenantResolver>>,
    issuer_based: bool,
}

impl TenantResolverChain {
    pub fn new(registry: Arc<TenantRegistry>) -> Self {
        Self {
            registry,
            config_resolver: None,
            tenant_resolver: None,
            issuer_based: false,
        }
    }

    pub fn with_config_resolver(mut self, resolver: Arc<dyn TenantConfigResolver>) -> Self {
        self.config_resolver = Some(resolver);
        self
    }

    pub fn with_tenant_resolver(mut self, resolver: Arc<dyn TenantResolver>) -> Self {
        self.tenant_resolver = Some(resolver);
        self
    }

    pub fn issuer_based(mut self, enabled: bool) -> Self {
        self.issuer_based = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<TenantRegistry> {
        &self.registry
    }

    /// Resolve the tenant for a request
    ///
    /// Only issuer based resolution can fail: a bearer token whose issuer
    /// matches no tenant yields [`OidcError::ResolutionFailure`].
    pub async fn resolve(&self, request: &RequestContext) -> Result<ResolvedTenant> {
        if let Some(resolver) = &self.config_resolver {
            if let Some(config) = resolver.resolve(request).await {
                let config = Self::accept_dynamic(config)?;
                debug!(tenant_id = %config.id(), "Tenant resolved by custom config resolver");
                return Ok(ResolvedTenant::new(
                    Arc::new(config),
                    ResolutionStrategy::CustomConfigResolver,
                ));
            }
        }

        if let Some(resolver) = &self.tenant_resolver {
            if let Some(tenant_id) = resolver.resolve(request).await {
                return Ok(match self.registry.get(&tenant_id) {
                    Some(config) => {
                        debug!(tenant_id = %tenant_id, "Tenant resolved by custom resolver");
                        ResolvedTenant::new(config, ResolutionStrategy::CustomResolver)
                    }
                    None => {
                        debug!(
                            tenant_id = %tenant_id,
                            "No configuration for resolved tenant id, using the default tenant"
                        );
                        self.default_tenant()
                    }
                });
            }
        }

        if let Some(config) = self.registry.match_path(&request.path) {
            return Ok(ResolvedTenant::new(config, ResolutionStrategy::StaticPath));
        }

        if let Some(config) = self.match_header(request) {
            debug!(tenant_id = %config.id(), "Tenant resolved by token header");
            return Ok(ResolvedTenant::new(config, ResolutionStrategy::Header));
        }

        if self.issuer_based {
            if let Some(token) = request.bearer_token() {
                return self.match_issuer(token);
            }
        }

        Ok(self.default_tenant())
    }

    fn default_tenant(&self) -> ResolvedTenant {
        ResolvedTenant::new(self.registry.default_tenant(), ResolutionStrategy::Default)
    }

    fn match_header(&self, request: &RequestContext) -> Option<Arc<TenantConfig>> {
        self.registry
            .tenants()
            .find(|tenant| {
                tenant
                    .token_header_name
                    .as_deref()
                    .map(|name| request.header(name).is_some())
                    .unwrap_or(false)
            })
            .cloned()
    }

    fn match_issuer(&self, token: &str) -> Result<ResolvedTenant> {
        let issuer = unverified_issuer(token)
            .ok_or_else(|| OidcError::resolution("Bearer token carries no readable issuer"))?;
        let issuer = issuer.trim_end_matches('/');

        let default_tenant = self.registry.default_tenant();
        let candidates = self
            .registry
            .tenants()
            .chain(std::iter::once(&default_tenant).filter(|t| t.tenant_enabled));

        for tenant in candidates {
            if tenant.expected_issuer() == Some(issuer) {
                debug!(tenant_id = %tenant.id(), issuer = %issuer, "Tenant resolved by issuer");
                return Ok(ResolvedTenant::new(tenant.clone(), ResolutionStrategy::Issuer));
            }
        }

        warn!(issuer = %issuer, "No tenant is configured for token issuer");
        Err(OidcError::resolution(format!(
            "No tenant is configured for issuer '{}'",
            issuer
        )))
    }

    fn accept_dynamic(config: TenantConfig) -> Result<TenantConfig> {
        match config.tenant_id.as_deref() {
            None | Some(DEFAULT_TENANT_ID) => {
                return Err(OidcError::resolution(format!(
                    "Dynamic tenant configuration must declare a tenant id other than '{}'",
                    DEFAULT_TENANT_ID
                )));
            }
            _ => {}
        }
        config.validate().map_err(|e| {
            warn!(error = %e, "Rejecting dynamic tenant configuration");
            OidcError::resolution(e.to_string())
        })?;
        Ok(config)
    }
}
