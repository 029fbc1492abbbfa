//! Startup logging of the tenant and mechanism inventory

use tracing::{info, warn};

use crate::auth::OidcAuthenticator;
use crate::config::{Config, EnvironmentOverrides};
use crate::tenant::TenantConfig;

/// Startup logger for tenant and authentication information
pub struct StartupLogger;

impl StartupLogger {
    pub fn display_startup_info(
        config: &Config,
        overrides: &EnvironmentOverrides,
        authenticator: &OidcAuthenticator,
        version: &str,
    ) {
        info!("oidc-tenancy v{} starting...", version);
        info!("");

        if overrides.has_overrides() {
            Self::display_environment_overrides(overrides);
        }
        Self::display_tenants(authenticator);
        Self::display_authentication(config, authenticator);

        info!("Server Information:");
        info!("   HTTP: http://{}:{}", config.server.host, config.server.port);
        info!("");
    }

    fn display_environment_overrides(overrides: &EnvironmentOverrides) {
        info!("Environment Overrides:");
        for override_info in overrides.get_override_summary() {
            info!("   {}", override_info);
        }
        info!("");
    }

    fn display_tenants(authenticator: &OidcAuthenticator) {
        let registry = authenticator.registry();
        info!("Tenants ({}):", registry.len());

        let default_tenant = registry.default_tenant();
        if default_tenant.tenant_enabled {
            Self::display_tenant(&default_tenant);
        } else {
            warn!("   {} (disabled, no authorization server configured)", default_tenant.id());
        }
        for tenant in registry.tenants() {
            Self::display_tenant(tenant);
        }
        info!("");
    }

    fn display_tenant(tenant: &TenantConfig) {
        let paths = if tenant.tenant_paths.is_empty() {
            "-".to_string()
        } else {
            tenant.tenant_paths.join(", ")
        };
        info!(
            "   {} [{:?}] issuer={} paths={}",
            tenant.id(),
            tenant.application_type,
            tenant.expected_issuer().unwrap_or("-"),
            paths
        );
    }

    fn display_authentication(config: &Config, authenticator: &OidcAuthenticator) {
        info!("Authentication:");
        let mechanisms: Vec<&str> = authenticator
            .mechanism_kinds()
            .into_iter()
            .map(|kind| kind.as_str())
            .collect();
        info!("   Mechanisms: {}", mechanisms.join(", "));
        info!(
            "   Mode: {}",
            if authenticator.is_inclusive() { "inclusive" } else { "first match" }
        );
        info!(
            "   Issuer based resolution: {}",
            if config.oidc.resolution.issuer_based { "enabled" } else { "disabled" }
        );
        info!("   Path permissions: {}", config.oidc.http_auth.permissions.len());
        info!(
            "   Credentials providers: {}",
            config.oidc.credentials_providers.len()
        );
        info!("");
    }
}

/// Display startup banner with version information
pub fn display_startup_banner(version: &str) {
    info!("");
    info!("==============================================");
    info!("  oidc-tenancy v{}", version);
    info!("  Multi-tenant OIDC authentication");
    info!("==============================================");
    info!("");
}
