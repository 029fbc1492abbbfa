//! Per-tenant OIDC client configuration
//!
//! A [`TenantConfig`] describes one independent client/issuer relationship.
//! Named tenants live under `oidc.tenants`, the default tenant under
//! `oidc.default_tenant`. Once validated and registered a tenant config is
//! immutable and shared behind an `Arc`.

use std::collections::BTreeMap;
use std::fmt;

use actix_web::http::header::HeaderName;
use once_cell::sync::Lazy;
use regex::Regex;
use secrecy::Secret;
use serde::{Deserialize, Serialize};

use crate::config::secret::option_secret_string;
use crate::error::{OidcError, Result};

/// Tenant id used for the default tenant
pub const DEFAULT_TENANT_ID: &str = "Default";

static TENANT_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid tenant id regex"));

/// Kind of application a tenant serves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplicationType {
    /// Bearer token protected service
    #[default]
    Service,
    /// Browser application using the authorization code flow
    WebApp,
    /// Bearer tokens when present, code flow otherwise
    Hybrid,
}

impl ApplicationType {
    pub fn accepts_bearer(&self) -> bool {
        matches!(self, ApplicationType::Service | ApplicationType::Hybrid)
    }

    pub fn uses_code_flow(&self) -> bool {
        matches!(self, ApplicationType::WebApp | ApplicationType::Hybrid)
    }
}

impl fmt::Display for ApplicationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationType::Service => write!(f, "service"),
            ApplicationType::WebApp => write!(f, "web-app"),
            ApplicationType::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// How the client secret is sent to the token and introspection endpoints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// `client_secret_basic`
    #[default]
    Basic,
    /// `client_secret_post`
    Post,
}

/// Indirection to a secret held by a named credentials provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderReference {
    /// Registered credentials provider name
    pub name: String,
    /// Keyring within the provider; defaults to the tenant id
    #[serde(default)]
    pub keyring_name: Option<String>,
    /// Key within the keyring
    #[serde(default = "default_secret_key")]
    pub key: String,
}

fn default_secret_key() -> String {
    "client-secret".to_string()
}

/// Client credentials: a literal secret or a provider reference
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCredentials {
    #[serde(default, with = "option_secret_string", skip_serializing_if = "Option::is_none")]
    pub secret: Option<Secret<String>>,
    #[serde(default)]
    pub provider: Option<ProviderReference>,
    #[serde(default)]
    pub method: ClientAuthMethod,
}

/// Code flow settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationSettings {
    /// Relative redirect path registered with the provider; the request path when unset
    #[serde(default)]
    pub redirect_path: Option<String>,
    /// Return to the originally requested path once the code is exchanged
    #[serde(default = "default_true")]
    pub restore_path_after_redirect: bool,
    #[serde(default = "default_cookie_path")]
    pub cookie_path: String,
    /// Scopes requested in addition to `openid`
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Extra authorization request parameters
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
}

impl Default for AuthenticationSettings {
    fn default() -> Self {
        Self {
            redirect_path: None,
            restore_path_after_redirect: true,
            cookie_path: default_cookie_path(),
            scopes: Vec::new(),
            extra_params: BTreeMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cookie_path() -> String {
    "/".to_string()
}

/// Token verification settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenSettings {
    /// Claim holding the principal name
    #[serde(default)]
    pub principal_claim: Option<String>,
    /// Accepted audiences; audience is not checked when empty
    #[serde(default)]
    pub audience: Vec<String>,
    /// Clock skew allowance in seconds, also added to the session cookie max-age
    #[serde(default)]
    pub lifespan_grace: u64,
    /// Refresh an expired code flow session with the refresh token
    #[serde(default)]
    pub refresh_expired: bool,
    /// Verify opaque access tokens by calling the UserInfo endpoint
    #[serde(default)]
    pub verify_access_token_with_user_info: bool,
}

/// RP-initiated logout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogoutSettings {
    /// Application path that triggers logout
    #[serde(default)]
    pub path: Option<String>,
    /// Path the provider sends the user back to after logout
    #[serde(default)]
    pub post_logout_path: Option<String>,
}

/// Which code flow tokens are kept in the session cookie
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenStateStrategy {
    #[default]
    KeepAllTokens,
    IdToken,
    IdRefreshTokens,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenStateSettings {
    #[serde(default)]
    pub strategy: TokenStateStrategy,
    /// Encrypts the session cookie with AES-256-GCM when set
    #[serde(default, with = "option_secret_string", skip_serializing_if = "Option::is_none")]
    pub encryption_secret: Option<Secret<String>>,
}

/// Configuration of a single OIDC tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Tenant id; named tenants take their map key when unset
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default = "default_true")]
    pub tenant_enabled: bool,
    #[serde(default)]
    pub auth_server_url: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub credentials: ClientCredentials,
    #[serde(default)]
    pub application_type: ApplicationType,
    /// Custom header carrying the bearer token; also used for header based tenant resolution
    #[serde(default)]
    pub token_header_name: Option<String>,
    /// Expected issuer; `any` disables the issuer check
    #[serde(default)]
    pub issuer: Option<String>,
    /// Request path globs routed to this tenant
    #[serde(default)]
    pub tenant_paths: Vec<String>,
    #[serde(default)]
    pub user_info_required: bool,
    #[serde(default)]
    pub pkce_required: bool,
    #[serde(default = "default_true")]
    pub discovery_enabled: bool,
    #[serde(default)]
    pub authorization_path: Option<String>,
    #[serde(default)]
    pub token_path: Option<String>,
    #[serde(default)]
    pub jwks_path: Option<String>,
    #[serde(default)]
    pub introspection_path: Option<String>,
    #[serde(default)]
    pub user_info_path: Option<String>,
    #[serde(default)]
    pub end_session_path: Option<String>,
    /// PEM encoded RSA public key used instead of the provider's JWKS
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub authentication: AuthenticationSettings,
    #[serde(default)]
    pub token: TokenSettings,
    #[serde(default)]
    pub logout: LogoutSettings,
    #[serde(default)]
    pub token_state: TokenStateSettings,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            tenant_id: None,
            tenant_enabled: true,
            auth_server_url: None,
            client_id: None,
            credentials: ClientCredentials::default(),
            application_type: ApplicationType::default(),
            token_header_name: None,
            issuer: None,
            tenant_paths: Vec::new(),
            user_info_required: false,
            pkce_required: false,
            discovery_enabled: true,
            authorization_path: None,
            token_path: None,
            jwks_path: None,
            introspection_path: None,
            user_info_path: None,
            end_session_path: None,
            public_key: None,
            authentication: AuthenticationSettings::default(),
            token: TokenSettings::default(),
            logout: LogoutSettings::default(),
            token_state: TokenStateSettings::default(),
        }
    }
}

impl TenantConfig {
    /// Minimal enabled tenant pointing at an authorization server
    pub fn new<I: Into<String>, U: Into<String>>(tenant_id: I, auth_server_url: U) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            auth_server_url: Some(auth_server_url.into()),
            ..Default::default()
        }
    }

    pub fn id(&self) -> &str {
        self.tenant_id.as_deref().unwrap_or(DEFAULT_TENANT_ID)
    }

    pub fn is_default(&self) -> bool {
        self.id() == DEFAULT_TENANT_ID
    }

    /// Issuer this tenant's tokens are expected to carry
    pub fn expected_issuer(&self) -> Option<&str> {
        self.issuer
            .as_deref()
            .or(self.auth_server_url.as_deref())
            .map(|issuer| issuer.trim_end_matches('/'))
    }

    /// Resolve a configured endpoint path against the authorization server URL
    pub fn endpoint_url(&self, path: Option<&str>) -> Option<String> {
        let path = path?;
        if path.starts_with("http://") || path.starts_with("https://") {
            return Some(path.to_string());
        }
        let base = self.auth_server_url.as_deref()?.trim_end_matches('/');
        Some(format!("{}/{}", base, path.trim_start_matches('/')))
    }

    /// Validate the tenant, failing fast on invalid combinations
    pub fn validate(&self) -> Result<()> {
        let id = self.id();
        if !TENANT_ID_PATTERN.is_match(id) {
            return Err(OidcError::config(format!(
                "Tenant id '{}' must contain only alphanumeric characters, dots, underscores and hyphens",
                id
            )));
        }

        if !self.tenant_enabled {
            return Ok(());
        }

        match (&self.auth_server_url, &self.public_key) {
            (None, None) => {
                return Err(OidcError::config(format!(
                    "Tenant '{}': 'auth_server_url' is required unless 'public_key' is set",
                    id
                )));
            }
            (Some(server_url), _) => {
                url::Url::parse(server_url).map_err(|e| {
                    OidcError::config(format!(
                        "Tenant '{}': invalid 'auth_server_url' '{}': {}",
                        id, server_url, e
                    ))
                })?;
            }
            _ => {}
        }

        if self.public_key.is_some() && self.application_type != ApplicationType::Service {
            return Err(OidcError::config(format!(
                "Tenant '{}': 'public_key' verification is only supported for service applications",
                id
            )));
        }

        if self.token.verify_access_token_with_user_info && !self.user_info_required {
            return Err(OidcError::config(format!(
                "Tenant '{}': UserInfo is not required but 'token.verify_access_token_with_user_info' is enabled",
                id
            )));
        }

        if self.user_info_required && !self.discovery_enabled && self.user_info_path.is_none() {
            return Err(OidcError::config(format!(
                "Tenant '{}': UserInfo is required but 'user_info_path' is not configured and discovery is disabled",
                id
            )));
        }

        if self.application_type.uses_code_flow() {
            if self.client_id.is_none() {
                return Err(OidcError::config(format!(
                    "Tenant '{}': 'client_id' is required for {} applications",
                    id, self.application_type
                )));
            }
            if !self.discovery_enabled
                && (self.authorization_path.is_none() || self.token_path.is_none())
            {
                return Err(OidcError::config(format!(
                    "Tenant '{}': 'authorization_path' and 'token_path' are required when discovery is disabled",
                    id
                )));
            }
        } else {
            if self.token.refresh_expired {
                return Err(OidcError::config(format!(
                    "Tenant '{}': 'token.refresh_expired' is only supported for web-app and hybrid applications",
                    id
                )));
            }
            if self.logout.path.is_some() {
                return Err(OidcError::config(format!(
                    "Tenant '{}': 'logout.path' is only supported for web-app and hybrid applications",
                    id
                )));
            }
        }

        if self.token_state.strategy != TokenStateStrategy::KeepAllTokens && self.user_info_required {
            return Err(OidcError::config(format!(
                "Tenant '{}': UserInfo requires the 'keep-all-tokens' token state strategy",
                id
            )));
        }

        if let Some(secret) = &self.token_state.encryption_secret {
            use secrecy::ExposeSecret;
            if secret.expose_secret().len() < 32 {
                return Err(OidcError::config(format!(
                    "Tenant '{}': token state encryption secret must be at least 32 characters",
                    id
                )));
            }
        }

        if self.credentials.secret.is_some() && self.credentials.provider.is_some() {
            return Err(OidcError::config(format!(
                "Tenant '{}': configure either a client secret or a credentials provider, not both",
                id
            )));
        }
        if let Some(provider) = &self.credentials.provider {
            if provider.name.is_empty() || provider.key.is_empty() {
                return Err(OidcError::config(format!(
                    "Tenant '{}': credentials provider name and key cannot be empty",
                    id
                )));
            }
        }

        if let Some(header) = &self.token_header_name {
            HeaderName::from_bytes(header.as_bytes()).map_err(|_| {
                OidcError::config(format!(
                    "Tenant '{}': invalid 'token_header_name' '{}'",
                    id, header
                ))
            })?;
        }

        for path in self
            .logout
            .path
            .iter()
            .chain(self.authentication.redirect_path.iter())
        {
            if !path.starts_with('/') {
                return Err(OidcError::config(format!(
                    "Tenant '{}': path '{}' must start with '/'",
                    id, path
                )));
            }
        }

        Ok(())
    }
}
