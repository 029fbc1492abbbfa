//! Identity provider client abstraction

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use secrecy::Secret;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::auth::MechanismKind;
use crate::error::OidcError;
use crate::tenant::TenantConfig;

/// Failure talking to the identity provider
#[derive(Debug, Clone, Error)]
pub enum IdpError {
    /// 401 from the provider, usually a stale or wrong client secret
    #[error("identity provider rejected the client credentials: {body}")]
    Unauthorized { body: String },

    #[error("identity provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("identity provider unreachable: {message}")]
    Transport { message: String },

    #[error("invalid identity provider response: {message}")]
    Protocol { message: String },
}

impl IdpError {
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

impl From<IdpError> for OidcError {
    fn from(error: IdpError) -> Self {
        match error {
            IdpError::Unauthorized { body } => OidcError::credential(format!(
                "Identity provider rejected the client credentials: {}",
                body
            )),
            IdpError::Status { status, body } => OidcError::IdentityProviderStatus { status, body },
            IdpError::Transport { message } => OidcError::connection(message),
            IdpError::Protocol { message } => OidcError::auth(message),
        }
    }
}

/// Subset of the OpenID provider metadata used by the mechanisms
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderMetadata {
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub introspection_endpoint: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

impl ProviderMetadata {
    /// Explicitly configured tenant paths take precedence over discovered endpoints
    pub fn with_tenant_overrides(mut self, tenant: &TenantConfig) -> Self {
        let overrides = [
            (&mut self.authorization_endpoint, &tenant.authorization_path),
            (&mut self.token_endpoint, &tenant.token_path),
            (&mut self.jwks_uri, &tenant.jwks_path),
            (&mut self.introspection_endpoint, &tenant.introspection_path),
            (&mut self.userinfo_endpoint, &tenant.user_info_path),
            (&mut self.end_session_endpoint, &tenant.end_session_path),
        ];
        for (endpoint, path) in overrides {
            if let Some(url) = tenant.endpoint_url(path.as_deref()) {
                *endpoint = Some(url);
            }
        }
        if tenant.issuer.is_some() {
            self.issuer = tenant.issuer.clone();
        }
        self
    }
}

/// Token endpoint response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Token introspection response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IntrospectionResponse {
    #[serde(default)]
    pub active: bool,
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

/// Grant presented to the token endpoint
#[derive(Debug, Clone, Copy)]
pub enum TokenGrant<'a> {
    AuthorizationCode {
        code: &'a str,
        redirect_uri: &'a str,
        code_verifier: Option<&'a str>,
    },
    RefreshToken {
        refresh_token: &'a str,
    },
}

/// Calls made to a tenant's identity provider
///
/// `mechanism` identifies the authentication mechanism on whose behalf the
/// call is made so request and response filters can be scoped to it.
#[async_trait]
pub trait IdentityProviderClient: Send + Sync {
    async fn metadata(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
    ) -> Result<ProviderMetadata, IdpError>;

    async fn token(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
        grant: TokenGrant<'_>,
        secret: Option<Secret<String>>,
    ) -> Result<TokenResponse, IdpError>;

    async fn introspect(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
        token: &str,
        secret: Option<Secret<String>>,
    ) -> Result<IntrospectionResponse, IdpError>;

    async fn user_info(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
        access_token: &str,
    ) -> Result<Map<String, Value>, IdpError>;

    async fn jwks(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
    ) -> Result<JwkSet, IdpError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_paths_override_discovered_endpoints() {
        let mut tenant = TenantConfig::new("a", "http://localhost:8180/realms/a");
        tenant.token_path = Some("custom/token".to_string());
        tenant.issuer = Some("my_issuer".to_string());

        let discovered = ProviderMetadata {
            issuer: Some("http://localhost:8180/realms/a".to_string()),
            token_endpoint: Some("http://localhost:8180/realms/a/token".to_string()),
            jwks_uri: Some("http://localhost:8180/realms/a/certs".to_string()),
            ..Default::default()
        };

        let metadata = discovered.with_tenant_overrides(&tenant);
        assert_eq!(
            metadata.token_endpoint.as_deref(),
            Some("http://localhost:8180/realms/a/custom/token")
        );
        assert_eq!(metadata.jwks_uri.as_deref(), Some("http://localhost:8180/realms/a/certs"));
        assert_eq!(metadata.issuer.as_deref(), Some("my_issuer"));
    }

    #[test]
    fn idp_errors_map_to_taxonomy() {
        let err: OidcError = IdpError::Unauthorized { body: "stale".into() }.into();
        assert!(matches!(err, OidcError::CredentialFailure { .. }));

        let err: OidcError = IdpError::Status { status: 400, body: "Client not found".into() }.into();
        match err {
            OidcError::IdentityProviderStatus { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "Client not found");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
