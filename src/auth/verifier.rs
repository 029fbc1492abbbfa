//! Token verification against a tenant's keys or identity provider

use std::fmt;
use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use tracing::debug;

use crate::auth::mechanism::MechanismKind;
use crate::credentials::ClientSecretResolver;
use crate::error::OidcError;
use crate::idp::{IdentityProviderClient, IdpError};
use crate::tenant::TenantConfig;

/// Issuer value that disables the issuer check
const ANY_ISSUER: &str = "any";

/// Audience value that disables the audience check
const ANY_AUDIENCE: &str = "any";

/// Why a token was not accepted
#[derive(Debug)]
pub enum TokenRejection {
    Expired,
    Invalid(String),
    /// The identity provider could not be consulted
    Provider(OidcError),
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenRejection::Expired => write!(f, "Token has expired"),
            TokenRejection::Invalid(reason) => write!(f, "Token is invalid: {}", reason),
            TokenRejection::Provider(error) => write!(f, "{}", error),
        }
    }
}

impl From<TokenRejection> for OidcError {
    fn from(rejection: TokenRejection) -> Self {
        match rejection {
            TokenRejection::Provider(error) => error,
            other => OidcError::auth(other.to_string()),
        }
    }
}

impl From<OidcError> for TokenRejection {
    fn from(error: OidcError) -> Self {
        TokenRejection::Provider(error)
    }
}

/// Verifies JWTs locally and opaque tokens remotely
pub struct TokenVerifier {
    idp: Arc<dyn IdentityProviderClient>,
    secrets: ClientSecretResolver,
}

impl TokenVerifier {
    pub fn new(idp: Arc<dyn IdentityProviderClient>, secrets: ClientSecretResolver) -> Self {
        Self { idp, secrets }
    }

    pub fn idp(&self) -> &Arc<dyn IdentityProviderClient> {
        &self.idp
    }

    pub fn secrets(&self) -> &ClientSecretResolver {
        &self.secrets
    }

    /// Verify an access token, JWT or opaque, returning its claims
    pub async fn verify_access_token(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
        token: &str,
    ) -> std::result::Result<Map<String, Value>, TokenRejection> {
        if is_jwt(token) {
            return self.verify_jwt(tenant, mechanism, token).await;
        }

        if tenant.token.verify_access_token_with_user_info {
            debug!(tenant_id = %tenant.id(), "Verifying opaque token with UserInfo");
            return self
                .idp
                .user_info(tenant, mechanism, token)
                .await
                .map_err(|e| match e {
                    IdpError::Unauthorized { .. } => {
                        TokenRejection::Invalid("rejected by the UserInfo endpoint".to_string())
                    }
                    other => TokenRejection::Provider(other.into()),
                });
        }

        debug!(tenant_id = %tenant.id(), "Introspecting opaque token");
        let introspection = self
            .secrets
            .with_client_secret(tenant, |secret| {
                self.idp.introspect(tenant, mechanism, token, secret)
            })
            .await?;
        if !introspection.active {
            return Err(TokenRejection::Invalid("token is not active".to_string()));
        }
        if let Some(exp) = introspection.claims.get("exp").and_then(Value::as_u64) {
            let now = chrono::Utc::now().timestamp().max(0) as u64;
            if exp.saturating_add(tenant.token.lifespan_grace) < now {
                return Err(TokenRejection::Expired);
            }
        }
        Ok(introspection.claims)
    }

    /// Verify a signed access token JWT; the audience is checked only when configured
    pub async fn verify_jwt(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
        token: &str,
    ) -> std::result::Result<Map<String, Value>, TokenRejection> {
        self.verify_signed(tenant, mechanism, token, tenant.token.audience.clone())
            .await
    }

    /// Verify an ID token, which must be issued to this client unless an
    /// audience is configured explicitly
    pub async fn verify_id_token(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
        token: &str,
    ) -> std::result::Result<Map<String, Value>, TokenRejection> {
        self.verify_signed(tenant, mechanism, token, id_token_audience(tenant)?)
            .await
    }

    async fn verify_signed(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
        token: &str,
        audience: Vec<String>,
    ) -> std::result::Result<Map<String, Value>, TokenRejection> {
        let header =
            decode_header(token).map_err(|e| TokenRejection::Invalid(e.to_string()))?;
        if matches!(header.alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(TokenRejection::Invalid(
                "symmetric signature algorithms are not accepted".to_string(),
            ));
        }
        let key = self.decoding_key(tenant, mechanism, header.kid.as_deref()).await?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = tenant.token.lifespan_grace;
        match tenant.expected_issuer() {
            Some(issuer) if issuer != ANY_ISSUER => validation.set_issuer(&[issuer]),
            _ => {}
        }
        if audience.is_empty() || audience.iter().any(|aud| aud == ANY_AUDIENCE) {
            validation.validate_aud = false;
        } else {
            validation.set_audience(audience.as_slice());
        }

        decode::<Map<String, Value>>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenRejection::Expired,
                _ => TokenRejection::Invalid(e.to_string()),
            })
    }

    async fn decoding_key(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
        kid: Option<&str>,
    ) -> std::result::Result<DecodingKey, TokenRejection> {
        if let Some(pem) = &tenant.public_key {
            return DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
                TokenRejection::Provider(OidcError::config(format!(
                    "Tenant '{}': invalid public key: {}",
                    tenant.id(),
                    e
                )))
            });
        }

        let jwks = self
            .idp
            .jwks(tenant, mechanism)
            .await
            .map_err(|e| TokenRejection::Provider(e.into()))?;
        let jwk = match kid {
            Some(kid) => jwks.find(kid),
            None if jwks.keys.len() == 1 => jwks.keys.first(),
            None => None,
        }
        .ok_or_else(|| TokenRejection::Invalid("no matching key in the JWKS".to_string()))?;

        DecodingKey::from_jwk(jwk).map_err(|e| TokenRejection::Invalid(e.to_string()))
    }
}

/// Configured audience, else the tenant's client id
fn id_token_audience(tenant: &TenantConfig) -> std::result::Result<Vec<String>, TokenRejection> {
    if !tenant.token.audience.is_empty() {
        return Ok(tenant.token.audience.clone());
    }
    tenant
        .client_id
        .clone()
        .map(|client_id| vec![client_id])
        .ok_or_else(|| {
            TokenRejection::Provider(OidcError::config(format!(
                "Tenant '{}' has no client_id to verify ID token audiences against",
                tenant.id()
            )))
        })
}

/// Whether the token has the three segment JWS compact form
pub fn is_jwt(token: &str) -> bool {
    token.split('.').count() == 3
}
