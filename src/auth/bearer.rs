//! OIDC bearer token mechanism

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::identity::SecurityIdentity;
use crate::auth::mechanism::{AuthenticationMechanism, Challenge, MechanismKind, MechanismOutcome};
use crate::auth::verifier::TokenVerifier;
use crate::error::{OidcError, Result};
use crate::request::RequestContext;
use crate::tenant::TenantConfig;

pub struct BearerMechanism {
    verifier: Arc<TokenVerifier>,
}

impl BearerMechanism {
    pub fn new(verifier: Arc<TokenVerifier>) -> Self {
        Self { verifier }
    }

    /// Token presented for the tenant
    ///
    /// A custom `token_header_name` carries either the raw token or
    /// `Bearer <token>`; any other scheme in it is rejected. Without a custom
    /// header only `Authorization: Bearer` is considered, so other schemes are
    /// left to the remaining mechanisms.
    pub fn extract_token(request: &RequestContext, tenant: &TenantConfig) -> Result<Option<String>> {
        let token = match &tenant.token_header_name {
            Some(header) => match request.header(header) {
                Some(value) => match value.trim().split_once(' ') {
                    Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => {
                        Some(token.trim())
                    }
                    Some((scheme, _)) => {
                        return Err(OidcError::auth(format!(
                            "Unsupported authorization scheme '{}' in header '{}'",
                            scheme, header
                        )));
                    }
                    None => Some(value.trim()),
                },
                None => None,
            },
            None => request.bearer_token(),
        };

        match token {
            Some("") => Err(OidcError::auth("Bearer token is empty")),
            Some(token) => Ok(Some(token.to_string())),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl AuthenticationMechanism for BearerMechanism {
    fn kind(&self) -> MechanismKind {
        MechanismKind::Bearer
    }

    fn applies_to(&self, tenant: &TenantConfig) -> bool {
        tenant.tenant_enabled && tenant.application_type.accepts_bearer()
    }

    async fn authenticate(
        &self,
        request: &RequestContext,
        tenant: &TenantConfig,
    ) -> Result<MechanismOutcome> {
        let Some(token) = Self::extract_token(request, tenant)? else {
            return Ok(MechanismOutcome::NoCredentials);
        };

        let claims = self
            .verifier
            .verify_access_token(tenant, MechanismKind::Bearer, &token)
            .await
            .map_err(|rejection| {
                warn!(tenant_id = %tenant.id(), reason = %rejection, "Bearer token rejected");
                OidcError::from(rejection)
            })?;

        let mut identity = SecurityIdentity::from_claims(tenant, MechanismKind::Bearer, claims)?;
        if tenant.user_info_required {
            let user_info = self
                .verifier
                .idp()
                .user_info(tenant, MechanismKind::Bearer, &token)
                .await?;
            identity = identity.with_attribute("userinfo", Value::Object(user_info));
        }

        debug!(
            tenant_id = %tenant.id(),
            principal = %identity.principal,
            "Bearer token accepted"
        );
        Ok(MechanismOutcome::authenticated(identity))
    }

    async fn challenge(
        &self,
        _request: &RequestContext,
        _tenant: &TenantConfig,
    ) -> Result<Option<Challenge>> {
        Ok(Some(Challenge::unauthorized(Some("Bearer".to_string()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom_header_tenant() -> TenantConfig {
        let mut tenant = TenantConfig::new("tenant-1", "http://localhost");
        tenant.token_header_name = Some("Custom-Authorization-1".to_string());
        tenant
    }

    #[test]
    fn custom_header_accepts_raw_and_bearer_tokens() {
        let tenant = custom_header_tenant();

        let request = RequestContext::new("GET", "/").with_header("Custom-Authorization-1", "abc");
        assert_eq!(
            BearerMechanism::extract_token(&request, &tenant).unwrap().as_deref(),
            Some("abc")
        );

        let request =
            RequestContext::new("GET", "/").with_header("Custom-Authorization-1", "Bearer abc");
        assert_eq!(
            BearerMechanism::extract_token(&request, &tenant).unwrap().as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn custom_header_rejects_other_schemes() {
        let tenant = custom_header_tenant();
        let request =
            RequestContext::new("GET", "/").with_header("Custom-Authorization-1", "Basic abc");
        assert!(matches!(
            BearerMechanism::extract_token(&request, &tenant),
            Err(OidcError::AuthenticationFailed { .. })
        ));
    }

    #[test]
    fn standard_header_ignores_other_schemes() {
        let tenant = TenantConfig::new("a", "http://localhost");
        let request = RequestContext::new("GET", "/").with_header("Authorization", "Basic abc");
        assert_eq!(BearerMechanism::extract_token(&request, &tenant).unwrap(), None);

        let request = RequestContext::new("GET", "/").with_header("Authorization", "Bearer ");
        assert!(BearerMechanism::extract_token(&request, &tenant).is_err());
    }
}
