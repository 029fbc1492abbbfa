//! Shared fixtures: RS256 token signer and an in-memory identity provider

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use actix_web::dev::ServiceResponse;
use actix_web::{test, web};
use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, Secret};
use serde_json::{json, Map, Value};

use oidc_tenancy::auth::{MechanismKind, OidcAuthenticator};
use oidc_tenancy::idp::{
    IdentityProviderClient, IdpError, IntrospectionResponse, ProviderMetadata, TokenGrant,
    TokenResponse,
};
use oidc_tenancy::server;
use oidc_tenancy::tenant::TenantConfig;

pub const KEY_ID: &str = "test-key";

pub const SIGNING_KEY_PEM: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/fixtures/signing-key.pem"
));
pub const PUBLIC_KEY_PEM: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/fixtures/signing-key.pub.pem"
));
pub const JWKS_JSON: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/fixtures/jwks.json"
));

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// RS256 token signed with the fixture key
pub fn sign(claims: Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(KEY_ID.to_string());
    let key = EncodingKey::from_rsa_pem(SIGNING_KEY_PEM.as_bytes()).unwrap();
    encode(&header, &claims, &key).unwrap()
}

/// Token valid for five minutes
pub fn token(issuer: &str, subject: &str) -> String {
    token_with_lifetime(issuer, subject, 300)
}

pub fn token_with_lifetime(issuer: &str, subject: &str, lifetime: i64) -> String {
    let iat = now();
    sign(json!({
        "iss": issuer,
        "sub": subject,
        "preferred_username": subject,
        "groups": ["user"],
        "iat": iat,
        "exp": iat + lifetime,
    }))
}

/// ID token issued to `client_id`, valid for five minutes
pub fn id_token(issuer: &str, subject: &str, client_id: &str) -> String {
    let iat = now();
    sign(json!({
        "iss": issuer,
        "aud": client_id,
        "sub": subject,
        "preferred_username": subject,
        "groups": ["user"],
        "iat": iat,
        "exp": iat + 300,
    }))
}

pub fn expired_id_token(issuer: &str, subject: &str, client_id: &str) -> String {
    let iat = now() - 3600;
    sign(json!({
        "iss": issuer,
        "aud": client_id,
        "sub": subject,
        "iat": iat,
        "exp": iat + 60,
    }))
}

/// Identity provider call as seen by [`MockIdentityProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub tenant_id: String,
    pub mechanism: MechanismKind,
    pub endpoint: &'static str,
    pub secret: Option<String>,
}

/// In-memory identity provider serving every tenant from its `auth_server_url`
#[derive(Default)]
pub struct MockIdentityProvider {
    grants: Mutex<HashMap<String, TokenResponse>>,
    active_tokens: Mutex<HashMap<String, Map<String, Value>>>,
    accepted_secret: Option<String>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token requests only succeed with this client secret
    pub fn with_accepted_secret(mut self, secret: &str) -> Self {
        self.accepted_secret = Some(secret.to_string());
        self
    }

    /// Authorization code or refresh token the token endpoint accepts
    pub fn with_grant(self, code: &str, response: TokenResponse) -> Self {
        self.grants
            .lock()
            .unwrap()
            .insert(code.to_string(), response);
        self
    }

    /// Opaque access token the introspection endpoint reports as active
    pub fn with_active_token(self, token: &str, claims: Value) -> Self {
        let claims = match claims {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.active_tokens
            .lock()
            .unwrap()
            .insert(token.to_string(), claims);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, endpoint: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.endpoint == endpoint)
            .collect()
    }

    fn record(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
        endpoint: &'static str,
        secret: Option<&Secret<String>>,
    ) {
        self.calls.lock().unwrap().push(RecordedCall {
            tenant_id: tenant.id().to_string(),
            mechanism,
            endpoint,
            secret: secret.map(|s| s.expose_secret().clone()),
        });
    }

    fn check_secret(&self, secret: Option<&Secret<String>>) -> Result<(), IdpError> {
        match &self.accepted_secret {
            Some(accepted) if secret.map(|s| s.expose_secret()) != Some(accepted) => {
                Err(IdpError::Unauthorized {
                    body: r#"{"error":"unauthorized_client"}"#.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl IdentityProviderClient for MockIdentityProvider {
    async fn metadata(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
    ) -> Result<ProviderMetadata, IdpError> {
        self.record(tenant, mechanism, "metadata", None);
        let base = tenant
            .auth_server_url
            .clone()
            .ok_or_else(|| IdpError::protocol("tenant has no authorization server"))?;
        Ok(ProviderMetadata {
            issuer: Some(base.clone()),
            authorization_endpoint: Some(format!("{}/protocol/openid-connect/auth", base)),
            token_endpoint: Some(format!("{}/protocol/openid-connect/token", base)),
            jwks_uri: Some(format!("{}/protocol/openid-connect/certs", base)),
            introspection_endpoint: Some(format!(
                "{}/protocol/openid-connect/token/introspect",
                base
            )),
            userinfo_endpoint: Some(format!("{}/protocol/openid-connect/userinfo", base)),
            end_session_endpoint: Some(format!("{}/protocol/openid-connect/logout", base)),
        }
        .with_tenant_overrides(tenant))
    }

    async fn token(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
        grant: TokenGrant<'_>,
        secret: Option<Secret<String>>,
    ) -> Result<TokenResponse, IdpError> {
        self.record(tenant, mechanism, "token", secret.as_ref());
        self.check_secret(secret.as_ref())?;
        let key = match grant {
            TokenGrant::AuthorizationCode { code, .. } => code,
            TokenGrant::RefreshToken { refresh_token } => refresh_token,
        };
        self.grants
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| IdpError::Status {
                status: 400,
                body: r#"{"error":"invalid_grant"}"#.to_string(),
            })
    }

    async fn introspect(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
        token: &str,
        secret: Option<Secret<String>>,
    ) -> Result<IntrospectionResponse, IdpError> {
        self.record(tenant, mechanism, "introspect", secret.as_ref());
        self.check_secret(secret.as_ref())?;
        Ok(match self.active_tokens.lock().unwrap().get(token) {
            Some(claims) => IntrospectionResponse {
                active: true,
                claims: claims.clone(),
            },
            None => IntrospectionResponse {
                active: false,
                claims: Map::new(),
            },
        })
    }

    async fn user_info(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
        access_token: &str,
    ) -> Result<Map<String, Value>, IdpError> {
        self.record(tenant, mechanism, "userinfo", None);
        match self.active_tokens.lock().unwrap().get(access_token) {
            Some(claims) => Ok(claims.clone()),
            None => Err(IdpError::Unauthorized {
                body: "invalid token".to_string(),
            }),
        }
    }

    async fn jwks(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
    ) -> Result<JwkSet, IdpError> {
        self.record(tenant, mechanism, "jwks", None);
        serde_json::from_str(JWKS_JSON).map_err(|e| IdpError::protocol(e.to_string()))
    }
}

/// Token endpoint response carrying a freshly signed ID token
pub fn token_response(issuer: &str, subject: &str, client_id: &str) -> TokenResponse {
    TokenResponse {
        access_token: format!("access-{}", subject),
        id_token: Some(id_token(issuer, subject, client_id)),
        refresh_token: Some(format!("refresh-{}", subject)),
        expires_in: Some(300),
        token_type: Some("Bearer".to_string()),
    }
}

/// Routes of the application: `/health` plus the authenticated echo endpoint
pub fn routes(authenticator: OidcAuthenticator) -> impl FnOnce(&mut web::ServiceConfig) {
    let authenticator = Arc::new(authenticator);
    move |cfg| server::configure(cfg, authenticator)
}

/// `(name, value, max-age)` of the response's `Set-Cookie` headers
pub fn set_cookies(response: &ServiceResponse) -> Vec<(String, String, Option<i64>)> {
    response
        .response()
        .cookies()
        .map(|cookie| {
            (
                cookie.name().to_string(),
                cookie.value().to_string(),
                cookie.max_age().map(|age| age.whole_seconds()),
            )
        })
        .collect()
}

pub fn location(response: &ServiceResponse) -> String {
    response
        .headers()
        .get(actix_web::http::header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub async fn body_text(response: ServiceResponse) -> String {
    let bytes = test::read_body(response).await;
    String::from_utf8(bytes.to_vec()).unwrap()
}
