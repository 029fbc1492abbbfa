//! OIDC authorization code flow mechanism
//!
//! Handles the redirect to the provider, the callback with the code exchange,
//! the session cookie carrying the token state, silent refresh of expired
//! sessions and RP-initiated logout.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::auth::identity::SecurityIdentity;
use crate::auth::mechanism::{AuthenticationMechanism, Challenge, MechanismKind, MechanismOutcome};
use crate::auth::verifier::{TokenRejection, TokenVerifier};
use crate::error::{OidcError, Result};
use crate::idp::TokenGrant;
use crate::request::RequestContext;
use crate::session::{
    session_cookie_name, state_cookie_name, CookieDirective, SessionState, STATE_COOKIE_MAX_AGE,
};
use crate::tenant::TenantConfig;
use crate::token_state::{AuthorizationCodeTokens, TokenStateManager, TOKEN_DELIMITER};

const MECHANISM: MechanismKind = MechanismKind::CodeFlow;

/// Session lifetime used when the ID token lacks `iat` or `exp`
const FALLBACK_SESSION_AGE: i64 = 5 * 60;

/// Query parameters removed from the URL once the code is exchanged
const CALLBACK_PARAMS: [&str; 3] = ["code", "state", "session_state"];

/// Content of the `q_auth` state cookie
#[derive(Debug, Clone, PartialEq, Eq)]
struct AuthorizationState {
    state: String,
    restore_path: Option<String>,
    code_verifier: Option<String>,
}

impl AuthorizationState {
    fn encode(&self) -> String {
        if self.restore_path.is_none() && self.code_verifier.is_none() {
            return self.state.clone();
        }
        [
            self.state.as_str(),
            self.restore_path.as_deref().unwrap_or_default(),
            self.code_verifier.as_deref().unwrap_or_default(),
        ]
        .join(TOKEN_DELIMITER)
    }

    fn decode(value: &str) -> Result<Self> {
        let parts: Vec<&str> = value.split(TOKEN_DELIMITER).collect();
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        match parts.as_slice() {
            [state] if !state.is_empty() => Ok(Self {
                state: state.to_string(),
                restore_path: None,
                code_verifier: None,
            }),
            [state, path, verifier] if !state.is_empty() => Ok(Self {
                state: state.to_string(),
                restore_path: non_empty(*path),
                code_verifier: non_empty(*verifier),
            }),
            _ => Err(OidcError::auth("Malformed authorization state cookie")),
        }
    }
}

/// PKCE verifier and its S256 challenge
fn pkce_pair() -> (String, String) {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    (verifier, challenge)
}

/// Request path and query without the callback parameters
fn strip_callback_params(request: &RequestContext) -> String {
    let Some(query) = request.query.as_deref() else {
        return request.path.clone();
    };
    let kept: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| !CALLBACK_PARAMS.contains(&&**key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        return request.path.clone();
    }
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(kept)
        .finish();
    format!("{}?{}", request.path, query)
}

fn claim_i64(claims: &Map<String, Value>, name: &str) -> Option<i64> {
    claims.get(name).and_then(Value::as_i64)
}

pub struct CodeFlowMechanism {
    verifier: Arc<TokenVerifier>,
    token_state: Arc<dyn TokenStateManager>,
}

impl CodeFlowMechanism {
    pub fn new(verifier: Arc<TokenVerifier>, token_state: Arc<dyn TokenStateManager>) -> Self {
        Self {
            verifier,
            token_state,
        }
    }

    fn redirect_uri(request: &RequestContext, tenant: &TenantConfig) -> String {
        let path = tenant
            .authentication
            .redirect_path
            .as_deref()
            .unwrap_or(&request.path);
        request.absolute_url(path)
    }

    fn clear_session(request: &RequestContext, tenant: &TenantConfig) -> CookieDirective {
        CookieDirective::remove(
            session_cookie_name(tenant.id()),
            &tenant.authentication.cookie_path,
            request,
        )
    }

    /// Session cookie for freshly obtained tokens
    ///
    /// The cookie lives as long as the ID token (`exp - iat`) plus the
    /// tenant's lifespan grace.
    async fn session_cookie(
        &self,
        request: &RequestContext,
        tenant: &TenantConfig,
        tokens: &AuthorizationCodeTokens,
        id_claims: &Map<String, Value>,
    ) -> Result<CookieDirective> {
        let value = self.token_state.create(request, tenant, tokens).await?;
        let lifetime = match (claim_i64(id_claims, "exp"), claim_i64(id_claims, "iat")) {
            (Some(exp), Some(iat)) if exp > iat => exp - iat,
            _ => FALLBACK_SESSION_AGE,
        };
        let max_age = lifetime + tenant.token.lifespan_grace as i64;
        Ok(CookieDirective::set(
            session_cookie_name(tenant.id()),
            value,
            max_age,
            tenant,
            request,
        ))
    }

    async fn identity(
        &self,
        tenant: &TenantConfig,
        tokens: &AuthorizationCodeTokens,
        id_claims: Map<String, Value>,
    ) -> Result<SecurityIdentity> {
        let mut identity = SecurityIdentity::from_claims(tenant, MECHANISM, id_claims)?;
        if tenant.user_info_required {
            let access_token = tokens
                .access_token
                .as_deref()
                .ok_or_else(|| OidcError::auth("UserInfo requires an access token in the session"))?;
            let user_info = self
                .verifier
                .idp()
                .user_info(tenant, MECHANISM, access_token)
                .await?;
            identity = identity.with_attribute("userinfo", Value::Object(user_info));
        }
        Ok(identity)
    }

    /// Challenge again, clearing the given cookies on the way
    async fn restart(
        &self,
        request: &RequestContext,
        tenant: &TenantConfig,
        cookies: Vec<CookieDirective>,
    ) -> Result<MechanismOutcome> {
        let challenge = self
            .challenge(request, tenant)
            .await?
            .unwrap_or_else(|| Challenge::unauthorized(None));
        Ok(MechanismOutcome::Respond(challenge.with_cookies(cookies)))
    }

    async fn logout(
        &self,
        request: &RequestContext,
        tenant: &TenantConfig,
        session: &SessionState,
    ) -> Result<MechanismOutcome> {
        let tokens = self
            .token_state
            .read(request, tenant, &session.encoded_token_blob)
            .await
            .ok();
        if let Err(e) = self
            .token_state
            .delete(request, tenant, &session.encoded_token_blob)
            .await
        {
            debug!(tenant_id = %tenant.id(), error = %e, "Token state could not be deleted on logout");
        }

        let post_logout_uri = tenant
            .logout
            .post_logout_path
            .as_deref()
            .map(|path| request.absolute_url(path));

        let metadata = self.verifier.idp().metadata(tenant, MECHANISM).await?;
        let location = match metadata.end_session_endpoint {
            Some(endpoint) => {
                let mut params = Vec::new();
                if let Some(tokens) = &tokens {
                    params.push(("id_token_hint", tokens.id_token.clone()));
                }
                if let Some(uri) = &post_logout_uri {
                    params.push(("post_logout_redirect_uri", uri.clone()));
                }
                Url::parse_with_params(&endpoint, params)
                    .map_err(|e| OidcError::auth(format!("Invalid end session endpoint: {}", e)))?
                    .to_string()
            }
            None => post_logout_uri.unwrap_or_else(|| "/".to_string()),
        };

        info!(tenant_id = %tenant.id(), "Session logged out");
        Ok(MechanismOutcome::Respond(
            Challenge::redirect(location).with_cookies([Self::clear_session(request, tenant)]),
        ))
    }

    async fn complete(
        &self,
        request: &RequestContext,
        tenant: &TenantConfig,
        state_cookie: &str,
    ) -> Result<MechanismOutcome> {
        if let Some(error) = request.query_param("error") {
            return Err(OidcError::auth(format!(
                "Authorization request failed: {}",
                error
            )));
        }
        let code = request
            .query_param("code")
            .ok_or_else(|| OidcError::auth("Callback is missing the authorization code"))?;
        let saved = AuthorizationState::decode(state_cookie)?;
        if request.query_param("state").as_deref() != Some(saved.state.as_str()) {
            return Err(OidcError::auth(
                "State parameter does not match the state cookie",
            ));
        }

        let redirect_uri = Self::redirect_uri(request, tenant);
        let grant = TokenGrant::AuthorizationCode {
            code: &code,
            redirect_uri: &redirect_uri,
            code_verifier: saved.code_verifier.as_deref(),
        };
        let idp = self.verifier.idp();
        let response = self
            .verifier
            .secrets()
            .with_client_secret(tenant, |secret| idp.token(tenant, MECHANISM, grant, secret))
            .await?;

        let id_token = response
            .id_token
            .ok_or_else(|| OidcError::auth("Token response has no ID token"))?;
        let claims = self
            .verifier
            .verify_id_token(tenant, MECHANISM, &id_token)
            .await
            .map_err(OidcError::from)?;

        let tokens = AuthorizationCodeTokens {
            id_token,
            access_token: Some(response.access_token),
            refresh_token: response.refresh_token,
        };
        let session = self.session_cookie(request, tenant, &tokens, &claims).await?;
        let clear_state = CookieDirective::remove(
            state_cookie_name(tenant.id()),
            &tenant.authentication.cookie_path,
            request,
        );

        let location = match saved.restore_path {
            Some(path) if tenant.authentication.restore_path_after_redirect => path,
            _ => strip_callback_params(request),
        };
        info!(tenant_id = %tenant.id(), "Authorization code flow completed");
        Ok(MechanismOutcome::Respond(
            Challenge::redirect(location).with_cookies([session, clear_state]),
        ))
    }

    async fn refresh(
        &self,
        request: &RequestContext,
        tenant: &TenantConfig,
        expired: &AuthorizationCodeTokens,
        refresh_token: &str,
    ) -> Result<MechanismOutcome> {
        let grant = TokenGrant::RefreshToken { refresh_token };
        let idp = self.verifier.idp();
        let response = self
            .verifier
            .secrets()
            .with_client_secret(tenant, |secret| idp.token(tenant, MECHANISM, grant, secret))
            .await?;

        let id_token = response
            .id_token
            .ok_or_else(|| OidcError::auth("Refresh response has no ID token"))?;
        let claims = self
            .verifier
            .verify_id_token(tenant, MECHANISM, &id_token)
            .await
            .map_err(OidcError::from)?;

        let tokens = AuthorizationCodeTokens {
            id_token,
            access_token: Some(response.access_token),
            refresh_token: response
                .refresh_token
                .or_else(|| expired.refresh_token.clone()),
        };
        let cookie = self.session_cookie(request, tenant, &tokens, &claims).await?;
        let identity = self.identity(tenant, &tokens, claims).await?;

        debug!(tenant_id = %tenant.id(), "Expired session refreshed");
        Ok(MechanismOutcome::Authenticated {
            identity,
            cookies: vec![cookie],
        })
    }
}

#[async_trait]
impl AuthenticationMechanism for CodeFlowMechanism {
    fn kind(&self) -> MechanismKind {
        MECHANISM
    }

    fn applies_to(&self, tenant: &TenantConfig) -> bool {
        tenant.tenant_enabled && tenant.application_type.uses_code_flow()
    }

    async fn authenticate(
        &self,
        request: &RequestContext,
        tenant: &TenantConfig,
    ) -> Result<MechanismOutcome> {
        let session = SessionState::for_tenant(request, tenant.id());

        if let (Some(session), Some(path)) = (&session, &tenant.logout.path) {
            if &request.path == path {
                return self.logout(request, tenant, session).await;
            }
        }

        let is_callback = request.query_param("state").is_some()
            && (request.query_param("code").is_some() || request.query_param("error").is_some());
        if is_callback {
            match request.cookie(&state_cookie_name(tenant.id())) {
                Some(state_cookie) => return self.complete(request, tenant, state_cookie).await,
                None => debug!(
                    tenant_id = %tenant.id(),
                    "Callback parameters without a state cookie, ignoring them"
                ),
            }
        }

        let Some(session) = session else {
            return Ok(MechanismOutcome::NoCredentials);
        };

        let tokens = match self
            .token_state
            .read(request, tenant, &session.encoded_token_blob)
            .await
        {
            Ok(tokens) => tokens,
            Err(e @ OidcError::StateDecodeFailure { .. }) => {
                warn!(tenant_id = %tenant.id(), error = %e, "Discarding unreadable session cookie");
                return self
                    .restart(request, tenant, vec![Self::clear_session(request, tenant)])
                    .await;
            }
            Err(e) => return Err(e),
        };

        match self.verifier.verify_id_token(tenant, MECHANISM, &tokens.id_token).await {
            Ok(claims) => {
                let identity = self.identity(tenant, &tokens, claims).await?;
                Ok(MechanismOutcome::authenticated(identity))
            }
            Err(TokenRejection::Expired) => {
                if tenant.token.refresh_expired {
                    if let Some(refresh_token) = tokens.refresh_token.as_deref() {
                        match self.refresh(request, tenant, &tokens, refresh_token).await {
                            Ok(outcome) => return Ok(outcome),
                            Err(e) => {
                                warn!(tenant_id = %tenant.id(), error = %e, "Session refresh failed")
                            }
                        }
                    }
                }
                debug!(tenant_id = %tenant.id(), "Session expired, re-authenticating");
                self.restart(request, tenant, vec![Self::clear_session(request, tenant)])
                    .await
            }
            Err(rejection) => Err(rejection.into()),
        }
    }

    async fn challenge(
        &self,
        request: &RequestContext,
        tenant: &TenantConfig,
    ) -> Result<Option<Challenge>> {
        let client_id = tenant.client_id.as_deref().ok_or_else(|| {
            OidcError::config(format!("Tenant '{}' has no client_id", tenant.id()))
        })?;
        let metadata = self.verifier.idp().metadata(tenant, MECHANISM).await?;
        let endpoint = metadata.authorization_endpoint.ok_or_else(|| {
            OidcError::auth(format!(
                "Tenant '{}' has no authorization endpoint",
                tenant.id()
            ))
        })?;

        let mut scopes = vec!["openid".to_string()];
        for scope in &tenant.authentication.scopes {
            if !scopes.contains(scope) {
                scopes.push(scope.clone());
            }
        }

        let pkce = tenant.pkce_required.then(pkce_pair);
        let state = AuthorizationState {
            state: Uuid::new_v4().to_string(),
            restore_path: tenant
                .authentication
                .redirect_path
                .as_ref()
                .filter(|_| tenant.authentication.restore_path_after_redirect)
                .map(|_| request.path_and_query()),
            code_verifier: pkce.as_ref().map(|(verifier, _)| verifier.clone()),
        };

        let mut params = vec![
            ("response_type".to_string(), "code".to_string()),
            ("client_id".to_string(), client_id.to_string()),
            ("scope".to_string(), scopes.join(" ")),
            ("redirect_uri".to_string(), Self::redirect_uri(request, tenant)),
            ("state".to_string(), state.state.clone()),
        ];
        if let Some((_, challenge)) = &pkce {
            params.push(("code_challenge".to_string(), challenge.clone()));
            params.push(("code_challenge_method".to_string(), "S256".to_string()));
        }
        params.extend(
            tenant
                .authentication
                .extra_params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        let location = Url::parse_with_params(&endpoint, &params)
            .map_err(|e| OidcError::auth(format!("Invalid authorization endpoint: {}", e)))?;

        debug!(tenant_id = %tenant.id(), "Redirecting to the authorization endpoint");
        Ok(Some(Challenge::Redirect {
            location: location.to_string(),
            cookies: vec![CookieDirective::set(
                state_cookie_name(tenant.id()),
                state.encode(),
                STATE_COOKIE_MAX_AGE,
                tenant,
                request,
            )],
        }))
    }
}
