//! Default cookie based token state
//!
//! State is `id___access___refresh` with absent tokens left empty. The token
//! state strategy decides which tokens are kept, and the whole value is sealed
//! with AES-256-GCM when the tenant configures an encryption secret.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{OidcError, Result};
use crate::request::RequestContext;
use crate::tenant::{TenantConfig, TokenStateStrategy};
use crate::token_state::{crypto, AuthorizationCodeTokens, TokenStateManager, TOKEN_DELIMITER};

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTokenStateManager;

impl DefaultTokenStateManager {
    pub fn new() -> Self {
        Self
    }

    fn encode(strategy: TokenStateStrategy, tokens: &AuthorizationCodeTokens) -> String {
        let (access, refresh) = match strategy {
            TokenStateStrategy::KeepAllTokens => {
                (tokens.access_token.as_deref(), tokens.refresh_token.as_deref())
            }
            TokenStateStrategy::IdRefreshTokens => (None, tokens.refresh_token.as_deref()),
            TokenStateStrategy::IdToken => (None, None),
        };
        [
            tokens.id_token.as_str(),
            access.unwrap_or_default(),
            refresh.unwrap_or_default(),
        ]
        .join(TOKEN_DELIMITER)
    }

    fn decode(state: &str) -> Result<AuthorizationCodeTokens> {
        let parts: Vec<&str> = state.split(TOKEN_DELIMITER).collect();
        let [id, access, refresh] = parts.as_slice() else {
            return Err(OidcError::state_decode(format!(
                "Expected 3 token segments, found {}",
                parts.len()
            )));
        };
        if id.is_empty() {
            return Err(OidcError::state_decode("Token state has no ID token"));
        }

        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Ok(AuthorizationCodeTokens {
            id_token: id.to_string(),
            access_token: non_empty(*access),
            refresh_token: non_empty(*refresh),
        })
    }
}

#[async_trait]
impl TokenStateManager for DefaultTokenStateManager {
    async fn create(
        &self,
        _request: &RequestContext,
        tenant: &TenantConfig,
        tokens: &AuthorizationCodeTokens,
    ) -> Result<String> {
        let state = Self::encode(tenant.token_state.strategy, tokens);
        match &tenant.token_state.encryption_secret {
            Some(secret) => crypto::seal(secret, &state),
            None => Ok(state),
        }
    }

    async fn read(
        &self,
        _request: &RequestContext,
        tenant: &TenantConfig,
        state: &str,
    ) -> Result<AuthorizationCodeTokens> {
        match &tenant.token_state.encryption_secret {
            Some(secret) => Self::decode(&crypto::open(secret, state)?),
            None => Self::decode(state),
        }
    }

    async fn delete(
        &self,
        _request: &RequestContext,
        tenant: &TenantConfig,
        _state: &str,
    ) -> Result<()> {
        // Nothing is held server side; clearing the cookie is enough
        debug!(tenant_id = %tenant.id(), "Token state deleted");
        Ok(())
    }
}
