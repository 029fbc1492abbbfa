//! Token state wrapper that tags state with a suffix marker

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{OidcError, Result};
use crate::request::RequestContext;
use crate::tenant::TenantConfig;
use crate::token_state::{AuthorizationCodeTokens, TokenStateManager};

/// Appends a marker to the inner manager's state and requires it back
///
/// The marker is validated before `read` and before `delete`, so foreign or
/// truncated state fails the same way for both.
pub struct MarkedTokenStateManager {
    inner: Arc<dyn TokenStateManager>,
    marker: String,
}

impl MarkedTokenStateManager {
    pub fn new<M: Into<String>>(inner: Arc<dyn TokenStateManager>, marker: M) -> Self {
        Self {
            inner,
            marker: marker.into(),
        }
    }

    fn strip<'a>(&self, state: &'a str) -> Result<&'a str> {
        state.strip_suffix(self.marker.as_str()).ok_or_else(|| {
            OidcError::state_decode(format!("Token state is missing the '{}' marker", self.marker))
        })
    }
}

#[async_trait]
impl TokenStateManager for MarkedTokenStateManager {
    async fn create(
        &self,
        request: &RequestContext,
        tenant: &TenantConfig,
        tokens: &AuthorizationCodeTokens,
    ) -> Result<String> {
        let state = self.inner.create(request, tenant, tokens).await?;
        Ok(format!("{}{}", state, self.marker))
    }

    async fn read(
        &self,
        request: &RequestContext,
        tenant: &TenantConfig,
        state: &str,
    ) -> Result<AuthorizationCodeTokens> {
        let state = self.strip(state)?;
        self.inner.read(request, tenant, state).await
    }

    async fn delete(&self, request: &RequestContext, tenant: &TenantConfig, state: &str) -> Result<()> {
        let state = self.strip(state)?;
        self.inner.delete(request, tenant, state).await
    }
}
