//! Code flow token state management
//!
//! A [`TokenStateManager`] turns the tokens returned by a code exchange into
//! the opaque value of the session cookie and back. Implementations must only
//! accept state they created themselves and fail with
//! [`OidcError::StateDecodeFailure`](crate::error::OidcError) otherwise.

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;
use crate::request::RequestContext;
use crate::tenant::TenantConfig;

pub mod crypto;
pub mod default;
pub mod marked;

pub use default::DefaultTokenStateManager;
pub use marked::MarkedTokenStateManager;

/// Delimiter between tokens in the default state format
pub const TOKEN_DELIMITER: &str = "___";

/// Tokens obtained by an authorization code exchange
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationCodeTokens {
    pub id_token: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl AuthorizationCodeTokens {
    pub fn new<I: Into<String>>(id_token: I) -> Self {
        Self {
            id_token: id_token.into(),
            access_token: None,
            refresh_token: None,
        }
    }

    pub fn with_access_token<A: Into<String>>(mut self, access_token: A) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    pub fn with_refresh_token<R: Into<String>>(mut self, refresh_token: R) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }
}

impl fmt::Debug for AuthorizationCodeTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationCodeTokens")
            .field("id_token", &"[REDACTED]")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Encodes code flow tokens into session cookie state and back
#[async_trait]
pub trait TokenStateManager: Send + Sync {
    async fn create(
        &self,
        request: &RequestContext,
        tenant: &TenantConfig,
        tokens: &AuthorizationCodeTokens,
    ) -> Result<String>;

    async fn read(
        &self,
        request: &RequestContext,
        tenant: &TenantConfig,
        state: &str,
    ) -> Result<AuthorizationCodeTokens>;

    /// Release anything held for the state; must not require `read` first
    async fn delete(
        &self,
        request: &RequestContext,
        tenant: &TenantConfig,
        state: &str,
    ) -> Result<()>;
}
