//! Post-authentication identity review

use async_trait::async_trait;

use crate::auth::identity::SecurityIdentity;
use crate::error::Result;
use crate::request::RequestContext;

/// Reviews an identity after a mechanism has authenticated it
///
/// Returning an error rejects the request with 401 and another mechanism is
/// never tried afterwards. [`OidcError::CompletionAbort`](crate::error::OidcError)
/// is reported as is; any other error is reported as an authentication
/// failure. Implementations may also augment the identity, e.g. with roles
/// from an external store.
#[async_trait]
pub trait IdentityVeto: Send + Sync {
    async fn review(
        &self,
        identity: SecurityIdentity,
        request: &RequestContext,
    ) -> Result<SecurityIdentity>;
}
