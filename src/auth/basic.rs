//! HTTP basic authentication against configured users

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::auth::config::{BasicAuthConfig, BasicUser};
use crate::auth::identity::SecurityIdentity;
use crate::auth::mechanism::{AuthenticationMechanism, Challenge, MechanismKind, MechanismOutcome};
use crate::error::{OidcError, Result};
use crate::request::RequestContext;
use crate::tenant::TenantConfig;

pub struct BasicMechanism {
    realm: String,
    users: BTreeMap<String, BasicUser>,
}

impl BasicMechanism {
    pub fn new(config: &BasicAuthConfig) -> Self {
        Self {
            realm: config.realm.clone(),
            users: config.users.clone(),
        }
    }

    /// `user:password` from `Authorization: Basic`, `None` for other schemes
    fn credentials(request: &RequestContext) -> Result<Option<(String, String)>> {
        let Some(value) = request.header("authorization") else {
            return Ok(None);
        };
        let Some((scheme, encoded)) = value.split_once(' ') else {
            return Ok(None);
        };
        if !scheme.eq_ignore_ascii_case("basic") {
            return Ok(None);
        }

        let decoded = STANDARD
            .decode(encoded.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| OidcError::auth("Malformed basic credentials"))?;
        let (user, password) = decoded
            .split_once(':')
            .ok_or_else(|| OidcError::auth("Malformed basic credentials"))?;
        Ok(Some((user.to_string(), password.to_string())))
    }
}

#[async_trait]
impl AuthenticationMechanism for BasicMechanism {
    fn kind(&self) -> MechanismKind {
        MechanismKind::Basic
    }

    async fn authenticate(
        &self,
        request: &RequestContext,
        tenant: &TenantConfig,
    ) -> Result<MechanismOutcome> {
        let Some((username, password)) = Self::credentials(request)? else {
            return Ok(MechanismOutcome::NoCredentials);
        };

        let user = self
            .users
            .get(&username)
            .ok_or_else(|| OidcError::auth("Invalid username or password"))?;
        let expected = Sha256::digest(user.password.expose_secret().as_bytes());
        if !constant_time_eq(&Sha256::digest(password.as_bytes()), &expected) {
            return Err(OidcError::auth("Invalid username or password"));
        }

        debug!(user = %username, "Basic authentication succeeded");
        let identity = user.roles.iter().fold(
            SecurityIdentity::new(username, tenant.id(), MechanismKind::Basic),
            |identity, role| identity.with_role(role.clone()),
        );
        Ok(MechanismOutcome::authenticated(identity))
    }

    async fn challenge(
        &self,
        _request: &RequestContext,
        _tenant: &TenantConfig,
    ) -> Result<Option<Challenge>> {
        Ok(Some(Challenge::unauthorized(Some(format!(
            "Basic realm=\"{}\"",
            self.realm
        )))))
    }
}

/// Equality whose running time depends only on the input length
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |diff, (x, y)| diff | (x ^ y))
        == 0
}
