//! Authenticated security identity

use std::collections::BTreeSet;

use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpMessage, HttpRequest};
use futures_util::future::{ready, Ready};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::auth::mechanism::MechanismKind;
use crate::error::{OidcError, Result};
use crate::tenant::TenantConfig;

/// Claims tried for the principal name when the tenant does not name one
const PRINCIPAL_CLAIMS: [&str; 3] = ["upn", "preferred_username", "sub"];

/// Identity established for a request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityIdentity {
    pub principal: String,
    pub tenant_id: String,
    pub mechanism: Option<MechanismKind>,
    pub roles: BTreeSet<String>,
    pub attributes: Map<String, Value>,
    pub anonymous: bool,
}

impl SecurityIdentity {
    pub fn new<P: Into<String>, T: Into<String>>(
        principal: P,
        tenant_id: T,
        mechanism: MechanismKind,
    ) -> Self {
        Self {
            principal: principal.into(),
            tenant_id: tenant_id.into(),
            mechanism: Some(mechanism),
            roles: BTreeSet::new(),
            attributes: Map::new(),
            anonymous: false,
        }
    }

    pub fn anonymous<T: Into<String>>(tenant_id: T) -> Self {
        Self {
            principal: "anonymous".to_string(),
            tenant_id: tenant_id.into(),
            mechanism: None,
            roles: BTreeSet::new(),
            attributes: Map::new(),
            anonymous: true,
        }
    }

    /// Identity from verified token claims
    ///
    /// Roles are read from `groups` and from Keycloak style `realm_access.roles`.
    pub fn from_claims(
        tenant: &TenantConfig,
        mechanism: MechanismKind,
        claims: Map<String, Value>,
    ) -> Result<Self> {
        let principal = match &tenant.token.principal_claim {
            Some(claim) => claims.get(claim).and_then(Value::as_str),
            None => PRINCIPAL_CLAIMS
                .iter()
                .find_map(|claim| claims.get(*claim).and_then(Value::as_str)),
        }
        .ok_or_else(|| OidcError::auth("Token does not contain a principal name claim"))?
        .to_string();

        let mut roles = BTreeSet::new();
        let groups = claims.get("groups").and_then(Value::as_array);
        let realm_roles = claims
            .get("realm_access")
            .and_then(|access| access.get("roles"))
            .and_then(Value::as_array);
        for role in groups.into_iter().chain(realm_roles).flatten() {
            if let Some(role) = role.as_str() {
                roles.insert(role.to_string());
            }
        }

        Ok(Self {
            roles,
            attributes: claims,
            ..Self::new(principal, tenant.id(), mechanism)
        })
    }

    pub fn with_role<R: Into<String>>(mut self, role: R) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn with_attribute<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

impl FromRequest for SecurityIdentity {
    type Error = OidcError;
    type Future = Ready<std::result::Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<SecurityIdentity>()
                .cloned()
                .ok_or_else(|| OidcError::auth("Request has no security identity")),
        )
    }
}
