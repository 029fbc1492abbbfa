//! HTTP authentication policy configuration

use std::collections::BTreeMap;

use secrecy::Secret;
use serde::Deserialize;

use crate::auth::mechanism::MechanismKind;
use crate::config::secret::secret_string;

/// What a matched path requires
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// An identity is required
    #[default]
    Authenticated,
    /// Credentials are verified when present, anonymous access otherwise
    Permit,
}

/// Path permission, optionally pinning the authentication mechanism
#[derive(Debug, Clone, Deserialize)]
pub struct PathPermission {
    pub name: String,
    pub paths: Vec<String>,
    #[serde(default)]
    pub policy: PolicyKind,
    #[serde(default)]
    pub auth_mechanism: Option<MechanismKind>,
}

/// Mechanism restriction attached to application endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointBinding {
    pub paths: Vec<String>,
    pub mechanism: MechanismKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasicUser {
    #[serde(with = "secret_string")]
    pub password: Secret<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasicAuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_realm")]
    pub realm: String,
    #[serde(default)]
    pub users: BTreeMap<String, BasicUser>,
}

impl Default for BasicAuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            realm: default_realm(),
            users: BTreeMap::new(),
        }
    }
}

fn default_realm() -> String {
    "oidc-tenancy".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MtlsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Header carrying the client certificate subject set by a TLS terminating proxy
    #[serde(default)]
    pub certificate_header: Option<String>,
    /// Peer addresses or CIDR ranges whose `certificate_header` is honoured
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
}

/// `oidc.http_auth` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpAuthConfig {
    /// mTLS must succeed and every other mechanism with credentials must agree
    #[serde(default)]
    pub inclusive: bool,
    #[serde(default)]
    pub permissions: Vec<PathPermission>,
    #[serde(default)]
    pub endpoint_bindings: Vec<EndpointBinding>,
    #[serde(default)]
    pub basic: BasicAuthConfig,
    #[serde(default)]
    pub mtls: MtlsConfig,
}
