//! Authentication mechanism abstraction

use std::fmt;

use actix_web::http::header;
use actix_web::HttpResponse;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auth::identity::SecurityIdentity;
use crate::error::Result;
use crate::request::RequestContext;
use crate::session::CookieDirective;
use crate::tenant::TenantConfig;

/// Supported HTTP authentication mechanisms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MechanismKind {
    Bearer,
    CodeFlow,
    Mtls,
    Basic,
}

impl MechanismKind {
    /// Order in which mechanisms are tried when nothing pins one
    pub const PRECEDENCE: [MechanismKind; 4] = [
        MechanismKind::Bearer,
        MechanismKind::CodeFlow,
        MechanismKind::Mtls,
        MechanismKind::Basic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MechanismKind::Bearer => "bearer",
            MechanismKind::CodeFlow => "code-flow",
            MechanismKind::Mtls => "mtls",
            MechanismKind::Basic => "basic",
        }
    }

    pub fn is_oidc(&self) -> bool {
        matches!(self, MechanismKind::Bearer | MechanismKind::CodeFlow)
    }
}

impl fmt::Display for MechanismKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response that ends the request before it reaches the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// 302 to the identity provider or back into the application
    Redirect {
        location: String,
        cookies: Vec<CookieDirective>,
    },
    /// 401, optionally with a `WWW-Authenticate` header
    Unauthorized {
        www_authenticate: Option<String>,
        cookies: Vec<CookieDirective>,
    },
}

impl Challenge {
    pub fn redirect<L: Into<String>>(location: L) -> Self {
        Challenge::Redirect {
            location: location.into(),
            cookies: Vec::new(),
        }
    }

    pub fn unauthorized(www_authenticate: Option<String>) -> Self {
        Challenge::Unauthorized {
            www_authenticate,
            cookies: Vec::new(),
        }
    }

    pub fn cookies(&self) -> &[CookieDirective] {
        match self {
            Challenge::Redirect { cookies, .. } | Challenge::Unauthorized { cookies, .. } => cookies,
        }
    }

    pub fn with_cookies<I: IntoIterator<Item = CookieDirective>>(mut self, extra: I) -> Self {
        match &mut self {
            Challenge::Redirect { cookies, .. } | Challenge::Unauthorized { cookies, .. } => {
                cookies.extend(extra)
            }
        }
        self
    }

    pub fn to_response(&self) -> HttpResponse {
        let mut builder = match self {
            Challenge::Redirect { location, .. } => {
                let mut builder = HttpResponse::Found();
                builder.insert_header((header::LOCATION, location.as_str()));
                builder
            }
            Challenge::Unauthorized {
                www_authenticate, ..
            } => {
                let mut builder = HttpResponse::Unauthorized();
                if let Some(value) = www_authenticate {
                    builder.insert_header((header::WWW_AUTHENTICATE, value.as_str()));
                }
                builder
            }
        };
        for cookie in self.cookies() {
            builder.cookie(cookie.to_cookie());
        }
        builder.finish()
    }
}

/// Result of running one mechanism against a request
#[derive(Debug, Clone)]
pub enum MechanismOutcome {
    /// The mechanism found nothing it could authenticate
    NoCredentials,
    Authenticated {
        identity: SecurityIdentity,
        cookies: Vec<CookieDirective>,
    },
    /// The mechanism answers the request itself (callback, logout, re-login)
    Respond(Challenge),
}

impl MechanismOutcome {
    pub fn authenticated(identity: SecurityIdentity) -> Self {
        MechanismOutcome::Authenticated {
            identity,
            cookies: Vec::new(),
        }
    }
}

/// An HTTP authentication mechanism
///
/// `authenticate` returns [`MechanismOutcome::NoCredentials`] when the request
/// carries nothing for this mechanism and an error when it carries credentials
/// that are rejected. A rejection is final; the next mechanism is not tried.
#[async_trait]
pub trait AuthenticationMechanism: Send + Sync {
    fn kind(&self) -> MechanismKind;

    /// Whether the mechanism can run for the tenant at all
    fn applies_to(&self, _tenant: &TenantConfig) -> bool {
        true
    }

    async fn authenticate(
        &self,
        request: &RequestContext,
        tenant: &TenantConfig,
    ) -> Result<MechanismOutcome>;

    /// Response asking the client to authenticate with this mechanism
    async fn challenge(
        &self,
        request: &RequestContext,
        tenant: &TenantConfig,
    ) -> Result<Option<Challenge>>;
}
