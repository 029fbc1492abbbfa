//! Session and state cookie handling
//!
//! The session cookie is `q_session` for the default tenant and
//! `q_session_<tenant_id>` for named tenants; the code flow state cookie
//! follows the same scheme with `q_auth`.

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};

use crate::request::RequestContext;
use crate::tenant::{TenantConfig, DEFAULT_TENANT_ID};

pub const SESSION_COOKIE: &str = "q_session";
pub const STATE_COOKIE: &str = "q_auth";

/// Code flow state cookie lifetime
pub const STATE_COOKIE_MAX_AGE: i64 = 30 * 60;

fn tenant_cookie_name(base: &str, tenant_id: &str) -> String {
    if tenant_id == DEFAULT_TENANT_ID {
        base.to_string()
    } else {
        format!("{}_{}", base, tenant_id)
    }
}

pub fn session_cookie_name(tenant_id: &str) -> String {
    tenant_cookie_name(SESSION_COOKIE, tenant_id)
}

pub fn state_cookie_name(tenant_id: &str) -> String {
    tenant_cookie_name(STATE_COOKIE, tenant_id)
}

/// Session bound to a tenant, as presented by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub tenant_id: String,
    pub encoded_token_blob: String,
}

impl SessionState {
    /// Every session cookie on the request, in cookie name order
    pub fn all(request: &RequestContext) -> Vec<SessionState> {
        let mut sessions: Vec<SessionState> = request
            .cookies()
            .filter_map(|(name, value)| {
                let tenant_id = if name == SESSION_COOKIE {
                    DEFAULT_TENANT_ID
                } else {
                    name.strip_prefix(SESSION_COOKIE)?.strip_prefix('_')?
                };
                if tenant_id.is_empty() {
                    return None;
                }
                Some(SessionState {
                    tenant_id: tenant_id.to_string(),
                    encoded_token_blob: value.to_string(),
                })
            })
            .collect();
        sessions.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        sessions
    }

    pub fn for_tenant(request: &RequestContext, tenant_id: &str) -> Option<SessionState> {
        request
            .cookie(&session_cookie_name(tenant_id))
            .map(|value| SessionState {
                tenant_id: tenant_id.to_string(),
                encoded_token_blob: value.to_string(),
            })
    }
}

/// Cookie to set or clear on the response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieDirective {
    pub name: String,
    pub value: String,
    /// Seconds; zero clears the cookie
    pub max_age: i64,
    pub path: String,
    pub http_only: bool,
    pub secure: bool,
}

impl CookieDirective {
    pub fn set<N: Into<String>, V: Into<String>>(
        name: N,
        value: V,
        max_age: i64,
        tenant: &TenantConfig,
        request: &RequestContext,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age,
            path: tenant.authentication.cookie_path.clone(),
            http_only: true,
            secure: request.is_https(),
        }
    }

    pub fn remove<N: Into<String>>(name: N, path: &str, request: &RequestContext) -> Self {
        Self {
            name: name.into(),
            value: String::new(),
            max_age: 0,
            path: path.to_string(),
            http_only: true,
            secure: request.is_https(),
        }
    }

    pub fn is_removal(&self) -> bool {
        self.max_age == 0
    }

    pub fn to_cookie(&self) -> Cookie<'static> {
        let mut cookie = Cookie::build(self.name.clone(), self.value.clone())
            .path(self.path.clone())
            .http_only(self.http_only)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(CookieDuration::seconds(self.max_age))
            .finish();
        if self.is_removal() {
            cookie.make_removal();
        }
        cookie
    }
}
