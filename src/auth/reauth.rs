//! Reauthentication when a session belongs to another tenant
//!
//! A session cookie issued for tenant A is never reused for tenant B. When B
//! is resolved, A's session and state cookies are cleared and B has to
//! authenticate on its own:
//! `NO_SESSION -> AUTHENTICATED(A) -> [request for B] -> NO_SESSION -> 302 -> AUTHENTICATED(B)`.

use tracing::info;

use crate::request::RequestContext;
use crate::session::{session_cookie_name, state_cookie_name, CookieDirective, SessionState};
use crate::tenant::{TenantConfig, TenantRegistry};

/// What to do about sessions of other tenants
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReauthDecision {
    /// Sessions presented for tenants other than the resolved one
    pub foreign_sessions: Vec<SessionState>,
    /// Cookies clearing those sessions
    pub clear: Vec<CookieDirective>,
    /// The resolved tenant must start a new login instead of trying mechanisms
    pub force_challenge: bool,
}

impl ReauthDecision {
    pub fn is_switch(&self) -> bool {
        !self.foreign_sessions.is_empty()
    }
}

pub struct ReauthenticationTrigger;

impl ReauthenticationTrigger {
    /// Decide how to handle foreign sessions for the resolved tenant
    ///
    /// A challenge is forced only for code flow tenants that have neither a
    /// session nor a login in progress; other tenants fall through to normal
    /// mechanism selection with the foreign cookies cleared.
    pub fn evaluate(
        request: &RequestContext,
        tenant: &TenantConfig,
        registry: &TenantRegistry,
    ) -> ReauthDecision {
        let foreign_sessions: Vec<SessionState> = SessionState::all(request)
            .into_iter()
            .filter(|session| session.tenant_id != tenant.id())
            .collect();
        if foreign_sessions.is_empty() {
            return ReauthDecision::default();
        }

        let mut clear = Vec::new();
        for session in &foreign_sessions {
            let cookie_path = registry
                .get(&session.tenant_id)
                .map(|foreign| foreign.authentication.cookie_path.clone())
                .unwrap_or_else(|| "/".to_string());
            clear.push(CookieDirective::remove(
                session_cookie_name(&session.tenant_id),
                &cookie_path,
                request,
            ));
            let state_cookie = state_cookie_name(&session.tenant_id);
            if request.cookie(&state_cookie).is_some() {
                clear.push(CookieDirective::remove(state_cookie, &cookie_path, request));
            }
        }

        let own_session = SessionState::for_tenant(request, tenant.id()).is_some();
        let login_in_progress = request.cookie(&state_cookie_name(tenant.id())).is_some();
        let force_challenge =
            tenant.application_type.uses_code_flow() && !own_session && !login_in_progress;

        info!(
            tenant_id = %tenant.id(),
            previous = ?foreign_sessions.iter().map(|s| s.tenant_id.as_str()).collect::<Vec<_>>(),
            force_challenge,
            "Session belongs to another tenant, clearing it"
        );

        ReauthDecision {
            foreign_sessions,
            clear,
            force_challenge,
        }
    }
}
