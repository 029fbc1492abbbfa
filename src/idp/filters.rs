//! Request and response filters for identity provider calls
//!
//! Filters are registered once at startup together with the scope they apply
//! to. A scope component left as `None` matches any value.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::auth::MechanismKind;

/// Identity provider endpoint a call is made to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OidcEndpoint {
    Discovery,
    Jwks,
    Token,
    Introspection,
    UserInfo,
}

impl fmt::Display for OidcEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OidcEndpoint::Discovery => "discovery",
            OidcEndpoint::Jwks => "jwks",
            OidcEndpoint::Token => "token",
            OidcEndpoint::Introspection => "introspection",
            OidcEndpoint::UserInfo => "userinfo",
        };
        f.write_str(name)
    }
}

/// Where a filter applies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterScope {
    pub mechanism: Option<MechanismKind>,
    pub endpoint: Option<OidcEndpoint>,
    pub tenant_id: Option<String>,
}

impl FilterScope {
    /// Matches every call
    pub fn any() -> Self {
        Self::default()
    }

    pub fn mechanism(mut self, mechanism: MechanismKind) -> Self {
        self.mechanism = Some(mechanism);
        self
    }

    pub fn endpoint(mut self, endpoint: OidcEndpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn tenant<S: Into<String>>(mut self, tenant_id: S) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn matches(&self, mechanism: MechanismKind, endpoint: OidcEndpoint, tenant_id: &str) -> bool {
        self.mechanism.map_or(true, |m| m == mechanism)
            && self.endpoint.map_or(true, |e| e == endpoint)
            && self.tenant_id.as_deref().map_or(true, |t| t == tenant_id)
    }
}

/// Outgoing call, mutable by request filters
#[derive(Debug, Clone)]
pub struct OidcRequestContext {
    pub tenant_id: String,
    pub mechanism: MechanismKind,
    pub endpoint: OidcEndpoint,
    pub method: reqwest::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
}

/// Provider response, mutable by response filters before it is parsed
#[derive(Debug, Clone)]
pub struct OidcResponseContext {
    pub tenant_id: String,
    pub mechanism: MechanismKind,
    pub endpoint: OidcEndpoint,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

pub trait OidcRequestFilter: Send + Sync {
    fn filter(&self, request: &mut OidcRequestContext);
}

pub trait OidcResponseFilter: Send + Sync {
    fn filter(&self, response: &mut OidcResponseContext);
}

/// Scoped filter registrations, fixed after startup
#[derive(Default, Clone)]
pub struct FilterRegistry {
    request_filters: Vec<(FilterScope, Arc<dyn OidcRequestFilter>)>,
    response_filters: Vec<(FilterScope, Arc<dyn OidcResponseFilter>)>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_filter(mut self, scope: FilterScope, filter: Arc<dyn OidcRequestFilter>) -> Self {
        self.request_filters.push((scope, filter));
        self
    }

    pub fn with_response_filter(mut self, scope: FilterScope, filter: Arc<dyn OidcResponseFilter>) -> Self {
        self.response_filters.push((scope, filter));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.request_filters.is_empty() && self.response_filters.is_empty()
    }

    /// Run every request filter whose scope matches, in registration order
    pub fn apply_request(&self, request: &mut OidcRequestContext) {
        for (scope, filter) in &self.request_filters {
            if scope.matches(request.mechanism, request.endpoint, &request.tenant_id) {
                trace!(endpoint = %request.endpoint, tenant_id = %request.tenant_id, "Applying OIDC request filter");
                filter.filter(request);
            }
        }
    }

    /// Run every response filter whose scope matches, in registration order
    pub fn apply_response(&self, response: &mut OidcResponseContext) {
        for (scope, filter) in &self.response_filters {
            if scope.matches(response.mechanism, response.endpoint, &response.tenant_id) {
                trace!(endpoint = %response.endpoint, tenant_id = %response.tenant_id, "Applying OIDC response filter");
                filter.filter(response);
            }
        }
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("request_filters", &self.request_filters.len())
            .field("response_filters", &self.response_filters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AddHeader(&'static str);

    impl OidcRequestFilter for AddHeader {
        fn filter(&self, request: &mut OidcRequestContext) {
            request.headers.push((self.0.to_string(), "true".to_string()));
        }
    }

    fn request(mechanism: MechanismKind, endpoint: OidcEndpoint, tenant_id: &str) -> OidcRequestContext {
        OidcRequestContext {
            tenant_id: tenant_id.to_string(),
            mechanism,
            endpoint,
            method: reqwest::Method::POST,
            url: "http://localhost/token".to_string(),
            headers: Vec::new(),
            form: Vec::new(),
        }
    }

    #[test]
    fn scope_components_are_wildcards_when_unset() {
        let scope = FilterScope::any().endpoint(OidcEndpoint::Token);
        assert!(scope.matches(MechanismKind::CodeFlow, OidcEndpoint::Token, "a"));
        assert!(scope.matches(MechanismKind::Bearer, OidcEndpoint::Token, "b"));
        assert!(!scope.matches(MechanismKind::Bearer, OidcEndpoint::Jwks, "b"));
    }

    #[test]
    fn filters_fire_only_within_scope() {
        let registry = FilterRegistry::new()
            .with_request_filter(
                FilterScope::any().mechanism(MechanismKind::CodeFlow).tenant("tenant-a"),
                Arc::new(AddHeader("code-flow-a")),
            )
            .with_request_filter(
                FilterScope::any().mechanism(MechanismKind::Bearer),
                Arc::new(AddHeader("bearer")),
            );

        let mut code_flow_a = request(MechanismKind::CodeFlow, OidcEndpoint::Token, "tenant-a");
        registry.apply_request(&mut code_flow_a);
        assert_eq!(code_flow_a.headers.len(), 1);
        assert_eq!(code_flow_a.headers[0].0, "code-flow-a");

        let mut code_flow_b = request(MechanismKind::CodeFlow, OidcEndpoint::Token, "tenant-b");
        registry.apply_request(&mut code_flow_b);
        assert!(code_flow_b.headers.is_empty());

        let mut bearer = request(MechanismKind::Bearer, OidcEndpoint::Introspection, "tenant-b");
        registry.apply_request(&mut bearer);
        assert_eq!(bearer.headers[0].0, "bearer");
    }
}
