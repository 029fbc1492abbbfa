//! HTTP authentication
//!
//! Mechanisms (OIDC bearer, OIDC code flow, mTLS, basic), path based
//! mechanism selection, reauthentication on tenant switch and the actix-web
//! middleware tying them together behind [`OidcAuthenticator`].

pub mod authenticator;
pub mod basic;
pub mod bearer;
pub mod code_flow;
pub mod config;
pub mod identity;
pub mod mechanism;
pub mod middleware;
pub mod mtls;
pub mod reauth;
pub mod selector;
pub mod trusted_proxy;
pub mod verifier;
pub mod veto;

pub use authenticator::{AuthOutcome, OidcAuthenticator, OidcAuthenticatorBuilder};
pub use basic::BasicMechanism;
pub use bearer::BearerMechanism;
pub use code_flow::CodeFlowMechanism;
pub use config::{
    BasicAuthConfig, BasicUser, EndpointBinding, HttpAuthConfig, MtlsConfig, PathPermission,
    PolicyKind,
};
pub use identity::SecurityIdentity;
pub use mechanism::{AuthenticationMechanism, Challenge, MechanismKind, MechanismOutcome};
pub use middleware::OidcAuthentication;
pub use mtls::MtlsMechanism;
pub use reauth::{ReauthDecision, ReauthenticationTrigger};
pub use selector::{MechanismSelector, Selection};
pub use trusted_proxy::TrustedProxies;
pub use verifier::{TokenRejection, TokenVerifier};
pub use veto::IdentityVeto;
