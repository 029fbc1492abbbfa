//! Multi-tenant OIDC authentication for actix-web
//!
//! Resolves the tenant of every request, selects the authentication
//! mechanism for its path, keeps per-tenant code flow sessions apart and
//! supplies client secrets through pluggable credentials providers.

pub mod auth;
pub mod config;
pub mod credentials;
pub mod error;
pub mod idp;
pub mod path_pattern;
pub mod request;
pub mod server;
pub mod session;
pub mod startup;
pub mod tenant;
pub mod token_state;

pub use auth::{OidcAuthentication, OidcAuthenticator, SecurityIdentity};
pub use config::{Config, OidcConfig};
pub use error::{OidcError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
