//! Identity provider communication
//!
//! [`IdentityProviderClient`] abstracts the token, introspection, UserInfo,
//! JWKS and discovery calls; [`HttpIdentityProviderClient`] implements it with
//! reqwest and applies the scoped request/response filters.

pub mod client;
pub mod filters;
pub mod http;

pub use client::{
    IdentityProviderClient, IdpError, IntrospectionResponse, ProviderMetadata, TokenGrant,
    TokenResponse,
};
pub use filters::{
    FilterRegistry, FilterScope, OidcEndpoint, OidcRequestContext, OidcRequestFilter,
    OidcResponseContext, OidcResponseFilter,
};
pub use http::{HttpIdentityProviderClient, DEFAULT_CACHE_CAPACITY};
