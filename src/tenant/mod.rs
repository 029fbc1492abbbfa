//! Tenant configuration, registry and resolution

pub mod config;
pub mod registry;
pub mod resolver;

pub use config::{
    ApplicationType, AuthenticationSettings, ClientAuthMethod, ClientCredentials, LogoutSettings,
    ProviderReference, TenantConfig, TokenSettings, TokenStateSettings, TokenStateStrategy,
    DEFAULT_TENANT_ID,
};
pub use registry::TenantRegistry;
pub use resolver::{
    unverified_issuer, ResolutionStrategy, ResolvedTenant, TenantConfigResolver, TenantResolver,
    TenantResolverChain,
};
