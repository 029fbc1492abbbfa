//! Credentials providers
//!
//! Client secrets can be resolved at request time from named providers
//! instead of being fixed in configuration, which allows rotating secrets.

pub mod provider;
pub mod refresh;
pub mod registry;

pub use provider::{
    CredentialsProvider, CredentialsProviderConfig, EnvironmentCredentialsProvider,
    RotatingCredentialsProvider, StaticCredentialsProvider,
};
pub use refresh::ClientSecretResolver;
pub use registry::{CredentialsProviderRegistry, CredentialsRequest};
