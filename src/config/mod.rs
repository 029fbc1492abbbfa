//! Configuration module
//!
//! YAML configuration, `.env` loading and environment overrides.

mod config;
pub mod environment;
pub mod secret;

pub use config::{Config, LoggingConfig, OidcConfig, ResolutionConfig, ServerConfig};
pub use environment::{EnvVars, EnvironmentOverrides};
