//! Environment variable integration for oidc-tenancy configuration

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{OidcError, Result};

/// Environment variable names used by oidc-tenancy
pub struct EnvVars;

impl EnvVars {
    pub const ENV: &'static str = "OIDC_TENANCY_ENV";
    pub const HOST: &'static str = "OIDC_TENANCY_HOST";
    pub const PORT: &'static str = "OIDC_TENANCY_PORT";
    pub const LOG_LEVEL: &'static str = "OIDC_TENANCY_LOG_LEVEL";
    pub const CONFIG_PATH: &'static str = "OIDC_TENANCY_CONFIG_PATH";
}

/// Environment configuration overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub config_path: Option<PathBuf>,
}

impl EnvironmentOverrides {
    /// Load overrides from the process environment
    pub fn load() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load overrides through `lookup`; empty values are ignored
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut overrides = EnvironmentOverrides::default();

        if let Some(host) = get(EnvVars::HOST) {
            debug!("Environment override: {}={}", EnvVars::HOST, host);
            overrides.host = Some(host);
        }

        if let Some(port_str) = get(EnvVars::PORT) {
            match port_str.parse::<u16>() {
                Ok(port) => {
                    debug!("Environment override: {}={}", EnvVars::PORT, port);
                    overrides.port = Some(port);
                }
                Err(e) => {
                    warn!("Invalid {}: {} ({})", EnvVars::PORT, port_str, e);
                    return Err(OidcError::config(format!(
                        "Invalid {} environment variable: {}",
                        EnvVars::PORT,
                        e
                    )));
                }
            }
        }

        if let Some(level) = get(EnvVars::LOG_LEVEL) {
            debug!("Environment override: {}={}", EnvVars::LOG_LEVEL, level);
            overrides.log_level = Some(level);
        }

        if let Some(path) = get(EnvVars::CONFIG_PATH) {
            let path = PathBuf::from(path);
            debug!("Environment override: {}={:?}", EnvVars::CONFIG_PATH, path);
            overrides.config_path = Some(path);
        }

        Ok(overrides)
    }

    /// Apply environment overrides to a config
    pub fn apply_to_config(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            if &config.server.host != host {
                info!(
                    "Environment override: server.host changed from {} to {}",
                    config.server.host, host
                );
            }
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            if config.server.port != port {
                info!(
                    "Environment override: server.port changed from {} to {}",
                    config.server.port, port
                );
            }
            config.server.port = port;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }

    /// Get the effective config file path (with environment override)
    pub fn get_config_path(&self, default_path: &std::path::Path) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| default_path.to_path_buf())
    }

    pub fn has_overrides(&self) -> bool {
        self.host.is_some()
            || self.port.is_some()
            || self.log_level.is_some()
            || self.config_path.is_some()
    }

    /// Summary of active overrides for logging
    pub fn get_override_summary(&self) -> Vec<String> {
        let mut summary = Vec::new();
        if let Some(host) = &self.host {
            summary.push(format!("{}={}", EnvVars::HOST, host));
        }
        if let Some(port) = self.port {
            summary.push(format!("{}={}", EnvVars::PORT, port));
        }
        if let Some(level) = &self.log_level {
            summary.push(format!("{}={}", EnvVars::LOG_LEVEL, level));
        }
        if let Some(path) = &self.config_path {
            summary.push(format!("{}={:?}", EnvVars::CONFIG_PATH, path));
        }
        summary
    }
}
