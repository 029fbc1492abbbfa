//! Configuration structures and loading for the oidc-tenancy server

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::auth::config::HttpAuthConfig;
use crate::auth::mtls::MtlsMechanism;
use crate::auth::selector::MechanismSelector;
use crate::config::environment::{EnvVars, EnvironmentOverrides};
use crate::credentials::CredentialsProviderConfig;
use crate::error::{OidcError, Result};
use crate::tenant::{TenantConfig, TenantRegistry};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub oidc: OidcConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(OidcError::config("Server host cannot be empty"));
        }
        if self.port == 0 {
            return Err(OidcError::config("Server port cannot be 0"));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (json, text)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        match self.format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(OidcError::config(format!(
                "Invalid log format '{}' (valid options: text, json)",
                other
            ))),
        }
    }
}

/// Tenant resolution settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolutionConfig {
    /// Resolve tenants from the unverified `iss` claim of bearer tokens
    #[serde(default)]
    pub issuer_based: bool,
}

/// Everything the authenticator is built from
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OidcConfig {
    /// The unnamed tenant; disabled when it has no authorization server
    #[serde(default)]
    pub default_tenant: TenantConfig,
    /// Named tenants keyed by tenant id
    #[serde(default)]
    pub tenants: BTreeMap<String, TenantConfig>,
    #[serde(default)]
    pub resolution: ResolutionConfig,
    #[serde(default)]
    pub http_auth: HttpAuthConfig,
    /// Named credentials providers tenants may reference for their client secret
    #[serde(default)]
    pub credentials_providers: BTreeMap<String, CredentialsProviderConfig>,
}

impl OidcConfig {
    /// Fail fast on tenant and policy configuration errors
    ///
    /// Credentials provider references are checked when the authenticator is
    /// built, since providers may also be registered in code.
    pub fn validate(&self) -> Result<()> {
        TenantRegistry::new(self.default_tenant.clone(), self.tenants.clone())?;
        MechanismSelector::new(&self.http_auth)?;

        if self.http_auth.inclusive && !self.http_auth.mtls.enabled {
            return Err(OidcError::config(
                "Inclusive authentication requires mTLS to be enabled",
            ));
        }
        if self.http_auth.mtls.enabled {
            MtlsMechanism::new(&self.http_auth.mtls)?;
        }
        Ok(())
    }
}

impl Config {
    /// Load .env files in order of precedence
    fn load_env_files() {
        let env = std::env::var(EnvVars::ENV)
            .or_else(|_| std::env::var("ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let env_specific_file = format!(".env.{}", env);
        let env_files = [".env", env_specific_file.as_str(), ".env.local"];

        for env_file in env_files {
            match dotenvy::from_filename(env_file) {
                Ok(_) => {
                    tracing::info!("Loaded environment variables from {}", env_file);
                }
                Err(e) if e.not_found() => {
                    tracing::debug!("No {} file found, skipping", env_file);
                }
                Err(e) => {
                    tracing::warn!("Failed to load {}: {}", env_file, e);
                }
            }
        }

        tracing::info!("Environment: {}", env);
    }

    /// Parse a configuration document without touching the environment
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| OidcError::config(format!("Failed to parse config file: {}", e)))
    }

    /// Load configuration from file with environment variables and CLI overrides
    ///
    /// Precedence: .env < file < environment < CLI.
    pub fn load<P: AsRef<Path>>(
        path: P,
        host_override: Option<String>,
        port_override: Option<u16>,
    ) -> Result<Self> {
        Self::load_env_files();

        let mut config = if path.as_ref().exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| OidcError::config(format!("Failed to read config file: {}", e)))?;
            Self::from_yaml(&content)?
        } else {
            tracing::warn!(
                path = %path.as_ref().display(),
                "Config file not found, using defaults"
            );
            Self::default()
        };

        config.apply_environment_overrides(&EnvironmentOverrides::load()?);

        if let Some(host) = host_override {
            config.server.host = host;
        }
        if let Some(port) = port_override {
            config.server.port = port;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn apply_environment_overrides(&mut self, overrides: &EnvironmentOverrides) {
        overrides.apply_to_config(self);
    }

    /// Validate the configuration with comprehensive checks
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.logging.validate()?;
        self.oidc.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MechanismKind;
    use std::io::Write;

    const SAMPLE: &str = r#"
server:
  port: 9090
oidc:
  default_tenant:
    auth_server_url: http://localhost:8180/realms/quarkus
    client_id: backend-service
  tenants:
    tenant-a:
      auth_server_url: http://localhost:8180/realms/tenant-a
      client_id: tenant-a
      tenant_paths: ["/tenant-a/*"]
      credentials:
        provider:
          name: vault
  credentials_providers:
    vault:
      type: static
      keyrings:
        tenant-a:
          client-secret: secret
  http_auth:
    permissions:
      - name: bearer-only
        paths: ["/api/*"]
        auth_mechanism: bearer
"#;

    #[test]
    fn parses_full_document() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.oidc.tenants.len(), 1);
        assert_eq!(
            config.oidc.http_auth.permissions[0].auth_mechanism,
            Some(MechanismKind::Bearer)
        );
        assert!(config.oidc.credentials_providers.contains_key("vault"));
        config.validate().unwrap();
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.logging.level, "info");
        assert!(config.oidc.tenants.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn rejects_invalid_tenant_at_startup() {
        let config = Config::from_yaml(
            r#"
oidc:
  tenants:
    broken:
      auth_server_url: http://localhost:8180
      token:
        verify_access_token_with_user_info: true
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, OidcError::Config { .. }));
    }

    #[test]
    fn inclusive_requires_mtls() {
        let config = Config::from_yaml(
            r#"
oidc:
  http_auth:
    inclusive: true
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn forwarded_certificate_header_requires_trusted_proxies() {
        let config = Config::from_yaml(
            r#"
oidc:
  http_auth:
    mtls:
      enabled: true
      certificate_header: X-Client-Cert-Subject
"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate().unwrap_err(),
            OidcError::Config { .. }
        ));

        let config = Config::from_yaml(
            r#"
oidc:
  http_auth:
    mtls:
      enabled: true
      certificate_header: X-Client-Cert-Subject
      trusted_proxies: ["10.0.0.0/8", "127.0.0.1"]
"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_applies_cli_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::load(file.path(), Some("0.0.0.0".to_string()), Some(7070)).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 7070);
    }
}
