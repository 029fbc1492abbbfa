//! Registry of named credentials providers

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use secrecy::Secret;
use tracing::{debug, info};

use crate::credentials::provider::{
    CredentialsProvider, CredentialsProviderConfig, EnvironmentCredentialsProvider,
    RotatingCredentialsProvider, StaticCredentialsProvider,
};

/// Secret lookup key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialsRequest {
    pub provider_name: String,
    pub keyring_name: String,
    pub key: String,
}

impl fmt::Display for CredentialsRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.provider_name, self.keyring_name, self.key)
    }
}

/// Named providers queried at request time
#[derive(Default)]
pub struct CredentialsProviderRegistry {
    providers: DashMap<String, Arc<dyn CredentialsProvider>>,
}

impl CredentialsProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the `credentials_providers` configuration section
    pub fn from_config(config: &BTreeMap<String, CredentialsProviderConfig>) -> Self {
        let registry = Self::new();
        for (name, provider) in config {
            let provider: Arc<dyn CredentialsProvider> = match provider {
                CredentialsProviderConfig::Static { keyrings } => {
                    Arc::new(StaticCredentialsProvider::new(keyrings.clone()))
                }
                CredentialsProviderConfig::Rotating { keyrings } => {
                    Arc::new(RotatingCredentialsProvider::new(keyrings.clone()))
                }
                CredentialsProviderConfig::Environment { prefix } => {
                    Arc::new(EnvironmentCredentialsProvider::new(prefix.clone()))
                }
            };
            registry.register(name.clone(), provider);
        }
        registry
    }

    pub fn register<N: Into<String>>(&self, name: N, provider: Arc<dyn CredentialsProvider>) {
        let name = name.into();
        info!(provider = %name, "Registered credentials provider");
        self.providers.insert(name, provider);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Resolve a secret; unknown providers, keyrings and keys yield `None`
    pub async fn resolve(
        &self,
        request: &CredentialsRequest,
        attempt: u32,
    ) -> Option<Secret<String>> {
        // Clone the provider out so no shard lock is held across the await
        let provider = match self.providers.get(&request.provider_name) {
            Some(entry) => entry.value().clone(),
            None => {
                debug!(provider = %request.provider_name, "Unknown credentials provider");
                return None;
            }
        };

        let mut credentials = provider
            .get_credentials(&request.keyring_name, attempt)
            .await;
        let secret = credentials.remove(&request.key);
        if secret.is_none() {
            debug!(request = %request, attempt, "Credentials provider returned no value");
        }
        secret
    }
}

impl fmt::Debug for CredentialsProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn request(provider: &str, keyring: &str, key: &str) -> CredentialsRequest {
        CredentialsRequest {
            provider_name: provider.to_string(),
            keyring_name: keyring.to_string(),
            key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn unknown_lookups_return_none() {
        let registry = CredentialsProviderRegistry::new();
        registry.register(
            "vault",
            Arc::new(StaticCredentialsProvider::default().with_secret("a", "client-secret", "s")),
        );

        assert!(registry.resolve(&request("missing", "a", "client-secret"), 0).await.is_none());
        assert!(registry.resolve(&request("vault", "b", "client-secret"), 0).await.is_none());
        assert!(registry.resolve(&request("vault", "a", "other"), 0).await.is_none());

        let secret = registry
            .resolve(&request("vault", "a", "client-secret"), 0)
            .await
            .unwrap();
        assert_eq!(secret.expose_secret(), "s");
    }

    #[test]
    fn builds_from_config() {
        let yaml = r#"
vault:
  type: static
  keyrings:
    tenant-a:
      client-secret: secret
env:
  type: environment
"#;
        let config: BTreeMap<String, CredentialsProviderConfig> = serde_yaml::from_str(yaml).unwrap();
        let registry = CredentialsProviderRegistry::from_config(&config);
        assert_eq!(registry.names(), vec!["env".to_string(), "vault".to_string()]);
        assert!(registry.contains("vault"));
    }
}
